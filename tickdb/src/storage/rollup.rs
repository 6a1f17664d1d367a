//! Incremental rollup statistics.
//!
//! Every node pointer caches a [`Summary`] of the subtree it points at. Leaf
//! summaries are folded from raw points; interior summaries are folded from
//! child summaries in key order, so `first`/`last` stay chronological.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::codec::{CodecError, Decoder, Encoder};
use crate::storage::point::{Fields, Point};

/// Encoded size of one [`ReducedValue`]: five `f64` plus a `u16` count.
pub const REDUCED_VALUE_LEN: usize = 5 * 8 + 2;

/// Aggregate statistics for one field over a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReducedValue {
    pub sum: f64,
    pub max: f64,
    pub min: f64,
    pub first: f64,
    pub last: f64,
    /// Saturates at `u16::MAX`; see [`GroupTotals`] for wider counts.
    pub count: u16,
}

/// Per-field statistics for a subtree.
pub type Summary = BTreeMap<String, ReducedValue>;

impl ReducedValue {
    /// Statistics for a single sample.
    #[must_use]
    pub const fn single(value: f64) -> Self {
        Self {
            sum: value,
            max: value,
            min: value,
            first: value,
            last: value,
            count: 1,
        }
    }

    /// Fold in statistics for samples that come strictly after these.
    pub fn absorb(&mut self, later: &Self) {
        self.sum += later.sum;
        if later.max > self.max {
            self.max = later.max;
        }
        if later.min < self.min {
            self.min = later.min;
        }
        self.last = later.last;
        self.count = self.count.saturating_add(later.count);
    }

    /// Apply a reducer to produce one output value.
    #[must_use]
    pub fn reduce(&self, reducer: Reducer) -> f64 {
        self.reduce_counted(reducer, u32::from(self.count))
    }

    /// Apply a reducer using `count` in place of the stored count.
    #[must_use]
    pub fn reduce_counted(&self, reducer: Reducer, count: u32) -> f64 {
        match reducer {
            Reducer::Sum => self.sum,
            Reducer::Max => self.max,
            Reducer::Min => self.min,
            Reducer::First => self.first,
            Reducer::Last => self.last,
            Reducer::Count => f64::from(count),
            Reducer::Avg => {
                if count == 0 {
                    0.0
                } else {
                    self.sum / f64::from(count)
                }
            }
        }
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_f64(self.sum);
        enc.put_f64(self.max);
        enc.put_f64(self.min);
        enc.put_f64(self.first);
        enc.put_f64(self.last);
        enc.put_u16(self.count);
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sum: dec.f64()?,
            max: dec.f64()?,
            min: dec.f64()?,
            first: dec.f64()?,
            last: dec.f64()?,
            count: dec.u16()?,
        })
    }
}

/// Fold `later` into `acc` field by field.
pub fn merge_into(acc: &mut Summary, later: &Summary) {
    for (name, value) in later {
        match acc.get_mut(name) {
            Some(existing) => existing.absorb(value),
            None => {
                acc.insert(name.clone(), *value);
            }
        }
    }
}

/// Per-field statistics merged across entries at query time.
///
/// Stored counts are `u16`, so a single bucket holding more than 65535
/// samples of a field already reports a saturated count. Merging buckets here
/// keeps a `u32` count, which stays exact as long as each bucket is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTotals {
    fields: BTreeMap<String, (ReducedValue, u32)>,
}

impl GroupTotals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in statistics for samples that come strictly after these.
    pub fn absorb(&mut self, later: &Summary) {
        for (name, value) in later {
            match self.fields.get_mut(name) {
                Some((existing, count)) => {
                    existing.absorb(value);
                    *count = count.saturating_add(u32::from(value.count));
                }
                None => {
                    self.fields
                        .insert(name.clone(), (*value, u32::from(value.count)));
                }
            }
        }
    }

    /// Number of samples of `field` seen so far.
    #[must_use]
    pub fn count(&self, field: &str) -> u32 {
        self.fields.get(field).map_or(0, |(_, count)| *count)
    }

    /// Apply `reducers`; fields never seen report `0.0`.
    #[must_use]
    pub fn reduce(&self, reducers: &BTreeMap<String, Reducer>) -> Fields {
        reducers
            .iter()
            .map(|(name, reducer)| {
                let value = self
                    .fields
                    .get(name)
                    .map_or(0.0, |(value, count)| value.reduce_counted(*reducer, *count));
                (name.clone(), value)
            })
            .collect()
    }
}

/// Summary of timestamp-ordered points.
#[must_use]
pub fn summarize_points(points: &[Point]) -> Summary {
    let mut summary = Summary::new();
    for point in points {
        for (name, value) in &point.fields {
            let single = ReducedValue::single(*value);
            match summary.get_mut(name) {
                Some(existing) => existing.absorb(&single),
                None => {
                    summary.insert(name.clone(), single);
                }
            }
        }
    }
    summary
}

/// Summary of a single point.
#[must_use]
pub fn summarize_point(point: &Point) -> Summary {
    point
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), ReducedValue::single(*value)))
        .collect()
}

/// Aggregation applied to a field when reading buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Sum,
    Max,
    Min,
    First,
    Last,
    /// Samples per field; exact up to 65535 per stored bucket.
    Count,
    /// `sum / count`, subject to the same count limit.
    Avg,
}

impl Reducer {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::First => "first",
            Self::Last => "last",
            Self::Count => "count",
            Self::Avg => "avg",
        }
    }
}

impl std::fmt::Display for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Reducer {
    type Err = UnknownReducer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "count" => Ok(Self::Count),
            "avg" => Ok(Self::Avg),
            other => Err(UnknownReducer(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognised reducer name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownReducer(pub String);

impl std::fmt::Display for UnknownReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown reducer '{}'; expected one of sum, max, min, first, last, count, avg",
            self.0
        )
    }
}

impl std::error::Error for UnknownReducer {}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: i64, open: f64) -> Point {
        Point::new(ts, Fields::from([("open".to_string(), open)]))
    }

    #[test]
    fn test_summarize_points() {
        let points = [point(1, 3.0), point(2, 1.0), point(3, 8.0), point(4, 2.0)];
        let summary = summarize_points(&points);
        let open = summary["open"];

        assert!((open.sum - 14.0).abs() < f64::EPSILON);
        assert!((open.max - 8.0).abs() < f64::EPSILON);
        assert!((open.min - 1.0).abs() < f64::EPSILON);
        assert!((open.first - 3.0).abs() < f64::EPSILON);
        assert!((open.last - 2.0).abs() < f64::EPSILON);
        assert_eq!(open.count, 4);
        assert!((open.reduce(Reducer::Avg) - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_min_tracked_when_max_also_changes() {
        // A descending-then-ascending run must still find both extremes.
        let points = [point(1, 5.0), point(2, 9.0), point(3, -4.0), point(4, 12.0)];
        let open = summarize_points(&points)["open"];
        assert!((open.max - 12.0).abs() < f64::EPSILON);
        assert!((open.min + 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_keeps_true_extremes() {
        let mut acc = summarize_points(&[point(1, 5.0), point(2, 6.0)]);
        let later = summarize_points(&[point(3, 1.0), point(4, 2.0)]);
        merge_into(&mut acc, &later);

        let open = acc["open"];
        assert!((open.min - 1.0).abs() < f64::EPSILON);
        assert!((open.max - 6.0).abs() < f64::EPSILON);
        assert!((open.first - 5.0).abs() < f64::EPSILON);
        assert!((open.last - 2.0).abs() < f64::EPSILON);
        assert_eq!(open.count, 4);
    }

    #[test]
    fn test_merge_disjoint_fields() {
        let mut acc = summarize_points(&[point(1, 5.0)]);
        let later = summarize_point(&Point::new(
            2,
            Fields::from([("close".to_string(), 7.0)]),
        ));
        merge_into(&mut acc, &later);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc["close"].count, 1);
    }

    #[test]
    fn test_count_saturates() {
        let mut value = ReducedValue::single(1.0);
        value.count = u16::MAX;
        value.absorb(&ReducedValue::single(1.0));
        assert_eq!(value.count, u16::MAX);
    }

    #[test]
    fn test_group_totals_count_past_u16() {
        let mut bucket = ReducedValue::single(2.0);
        bucket.sum = 2.0 * f64::from(u16::MAX);
        bucket.count = u16::MAX;
        let summary = Summary::from([("open".to_string(), bucket)]);

        let mut totals = GroupTotals::new();
        totals.absorb(&summary);
        totals.absorb(&summary);
        assert_eq!(totals.count("open"), 2 * u32::from(u16::MAX));

        let reducers = BTreeMap::from([
            ("open".to_string(), Reducer::Avg),
            ("close".to_string(), Reducer::Count),
        ]);
        let fields = totals.reduce(&reducers);
        assert!((fields["open"] - 2.0).abs() < f64::EPSILON);
        assert!(fields["close"].abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_value_reducers() {
        let value = ReducedValue::single(4.0);
        assert!((value.reduce(Reducer::Count) - 1.0).abs() < f64::EPSILON);
        assert!((value.reduce(Reducer::Avg) - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_encoded_len() {
        let mut enc = Encoder::new();
        ReducedValue::single(2.0).encode(&mut enc);
        let bytes = enc.into_bytes();
        assert_eq!(bytes.len(), REDUCED_VALUE_LEN);
        assert_eq!(&bytes[40..], &[0, 1]);

        let mut dec = Decoder::new(&bytes);
        assert_eq!(
            ReducedValue::decode(&mut dec).expect("decode"),
            ReducedValue::single(2.0)
        );
    }

    #[test]
    fn test_reducer_from_str() {
        assert_eq!("avg".parse::<Reducer>(), Ok(Reducer::Avg));
        assert_eq!("first".parse::<Reducer>(), Ok(Reducer::First));
        assert_eq!(
            "median".parse::<Reducer>(),
            Err(UnknownReducer("median".to_string()))
        );
    }
}

//! Time granularity calculus.
//!
//! The tree branches on calendar components rather than key cardinality: a
//! node at level `L` has one child per distinct `truncate(ts, L.child())`.
//! All calendar arithmetic is done in UTC.

use chrono::{DateTime, Datelike, Months, NaiveDate, Timelike, Utc};

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;
const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// A time granularity, stored on disk as a one-bit mask.
///
/// Variants are ordered coarse to fine; shifting the mask left by one bit moves
/// one level finer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Level {
    Root = 0x0001,
    Year = 0x0002,
    Month = 0x0004,
    Day = 0x0008,
    Hour = 0x0010,
    Minute = 0x0020,
    Second = 0x0040,
    Millisecond = 0x0080,
    Microsecond = 0x0100,
    Nanosecond = 0x0200,
}

impl Level {
    /// Bitmask value written in node headers.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Parse a bitmask back into a level.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0x0001 => Some(Self::Root),
            0x0002 => Some(Self::Year),
            0x0004 => Some(Self::Month),
            0x0008 => Some(Self::Day),
            0x0010 => Some(Self::Hour),
            0x0020 => Some(Self::Minute),
            0x0040 => Some(Self::Second),
            0x0080 => Some(Self::Millisecond),
            0x0100 => Some(Self::Microsecond),
            0x0200 => Some(Self::Nanosecond),
            _ => None,
        }
    }

    /// The next finer level. Nanosecond is its own child.
    #[must_use]
    pub const fn child(self) -> Self {
        match Self::from_bits(self.bits() << 1) {
            Some(level) => level,
            None => Self::Nanosecond,
        }
    }

    /// The next coarser level. Root is its own parent.
    #[must_use]
    pub const fn parent(self) -> Self {
        match Self::from_bits(self.bits() >> 1) {
            Some(level) => level,
            None => Self::Root,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Millisecond => "millisecond",
            Self::Microsecond => "microsecond",
            Self::Nanosecond => "nanosecond",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Query granularities exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    /// Tree level whose node pointers hold buckets of this size.
    #[must_use]
    pub const fn level(self) -> Level {
        match self {
            Self::Second => Level::Second,
            Self::Minute => Level::Minute,
            Self::Hour => Level::Hour,
            Self::Day => Level::Day,
            Self::Month => Level::Month,
            Self::Year => Level::Year,
        }
    }

    /// Fixed unit length in nanoseconds; `None` for calendar units.
    const fn fixed_nanos(self) -> Option<i64> {
        match self {
            Self::Second => Some(NANOS_PER_SECOND),
            Self::Minute => Some(NANOS_PER_MINUTE),
            Self::Hour => Some(NANOS_PER_HOUR),
            Self::Day => Some(NANOS_PER_DAY),
            Self::Month | Self::Year => None,
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.level().name())
    }
}

fn datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ts)
}

/// Nanoseconds since the epoch for a UTC date at midnight, or `i64::MIN` if
/// it falls outside the representable range.
fn midnight_nanos(date: Option<NaiveDate>) -> i64 {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
        .unwrap_or(i64::MIN)
}

/// Finest level at which `ts` has a non-zero component.
///
/// A timestamp on an exact year boundary reports `Year`.
#[must_use]
pub fn exact_level(ts: i64) -> Level {
    let dt = datetime(ts);
    let nanos = dt.nanosecond();

    if nanos % 1_000 != 0 {
        Level::Nanosecond
    } else if nanos % 1_000_000 != 0 {
        Level::Microsecond
    } else if nanos != 0 {
        Level::Millisecond
    } else if dt.second() != 0 {
        Level::Second
    } else if dt.minute() != 0 {
        Level::Minute
    } else if dt.hour() != 0 {
        Level::Hour
    } else if dt.day() != 1 {
        Level::Day
    } else if dt.month() != 1 {
        Level::Month
    } else {
        Level::Year
    }
}

/// Zero every component of `ts` finer than `level`.
///
/// `Root` truncates like `Year`. Results that would fall before the
/// representable range saturate to `i64::MIN`.
#[must_use]
pub fn truncate(ts: i64, level: Level) -> i64 {
    match level {
        Level::Root | Level::Year => {
            midnight_nanos(NaiveDate::from_ymd_opt(datetime(ts).year(), 1, 1))
        }
        Level::Month => {
            let dt = datetime(ts);
            midnight_nanos(NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1))
        }
        Level::Day => floor(ts, NANOS_PER_DAY),
        Level::Hour => floor(ts, NANOS_PER_HOUR),
        Level::Minute => floor(ts, NANOS_PER_MINUTE),
        Level::Second => floor(ts, NANOS_PER_SECOND),
        Level::Millisecond => floor(ts, NANOS_PER_MILLI),
        Level::Microsecond => floor(ts, NANOS_PER_MICRO),
        Level::Nanosecond => ts,
    }
}

fn floor(ts: i64, unit: i64) -> i64 {
    ts - ts.rem_euclid(unit)
}

/// Number of whole `granularity` units from `origin` to `ts`.
///
/// Both arguments are expected to be truncated to the granularity already.
#[must_use]
pub fn units_between(origin: i64, ts: i64, granularity: Granularity) -> i64 {
    if let Some(unit) = granularity.fixed_nanos() {
        return (i128::from(ts) - i128::from(origin))
            .div_euclid(i128::from(unit))
            .try_into()
            .unwrap_or(i64::MAX);
    }

    let from = datetime(origin);
    let to = datetime(ts);
    let years = i64::from(to.year()) - i64::from(from.year());
    match granularity {
        Granularity::Year => years,
        _ => years * 12 + i64::from(to.month0()) - i64::from(from.month0()),
    }
}

/// Move `ts` forward by `count` units of `granularity`.
///
/// Returns `None` on overflow.
#[must_use]
pub fn advance(ts: i64, granularity: Granularity, count: u32) -> Option<i64> {
    if let Some(unit) = granularity.fixed_nanos() {
        return unit
            .checked_mul(i64::from(count))
            .and_then(|delta| ts.checked_add(delta));
    }

    let months = match granularity {
        Granularity::Year => count.checked_mul(12)?,
        _ => count,
    };
    datetime(ts)
        .checked_add_months(Months::new(months))?
        .timestamp_nanos_opt()
}

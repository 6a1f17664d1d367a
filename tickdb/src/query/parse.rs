//! Parsing of group sizes and timestamps in query requests.

use chrono::{DateTime, NaiveDate};

use crate::storage::Granularity;

/// Parse a group size such as `"5minutes"`, `"1 hour"` or `"day"`.
///
/// A missing count means one unit. Units may be singular or plural.
pub fn parse_group(group: &str) -> Result<(Granularity, u32), QueryParseError> {
    let group = group.trim();
    let split = group
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(group.len());
    let (digits, unit) = group.split_at(split);

    let count = if digits.is_empty() {
        1
    } else {
        digits
            .parse::<u32>()
            .map_err(|_| QueryParseError::InvalidGroup(group.to_string()))?
    };
    if count == 0 {
        return Err(QueryParseError::InvalidGroup(group.to_string()));
    }

    let granularity = match unit.trim() {
        "second" | "seconds" => Granularity::Second,
        "minute" | "minutes" => Granularity::Minute,
        "hour" | "hours" => Granularity::Hour,
        "day" | "days" => Granularity::Day,
        "month" | "months" => Granularity::Month,
        "year" | "years" => Granularity::Year,
        _ => return Err(QueryParseError::InvalidGroup(group.to_string())),
    };

    Ok((granularity, count))
}

/// Parse a timestamp: integer nanoseconds, RFC 3339, or a bare `YYYY-MM-DD`
/// date at UTC midnight.
pub fn parse_time(text: &str) -> Result<i64, QueryParseError> {
    let text = text.trim();
    if let Ok(ns) = text.parse::<i64>() {
        return Ok(ns);
    }

    let nanos = if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        datetime.timestamp_nanos_opt()
    } else if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)
            .and_then(|datetime| datetime.and_utc().timestamp_nanos_opt())
    } else {
        return Err(QueryParseError::InvalidTime(text.to_string()));
    };

    nanos.ok_or_else(|| QueryParseError::TimeOutOfRange(text.to_string()))
}

/// Errors from parsing query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParseError {
    /// The group size is not `{count}{unit}`.
    InvalidGroup(String),
    /// The timestamp is in no accepted format.
    InvalidTime(String),
    /// The timestamp cannot be expressed in `i64` nanoseconds.
    TimeOutOfRange(String),
}

impl std::fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidGroup(group) => write!(
                f,
                "invalid group '{group}'; expected a positive count and one of second, minute, hour, day, month, year"
            ),
            Self::InvalidTime(text) => write!(
                f,
                "invalid time '{text}'; expected RFC 3339 or integer nanoseconds"
            ),
            Self::TimeOutOfRange(text) => write!(f, "time '{text}' is out of range"),
        }
    }
}

impl std::error::Error for QueryParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group() {
        assert_eq!(parse_group("5minutes"), Ok((Granularity::Minute, 5)));
        assert_eq!(parse_group("1minute"), Ok((Granularity::Minute, 1)));
        assert_eq!(parse_group("hour"), Ok((Granularity::Hour, 1)));
        assert_eq!(parse_group("12 hours"), Ok((Granularity::Hour, 12)));
        assert_eq!(parse_group("30seconds"), Ok((Granularity::Second, 30)));
        assert_eq!(parse_group("7days"), Ok((Granularity::Day, 7)));
        assert_eq!(parse_group("3months"), Ok((Granularity::Month, 3)));
        assert_eq!(parse_group("year"), Ok((Granularity::Year, 1)));
    }

    #[test]
    fn test_parse_group_rejects() {
        for group in ["", "0minutes", "5fortnights", "minutes5", "99999999999days"] {
            assert!(
                matches!(parse_group(group), Err(QueryParseError::InvalidGroup(_))),
                "accepted {group:?}"
            );
        }
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(
            parse_time("2016-05-31T08:00:00Z"),
            Ok(1_464_681_600_000_000_000)
        );
        assert_eq!(
            parse_time("2016-05-31T10:00:00+02:00"),
            Ok(1_464_681_600_000_000_000)
        );
        assert_eq!(parse_time("2016-05-31"), Ok(1_464_652_800_000_000_000));
        assert_eq!(parse_time("1464681600000000000"), Ok(1_464_681_600_000_000_000));
        assert_eq!(parse_time("-5"), Ok(-5));
    }

    #[test]
    fn test_parse_time_rejects() {
        assert!(matches!(
            parse_time("yesterday"),
            Err(QueryParseError::InvalidTime(_))
        ));
        assert!(matches!(
            parse_time("2900-01-01T00:00:00Z"),
            Err(QueryParseError::TimeOutOfRange(_))
        ));
    }
}

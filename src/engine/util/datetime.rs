//! Date-string conversion for date-flagged Int64 fields

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

pub const DATE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Format epoch milliseconds as a `DATE_LAYOUT` string in `offset`.
/// Sub-second precision is dropped.
pub fn millis_to_string(ms: i64, offset: FixedOffset) -> Option<String> {
    let utc = DateTime::from_timestamp(ms.div_euclid(1000), 0)?;
    Some(utc.with_timezone(&offset).format(DATE_LAYOUT).to_string())
}

/// Parse a `DATE_LAYOUT` string in `offset` back to epoch milliseconds.
pub fn string_to_millis(s: &str, offset: FixedOffset) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), DATE_LAYOUT).ok()?;
    let local = offset.from_local_datetime(&naive).single()?;
    Some(local.timestamp_millis())
}

/// Offset east of UTC, falling back to UTC when out of range.
pub fn offset_from_secs(secs: i32) -> FixedOffset {
    FixedOffset::east_opt(secs).unwrap_or_else(utc)
}

pub fn utc() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_truncates_millis() {
        let offset = utc();
        let s = millis_to_string(1_700_000_000_123, offset).unwrap();
        assert_eq!(s, "2023-11-14 22:13:20");
        assert_eq!(string_to_millis(&s, offset), Some(1_700_000_000_000));
    }

    #[test]
    fn test_offset_applied() {
        let shanghai = offset_from_secs(8 * 3600);
        let s = millis_to_string(1_700_000_000_000, shanghai).unwrap();
        assert_eq!(s, "2023-11-15 06:13:20");
        assert_eq!(string_to_millis(&s, shanghai), Some(1_700_000_000_000));
    }

    #[test]
    fn test_bad_input() {
        assert_eq!(string_to_millis("yesterday", utc()), None);
        assert_eq!(offset_from_secs(999_999), utc());
    }
}

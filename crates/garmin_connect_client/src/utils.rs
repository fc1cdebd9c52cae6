//! Date/time helpers shared by the series normalizer.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

/// Epoch milliseconds of local midnight for `date` in `tz`.
///
/// When midnight falls into a DST gap the UTC reading of the same wall clock
/// is used instead.
pub fn local_midnight_ms<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> i64 {
    local_datetime_ms(date.and_time(NaiveTime::MIN), tz)
}

fn local_datetime_ms<Tz: TimeZone>(ndt: NaiveDateTime, tz: &Tz) -> i64 {
    tz.from_local_datetime(&ndt)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| ndt.and_utc().timestamp_millis())
}

/// Parse a textual timestamp into epoch milliseconds.
///
/// Accepts, in order:
/// - RFC3339 with offset or `Z` (an absolute instant)
/// - Naive datetime `YYYY-MM-DDTHH:MM[:SS[.fff]]`, read in `tz`
/// - `YYYY-MM-DD`, read as local midnight in `tz`
pub fn parse_timestamp_text<Tz: TimeZone>(text: &str, tz: &Tz) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(local_datetime_ms(ndt, tz));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(local_midnight_ms(date, tz));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn parses_offset_and_zulu_instants() {
        assert_eq!(
            parse_timestamp_text("2024-05-01T00:00:00Z", &Utc),
            Some(1_714_521_600_000)
        );
        assert_eq!(
            parse_timestamp_text("2024-05-01T02:00:00+02:00", &Utc),
            Some(1_714_521_600_000)
        );
    }

    #[test]
    fn naive_values_use_the_zone() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            parse_timestamp_text("2024-05-01T02:00:00.0", &plus_two),
            Some(1_714_521_600_000)
        );
        assert_eq!(
            parse_timestamp_text("2024-05-01T02:00", &plus_two),
            Some(1_714_521_600_000)
        );
        assert_eq!(
            parse_timestamp_text("2024-05-01", &Utc),
            Some(1_714_521_600_000)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp_text("yesterday", &Utc), None);
        assert_eq!(parse_timestamp_text("   ", &Utc), None);
    }

    #[test]
    fn midnight_in_zone() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let minus_five = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(local_midnight_ms(date, &Utc), 1_714_521_600_000);
        assert_eq!(
            local_midnight_ms(date, &minus_five),
            1_714_521_600_000 + 5 * 3_600_000
        );
    }
}

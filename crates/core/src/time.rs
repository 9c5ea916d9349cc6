//! Tolerant parsing of timestamps read back from storage.
//!
//! Rows written by older deployments carry several encodings for the same
//! instant. Writers always emit RFC 3339; readers accept all of the below:
//!
//! - RFC 3339 (`2024-05-01T10:00:00Z`, `2024-05-01T10:00:00.123+02:00`)
//! - SQL text with offset (`2024-05-01 10:00:00.123+00`)
//! - offset plus zone abbreviation (`2024-05-01 10:00:00 +0000 UTC`),
//!   optionally followed by a monotonic clock reading (`m=+0.000`)
//! - naive UTC, space or `T` separated, fractional seconds optional
//! - integral Unix seconds

use chrono::{DateTime, NaiveDateTime, Utc};

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f %z"];

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a stored timestamp, returning `None` when no known encoding matches.
pub fn parse_stored_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(idx) = value.find(" m=") {
        value = value[..idx].trim_end();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // "<date> <time> <offset> <zone>": the abbreviation carries no information
    // beyond the numeric offset.
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() == 4 {
        let without_zone = parts[..3].join(" ");
        if let Ok(dt) = DateTime::parse_from_str(&without_zone, "%Y-%m-%d %H:%M:%S%.f %z") {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = value.parse().ok()?;
        return DateTime::from_timestamp(secs, 0);
    }

    None
}

/// Canonical encoding used when writing timestamps as text.
pub fn format_stored_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn expected() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn parses_rfc3339() {
        assert_eq!(parse_stored_timestamp("2024-05-01T10:00:00Z"), Some(expected()));
        assert_eq!(
            parse_stored_timestamp("2024-05-01T12:00:00+02:00"),
            Some(expected())
        );
    }

    #[test]
    fn parses_sql_text_with_short_offset() {
        assert_eq!(parse_stored_timestamp("2024-05-01 10:00:00+00"), Some(expected()));
    }

    #[test]
    fn parses_offset_with_zone_abbreviation_and_monotonic_suffix() {
        assert_eq!(
            parse_stored_timestamp("2024-05-01 10:00:00 +0000 UTC"),
            Some(expected())
        );
        assert_eq!(
            parse_stored_timestamp("2024-05-01 10:00:00.5 +0000 UTC m=+901.000000001")
                .map(|dt| dt.timestamp()),
            Some(expected().timestamp())
        );
    }

    #[test]
    fn parses_naive_forms_as_utc() {
        assert_eq!(parse_stored_timestamp("2024-05-01 10:00:00"), Some(expected()));
        assert_eq!(parse_stored_timestamp("2024-05-01T10:00:00"), Some(expected()));
    }

    #[test]
    fn parses_unix_seconds() {
        let secs = expected().timestamp().to_string();
        assert_eq!(parse_stored_timestamp(&secs), Some(expected()));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_stored_timestamp(""), None);
        assert_eq!(parse_stored_timestamp("tomorrow"), None);
        assert_eq!(parse_stored_timestamp("2024-13-45 99:00:00"), None);
    }

    #[test]
    fn writer_output_round_trips_through_reader() {
        let at = expected();
        assert_eq!(parse_stored_timestamp(&format_stored_timestamp(at)), Some(at));
    }
}

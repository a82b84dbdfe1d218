//! Date parsing for source values
//!
//! The source mixes ISO timestamps (`2025-09-05T10:00:00+02:00`) with
//! European day-first dates (`05/09/2025`, `5.9.2025`). A value only counts
//! as a date when the whole string is one; `05/09/2025 student called` is
//! free text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Output format for normalized dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Output format for timestamps bound to DATETIME columns
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

/// Parse a string that is exactly a date or a timestamp.
///
/// Accepts RFC 3339, ISO `YYYY-MM-DD` and day-first `D/M/YYYY` or
/// `D.M.YYYY`, the last three optionally followed by `T` or a space and a
/// time of day. Timestamps with an offset keep their local calendar date.
/// Impossible calendar dates (31/02/2025) are rejected.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    parse_naive(s).map(|dt| dt.date())
}

/// Normalize a date string to `YYYY-MM-DD`
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_date(raw).map(|d| d.format(DATE_FORMAT).to_string())
}

/// Parse a whole-string timestamp for DATETIME binding.
///
/// Offsets are converted to UTC; a bare date becomes midnight.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    parse_naive(s)
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    let (date_part, time_part) = match s.split_once(['T', ' ']) {
        Some((date, time)) => (date, Some(time.trim())),
        None => (s, None),
    };
    let date = parse_iso(date_part).or_else(|| parse_day_first(date_part))?;

    match time_part {
        None => date.and_hms_opt(0, 0, 0),
        Some(time) => TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(time, format).ok())
            .map(|t| date.and_time(t)),
    }
}

fn parse_iso(s: &str) -> Option<NaiveDate> {
    let bytes = s.as_bytes();
    if bytes.len() != 10 {
        return None;
    }
    let shape_ok = bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit);
    if !shape_ok {
        return None;
    }

    let year = s[..4].parse().ok()?;
    let month = s[5..7].parse().ok()?;
    let day = s[8..10].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_day_first(s: &str) -> Option<NaiveDate> {
    let separator = if s.contains('/') {
        '/'
    } else if s.contains('.') {
        '.'
    } else {
        return None;
    };

    let mut parts = s.split(separator);
    let day = parts.next()?;
    let month = parts.next()?;
    let year = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let valid = |part: &str, min: usize, max: usize| {
        (min..=max).contains(&part.len()) && part.bytes().all(|b| b.is_ascii_digit())
    };
    if !valid(day, 1, 2) || !valid(month, 1, 2) || !valid(year, 4, 4) {
        return None;
    }

    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_day_first_dates() {
        assert_eq!(normalize_date("05/09/2025").as_deref(), Some("2025-09-05"));
        assert_eq!(normalize_date("5/9/2025").as_deref(), Some("2025-09-05"));
        assert_eq!(normalize_date("05.09.2025").as_deref(), Some("2025-09-05"));
        assert_eq!(normalize_date("05/09/2025 14:30").as_deref(), Some("2025-09-05"));
    }

    #[test]
    fn test_iso_dates_and_timestamps() {
        assert_eq!(normalize_date("2025-09-05").as_deref(), Some("2025-09-05"));
        assert_eq!(normalize_date("2025-09-05T10:00:00Z").as_deref(), Some("2025-09-05"));
        assert_eq!(normalize_date("2025-09-05 10:00").as_deref(), Some("2025-09-05"));
        assert_eq!(normalize_date("2025-09-051"), None);
        assert_eq!(normalize_date("2025-09-05T00:30:00+02:00").as_deref(), Some("2025-09-05"));
    }

    #[test]
    fn test_trailing_text_is_not_a_date() {
        assert_eq!(normalize_date("05/09/2025 student called"), None);
        assert_eq!(normalize_date("2025-09-05 see notes"), None);
        assert_eq!(normalize_date("05.09.2025 25:00"), None);
        assert!(parse_datetime("05/09/2025 student called").is_none());
        assert!(parse_datetime("2025-09-05T10:00:00Z, moved").is_none());
    }

    #[test]
    fn test_rejects_impossible_and_garbage() {
        assert_eq!(normalize_date("31/02/2025"), None);
        assert_eq!(normalize_date("2025-13-01"), None);
        assert_eq!(normalize_date("next monday"), None);
        assert_eq!(normalize_date("05/09/25"), None);
        assert_eq!(normalize_date("1.234.567"), None);
        assert_eq!(normalize_date(""), None);
    }

    #[test]
    fn test_normalized_dates_are_stable() {
        let once = normalize_date("05/09/2025").unwrap();
        assert_eq!(normalize_date(&once).as_deref(), Some(once.as_str()));
    }

    #[test]
    fn test_parse_datetime() {
        let dt = parse_datetime("2025-09-05T10:15:00+02:00").unwrap();
        assert_eq!(dt.format(DATETIME_FORMAT).to_string(), "2025-09-05 08:15:00");

        let dt = parse_datetime("05/09/2025").unwrap();
        assert_eq!(dt.format(DATETIME_FORMAT).to_string(), "2025-09-05 00:00:00");

        let dt = parse_datetime("5.9.2025 14:30").unwrap();
        assert_eq!(dt.format(DATETIME_FORMAT).to_string(), "2025-09-05 14:30:00");

        assert!(parse_datetime("soon").is_none());
    }
}

//! Conversion of the date representations the events API emits into UTC instants.
//!
//! The backend is inconsistent: some fields are date-only (`2025-05-11`), some
//! are SQL-style datetimes without a zone (`2025-05-11 12:00:00`), and some are
//! full RFC 3339 instants. Zoneless values are always taken as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use tracing::warn;

/// Substituted for dates that cannot be parsed.
pub const EPOCH_SENTINEL: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateParseError {
    #[error("date value is missing")]
    Missing,

    #[error("unrecognized date '{0}'")]
    Unrecognized(String),
}

/// Parse a raw date into a UTC instant, reporting why it failed.
pub fn parse_instant(raw: Option<&str>) -> Result<DateTime<Utc>, DateParseError> {
    let s = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(DateParseError::Missing)?;

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DateParseError::Unrecognized(s.to_string()))
}

/// Parse a raw date, falling back to [`EPOCH_SENTINEL`] with a warning.
///
/// Never fails: dates come from an untrusted remote and a single malformed
/// field must not abort a whole load.
pub fn normalize(raw: Option<&str>) -> DateTime<Utc> {
    match parse_instant(raw) {
        Ok(dt) => dt,
        Err(e) => {
            warn!("Falling back to epoch for date value: {}", e);
            EPOCH_SENTINEL
        }
    }
}

pub fn is_sentinel(dt: &DateTime<Utc>) -> bool {
    *dt == EPOCH_SENTINEL
}

/// Canonical string form sent to the remote API.
pub fn to_wire(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_only_is_midnight_utc() {
        assert_eq!(
            normalize(Some("2025-05-11")),
            Utc.with_ymd_and_hms(2025, 5, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn sql_datetime_is_taken_as_utc() {
        assert_eq!(
            normalize(Some("2025-05-11 12:00:00")),
            Utc.with_ymd_and_hms(2025, 5, 11, 12, 0, 0).unwrap()
        );
        assert_eq!(
            normalize(Some("2025-05-11 12:00")),
            Utc.with_ymd_and_hms(2025, 5, 11, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn full_instant_is_identity() {
        let raw = "2025-05-11T12:30:45Z";
        assert_eq!(to_wire(&normalize(Some(raw))), raw);
    }

    #[test]
    fn explicit_offsets_are_converted() {
        assert_eq!(
            normalize(Some("2025-05-11T14:00:00+02:00")),
            Utc.with_ymd_and_hms(2025, 5, 11, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn malformed_dates_fall_back_to_epoch() {
        for raw in [None, Some(""), Some("   "), Some("not-a-date"), Some("2025-13-40")] {
            let dt = normalize(raw);
            assert!(is_sentinel(&dt), "expected sentinel for {:?}", raw);
        }
    }

    #[test]
    fn parse_instant_reports_the_reason() {
        assert_eq!(parse_instant(None), Err(DateParseError::Missing));
        assert_eq!(
            parse_instant(Some("soon")),
            Err(DateParseError::Unrecognized("soon".to_string()))
        );
    }
}

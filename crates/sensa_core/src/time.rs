use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

use crate::{SensaError, SensaResult};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const ACCEPTED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Current UTC wall-clock time at microsecond precision, the finest
/// resolution every supported backend round-trips.
pub fn observation_now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

/// Parses a naive `YYYY-MM-DD HH:MM:SS[.f]` timestamp (space or `T`
/// separated) or an RFC 3339 timestamp, which is converted to UTC.
pub fn parse_datetime(raw: &str) -> SensaResult<NaiveDateTime> {
    let trimmed = raw.trim();
    for format in ACCEPTED_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.with_timezone(&Utc).naive_utc())
        .map_err(|err| SensaError::validation(format!("invalid datetime '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::{observation_now, parse_datetime};
    use chrono::Timelike;

    #[test]
    fn parses_naive_and_rfc3339_forms() {
        let plain = parse_datetime("2020-07-26 20:20:20").expect("plain");
        let iso = parse_datetime("2020-07-26T20:20:20").expect("iso");
        let zoned = parse_datetime("2020-07-26T22:20:20+02:00").expect("zoned");
        assert_eq!(plain, iso);
        assert_eq!(plain, zoned);
        let fractional = parse_datetime("2020-07-26 20:20:20.125").expect("fractional");
        assert_eq!(fractional.nanosecond(), 125_000_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("yesterday").is_err());
        assert!(parse_datetime("2020-13-40 00:00:00").is_err());
    }

    #[test]
    fn now_is_truncated_to_micros() {
        assert_eq!(observation_now().nanosecond() % 1_000, 0);
    }
}

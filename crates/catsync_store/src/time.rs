//! Timestamp parsing and formatting in the store's wire form.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Ordering-key timestamps are always UTC.
pub type Timestamp = DateTime<Utc>;

/// Wire format for timestamps inside range clauses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a timestamp as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a timestamp in RFC 3339 form, naive ISO form (assumed UTC) or a bare date.
pub fn parse_timestamp(text: &str) -> StoreResult<Timestamp> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(StoreError::InvalidTimestamp(text.to_string()))
}

/// Converts epoch milliseconds (as reported by numeric stats) to a timestamp.
pub fn from_epoch_millis(millis: f64) -> StoreResult<Timestamp> {
    DateTime::from_timestamp_millis(millis.round() as i64)
        .ok_or_else(|| StoreError::InvalidTimestamp(millis.to_string()))
}

/// Drops sub-second precision.
pub fn truncate_to_second(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(0)
}

/// Returns midnight of the first day of the timestamp's month.
pub fn start_of_month(ts: &Timestamp) -> Timestamp {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(*ts)
}

/// Adds whole calendar months, saturating at the representable maximum.
pub fn add_months(ts: &Timestamp, months: u32) -> Timestamp {
    ts.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn formats_with_microseconds() {
        let ts = Utc.with_ymd_and_hms(2017, 1, 7, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2017-01-07T03:04:05.000000Z");
    }

    #[test]
    fn parses_supported_forms() {
        let a = parse_timestamp("2017-01-07T00:00:00.831Z").unwrap();
        assert_eq!(a.nanosecond(), 831_000_000);

        let b = parse_timestamp("2017-01-07T00:00:00").unwrap();
        assert_eq!(b, Utc.with_ymd_and_hms(2017, 1, 7, 0, 0, 0).unwrap());

        let c = parse_timestamp("2017-01-07").unwrap();
        assert_eq!(b, c);

        assert!(matches!(
            parse_timestamp("last tuesday"),
            Err(StoreError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn month_arithmetic() {
        let ts = Utc.with_ymd_and_hms(2020, 12, 15, 10, 30, 0).unwrap();
        let start = start_of_month(&ts);
        assert_eq!(start, Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(
            add_months(&start, 1),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn truncation_and_epoch() {
        let ts = parse_timestamp("2019-05-01T12:00:00.999Z").unwrap();
        assert_eq!(
            truncate_to_second(ts),
            Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap()
        );
        let epoch = from_epoch_millis(1_556_712_000_000.0).unwrap();
        assert_eq!(epoch, Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap());
    }
}

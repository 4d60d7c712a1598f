//! Aggregate statistics over a timestamp field.

use crate::time::Timestamp;
use chrono::DateTime;

/// Count, min, max and mean of a timestamp field under some predicate.
///
/// Bounds are `None` when nothing matched or the store omitted them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldStats {
    /// Number of matching records.
    pub count: u64,
    /// Earliest value.
    pub min: Option<Timestamp>,
    /// Latest value.
    pub max: Option<Timestamp>,
    /// Arithmetic mean of the values.
    pub mean: Option<Timestamp>,
}

impl FieldStats {
    /// Statistics of an empty match set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Computes statistics over a set of timestamps.
    pub fn from_timestamps<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Timestamp>,
    {
        let mut count = 0u64;
        let mut min: Option<Timestamp> = None;
        let mut max: Option<Timestamp> = None;
        let mut sum_micros: i128 = 0;

        for ts in values {
            count += 1;
            min = Some(min.map_or(ts, |m| m.min(ts)));
            max = Some(max.map_or(ts, |m| m.max(ts)));
            sum_micros += i128::from(ts.timestamp_micros());
        }

        let mean = (count > 0)
            .then(|| micros_to_timestamp(sum_micros / i128::from(count)))
            .flatten();
        Self {
            count,
            min,
            max,
            mean,
        }
    }

    /// Merges statistics of disjoint record sets into those of their union.
    pub fn combine<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = &'a FieldStats>,
    {
        let mut count = 0u64;
        let mut min: Option<Timestamp> = None;
        let mut max: Option<Timestamp> = None;
        let mut weighted: i128 = 0;

        for part in parts {
            if part.count == 0 {
                continue;
            }
            count += part.count;
            if let Some(m) = part.min {
                min = Some(min.map_or(m, |cur| cur.min(m)));
            }
            if let Some(m) = part.max {
                max = Some(max.map_or(m, |cur| cur.max(m)));
            }
            if let Some(mean) = part.mean {
                weighted += i128::from(mean.timestamp_micros()) * i128::from(part.count);
            }
        }

        let mean = (count > 0)
            .then(|| micros_to_timestamp(weighted / i128::from(count)))
            .flatten();
        Self {
            count,
            min,
            max,
            mean,
        }
    }
}

fn micros_to_timestamp(micros: i128) -> Option<Timestamp> {
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
}

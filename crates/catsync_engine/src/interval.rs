//! Time intervals at month, day and hour granularity.

use catsync_store::time::{add_months, format_timestamp, start_of_month};
use catsync_store::{Clause, Timestamp};
use chrono::{DateTime, Utc};
use std::fmt;

/// Resolution of a [`TimeInterval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    /// The whole observed span.
    Full,
    /// One calendar month.
    Month,
    /// One day.
    Day,
    /// One hour; the floor of bisection.
    Hour,
}

impl Granularity {
    /// Next finer granularity, `None` at [`Granularity::Hour`].
    pub fn finer(self) -> Option<Granularity> {
        match self {
            Granularity::Full => Some(Granularity::Month),
            Granularity::Month => Some(Granularity::Day),
            Granularity::Day => Some(Granularity::Hour),
            Granularity::Hour => None,
        }
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Full => "full",
            Granularity::Month => "month",
            Granularity::Day => "day",
            Granularity::Hour => "hour",
        }
    }

    /// First boundary of this granularity strictly after `ts`.
    fn next_boundary(self, ts: &Timestamp) -> Timestamp {
        let step_secs = |step: i64| {
            let floor = ts.timestamp().div_euclid(step) * step;
            DateTime::<Utc>::from_timestamp(floor + step, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
        };
        match self {
            Granularity::Full => DateTime::<Utc>::MAX_UTC,
            Granularity::Month => add_months(&start_of_month(ts), 1),
            Granularity::Day => step_secs(86_400),
            Granularity::Hour => step_secs(3_600),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open range `[start, stop)` of the ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    /// Inclusive start.
    pub start: Timestamp,
    /// Exclusive stop.
    pub stop: Timestamp,
    /// Resolution this interval was produced at.
    pub granularity: Granularity,
}

impl TimeInterval {
    /// Creates an interval.
    pub fn new(start: Timestamp, stop: Timestamp, granularity: Granularity) -> Self {
        Self {
            start,
            stop,
            granularity,
        }
    }

    /// The full span covering `[min, max]`, rounded outward to whole months.
    pub fn enclosing(min: &Timestamp, max: &Timestamp) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        Self::new(
            start_of_month(lo),
            add_months(&start_of_month(hi), 1),
            Granularity::Full,
        )
    }

    /// Whether `ts` falls inside the interval.
    pub fn contains(&self, ts: &Timestamp) -> bool {
        *ts >= self.start && *ts < self.stop
    }

    /// Filter clause selecting this interval on `field`.
    pub fn clause(&self, field: &str) -> Clause {
        Clause::interval(field, &self.start, &self.stop)
    }

    /// Partitions the interval at the next finer granularity, most recent first.
    ///
    /// Children are aligned to calendar boundaries and clipped to the parent,
    /// so their union is exactly the parent. An hour has no children.
    pub fn children(&self) -> Vec<TimeInterval> {
        let Some(finer) = self.granularity.finer() else {
            return Vec::new();
        };
        let mut children = Vec::new();
        let mut cursor = self.start;
        while cursor < self.stop {
            let next = finer.next_boundary(&cursor).min(self.stop);
            children.push(TimeInterval::new(cursor, next, finer));
            cursor = next;
        }
        children.reverse();
        children
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {})",
            self.granularity,
            format_timestamp(&self.start),
            format_timestamp(&self.stop)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn enclosing_rounds_to_months() {
        let span = TimeInterval::enclosing(
            &Utc.with_ymd_and_hms(2019, 5, 17, 13, 4, 5).unwrap(),
            &Utc.with_ymd_and_hms(2019, 12, 2, 0, 0, 1).unwrap(),
        );
        assert_eq!(span.start, ts(2019, 5, 1, 0));
        assert_eq!(span.stop, ts(2020, 1, 1, 0));
        assert_eq!(span.granularity, Granularity::Full);
    }

    #[test]
    fn months_most_recent_first() {
        let span = TimeInterval::new(ts(2019, 11, 1, 0), ts(2020, 2, 1, 0), Granularity::Full);
        let months: Vec<_> = span.children().iter().map(|c| c.start).collect();
        assert_eq!(
            months,
            vec![ts(2020, 1, 1, 0), ts(2019, 12, 1, 0), ts(2019, 11, 1, 0)]
        );
        assert!(span.children().iter().all(|c| c.granularity == Granularity::Month));
    }

    #[test]
    fn february_has_28_days() {
        let month = TimeInterval::new(ts(2019, 2, 1, 0), ts(2019, 3, 1, 0), Granularity::Month);
        let days = month.children();
        assert_eq!(days.len(), 28);
        assert_eq!(days[0].start, ts(2019, 2, 28, 0));
        assert_eq!(days[27].stop, ts(2019, 2, 2, 0));
    }

    #[test]
    fn hour_is_the_floor() {
        let day = TimeInterval::new(ts(2019, 2, 1, 0), ts(2019, 2, 2, 0), Granularity::Day);
        let hours = day.children();
        assert_eq!(hours.len(), 24);
        assert!(hours[0].children().is_empty());
    }

    #[test]
    fn half_open_clause() {
        let hour = TimeInterval::new(ts(2019, 2, 1, 3), ts(2019, 2, 1, 4), Granularity::Hour);
        assert_eq!(
            hour.clause("_timestamp").to_string(),
            "_timestamp:[2019-02-01T03:00:00.000000Z TO 2019-02-01T04:00:00.000000Z}"
        );
        assert!(hour.contains(&ts(2019, 2, 1, 3)));
        assert!(!hour.contains(&ts(2019, 2, 1, 4)));
    }

    proptest! {
        #[test]
        fn children_partition_parent(
            start_secs in 1_400_000_000i64..1_700_000_000,
            len_secs in 1i64..(120 * 86_400),
            level in 0usize..3,
        ) {
            let granularity = [Granularity::Full, Granularity::Month, Granularity::Day][level];
            let start = Utc.timestamp_opt(start_secs, 0).unwrap();
            let parent = TimeInterval::new(start, start + Duration::seconds(len_secs), granularity);

            let mut children = parent.children();
            prop_assert!(!children.is_empty());
            children.reverse();
            prop_assert_eq!(children[0].start, parent.start);
            prop_assert_eq!(children[children.len() - 1].stop, parent.stop);
            for pair in children.windows(2) {
                prop_assert_eq!(pair[0].stop, pair[1].start);
            }
            for child in &children {
                prop_assert!(child.start < child.stop);
                prop_assert_eq!(Some(child.granularity), granularity.finer());
            }
        }
    }
}

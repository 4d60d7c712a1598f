//! Aggregate fingerprints of record sets.

use catsync_store::time::{format_timestamp, truncate_to_second};
use catsync_store::{Collection, FieldStats, Predicate, StoreClient, Timestamp};
use std::fmt;
use tracing::warn;

/// Count and whole-second min/max/mean of the ordering key under a predicate.
///
/// Two record sets with equal fingerprints are treated as identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// Number of matching records.
    pub count: u64,
    /// Earliest ordering key.
    pub min: Option<Timestamp>,
    /// Latest ordering key.
    pub max: Option<Timestamp>,
    /// Mean ordering key.
    pub mean: Option<Timestamp>,
}

impl Fingerprint {
    /// Builds a fingerprint, dropping sub-second precision.
    pub fn from_stats(stats: &FieldStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min.map(truncate_to_second),
            max: stats.max.map(truncate_to_second),
            mean: stats.mean.map(truncate_to_second),
        }
    }

    /// Fingerprint of an empty record set.
    pub fn empty() -> Self {
        Self::from_stats(&FieldStats::empty())
    }

    /// True when no record matched.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |ts: &Option<Timestamp>| ts.as_ref().map_or("-".to_string(), format_timestamp);
        write!(
            f,
            "count={} min={} max={} mean={}",
            self.count,
            show(&self.min),
            show(&self.max),
            show(&self.mean)
        )
    }
}

/// Outcome of comparing source and target fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Fingerprints are equal.
    InSync(Fingerprint),
    /// Fingerprints differ.
    Diverged {
        /// Source fingerprint.
        source: Fingerprint,
        /// Target fingerprint.
        target: Fingerprint,
    },
    /// At least one store could not be reached; nothing can be concluded.
    Unavailable,
}

impl Comparison {
    /// True only for a confirmed match.
    pub fn is_in_sync(&self) -> bool {
        matches!(self, Comparison::InSync(_))
    }
}

/// Computes and compares fingerprints over one ordering-key field.
#[derive(Debug, Clone)]
pub struct FingerprintComparator {
    field: String,
}

impl FingerprintComparator {
    /// Creates a comparator over `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Ordering-key field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Fingerprint of one store, or `None` if it is unreachable.
    pub fn fingerprint(
        &self,
        store: &dyn StoreClient,
        collection: Collection,
        predicate: &Predicate,
    ) -> Option<Fingerprint> {
        match store.stats(collection, predicate, &self.field) {
            Ok(stats) => Some(Fingerprint::from_stats(&stats)),
            Err(err) => {
                warn!(
                    store = store.endpoint(),
                    collection = %collection,
                    predicate = %predicate,
                    "fingerprint unavailable: {err}"
                );
                None
            }
        }
    }

    /// Compares source and target under the same predicate.
    pub fn compare(
        &self,
        source: &dyn StoreClient,
        target: &dyn StoreClient,
        collection: Collection,
        predicate: &Predicate,
    ) -> Comparison {
        let Some(source) = self.fingerprint(source, collection, predicate) else {
            return Comparison::Unavailable;
        };
        let Some(target) = self.fingerprint(target, collection, predicate) else {
            return Comparison::Unavailable;
        };
        if source == target {
            Comparison::InSync(source)
        } else {
            Comparison::Diverged { source, target }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_store::{MemoryStore, Record};
    use chrono::{TimeZone, Utc};

    fn record(id: &str, ts: &str) -> Record {
        Record::new().with("id", id).with("_timestamp", ts)
    }

    #[test]
    fn sub_second_skew_is_ignored() {
        let a = FieldStats {
            count: 1,
            min: Some(Utc.timestamp_opt(1_556_668_800, 100_000_000).unwrap()),
            max: Some(Utc.timestamp_opt(1_556_668_800, 900_000_000).unwrap()),
            mean: Some(Utc.timestamp_opt(1_556_668_800, 500_000_000).unwrap()),
        };
        let b = FieldStats {
            count: 1,
            min: Some(Utc.timestamp_opt(1_556_668_800, 0).unwrap()),
            max: Some(Utc.timestamp_opt(1_556_668_800, 0).unwrap()),
            mean: Some(Utc.timestamp_opt(1_556_668_800, 0).unwrap()),
        };
        assert_eq!(Fingerprint::from_stats(&a), Fingerprint::from_stats(&b));
    }

    #[test]
    fn compare_outcomes() {
        let source = MemoryStore::new("source");
        let target = MemoryStore::new("target");
        let comparator = FingerprintComparator::new("_timestamp");
        let all = Predicate::all();

        assert!(comparator
            .compare(&source, &target, Collection::Datasets, &all)
            .is_in_sync());

        source.insert(Collection::Datasets, [record("a", "2019-05-01T00:00:00Z")]);
        assert!(matches!(
            comparator.compare(&source, &target, Collection::Datasets, &all),
            Comparison::Diverged { .. }
        ));

        target.insert(Collection::Datasets, [record("a", "2019-05-01T00:00:00.4Z")]);
        assert!(comparator
            .compare(&source, &target, Collection::Datasets, &all)
            .is_in_sync());

        target.set_unreachable(true);
        assert_eq!(
            comparator.compare(&source, &target, Collection::Datasets, &all),
            Comparison::Unavailable
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            Fingerprint::empty().to_string(),
            "count=0 min=- max=- mean=-"
        );
    }
}

//! Fingerprint-driven localization and repair of divergence.
//!
//! For each collection the full span is compared first. When it differs,
//! the span is bisected month → day → hour, most recent first, descending
//! only into intervals whose fingerprints differ. Hours are repaired
//! directly: child collections by delete-and-recopy, datasets by per-id
//! reconciliation so that every dataset change cascades to its files and
//! aggregations.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::fingerprint::{Comparison, Fingerprint, FingerprintComparator};
use crate::interval::{Granularity, TimeInterval};
use crate::migrate::{BulkMigrator, MigrationRequest};
use catsync_store::time::truncate_to_second;
use catsync_store::{
    fields, Collection, Predicate, QueryRequest, StoreClient, StoreResult, Timestamp,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of synchronizing one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Records written to the target.
    pub migrated: u64,
    /// Records deleted from the target.
    pub deleted: u64,
    /// Hour intervals repaired.
    pub repaired_intervals: u64,
    /// The collection could not be compared at the full span.
    pub skipped: bool,
    /// The walk ended early because the full span came back in sync.
    pub stopped_early: bool,
    /// Final comparison after commit; `None` when it could not be determined.
    pub in_sync: Option<bool>,
}

impl CollectionReport {
    /// True when the collection was modified.
    pub fn touched(&self) -> bool {
        self.migrated > 0 || self.deleted > 0
    }
}

/// Outcome of a synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    collections: BTreeMap<Collection, CollectionReport>,
}

impl SyncReport {
    /// Report for one collection; empty if it was not part of the run.
    pub fn collection(&self, collection: Collection) -> CollectionReport {
        self.collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Reports in collection order.
    pub fn iter(&self) -> impl Iterator<Item = (Collection, &CollectionReport)> {
        self.collections.iter().map(|(c, r)| (*c, r))
    }

    /// Records migrated across all collections.
    pub fn total_migrated(&self) -> u64 {
        self.collections.values().map(|r| r.migrated).sum()
    }

    /// Records deleted across all collections.
    pub fn total_deleted(&self) -> u64 {
        self.collections.values().map(|r| r.deleted).sum()
    }

    /// True when every collection ended confirmed in sync.
    pub fn converged(&self) -> bool {
        self.collections.values().all(|r| r.in_sync == Some(true))
    }

    fn entry(&mut self, collection: Collection) -> &mut CollectionReport {
        self.collections.entry(collection).or_default()
    }
}

/// `(version, ordering key)` of a dataset, used to spot changed datasets.
type DatasetEntry = (Option<i64>, Option<Timestamp>);

/// State of one collection's walk.
struct Walk<'a> {
    source: &'a dyn StoreClient,
    target: &'a dyn StoreClient,
    collection: Collection,
    predicate: &'a Predicate,
    done: bool,
}

/// Synchronizes one target store with one source store.
#[derive(Debug, Clone)]
pub struct IntervalSynchronizer {
    config: SyncConfig,
    comparator: FingerprintComparator,
    migrator: BulkMigrator,
}

impl IntervalSynchronizer {
    /// Creates a synchronizer.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            comparator: FingerprintComparator::new(config.timestamp_field.clone()),
            migrator: BulkMigrator::new(&config),
            config,
        }
    }

    /// Replaces the migrator used for repairs.
    pub fn with_migrator(mut self, migrator: BulkMigrator) -> Self {
        self.migrator = migrator;
        self
    }

    /// The fingerprint comparator.
    pub fn comparator(&self) -> &FingerprintComparator {
        &self.comparator
    }

    /// Synchronizes `collections` in order, then commits, optionally
    /// optimizes, and records the final status of each.
    pub fn run(
        &self,
        source: &dyn StoreClient,
        target: &dyn StoreClient,
        predicate: &Predicate,
        collections: &[Collection],
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        for &collection in collections {
            report.entry(collection);
            self.sync_collection(source, target, collection, predicate, &mut report)?;
        }

        let touched: Vec<Collection> = report
            .iter()
            .filter(|(_, r)| r.touched())
            .map(|(c, _)| c)
            .collect();
        for collection in touched {
            if self.config.optimize_on_finish {
                target.optimize(collection)?;
            } else {
                target.commit(collection)?;
            }
        }

        let reported: Vec<Collection> = report.iter().map(|(c, _)| c).collect();
        for collection in reported {
            let status = self
                .comparator
                .compare(source, target, collection, predicate);
            let entry = report.entry(collection);
            entry.in_sync = match status {
                Comparison::InSync(_) => Some(true),
                Comparison::Diverged { .. } => Some(false),
                Comparison::Unavailable => None,
            };
            info!(
                collection = %collection,
                migrated = entry.migrated,
                deleted = entry.deleted,
                in_sync = ?entry.in_sync,
                "synchronization finished"
            );
        }
        Ok(report)
    }

    /// Localizes and repairs divergence in one collection.
    pub fn sync_collection(
        &self,
        source: &dyn StoreClient,
        target: &dyn StoreClient,
        collection: Collection,
        predicate: &Predicate,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let (source_fp, target_fp) =
            match self.comparator.compare(source, target, collection, predicate) {
                Comparison::InSync(fp) => {
                    info!(collection = %collection, fingerprint = %fp, "in sync");
                    return Ok(());
                }
                Comparison::Unavailable => {
                    warn!(collection = %collection, "cannot compare, skipping collection");
                    report.entry(collection).skipped = true;
                    return Ok(());
                }
                Comparison::Diverged { source, target } => (source, target),
            };
        info!(
            collection = %collection,
            source = %source_fp,
            target = %target_fp,
            "diverged"
        );

        let Some(span) = enclosing_span(&source_fp, &target_fp) else {
            warn!(collection = %collection, "diverged records carry no ordering key, skipping collection");
            report.entry(collection).skipped = true;
            return Ok(());
        };

        let mut walk = Walk {
            source,
            target,
            collection,
            predicate,
            done: false,
        };
        self.descend(&mut walk, &span, report)?;
        if walk.done {
            report.entry(collection).stopped_early = true;
        }
        Ok(())
    }

    fn interval_predicate(&self, predicate: &Predicate, interval: &TimeInterval) -> Predicate {
        if interval.granularity == Granularity::Full {
            predicate.clone()
        } else {
            predicate.and(interval.clause(&self.config.timestamp_field))
        }
    }

    fn compare(&self, walk: &Walk<'_>, predicate: &Predicate) -> Comparison {
        self.comparator
            .compare(walk.source, walk.target, walk.collection, predicate)
    }

    fn descend(
        &self,
        walk: &mut Walk<'_>,
        parent: &TimeInterval,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let parent_predicate = self.interval_predicate(walk.predicate, parent);

        for child in parent.children() {
            if walk.done {
                return Ok(());
            }
            let child_predicate = self.interval_predicate(walk.predicate, &child);
            let target_fp = match self.compare(walk, &child_predicate) {
                Comparison::InSync(_) => continue,
                Comparison::Unavailable => {
                    warn!(collection = %walk.collection, interval = %child, "cannot compare, skipping interval");
                    continue;
                }
                Comparison::Diverged { target, .. } => target,
            };
            debug!(collection = %walk.collection, interval = %child, "diverged");

            if child.granularity == Granularity::Hour {
                self.repair(walk, &child, &child_predicate, &target_fp, report)?;
                if self.config.recheck_full
                    && self.compare(walk, walk.predicate).is_in_sync()
                {
                    info!(collection = %walk.collection, "full span in sync, stopping");
                    walk.done = true;
                    return Ok(());
                }
            } else {
                self.descend(walk, &child, report)?;
                if walk.done {
                    return Ok(());
                }
            }

            if self.compare(walk, &parent_predicate).is_in_sync() {
                debug!(collection = %walk.collection, interval = %parent, "parent in sync");
                break;
            }
        }
        Ok(())
    }

    fn repair(
        &self,
        walk: &Walk<'_>,
        hour: &TimeInterval,
        predicate: &Predicate,
        target_fp: &Fingerprint,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        report.entry(walk.collection).repaired_intervals += 1;
        if walk.collection == Collection::Datasets {
            return self.reconcile_datasets(walk, hour, predicate, report);
        }

        walk.target.delete_by_predicate(walk.collection, predicate)?;
        let request = MigrationRequest::new(walk.collection, walk.predicate.clone())
            .with_range_filter(hour.clause(&self.config.timestamp_field));
        let migrated = self.migrator.migrate(walk.source, walk.target, &request)?;

        let entry = report.entry(walk.collection);
        entry.deleted += target_fp.count;
        entry.migrated += migrated;
        info!(
            collection = %walk.collection,
            interval = %hour,
            deleted = target_fp.count,
            migrated,
            "repaired interval"
        );
        Ok(())
    }

    fn reconcile_datasets(
        &self,
        walk: &Walk<'_>,
        hour: &TimeInterval,
        predicate: &Predicate,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let listings = self
            .list_datasets(walk.source, predicate)
            .and_then(|s| Ok((s, self.list_datasets(walk.target, predicate)?)));
        let (source_list, target_list) = match listings {
            Ok(lists) => lists,
            Err(err) => {
                warn!(interval = %hour, "cannot list datasets, skipping interval: {err}");
                return Ok(());
            }
        };

        for (id, entry) in &source_list {
            if target_list.get(id) == Some(entry) {
                continue;
            }
            debug!(id = %id, "dataset missing or changed in target");
            self.copy_dataset(walk, id, report)?;
        }

        for id in target_list.keys().filter(|id| !source_list.contains_key(*id)) {
            let by_id = Predicate::term(fields::ID, id.clone());
            match walk.source.count(Collection::Datasets, &by_id) {
                Ok(0) => self.delete_dataset(walk, id, report)?,
                Ok(_) => debug!(id = %id, "dataset present outside interval, leaving it"),
                Err(err) => warn!(id = %id, "cannot check dataset in source: {err}"),
            }
        }
        Ok(())
    }

    fn copy_dataset(&self, walk: &Walk<'_>, id: &str, report: &mut SyncReport) -> SyncResult<()> {
        let request = MigrationRequest::new(
            Collection::Datasets,
            Predicate::term(fields::ID, id.to_string()),
        );
        let migrated = self.migrator.migrate(walk.source, walk.target, &request)?;
        report.entry(Collection::Datasets).migrated += migrated;

        for child in Collection::CHILDREN {
            let request =
                MigrationRequest::new(child, Predicate::term(fields::DATASET_ID, id.to_string()));
            let migrated = self.migrator.migrate(walk.source, walk.target, &request)?;
            report.entry(child).migrated += migrated;
        }
        Ok(())
    }

    fn delete_dataset(&self, walk: &Walk<'_>, id: &str, report: &mut SyncReport) -> SyncResult<()> {
        info!(id = %id, "dataset no longer in source, deleting");
        walk.target
            .delete_by_predicate(Collection::Datasets, &Predicate::term(fields::ID, id.to_string()))?;
        report.entry(Collection::Datasets).deleted += 1;

        for child in Collection::CHILDREN {
            let by_parent = Predicate::term(fields::DATASET_ID, id.to_string());
            let count = walk.target.count(child, &by_parent)?;
            walk.target.delete_by_predicate(child, &by_parent)?;
            report.entry(child).deleted += count;
        }
        Ok(())
    }

    fn list_datasets(
        &self,
        store: &dyn StoreClient,
        predicate: &Predicate,
    ) -> StoreResult<BTreeMap<String, DatasetEntry>> {
        let field = &self.config.timestamp_field;
        let page_size = self.config.listing_page_size.max(1);
        let mut listing = BTreeMap::new();
        let mut offset = 0u64;
        loop {
            let request = QueryRequest::new(predicate.clone(), offset, page_size)
                .with_fields([fields::ID, fields::VERSION, field.as_str()]);
            let page = store.query(Collection::Datasets, &request)?;
            let fetched = page.records.len() as u64;
            for record in page.records {
                if let Some(id) = record.id() {
                    let ts = record.timestamp(field).map(truncate_to_second);
                    listing.insert(id, (record.version(), ts));
                }
            }
            offset += fetched;
            if fetched == 0 || offset >= page.total_matches {
                break;
            }
        }
        Ok(listing)
    }
}

/// Union of both stores' observed key ranges, rounded out to whole months.
fn enclosing_span(source: &Fingerprint, target: &Fingerprint) -> Option<TimeInterval> {
    let min = [source.min, target.min].into_iter().flatten().min()?;
    let max = [source.max, target.max].into_iter().flatten().max()?;
    Some(TimeInterval::enclosing(&min, &max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn span_covers_both_stores() {
        let at = |m, d| Some(Utc.with_ymd_and_hms(2019, m, d, 0, 0, 0).unwrap());
        let source = Fingerprint {
            count: 2,
            min: at(3, 5),
            max: at(4, 1),
            mean: at(3, 20),
        };
        let target = Fingerprint {
            count: 1,
            min: at(6, 9),
            max: at(6, 9),
            mean: at(6, 9),
        };
        let span = enclosing_span(&source, &target).unwrap();
        assert_eq!(span.start, at(3, 1).unwrap());
        assert_eq!(span.stop, at(7, 1).unwrap());
    }

    #[test]
    fn empty_fingerprints_have_no_span() {
        assert!(enclosing_span(&Fingerprint::empty(), &Fingerprint::empty()).is_none());
    }

    #[test]
    fn report_totals() {
        let mut report = SyncReport::default();
        report.entry(Collection::Datasets).migrated = 2;
        report.entry(Collection::Files).migrated = 5;
        report.entry(Collection::Files).deleted = 1;
        assert_eq!(report.total_migrated(), 7);
        assert_eq!(report.total_deleted(), 1);
        assert!(report.collection(Collection::Files).touched());
        assert!(!report.collection(Collection::Aggregations).touched());
        assert!(!report.converged());
    }
}

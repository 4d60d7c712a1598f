//! Batched record migration between stores.
//!
//! Records are paged from the source, transformed, and upserted into the
//! target one page at a time. When a page cannot be written as a whole the
//! migrator falls back to one record per request, so a single bad record
//! costs only itself.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::interval::TimeInterval;
use catsync_store::{
    fields, Clause, Collection, Predicate, QueryRequest, Record, StoreClient, StoreError,
};
use serde_json::{Number, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ordered literal string substitutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    pairs: Vec<(String, String)>,
}

impl Replacements {
    /// Creates substitutions from `(old, new)` pairs, applied in order.
    pub fn new<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(a, b)| (a.into(), b.into()))
                .collect(),
        }
    }

    /// Parses `old:new,old2:new2`. A pair without `:` is rejected.
    pub fn parse(text: &str) -> SyncResult<Self> {
        let mut pairs = Vec::new();
        for pair in text.split(',').filter(|p| !p.is_empty()) {
            let (old, new) = pair.split_once(':').ok_or_else(|| {
                SyncError::Config(format!("replacement '{pair}' is not of the form old:new"))
            })?;
            if old.is_empty() {
                return Err(SyncError::Config(format!(
                    "replacement '{pair}' has an empty pattern"
                )));
            }
            pairs.push((old.to_string(), new.to_string()));
        }
        Ok(Self { pairs })
    }

    /// True when there is nothing to substitute.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The pairs, in application order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Applies every substitution to `text`.
    pub fn apply(&self, text: &str) -> String {
        self.pairs
            .iter()
            .fold(text.to_string(), |acc, (old, new)| acc.replace(old, new))
    }

    fn apply_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.apply(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.apply_value(v)),
            _ => {}
        }
    }
}

/// A field repair applied to records of one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Parses the field as a float, substituting `default` when it does not parse.
    Float {
        /// Collection the coercion applies to.
        collection: Collection,
        /// Field to coerce.
        field: String,
        /// Value used when parsing fails.
        default: f64,
    },
}

impl Coercion {
    fn apply(&self, collection: Collection, record: &mut Record) {
        match self {
            Coercion::Float {
                collection: only,
                field,
                default,
            } => {
                if *only != collection {
                    return;
                }
                let Some(value) = record.get(field) else {
                    return;
                };
                let coerced = match value {
                    Value::Array(items) => {
                        Value::Array(items.iter().map(|v| coerce_float(v, *default)).collect())
                    }
                    other => coerce_float(other, *default),
                };
                record.set(field.clone(), coerced);
            }
        }
    }
}

fn coerce_float(value: &Value, default: f64) -> Value {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let float = parsed.filter(|f| f.is_finite()).unwrap_or(default);
    Number::from_f64(float).map_or(Value::Null, Value::Number)
}

/// Per-record transformation applied before upsert.
///
/// In order: the conflict-version marker is dropped, the id suffix is
/// appended, replacements are applied, then coercions.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPipeline {
    id_suffix: String,
    replacements: Replacements,
    coercions: Vec<Coercion>,
}

impl TransformPipeline {
    /// Pipeline with the standard dataset repairs and nothing else.
    pub fn new() -> Self {
        Self {
            id_suffix: String::new(),
            replacements: Replacements::default(),
            coercions: ["height_bottom", "height_top"]
                .into_iter()
                .map(|field| Coercion::Float {
                    collection: Collection::Datasets,
                    field: field.to_string(),
                    default: 0.0,
                })
                .collect(),
        }
    }

    /// Appends `suffix` to identifier fields.
    pub fn with_id_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.id_suffix = suffix.into();
        self
    }

    /// Sets the literal substitutions.
    pub fn with_replacements(mut self, replacements: Replacements) -> Self {
        self.replacements = replacements;
        self
    }

    /// Adds a coercion.
    pub fn with_coercion(mut self, coercion: Coercion) -> Self {
        self.coercions.push(coercion);
        self
    }

    /// Transforms one record of `collection`.
    pub fn apply(&self, collection: Collection, mut record: Record) -> Record {
        record.remove(fields::CONFLICT_VERSION);

        if !self.id_suffix.is_empty() {
            for field in [
                fields::ID,
                fields::MASTER_ID,
                fields::INSTANCE_ID,
                fields::DATASET_ID,
            ] {
                if let Some(Value::String(s)) = record.as_map_mut().get_mut(field) {
                    s.push_str(&self.id_suffix);
                }
            }
        }

        if !self.replacements.is_empty() {
            for value in record.as_map_mut().values_mut() {
                self.replacements.apply_value(value);
            }
        }

        for coercion in &self.coercions {
            coercion.apply(collection, &mut record);
        }
        record
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// What to migrate.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRequest {
    /// Collection to copy.
    pub collection: Collection,
    /// Records to copy.
    pub predicate: Predicate,
    /// Extra filter, typically a time interval.
    pub range_filter: Option<Clause>,
    /// Index of the first source record to copy.
    pub offset: u64,
    /// Cap on records moved; `None` uses the configured maximum.
    pub max_records: Option<u64>,
    /// Commit the target when done.
    pub commit: bool,
    /// Optimize the target when done; implies commit.
    pub optimize: bool,
}

impl MigrationRequest {
    /// Creates a request that commits but does not optimize.
    pub fn new(collection: Collection, predicate: Predicate) -> Self {
        Self {
            collection,
            predicate,
            range_filter: None,
            offset: 0,
            max_records: None,
            commit: true,
            optimize: false,
        }
    }

    /// Restricts the request with an extra clause.
    pub fn with_range_filter(mut self, clause: Clause) -> Self {
        self.range_filter = Some(clause);
        self
    }

    /// Starts at a source offset.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Caps the number of records moved.
    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Sets whether to commit when done.
    pub fn with_commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    /// Sets whether to optimize when done.
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    fn effective_predicate(&self) -> Predicate {
        match &self.range_filter {
            Some(clause) => self.predicate.and(clause.clone()),
            None => self.predicate.clone(),
        }
    }
}

/// Copies records from a source store to a target store.
#[derive(Debug, Clone)]
pub struct BulkMigrator {
    batch_size: u64,
    max_records: u64,
    chunk_pause: Duration,
    timestamp_field: String,
    pipeline: TransformPipeline,
}

impl BulkMigrator {
    /// Creates a migrator with the default pipeline.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_records: config.max_records,
            chunk_pause: config.chunk_pause,
            timestamp_field: config.timestamp_field.clone(),
            pipeline: TransformPipeline::default(),
        }
    }

    /// Replaces the transform pipeline.
    pub fn with_pipeline(mut self, pipeline: TransformPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Migrates matching records. Returns the number written to the target.
    ///
    /// Page and record failures are contained; only a failed commit or
    /// optimize, or a source that answers no query at all, is an error.
    pub fn migrate(
        &self,
        source: &dyn StoreClient,
        target: &dyn StoreClient,
        request: &MigrationRequest,
    ) -> SyncResult<u64> {
        let collection = request.collection;
        let predicate = request.effective_predicate();
        let max = request.max_records.unwrap_or(self.max_records);

        let mut offset = request.offset;
        let mut processed = 0u64;
        let mut migrated = 0u64;
        let mut total: Option<u64> = None;

        while processed < max {
            let limit = self.batch_size.min(max - processed);
            let page_request = QueryRequest::new(predicate.clone(), offset, limit);
            match source.query(collection, &page_request) {
                Ok(page) => {
                    total = Some(page.total_matches);
                    let fetched = page.records.len() as u64;
                    if fetched == 0 {
                        break;
                    }
                    migrated += self.write_page(target, collection, page.records);
                    offset += fetched;
                    processed += fetched;
                    debug!(
                        collection = %collection,
                        offset,
                        total = page.total_matches,
                        "migrated page"
                    );
                    if offset >= page.total_matches {
                        break;
                    }
                }
                Err(err) => {
                    warn!(collection = %collection, offset, "page query failed, migrating one record at a time: {err}");
                    let window = self.window_one_by_one(
                        source, target, collection, &predicate, offset, limit, total, err,
                    )?;
                    migrated += window.migrated;
                    offset += window.processed;
                    processed += window.processed;
                    if window.processed == 0 || total.is_some_and(|t| offset >= t) {
                        break;
                    }
                }
            }
        }

        if request.optimize {
            target.optimize(collection)?;
        } else if request.commit {
            target.commit(collection)?;
        }
        info!(
            collection = %collection,
            predicate = %predicate,
            migrated,
            "migration finished"
        );
        Ok(migrated)
    }

    /// Migrates one calendar month at a time, oldest first, pausing after
    /// every month that moved records.
    ///
    /// Each month is read from its start, so a request offset is refused.
    pub fn migrate_monthly(
        &self,
        source: &dyn StoreClient,
        target: &dyn StoreClient,
        request: &MigrationRequest,
    ) -> SyncResult<u64> {
        if request.offset != 0 {
            return Err(SyncError::Config(format!(
                "monthly migration starts every month at offset 0, got offset {}",
                request.offset
            )));
        }
        let predicate = request.effective_predicate();
        let stats = source.stats(request.collection, &predicate, &self.timestamp_field)?;
        let (Some(min), Some(max)) = (stats.min, stats.max) else {
            info!(collection = %request.collection, "nothing to migrate");
            return Ok(0);
        };

        let mut months = TimeInterval::enclosing(&min, &max).children();
        months.reverse();
        let cap = request.max_records.unwrap_or(self.max_records);
        let mut migrated = 0u64;
        let last = months.len().saturating_sub(1);

        for (i, month) in months.iter().enumerate() {
            if migrated >= cap {
                break;
            }
            let chunk = MigrationRequest {
                predicate: predicate.clone(),
                range_filter: Some(month.clause(&self.timestamp_field)),
                offset: 0,
                max_records: Some(cap - migrated),
                ..request.clone()
            };
            info!(collection = %request.collection, month = %month, "migrating chunk");
            let moved = self.migrate(source, target, &chunk)?;
            migrated += moved;
            if moved > 0 && i < last && !self.chunk_pause.is_zero() {
                debug!(pause = ?self.chunk_pause, "pausing between chunks");
                std::thread::sleep(self.chunk_pause);
            }
        }
        Ok(migrated)
    }

    /// Upserts a page; on failure retries each record alone.
    fn write_page(&self, target: &dyn StoreClient, collection: Collection, records: Vec<Record>) -> u64 {
        let transformed: Vec<Record> = records
            .into_iter()
            .map(|r| self.pipeline.apply(collection, r))
            .collect();
        match target.upsert(collection, &transformed) {
            Ok(()) => transformed.len() as u64,
            Err(err) => {
                warn!(
                    collection = %collection,
                    records = transformed.len(),
                    "batch upsert failed, retrying one record at a time: {err}"
                );
                transformed
                    .iter()
                    .filter(|record| self.write_one(target, collection, record))
                    .count() as u64
            }
        }
    }

    fn write_one(&self, target: &dyn StoreClient, collection: Collection, record: &Record) -> bool {
        match target.upsert(collection, std::slice::from_ref(record)) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    collection = %collection,
                    id = record.id().unwrap_or_default(),
                    "record not migrated: {err}"
                );
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn window_one_by_one(
        &self,
        source: &dyn StoreClient,
        target: &dyn StoreClient,
        collection: Collection,
        predicate: &Predicate,
        start: u64,
        limit: u64,
        total: Option<u64>,
        page_error: StoreError,
    ) -> SyncResult<Window> {
        let mut window = Window::default();
        let mut last_error = page_error;
        let mut answered = false;

        for offset in start..start + limit {
            if total.is_some_and(|t| offset >= t) {
                break;
            }
            let request = QueryRequest::new(predicate.clone(), offset, 1);
            match source.query(collection, &request) {
                Ok(page) => {
                    answered = true;
                    let Some(record) = page.records.into_iter().next() else {
                        break;
                    };
                    let record = self.pipeline.apply(collection, record);
                    if self.write_one(target, collection, &record) {
                        window.migrated += 1;
                    }
                }
                Err(err) => {
                    warn!(collection = %collection, offset, "record not migrated: {err}");
                    last_error = err;
                }
            }
            window.processed += 1;
        }

        if !answered {
            return Err(last_error.into());
        }
        Ok(window)
    }
}

#[derive(Debug, Default)]
struct Window {
    processed: u64,
    migrated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_store::MemoryStore;
    use serde_json::json;

    #[test]
    fn parse_replacements() {
        let r = Replacements::parse("esgf-node.llnl.gov:esgf.llnl.gov,http:https").unwrap();
        assert_eq!(r.pairs().len(), 2);
        assert_eq!(
            r.apply("http://esgf-node.llnl.gov/thredds"),
            "https://esgf.llnl.gov/thredds"
        );
        assert!(Replacements::parse("").unwrap().is_empty());
        assert!(matches!(
            Replacements::parse("a:b,broken"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn pipeline_order() {
        let pipeline = TransformPipeline::new()
            .with_id_suffix("_clone")
            .with_replacements(Replacements::new([("old", "new")]));
        let record = Record::new()
            .with("id", "ds.old.v1|node")
            .with("master_id", "ds.old")
            .with("instance_id", "ds.old.v1")
            .with("_version_", 1_634_000_000_000i64)
            .with("url", json!(["http://old/a", "http://old/b"]))
            .with("height_bottom", "n/a")
            .with("height_top", "12.5");
        let out = pipeline.apply(Collection::Datasets, record);

        assert!(out.get("_version_").is_none());
        // suffix first, then replacements see the suffixed value
        assert_eq!(out.id().as_deref(), Some("ds.new.v1|node_clone"));
        assert_eq!(out.master_id().as_deref(), Some("ds.new_clone"));
        assert_eq!(out.get("url"), Some(&json!(["http://new/a", "http://new/b"])));
        assert_eq!(out.get("height_bottom"), Some(&json!(0.0)));
        assert_eq!(out.get("height_top"), Some(&json!(12.5)));
    }

    #[test]
    fn coercions_only_touch_their_collection() {
        let record = Record::new().with("id", "f").with("height_top", "bad");
        let out = TransformPipeline::new().apply(Collection::Files, record);
        assert_eq!(out.get("height_top"), Some(&json!("bad")));
    }

    fn source_with(n: usize) -> MemoryStore {
        let store = MemoryStore::new("source");
        store.insert(
            Collection::Files,
            (0..n).map(|i| {
                Record::new()
                    .with("id", format!("f{i:03}"))
                    .with("_timestamp", "2019-05-01T00:00:00Z")
            }),
        );
        store
    }

    #[test]
    fn respects_max_records_and_offset() {
        let source = source_with(30);
        let target = MemoryStore::new("target");
        let migrator = BulkMigrator::new(&SyncConfig::new().with_batch_size(7));
        let request = MigrationRequest::new(Collection::Files, Predicate::all())
            .with_offset(5)
            .with_max_records(12);
        assert_eq!(migrator.migrate(&source, &target, &request).unwrap(), 12);
        assert_eq!(target.ids(Collection::Files).first().map(String::as_str), Some("f005"));
        // 7 + 5
        assert_eq!(source.calls().query, 2);
        assert_eq!(target.calls().commit, 1);
        assert_eq!(target.calls().optimize, 0);
    }

    #[test]
    fn optimize_replaces_commit() {
        let source = source_with(3);
        let target = MemoryStore::new("target");
        let migrator = BulkMigrator::new(&SyncConfig::new());
        let request = MigrationRequest::new(Collection::Files, Predicate::all()).with_optimize(true);
        migrator.migrate(&source, &target, &request).unwrap();
        assert_eq!(target.calls().optimize, 1);
        assert_eq!(target.calls().commit, 0);
    }

    #[test]
    fn degrades_to_single_records() {
        let source = source_with(10);
        let target = MemoryStore::new("target");
        target.fail_upserts_larger_than(Some(1));
        target.reject_id("f003");
        target.reject_id("f007");

        let migrator = BulkMigrator::new(&SyncConfig::new());
        let request = MigrationRequest::new(Collection::Files, Predicate::all());
        let migrated = migrator.migrate(&source, &target, &request).unwrap();

        assert_eq!(migrated, 8);
        // one failed batch plus exactly one attempt per record
        assert_eq!(target.calls().upsert, 11);
        assert_eq!(target.len(Collection::Files), 8);
    }

    #[test]
    fn unreachable_source_is_an_error() {
        let source = source_with(3);
        source.set_unreachable(true);
        let target = MemoryStore::new("target");
        let migrator = BulkMigrator::new(&SyncConfig::new());
        let request = MigrationRequest::new(Collection::Files, Predicate::all());
        assert!(migrator.migrate(&source, &target, &request).is_err());
        assert_eq!(target.calls().upsert, 0);
    }

    #[test]
    fn commit_failure_is_fatal() {
        let source = MemoryStore::new("source");
        let target = MemoryStore::new("target");
        target.set_unreachable(true);
        let migrator = BulkMigrator::new(&SyncConfig::new());
        let request = MigrationRequest::new(Collection::Files, Predicate::all());
        assert!(migrator.migrate(&source, &target, &request).is_err());
    }

    #[test]
    fn monthly_chunks_in_order() {
        let source = MemoryStore::new("source");
        for (i, ts) in [
            "2019-03-10T00:00:00Z",
            "2019-05-02T00:00:00Z",
            "2019-05-20T00:00:00Z",
        ]
        .iter()
        .enumerate()
        {
            source.insert(
                Collection::Datasets,
                [Record::new().with("id", format!("d{i}")).with("_timestamp", *ts)],
            );
        }
        let target = MemoryStore::new("target");
        let migrator = BulkMigrator::new(&SyncConfig::new().with_chunk_pause(Duration::ZERO));
        let request = MigrationRequest::new(Collection::Datasets, Predicate::all());
        assert_eq!(migrator.migrate_monthly(&source, &target, &request).unwrap(), 3);
        // march, april, may
        assert_eq!(target.calls().commit, 3);
        assert_eq!(target.len(Collection::Datasets), 3);
    }

    #[test]
    fn monthly_refuses_an_offset() {
        let source = MemoryStore::new("source");
        let target = MemoryStore::new("target");
        let migrator = BulkMigrator::new(&SyncConfig::new());
        let request =
            MigrationRequest::new(Collection::Datasets, Predicate::all()).with_offset(100);
        assert!(matches!(
            migrator.migrate_monthly(&source, &target, &request),
            Err(SyncError::Config(_))
        ));
        assert_eq!(source.calls().stats, 0);
    }
}

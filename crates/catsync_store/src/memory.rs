//! In-memory store for testing.
//!
//! Behaves like a single catalog node: records are keyed by id per
//! collection, every write assigns a fresh `_version_`, and a positive
//! `_version_` on an incoming record must match the stored one. Failures
//! can be injected to exercise the engine's degraded paths.

use crate::client::{DocumentUpdate, QueryPage, QueryRequest, StoreClient, UpdateMode};
use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};
use crate::predicate::Predicate;
use crate::record::{fields, Record};
use crate::stats::FieldStats;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Number of calls made per store operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `query` calls, including those made by `count`.
    pub query: u64,
    /// `stats` calls.
    pub stats: u64,
    /// `upsert` calls.
    pub upsert: u64,
    /// `update_fields` calls.
    pub update: u64,
    /// `delete_by_predicate` calls.
    pub delete: u64,
    /// `commit` calls.
    pub commit: u64,
    /// `optimize` calls.
    pub optimize: u64,
}

type Documents = BTreeMap<String, Record>;

/// In-memory [`StoreClient`].
pub struct MemoryStore {
    name: String,
    collections: RwLock<HashMap<Collection, Documents>>,
    next_version: AtomicI64,
    unreachable: AtomicBool,
    max_upsert_batch: RwLock<Option<usize>>,
    rejected_ids: RwLock<HashSet<String>>,
    calls: Mutex<CallCounts>,
}

impl MemoryStore {
    /// Creates an empty store identified by `name` in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            next_version: AtomicI64::new(1),
            unreachable: AtomicBool::new(false),
            max_upsert_batch: RwLock::new(None),
            rejected_ids: RwLock::new(HashSet::new()),
            calls: Mutex::new(CallCounts::default()),
        }
    }

    /// Makes every subsequent call fail with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Rejects upserts carrying more than `max` records.
    pub fn fail_upserts_larger_than(&self, max: Option<usize>) {
        *self.max_upsert_batch.write() = max;
    }

    /// Rejects any upsert containing a record with this id.
    pub fn reject_id(&self, id: impl Into<String>) {
        self.rejected_ids.write().insert(id.into());
    }

    /// Stores records directly, bypassing failure injection and call counting.
    pub fn insert(&self, collection: Collection, records: impl IntoIterator<Item = Record>) {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection).or_default();
        for mut record in records {
            if let Some(id) = record.id() {
                record.set(fields::CONFLICT_VERSION, self.bump_version());
                docs.insert(id, record);
            }
        }
    }

    /// All records of a collection, ordered by id.
    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.collections
            .read()
            .get(&collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of all records of a collection, ordered.
    pub fn ids(&self, collection: Collection) -> Vec<String> {
        self.collections
            .read()
            .get(&collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up one record.
    pub fn get(&self, collection: Collection, id: &str) -> Option<Record> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Number of records in a collection.
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        *self.calls.lock()
    }

    /// Resets call counters.
    pub fn reset_calls(&self) {
        *self.calls.lock() = CallCounts::default();
    }

    fn bump_version(&self) -> i64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::transport_retryable(
                &self.name,
                "connection refused",
            ));
        }
        Ok(())
    }

    fn matching(&self, collection: Collection, predicate: &Predicate) -> Vec<Record> {
        self.collections
            .read()
            .get(&collection)
            .map(|docs| {
                docs.values()
                    .filter(|record| predicate.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl StoreClient for MemoryStore {
    fn endpoint(&self) -> &str {
        &self.name
    }

    fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<QueryPage> {
        self.calls.lock().query += 1;
        self.check_reachable()?;

        let matching = self.matching(collection, &request.predicate);
        let total_matches = matching.len() as u64;
        let offset = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(request.limit).unwrap_or(usize::MAX);
        let records = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|record| {
                if request.fields.is_empty() {
                    return record;
                }
                let mut projected = Record::new();
                for field in &request.fields {
                    if let Some(value) = record.get(field) {
                        projected.set(field.clone(), value.clone());
                    }
                }
                projected
            })
            .collect();
        Ok(QueryPage {
            total_matches,
            records,
        })
    }

    fn stats(
        &self,
        collection: Collection,
        predicate: &Predicate,
        field: &str,
    ) -> StoreResult<FieldStats> {
        self.calls.lock().stats += 1;
        self.check_reachable()?;

        let matching = self.matching(collection, predicate);
        let stats = FieldStats::from_timestamps(matching.iter().filter_map(|r| r.timestamp(field)));
        Ok(FieldStats {
            count: matching.len() as u64,
            ..stats
        })
    }

    fn upsert(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
        self.calls.lock().upsert += 1;
        self.check_reachable()?;

        if let Some(max) = *self.max_upsert_batch.read() {
            if records.len() > max {
                return Err(StoreError::Status {
                    url: format!("{}/{}/update", self.name, collection),
                    status: 400,
                });
            }
        }

        let mut collections = self.collections.write();
        let docs = collections.entry(collection).or_default();

        // validate the whole batch before applying any of it
        let rejected = self.rejected_ids.read();
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id().ok_or_else(|| StoreError::MalformedField {
                field: fields::ID.to_string(),
                value: String::new(),
            })?;
            if rejected.contains(&id) {
                return Err(StoreError::Status {
                    url: format!("{}/{}/update", self.name, collection),
                    status: 400,
                });
            }
            let expected = record
                .get(fields::CONFLICT_VERSION)
                .and_then(Value::as_i64)
                .filter(|v| *v > 0);
            if let Some(expected) = expected {
                let stored = docs
                    .get(&id)
                    .and_then(|r| r.get(fields::CONFLICT_VERSION))
                    .and_then(Value::as_i64);
                if stored != Some(expected) {
                    return Err(StoreError::Conflict { id });
                }
            }
            ids.push(id);
        }

        for (id, record) in ids.into_iter().zip(records) {
            let mut stored = record.clone();
            stored.set(fields::CONFLICT_VERSION, self.bump_version());
            docs.insert(id, stored);
        }
        Ok(())
    }

    fn update_fields(&self, collection: Collection, updates: &[DocumentUpdate]) -> StoreResult<()> {
        self.calls.lock().update += 1;
        self.check_reachable()?;

        let mut collections = self.collections.write();
        let docs = collections.entry(collection).or_default();
        for update in updates {
            let record = docs
                .entry(update.id.clone())
                .or_insert_with(|| Record::new().with(fields::ID, update.id.clone()));
            for mutation in &update.mutations {
                match mutation.mode {
                    UpdateMode::Set => match mutation.values.as_slice() {
                        [] => {
                            record.remove(&mutation.field);
                        }
                        [single] => record.set(mutation.field.clone(), single.clone()),
                        many => record.set(mutation.field.clone(), Value::Array(many.to_vec())),
                    },
                    UpdateMode::Add => {
                        let mut values = record.values(&mutation.field);
                        values.extend(mutation.values.iter().cloned());
                        record.set(mutation.field.clone(), Value::Array(values));
                    }
                }
            }
            record.set(fields::CONFLICT_VERSION, self.bump_version());
        }
        Ok(())
    }

    fn delete_by_predicate(&self, collection: Collection, predicate: &Predicate) -> StoreResult<()> {
        self.calls.lock().delete += 1;
        self.check_reachable()?;

        if let Some(docs) = self.collections.write().get_mut(&collection) {
            docs.retain(|_, record| !predicate.matches(record));
        }
        Ok(())
    }

    fn commit(&self, _collection: Collection) -> StoreResult<()> {
        self.calls.lock().commit += 1;
        self.check_reachable()
    }

    fn optimize(&self, _collection: Collection) -> StoreResult<()> {
        self.calls.lock().optimize += 1;
        self.check_reachable()
    }
}

//! Predicate-addressed field updates.
//!
//! An update first snapshots every matching record id (and every field a
//! `CopyFrom` reads), then sends the whole payload, then commits once.
//! Offsets are never reused across a commit, since a commit can reorder
//! the result set.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use catsync_store::{
    fields, Collection, DocumentUpdate, FieldMutation, Predicate, QueryRequest, Record,
    StoreClient, UpdateMode,
};
use serde_json::Value;
use tracing::{debug, info};

/// What to do with one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAction {
    /// Replace the field's values.
    Set(Vec<Value>),
    /// Append values to the field.
    Add(Vec<Value>),
    /// Remove the field.
    Remove,
    /// Replace the field's values with those of another field of the same record.
    CopyFrom(String),
}

/// One field operation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOp {
    /// Field to mutate.
    pub field: String,
    /// Action to apply.
    pub action: FieldAction,
}

impl FieldOp {
    /// `field = values`.
    pub fn set<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            action: FieldAction::Set(values.into_iter().map(Into::into).collect()),
        }
    }

    /// `field += values`.
    pub fn add<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            action: FieldAction::Add(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Removes `field`.
    pub fn remove(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            action: FieldAction::Remove,
        }
    }

    /// `field = source`.
    pub fn copy_from(field: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            action: FieldAction::CopyFrom(source.into()),
        }
    }

    fn mutation(&self, record: &Record) -> Option<FieldMutation> {
        let (mode, values) = match &self.action {
            FieldAction::Set(values) => (UpdateMode::Set, values.clone()),
            FieldAction::Add(values) => (UpdateMode::Add, values.clone()),
            FieldAction::Remove => (UpdateMode::Set, Vec::new()),
            FieldAction::CopyFrom(source) => {
                let values = record.values(source);
                if values.is_empty() {
                    return None;
                }
                (UpdateMode::Set, values)
            }
        };
        Some(FieldMutation {
            field: self.field.clone(),
            mode,
            values,
        })
    }
}

/// A set of field operations applied to every record matching a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    /// Target collection.
    pub collection: Collection,
    /// Records to update.
    pub predicate: Predicate,
    /// Operations, applied in order.
    pub ops: Vec<FieldOp>,
}

impl FieldUpdate {
    /// Creates an update with no operations.
    pub fn new(collection: Collection, predicate: Predicate) -> Self {
        Self {
            collection,
            predicate,
            ops: Vec::new(),
        }
    }

    /// Adds an operation.
    pub fn with_op(mut self, op: FieldOp) -> Self {
        self.ops.push(op);
        self
    }

    /// The same operations addressed to the children of one dataset.
    pub fn for_children(&self, collection: Collection, dataset_id: &str) -> Self {
        Self {
            collection,
            predicate: Predicate::term(fields::DATASET_ID, dataset_id),
            ops: self.ops.clone(),
        }
    }

    fn source_fields(&self) -> Vec<String> {
        let mut wanted = vec![fields::ID.to_string()];
        for op in &self.ops {
            if let FieldAction::CopyFrom(source) = &op.action {
                if !wanted.contains(source) {
                    wanted.push(source.clone());
                }
            }
        }
        wanted
    }
}

/// Applies [`FieldUpdate`]s against a single store.
#[derive(Debug, Clone)]
pub struct FieldUpdateEngine {
    page_size: u64,
}

impl FieldUpdateEngine {
    /// Creates an engine.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            page_size: config.update_page_size.max(1),
        }
    }

    /// Snapshots the matching records and builds the full payload, without
    /// sending anything.
    pub fn plan(
        &self,
        store: &dyn StoreClient,
        update: &FieldUpdate,
    ) -> SyncResult<Vec<DocumentUpdate>> {
        let snapshot = self.snapshot(store, update)?;
        Ok(snapshot
            .iter()
            .filter_map(|record| {
                let id = record.id()?;
                let mutations: Vec<FieldMutation> =
                    update.ops.iter().filter_map(|op| op.mutation(record)).collect();
                (!mutations.is_empty()).then_some(DocumentUpdate { id, mutations })
            })
            .collect())
    }

    /// Applies an update and commits once. Returns the number of records updated.
    pub fn apply(&self, store: &dyn StoreClient, update: &FieldUpdate) -> SyncResult<usize> {
        let payload = self.plan(store, update)?;
        if payload.is_empty() {
            debug!(collection = %update.collection, predicate = %update.predicate, "no records to update");
            return Ok(0);
        }
        let chunk = usize::try_from(self.page_size).unwrap_or(usize::MAX);
        for docs in payload.chunks(chunk) {
            store.update_fields(update.collection, docs)?;
        }
        store.commit(update.collection)?;
        info!(
            collection = %update.collection,
            predicate = %update.predicate,
            updated = payload.len(),
            "applied field update"
        );
        Ok(payload.len())
    }

    /// Applies a dataset update, then the same operations to the files and
    /// aggregations of every matched dataset. Returns the matched dataset ids.
    pub fn apply_cascading(
        &self,
        store: &dyn StoreClient,
        update: &FieldUpdate,
    ) -> SyncResult<Vec<String>> {
        let ids: Vec<String> = self
            .snapshot(store, update)?
            .iter()
            .filter_map(Record::id)
            .collect();
        self.apply(store, update)?;
        if update.collection == Collection::Datasets {
            for id in &ids {
                for child in Collection::CHILDREN {
                    self.apply(store, &update.for_children(child, id))?;
                }
            }
        }
        Ok(ids)
    }

    fn snapshot(&self, store: &dyn StoreClient, update: &FieldUpdate) -> SyncResult<Vec<Record>> {
        let wanted = update.source_fields();
        let mut records = Vec::new();
        let mut offset = 0u64;
        loop {
            let request = QueryRequest::new(update.predicate.clone(), offset, self.page_size)
                .with_fields(wanted.iter().cloned());
            let page = store.query(update.collection, &request)?;
            let fetched = page.records.len() as u64;
            records.extend(page.records);
            offset += fetched;
            if fetched == 0 || offset >= page.total_matches {
                break;
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_store::MemoryStore;
    use serde_json::json;

    fn store_with(n: usize) -> MemoryStore {
        let store = MemoryStore::new("mem");
        store.insert(
            Collection::Datasets,
            (0..n).map(|i| {
                Record::new()
                    .with("id", format!("ds{i:03}"))
                    .with("project", "CMIP6")
                    .with("model", "old-model")
            }),
        );
        store
    }

    fn engine(page: u64) -> FieldUpdateEngine {
        FieldUpdateEngine::new(&SyncConfig::new().with_update_page_size(page))
    }

    #[test]
    fn snapshot_paginates_before_mutating() {
        let store = store_with(25);
        let update = FieldUpdate::new(Collection::Datasets, Predicate::term("project", "CMIP6"))
            .with_op(FieldOp::set("latest", ["false"]));
        let updated = engine(10).apply(&store, &update).unwrap();

        assert_eq!(updated, 25);
        let calls = store.calls();
        assert_eq!(calls.query, 3);
        assert_eq!(calls.update, 3);
        assert_eq!(calls.commit, 1);
        assert!(store
            .records(Collection::Datasets)
            .iter()
            .all(|r| r.latest() == Some(false)));
    }

    #[test]
    fn rename_is_copy_then_remove() {
        let store = store_with(2);
        let e = engine(100);
        let predicate = Predicate::term("project", "CMIP6");
        e.apply(
            &store,
            &FieldUpdate::new(Collection::Datasets, predicate.clone())
                .with_op(FieldOp::copy_from("source_id", "model")),
        )
        .unwrap();
        e.apply(
            &store,
            &FieldUpdate::new(Collection::Datasets, predicate).with_op(FieldOp::remove("model")),
        )
        .unwrap();

        let record = store.get(Collection::Datasets, "ds000").unwrap();
        assert_eq!(record.get("source_id"), Some(&json!("old-model")));
        assert!(record.get("model").is_none());
        assert_eq!(store.calls().commit, 2);
    }

    #[test]
    fn no_matches_no_commit() {
        let store = store_with(3);
        let update = FieldUpdate::new(Collection::Datasets, Predicate::term("project", "CMIP5"))
            .with_op(FieldOp::set("latest", ["false"]));
        assert_eq!(engine(100).apply(&store, &update).unwrap(), 0);
        assert_eq!(store.calls().commit, 0);
        assert_eq!(store.calls().update, 0);
    }

    #[test]
    fn cascades_to_children() {
        let store = store_with(1);
        store.insert(
            Collection::Files,
            (0..3).map(|i| {
                Record::new()
                    .with("id", format!("f{i}"))
                    .with("dataset_id", "ds000")
            }),
        );
        store.insert(
            Collection::Aggregations,
            [Record::new().with("id", "a0").with("dataset_id", "ds000")],
        );
        let update = FieldUpdate::new(Collection::Datasets, Predicate::term("id", "ds000"))
            .with_op(FieldOp::add("xlink", ["http://doc|Errata|errata"]));
        let ids = engine(100).apply_cascading(&store, &update).unwrap();

        assert_eq!(ids, vec!["ds000".to_string()]);
        for f in store.records(Collection::Files) {
            assert_eq!(f.get("xlink"), Some(&json!(["http://doc|Errata|errata"])));
        }
        assert!(store.get(Collection::Aggregations, "a0").unwrap().contains("xlink"));
        assert_eq!(store.calls().commit, 3);
    }
}

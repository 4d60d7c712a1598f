//! The store client abstraction.

use crate::collection::Collection;
use crate::error::StoreResult;
use crate::predicate::Predicate;
use crate::record::Record;
use crate::stats::FieldStats;
use serde_json::Value;
use std::sync::Arc;

/// A paged query against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Records must satisfy this predicate.
    pub predicate: Predicate,
    /// Fields to return; empty means all fields.
    pub fields: Vec<String>,
    /// Index of the first record to return.
    pub offset: u64,
    /// Maximum number of records to return.
    pub limit: u64,
}

impl QueryRequest {
    /// Creates a request for all fields.
    pub fn new(predicate: Predicate, offset: u64, limit: u64) -> Self {
        Self {
            predicate,
            fields: Vec::new(),
            offset,
            limit,
        }
    }

    /// Restricts the returned fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    /// Total number of records matching the predicate at query time.
    pub total_matches: u64,
    /// Records in this page.
    pub records: Vec<Record>,
}

/// How a field mutation combines with existing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Replace existing values.
    Set,
    /// Append to existing values.
    Add,
}

impl UpdateMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Set => "set",
            UpdateMode::Add => "add",
        }
    }
}

/// A single field mutation inside a [`DocumentUpdate`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMutation {
    /// Field to mutate.
    pub field: String,
    /// Set or add.
    pub mode: UpdateMode,
    /// New values; empty with [`UpdateMode::Set`] removes the field.
    pub values: Vec<Value>,
}

/// Field-level mutations addressed to one record id.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpdate {
    /// Target record.
    pub id: String,
    /// Mutations to apply, in order.
    pub mutations: Vec<FieldMutation>,
}

/// Operations the engine needs from a document store.
///
/// Implementations must be usable through a shared reference; all calls are
/// blocking.
pub trait StoreClient: Send + Sync {
    /// Base URL or name of the store, for logging.
    fn endpoint(&self) -> &str;

    /// Returns one page of records matching the request.
    fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<QueryPage>;

    /// Computes count/min/max/mean of `field` over records matching `predicate`.
    fn stats(
        &self,
        collection: Collection,
        predicate: &Predicate,
        field: &str,
    ) -> StoreResult<FieldStats>;

    /// Inserts or replaces whole records.
    fn upsert(&self, collection: Collection, records: &[Record]) -> StoreResult<()>;

    /// Applies field-level mutations to existing records.
    fn update_fields(&self, collection: Collection, updates: &[DocumentUpdate]) -> StoreResult<()>;

    /// Deletes every record matching the predicate.
    fn delete_by_predicate(&self, collection: Collection, predicate: &Predicate) -> StoreResult<()>;

    /// Flushes pending changes. Advisory: a store may ignore it.
    fn commit(&self, collection: Collection) -> StoreResult<()>;

    /// Compacts the index; implies a commit. Advisory: a store may ignore it.
    fn optimize(&self, collection: Collection) -> StoreResult<()>;

    /// Number of records matching the predicate.
    fn count(&self, collection: Collection, predicate: &Predicate) -> StoreResult<u64> {
        let request = QueryRequest::new(predicate.clone(), 0, 0).with_fields(["id"]);
        Ok(self.query(collection, &request)?.total_matches)
    }
}

macro_rules! forward_store_client {
    ($($ty:ty),*) => {$(
        impl<S: StoreClient + ?Sized> StoreClient for $ty {
            fn endpoint(&self) -> &str {
                (**self).endpoint()
            }

            fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<QueryPage> {
                (**self).query(collection, request)
            }

            fn stats(
                &self,
                collection: Collection,
                predicate: &Predicate,
                field: &str,
            ) -> StoreResult<FieldStats> {
                (**self).stats(collection, predicate, field)
            }

            fn upsert(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
                (**self).upsert(collection, records)
            }

            fn update_fields(
                &self,
                collection: Collection,
                updates: &[DocumentUpdate],
            ) -> StoreResult<()> {
                (**self).update_fields(collection, updates)
            }

            fn delete_by_predicate(
                &self,
                collection: Collection,
                predicate: &Predicate,
            ) -> StoreResult<()> {
                (**self).delete_by_predicate(collection, predicate)
            }

            fn commit(&self, collection: Collection) -> StoreResult<()> {
                (**self).commit(collection)
            }

            fn optimize(&self, collection: Collection) -> StoreResult<()> {
                (**self).optimize(collection)
            }

            fn count(&self, collection: Collection, predicate: &Predicate) -> StoreResult<u64> {
                (**self).count(collection, predicate)
            }
        }
    )*};
}

forward_store_client!(&S, Box<S>, Arc<S>);

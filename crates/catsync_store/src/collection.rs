//! Catalog collections.

use crate::error::StoreError;
use std::fmt;
use std::str::FromStr;

/// A collection (core) in a catalog store.
///
/// `Datasets` is the root; `Files` and `Aggregations` hold children that
/// point at their parent through the `dataset_id` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Dataset records.
    Datasets,
    /// File records belonging to a dataset.
    Files,
    /// Aggregation records belonging to a dataset.
    Aggregations,
}

impl Collection {
    /// All collections, root first.
    pub const ALL: [Collection; 3] = [
        Collection::Datasets,
        Collection::Files,
        Collection::Aggregations,
    ];

    /// Collections whose records are addressed through `dataset_id`.
    pub const CHILDREN: [Collection; 2] = [Collection::Files, Collection::Aggregations];

    /// Returns the collection name used in store URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Datasets => "datasets",
            Collection::Files => "files",
            Collection::Aggregations => "aggregations",
        }
    }

    /// Returns true for collections that depend on a parent dataset.
    pub fn is_child(&self) -> bool {
        !matches!(self, Collection::Datasets)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "datasets" => Ok(Collection::Datasets),
            "files" => Ok(Collection::Files),
            "aggregations" => Ok(Collection::Aggregations),
            _ => Err(StoreError::UnknownCollection(s.trim().to_string())),
        }
    }
}

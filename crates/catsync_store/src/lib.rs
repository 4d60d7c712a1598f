//! # Catsync Store
//!
//! Catalog store access for catsync.
//!
//! This crate provides:
//! - The record, predicate and collection data model
//! - The [`StoreClient`] trait the sync engine is written against
//! - An HTTP implementation over a select/update API ([`HttpStore`])
//! - An in-memory implementation with failure injection ([`MemoryStore`])
//! - Federation node discovery ([`Federation`])
//!
//! ## Key Invariants
//!
//! - Predicates are immutable; narrowing one returns a new value
//! - Every network call is bounded-retried per [`RetryConfig`]
//! - Commit and optimize are advisory; a store that ignores them is not an error

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod collection;
mod config;
mod error;
mod federation;
mod http;
mod memory;
mod predicate;
mod record;
mod stats;
pub mod time;

pub use client::{
    DocumentUpdate, FieldMutation, QueryPage, QueryRequest, StoreClient, UpdateMode,
};
pub use collection::Collection;
pub use config::{host_of, validate_base_url, FederationConfig, RetryConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use federation::{
    parse_facet_names, Federation, FederationNode, HttpFederation, MemoryFederation,
};
pub use http::{build_update_xml, HttpClient, HttpStore, Params, UreqClient};
pub use memory::{CallCounts, MemoryStore};
pub use predicate::{Clause, Predicate, MATCH_ALL};
pub use record::{fields, scalar_text, Record};
pub use stats::FieldStats;
pub use time::Timestamp;

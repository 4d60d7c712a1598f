//! # Catsync Engine
//!
//! Divergence localization, repair and replica auditing for catalog stores.
//!
//! This crate provides:
//! - Batched migration with per-record fallback ([`BulkMigrator`])
//! - Aggregate fingerprints and their comparison ([`FingerprintComparator`])
//! - Recursive month/day/hour bisection and repair ([`IntervalSynchronizer`])
//! - Federation-wide stale replica detection ([`ReplicaAuditor`])
//! - Snapshot-then-apply field updates ([`FieldUpdateEngine`])
//!
//! ## Key Invariants
//!
//! - Equal fingerprints (at whole seconds) are accepted as in sync
//! - An unavailable fingerprint is neither in sync nor diverged
//! - Child intervals partition their parent exactly
//! - Dataset changes cascade to files and aggregations via `dataset_id`
//! - Remote stores are never mutated by an audit
//! - A replica is only demoted when a strictly newer primary exists
//!
//! Everything is synchronous; a killed run is resumed by starting over.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auditor;
mod config;
mod error;
mod fingerprint;
mod interval;
mod migrate;
mod synchronizer;
mod update;

pub use auditor::{AuditReport, ReplicaAuditor, StalePrimary, TimeWindow};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use fingerprint::{Comparison, Fingerprint, FingerprintComparator};
pub use interval::{Granularity, TimeInterval};
pub use migrate::{BulkMigrator, Coercion, MigrationRequest, Replacements, TransformPipeline};
pub use synchronizer::{CollectionReport, IntervalSynchronizer, SyncReport};
pub use update::{FieldAction, FieldOp, FieldUpdate, FieldUpdateEngine};

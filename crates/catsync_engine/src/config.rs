//! Configuration for the sync engine.

use catsync_store::fields;
use std::time::Duration;

/// Configuration shared by the migrator, synchronizer, auditor and update engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Records per migration page.
    pub batch_size: u64,
    /// Upper bound on records moved by one migration.
    pub max_records: u64,
    /// Page size used when snapshotting ids for field updates.
    pub update_page_size: u64,
    /// Page size for dataset listings during reconciliation and audits.
    pub listing_page_size: u64,
    /// Pause after each non-empty chunk of a monthly migration; zero disables it.
    pub chunk_pause: Duration,
    /// Re-check the full span after each leaf repair and stop early when in sync.
    pub recheck_full: bool,
    /// Optimize every target collection at the end of a synchronization.
    pub optimize_on_finish: bool,
    /// Field holding the ordering key.
    pub timestamp_field: String,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            batch_size: 100,
            max_records: 9_999_999,
            update_page_size: 1000,
            listing_page_size: 10_000,
            chunk_pause: Duration::from_secs(120),
            recheck_full: true,
            optimize_on_finish: true,
            timestamp_field: fields::TIMESTAMP.to_string(),
        }
    }

    /// Sets the migration batch size.
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the migration record cap.
    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records = max;
        self
    }

    /// Sets the update snapshot page size.
    pub fn with_update_page_size(mut self, size: u64) -> Self {
        self.update_page_size = size.max(1);
        self
    }

    /// Sets the listing page size.
    pub fn with_listing_page_size(mut self, size: u64) -> Self {
        self.listing_page_size = size.max(1);
        self
    }

    /// Sets the pause between monthly migration chunks.
    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    /// Enables or disables the full-span re-check after leaf repairs.
    pub fn with_recheck_full(mut self, recheck: bool) -> Self {
        self.recheck_full = recheck;
        self
    }

    /// Enables or disables the final optimize.
    pub fn with_optimize_on_finish(mut self, optimize: bool) -> Self {
        self.optimize_on_finish = optimize;
        self
    }

    /// Sets the ordering-key field.
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_records, 9_999_999);
        assert_eq!(config.chunk_pause, Duration::from_secs(120));
        assert_eq!(config.timestamp_field, "_timestamp");
        assert!(config.recheck_full);
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let config = SyncConfig::new().with_batch_size(0);
        assert_eq!(config.batch_size, 1);
    }
}

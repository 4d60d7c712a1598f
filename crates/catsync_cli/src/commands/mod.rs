//! CLI command implementations.

pub mod audit;
pub mod bench;
pub mod check;
pub mod migrate;
pub mod sync;
pub mod update;

use catsync_engine::SyncConfig;
use catsync_store::time::parse_timestamp;
use catsync_store::{Collection, HttpStore, Predicate, RetryConfig, StoreConfig, Timestamp};
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::time::Duration;

/// Boxed error returned by every command.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Connection settings shared by every store a command opens.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per request.
    pub retries: u32,
    /// Field holding the ordering key.
    pub timestamp_field: String,
}

impl StoreOptions {
    /// Store configuration for `url`, validating it.
    pub fn store_config(&self, url: &str) -> CliResult<StoreConfig> {
        Ok(StoreConfig::new(url)?
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(RetryConfig::new(self.retries))
            .with_timestamp_field(self.timestamp_field.clone()))
    }

    /// Opens an HTTP store.
    pub fn connect(&self, url: &str) -> CliResult<HttpStore> {
        Ok(HttpStore::connect(self.store_config(url)?))
    }

    /// Engine configuration carrying the ordering-key field.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new().with_timestamp_field(self.timestamp_field.clone())
    }
}

/// Parses collection names; an empty list means every collection.
pub fn parse_collections(names: &[String]) -> CliResult<Vec<Collection>> {
    if names.is_empty() {
        return Ok(Collection::ALL.to_vec());
    }
    let mut collections = Vec::new();
    for name in names.iter().flat_map(|n| n.split(',')) {
        let collection: Collection = name.parse()?;
        if !collections.contains(&collection) {
            collections.push(collection);
        }
    }
    Ok(collections)
}

/// Parses a query such as `project:CMIP6&latest:true`.
pub fn parse_query(query: &str) -> CliResult<Predicate> {
    Ok(Predicate::parse(query)?)
}

/// Parses a window start; a bare date means midnight.
pub fn parse_start(text: &str) -> CliResult<Timestamp> {
    Ok(parse_timestamp(text)?)
}

/// Parses a window end; a bare date covers the whole day.
pub fn parse_stop(text: &str) -> CliResult<Timestamp> {
    let ts = parse_timestamp(text)?;
    if NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").is_ok() {
        return Ok(ts + ChronoDuration::days(1) - ChronoDuration::microseconds(1));
    }
    Ok(ts)
}

/// Splits `left=right`.
pub fn parse_assignment(text: &str) -> CliResult<(String, String)> {
    match text.split_once('=') {
        Some((left, right)) if !left.trim().is_empty() => {
            Ok((left.trim().to_string(), right.to_string()))
        }
        _ => Err(format!("expected `field=value`, got `{text}`").into()),
    }
}

/// Rejects unknown output formats before any work is done.
pub fn check_format(format: &str) -> CliResult<()> {
    match format {
        "text" | "json" => Ok(()),
        other => Err(format!("unknown output format `{other}` (expected text or json)").into()),
    }
}

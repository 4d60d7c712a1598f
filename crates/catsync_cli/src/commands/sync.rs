//! Sync command implementation.

use super::{check_format, parse_collections, parse_query, CliResult, StoreOptions};
use catsync_engine::{IntervalSynchronizer, SyncReport};
use serde::Serialize;

/// Arguments of the sync command.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    /// Collection names; empty means all.
    pub collections: Vec<String>,
    /// Query restricting the synchronized records.
    pub query: String,
    /// Optimize touched collections at the end.
    pub optimize: bool,
    /// Stop a collection once its full span is back in sync.
    pub recheck_full: bool,
}

/// Per-collection line of the summary.
#[derive(Debug, Serialize)]
pub struct CollectionSummary {
    /// Collection name.
    pub collection: String,
    /// Records written to the target.
    pub migrated: u64,
    /// Records deleted from the target.
    pub deleted: u64,
    /// Hour intervals repaired.
    pub repaired_intervals: u64,
    /// Not compared because a store was unreachable.
    pub skipped: bool,
    /// Final status; `None` when unknown.
    pub in_sync: Option<bool>,
}

/// Summary of a sync run.
#[derive(Debug, Serialize)]
pub struct SyncSummary {
    /// Source endpoint.
    pub source: String,
    /// Target endpoint.
    pub target: String,
    /// Per-collection results.
    pub collections: Vec<CollectionSummary>,
    /// Records written across collections.
    pub total_migrated: u64,
    /// Records deleted across collections.
    pub total_deleted: u64,
    /// Every collection ended in sync.
    pub converged: bool,
}

impl SyncSummary {
    fn new(source: &str, target: &str, report: &SyncReport) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            collections: report
                .iter()
                .map(|(collection, r)| CollectionSummary {
                    collection: collection.to_string(),
                    migrated: r.migrated,
                    deleted: r.deleted,
                    repaired_intervals: r.repaired_intervals,
                    skipped: r.skipped,
                    in_sync: r.in_sync,
                })
                .collect(),
            total_migrated: report.total_migrated(),
            total_deleted: report.total_deleted(),
            converged: report.converged(),
        }
    }
}

/// Runs the sync command.
pub fn run(
    options: &StoreOptions,
    source: &str,
    target: &str,
    args: &SyncArgs,
    format: &str,
) -> CliResult<()> {
    check_format(format)?;
    let collections = parse_collections(&args.collections)?;
    let predicate = parse_query(&args.query)?;
    let source_store = options.connect(source)?;
    let target_store = options.connect(target)?;

    let config = options
        .sync_config()
        .with_optimize_on_finish(args.optimize)
        .with_recheck_full(args.recheck_full);
    let report = IntervalSynchronizer::new(config).run(
        &source_store,
        &target_store,
        &predicate,
        &collections,
    )?;
    let summary = SyncSummary::new(
        &source_store.config().base_url,
        &target_store.config().base_url,
        &report,
    );

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text(&summary),
    }
    Ok(())
}

fn print_text(summary: &SyncSummary) {
    println!("Synchronized {} -> {}", summary.source, summary.target);
    for c in &summary.collections {
        let status = match (c.skipped, c.in_sync) {
            (true, _) => "skipped",
            (_, Some(true)) => "in sync",
            (_, Some(false)) => "diverged",
            (_, None) => "unavailable",
        };
        println!(
            "  {:<14} migrated={:<8} deleted={:<8} repaired={:<4} {}",
            c.collection, c.migrated, c.deleted, c.repaired_intervals, status
        );
    }
    println!(
        "Migrated {} and deleted {} records",
        summary.total_migrated, summary.total_deleted
    );
    if summary.converged {
        println!("All collections in sync");
    } else {
        println!("Some collections are not in sync");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_engine::SyncConfig;
    use catsync_store::{Collection, MemoryStore, Predicate, Record};

    #[test]
    fn summary_of_a_repaired_run() {
        let source = MemoryStore::new("source");
        let target = MemoryStore::new("target");
        source.insert(
            Collection::Datasets,
            (0..3).map(|i| {
                Record::new()
                    .with("id", format!("d{i}"))
                    .with("version", "1")
                    .with("_timestamp", format!("2019-05-0{}T10:00:00Z", i + 1))
            }),
        );

        let report = IntervalSynchronizer::new(SyncConfig::new())
            .run(&source, &target, &Predicate::all(), &[Collection::Datasets])
            .unwrap();
        let summary = SyncSummary::new("source", "target", &report);

        assert_eq!(summary.collections.len(), 3);
        assert_eq!(summary.collections[0].collection, "datasets");
        assert_eq!(summary.total_migrated, 3);
        assert!(summary.converged);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["collections"][0]["migrated"], 3);
        assert_eq!(json["collections"][0]["in_sync"], true);
    }
}

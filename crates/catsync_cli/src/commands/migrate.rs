//! Migrate command implementation.

use super::{parse_collections, parse_query, CliResult, StoreOptions};
use catsync_engine::{BulkMigrator, MigrationRequest, Replacements, TransformPipeline};
use catsync_store::StoreClient;
use std::time::Duration;

/// Arguments of the migrate command.
#[derive(Debug, Clone)]
pub struct MigrateArgs {
    /// Collection names; empty means all.
    pub collections: Vec<String>,
    /// Source query.
    pub query: String,
    /// Source offset.
    pub start: u64,
    /// Record cap per collection.
    pub max: Option<u64>,
    /// Records per page.
    pub batch_size: u64,
    /// Literal substitutions.
    pub replace: Option<String>,
    /// Identifier suffix.
    pub suffix: Option<String>,
    /// Optimize instead of committing.
    pub optimize: bool,
    /// Commit at the end.
    pub commit: bool,
    /// Migrate month by month.
    pub monthly: bool,
    /// Pause between monthly chunks, in seconds.
    pub pause_secs: u64,
}

/// Runs the migrate command.
pub fn run(options: &StoreOptions, source: &str, target: &str, args: &MigrateArgs) -> CliResult<()> {
    let collections = parse_collections(&args.collections)?;
    let predicate = parse_query(&args.query)?;
    let mut pipeline = TransformPipeline::new();
    if let Some(replace) = &args.replace {
        pipeline = pipeline.with_replacements(Replacements::parse(replace)?);
    }
    if let Some(suffix) = &args.suffix {
        pipeline = pipeline.with_id_suffix(suffix.clone());
    }
    let source = options.connect(source)?;
    let target = options.connect(target)?;

    let config = options
        .sync_config()
        .with_batch_size(args.batch_size)
        .with_chunk_pause(Duration::from_secs(args.pause_secs));
    let migrator = BulkMigrator::new(&config).with_pipeline(pipeline);

    println!("Migrating {} -> {}", source.endpoint(), target.endpoint());
    let mut total = 0u64;
    for collection in collections {
        let mut request = MigrationRequest::new(collection, predicate.clone())
            .with_offset(args.start)
            .with_commit(args.commit)
            .with_optimize(args.optimize);
        if let Some(max) = args.max {
            request = request.with_max_records(max);
        }
        let migrated = if args.monthly {
            migrator.migrate_monthly(&source, &target, &request)?
        } else {
            migrator.migrate(&source, &target, &request)?
        };
        println!("  {collection}: {migrated} records");
        total += migrated;
    }
    println!("Migrated {total} records");
    Ok(())
}

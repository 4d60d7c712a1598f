//! Catsync CLI
//!
//! Command-line tools for keeping federated catalog stores consistent.
//!
//! # Commands
//!
//! - `migrate` - Copy records from one store to another
//! - `sync` - Localize and repair divergence between two stores
//! - `audit` - Demote local replicas superseded by newer remote primaries
//! - `update` - Apply field operations to matching records
//! - `check` - Compare fingerprints of two stores
//! - `bench` - Time query round trips against one or more stores

mod commands;

use clap::{Parser, Subcommand};
use commands::StoreOptions;
use tracing_subscriber::EnvFilter;

/// Catalog store migration, synchronization and replica auditing.
#[derive(Parser)]
#[command(name = "catsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Request timeout in seconds
    #[arg(global = true, long, default_value = "30")]
    timeout: u64,

    /// Attempts per request before giving up
    #[arg(global = true, long, default_value = "3")]
    retries: u32,

    /// Field holding the ordering key
    #[arg(global = true, long, default_value = "_timestamp")]
    timestamp_field: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy records matching a query from SOURCE to TARGET
    Migrate {
        /// Source store base URL
        source: String,

        /// Target store base URL
        target: String,

        /// Collections to migrate (repeatable; default all)
        #[arg(short, long)]
        collection: Vec<String>,

        /// Query, e.g. `project:CMIP6&institution_id:NCAR`
        #[arg(short, long, default_value = "*:*")]
        query: String,

        /// Source offset to start from (not with --monthly)
        #[arg(long, default_value = "0", conflicts_with = "monthly")]
        start: u64,

        /// Maximum number of records per collection
        #[arg(long)]
        max: Option<u64>,

        /// Records per page
        #[arg(long, default_value = "100")]
        batch_size: u64,

        /// Literal substitutions, e.g. `old:new,old2:new2`
        #[arg(long)]
        replace: Option<String>,

        /// Suffix appended to every identifier
        #[arg(long)]
        suffix: Option<String>,

        /// Optimize the target instead of committing
        #[arg(long)]
        optimize: bool,

        /// Leave the writes uncommitted
        #[arg(long)]
        no_commit: bool,

        /// Migrate one calendar month at a time
        #[arg(long)]
        monthly: bool,

        /// Seconds to pause between monthly chunks
        #[arg(long, default_value = "120")]
        pause: u64,
    },

    /// Repair the TARGET so it matches the SOURCE
    Sync {
        /// Source store base URL
        source: String,

        /// Target store base URL
        target: String,

        /// Collections to synchronize (repeatable; default all)
        #[arg(short, long)]
        collection: Vec<String>,

        /// Query restricting the synchronized records
        #[arg(short, long, default_value = "*:*")]
        query: String,

        /// Commit instead of optimizing touched collections
        #[arg(long)]
        no_optimize: bool,

        /// Keep walking after a repair even if the full span is in sync
        #[arg(long)]
        no_recheck: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Demote local replicas that have a newer primary elsewhere
    Audit {
        /// Local store base URL
        local: String,

        /// Registry search endpoint used for node discovery
        #[arg(long)]
        registry: String,

        /// Project to audit
        #[arg(short, long)]
        project: String,

        /// Earliest ordering key (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        start: Option<String>,

        /// Latest ordering key (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        stop: Option<String>,

        /// Audit every record regardless of age
        #[arg(long, conflicts_with_all = ["start", "stop"])]
        all_time: bool,

        /// Only report what would be demoted
        #[arg(short, long)]
        dry_run: bool,

        /// Node never queried as a remote (repeatable)
        #[arg(long)]
        exclude_node: Vec<String>,

        /// Store URL template for discovered nodes
        #[arg(long, default_value = "https://{node}/solr")]
        node_template: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply field operations to records matching a query
    Update {
        /// Store base URL
        url: String,

        /// Collection to update
        #[arg(short, long, default_value = "datasets")]
        collection: String,

        /// Query selecting the records
        #[arg(short, long)]
        query: String,

        /// Replace a field, `field=value` (repeatable)
        #[arg(long)]
        set: Vec<String>,

        /// Append to a field, `field=value` (repeatable)
        #[arg(long)]
        add: Vec<String>,

        /// Remove a field (repeatable)
        #[arg(long)]
        remove: Vec<String>,

        /// Copy a field, `destination=source` (repeatable)
        #[arg(long)]
        copy: Vec<String>,

        /// Rename a field, `old=new` (repeatable)
        #[arg(long)]
        rename: Vec<String>,

        /// Apply the same operations to files and aggregations of matched datasets
        #[arg(long)]
        cascade: bool,
    },

    /// Compare fingerprints of SOURCE and TARGET
    Check {
        /// Source store base URL
        source: String,

        /// Target store base URL
        target: String,

        /// Collections to check (repeatable; default all)
        #[arg(short, long)]
        collection: Vec<String>,

        /// Query restricting the compared records
        #[arg(short, long, default_value = "*:*")]
        query: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Time query round trips against one or more stores
    Bench {
        /// Store base URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Collection queried
        #[arg(short, long, default_value = "datasets")]
        collection: String,

        /// Query to time (repeatable; default `*:*`)
        #[arg(short, long)]
        query: Vec<String>,

        /// Rows requested per query
        #[arg(long, default_value = "10")]
        rows: u64,

        /// Round trips per query and store
        #[arg(long, default_value = "3")]
        repeat: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = StoreOptions {
        timeout_secs: cli.timeout,
        retries: cli.retries,
        timestamp_field: cli.timestamp_field,
    };

    match cli.command {
        Commands::Migrate {
            source,
            target,
            collection,
            query,
            start,
            max,
            batch_size,
            replace,
            suffix,
            optimize,
            no_commit,
            monthly,
            pause,
        } => {
            let args = commands::migrate::MigrateArgs {
                collections: collection,
                query,
                start,
                max,
                batch_size,
                replace,
                suffix,
                optimize,
                commit: !no_commit,
                monthly,
                pause_secs: pause,
            };
            commands::migrate::run(&options, &source, &target, &args)?;
        }
        Commands::Sync {
            source,
            target,
            collection,
            query,
            no_optimize,
            no_recheck,
            format,
        } => {
            let args = commands::sync::SyncArgs {
                collections: collection,
                query,
                optimize: !no_optimize,
                recheck_full: !no_recheck,
            };
            commands::sync::run(&options, &source, &target, &args, &format)?;
        }
        Commands::Audit {
            local,
            registry,
            project,
            start,
            stop,
            all_time,
            dry_run,
            exclude_node,
            node_template,
            format,
        } => {
            let args = commands::audit::AuditArgs {
                registry,
                project,
                start,
                stop,
                all_time,
                dry_run,
                exclude_nodes: exclude_node,
                node_template,
            };
            commands::audit::run(&options, &local, &args, &format)?;
        }
        Commands::Update {
            url,
            collection,
            query,
            set,
            add,
            remove,
            copy,
            rename,
            cascade,
        } => {
            let args = commands::update::UpdateArgs {
                collection,
                query,
                set,
                add,
                remove,
                copy,
                rename,
                cascade,
            };
            commands::update::run(&options, &url, &args)?;
        }
        Commands::Check {
            source,
            target,
            collection,
            query,
            format,
        } => {
            commands::check::run(&options, &source, &target, &collection, &query, &format)?;
        }
        Commands::Bench {
            urls,
            collection,
            query,
            rows,
            repeat,
            format,
        } => {
            let args = commands::bench::BenchArgs {
                collection,
                queries: query,
                rows,
                repeat,
            };
            commands::bench::run(&options, &urls, &args, &format)?;
        }
        Commands::Version => {
            println!("Catsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

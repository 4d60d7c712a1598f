//! Bench command implementation.

use super::{check_format, parse_query, CliResult, StoreOptions};
use catsync_store::{Collection, Predicate, QueryRequest, StoreClient};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// Arguments of the bench command.
#[derive(Debug, Clone)]
pub struct BenchArgs {
    /// Collection queried.
    pub collection: String,
    /// Queries to time; `*:*` when empty.
    pub queries: Vec<String>,
    /// Rows requested per query.
    pub rows: u64,
    /// Round trips per query and store.
    pub repeat: u32,
}

/// Timing of one query against one store.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTiming {
    /// Store endpoint.
    pub store: String,
    /// Query as given.
    pub query: String,
    /// Records matching the query, from the last answered round trip.
    pub matches: Option<u64>,
    /// Fastest round trip in milliseconds.
    pub best_ms: Option<f64>,
    /// Mean round trip in milliseconds.
    pub mean_ms: Option<f64>,
    /// Round trips that failed.
    pub failures: u32,
}

/// Times every query against every store, queries outermost.
pub fn time_queries(
    stores: &[&dyn StoreClient],
    collection: Collection,
    queries: &[(String, Predicate)],
    rows: u64,
    repeat: u32,
) -> Vec<QueryTiming> {
    let mut timings = Vec::new();
    for (text, predicate) in queries {
        for store in stores {
            let request = QueryRequest::new(predicate.clone(), 0, rows);
            let mut elapsed = Vec::new();
            let mut matches = None;
            let mut failures = 0;
            for _ in 0..repeat.max(1) {
                let started = Instant::now();
                match store.query(collection, &request) {
                    Ok(page) => {
                        elapsed.push(started.elapsed().as_secs_f64() * 1000.0);
                        matches = Some(page.total_matches);
                    }
                    Err(err) => {
                        warn!(store = store.endpoint(), query = %text, "query failed: {err}");
                        failures += 1;
                    }
                }
            }
            let best_ms = elapsed.iter().copied().reduce(f64::min);
            let mean_ms =
                (!elapsed.is_empty()).then(|| elapsed.iter().sum::<f64>() / elapsed.len() as f64);
            info!(store = store.endpoint(), query = %text, ?matches, ?best_ms, "timed query");
            timings.push(QueryTiming {
                store: store.endpoint().to_string(),
                query: text.clone(),
                matches,
                best_ms,
                mean_ms,
                failures,
            });
        }
    }
    timings
}

/// Runs the bench command.
pub fn run(
    options: &StoreOptions,
    urls: &[String],
    args: &BenchArgs,
    format: &str,
) -> CliResult<()> {
    check_format(format)?;
    let collection: Collection = args.collection.parse()?;
    let texts = if args.queries.is_empty() {
        vec![catsync_store::MATCH_ALL.to_string()]
    } else {
        args.queries.clone()
    };
    let queries = texts
        .into_iter()
        .map(|text| parse_query(&text).map(|p| (text, p)))
        .collect::<CliResult<Vec<_>>>()?;
    let stores = urls
        .iter()
        .map(|url| options.connect(url))
        .collect::<CliResult<Vec<_>>>()?;
    let clients: Vec<&dyn StoreClient> = stores.iter().map(|s| s as &dyn StoreClient).collect();

    let timings = time_queries(&clients, collection, &queries, args.rows, args.repeat);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&timings)?),
        _ => {
            for t in &timings {
                let shown = |v: Option<f64>| v.map_or("-".to_string(), |ms| format!("{ms:.1}"));
                println!(
                    "{:<40} {:<30} matches={:<10} best={}ms mean={}ms failures={}",
                    t.store,
                    t.query,
                    t.matches.map_or("-".to_string(), |m| m.to_string()),
                    shown(t.best_ms),
                    shown(t.mean_ms),
                    t.failures
                );
            }
        }
    }
    Ok(())
}

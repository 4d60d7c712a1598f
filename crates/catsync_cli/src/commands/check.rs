//! Check command implementation.

use super::{check_format, parse_collections, parse_query, CliResult, StoreOptions};
use catsync_engine::{Fingerprint, FingerprintComparator};
use catsync_store::time::format_timestamp;
use catsync_store::{Collection, Predicate, StoreClient, Timestamp};
use serde::Serialize;

/// Fingerprint fields as printed.
#[derive(Debug, Serialize)]
pub struct FingerprintView {
    /// Matching records.
    pub count: u64,
    /// Earliest ordering key.
    pub min: Option<String>,
    /// Latest ordering key.
    pub max: Option<String>,
    /// Mean ordering key.
    pub mean: Option<String>,
}

impl From<&Fingerprint> for FingerprintView {
    fn from(fp: &Fingerprint) -> Self {
        let show = |ts: &Option<Timestamp>| ts.as_ref().map(format_timestamp);
        Self {
            count: fp.count,
            min: show(&fp.min),
            max: show(&fp.max),
            mean: show(&fp.mean),
        }
    }
}

/// Comparison of one collection.
#[derive(Debug, Serialize)]
pub struct CollectionCheck {
    /// Collection name.
    pub collection: String,
    /// Source fingerprint; `None` when unavailable.
    pub source: Option<FingerprintView>,
    /// Target fingerprint; `None` when unavailable.
    pub target: Option<FingerprintView>,
    /// Agreement; `None` when either side is unavailable.
    pub in_sync: Option<bool>,
}

/// Fingerprints every collection on both stores.
pub fn check_collections(
    comparator: &FingerprintComparator,
    source: &dyn StoreClient,
    target: &dyn StoreClient,
    collections: &[Collection],
    predicate: &Predicate,
) -> Vec<CollectionCheck> {
    collections
        .iter()
        .map(|&collection| {
            let source_fp = comparator.fingerprint(source, collection, predicate);
            let target_fp = comparator.fingerprint(target, collection, predicate);
            let in_sync = match (&source_fp, &target_fp) {
                (Some(s), Some(t)) => Some(s == t),
                _ => None,
            };
            CollectionCheck {
                collection: collection.to_string(),
                source: source_fp.as_ref().map(FingerprintView::from),
                target: target_fp.as_ref().map(FingerprintView::from),
                in_sync,
            }
        })
        .collect()
}

/// Runs the check command.
pub fn run(
    options: &StoreOptions,
    source: &str,
    target: &str,
    collections: &[String],
    query: &str,
    format: &str,
) -> CliResult<()> {
    check_format(format)?;
    let collections = parse_collections(collections)?;
    let predicate = parse_query(query)?;
    let source = options.connect(source)?;
    let target = options.connect(target)?;
    let comparator = FingerprintComparator::new(options.timestamp_field.clone());

    let checks = check_collections(&comparator, &source, &target, &collections, &predicate);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&checks)?),
        _ => {
            println!("Comparing {} -> {}", source.endpoint(), target.endpoint());
            for check in &checks {
                let status = match check.in_sync {
                    Some(true) => "in sync",
                    Some(false) => "diverged",
                    None => "unavailable",
                };
                println!("  {}: {status}", check.collection);
                println!("    source: {}", describe(check.source.as_ref()));
                println!("    target: {}", describe(check.target.as_ref()));
            }
        }
    }
    Ok(())
}

fn describe(view: Option<&FingerprintView>) -> String {
    let Some(view) = view else {
        return "unavailable".to_string();
    };
    let show = |ts: &Option<String>| ts.clone().unwrap_or_else(|| "-".to_string());
    format!(
        "count={} min={} max={} mean={}",
        view.count,
        show(&view.min),
        show(&view.max),
        show(&view.mean)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_store::{MemoryStore, Record};

    #[test]
    fn reports_divergence_and_unavailability() {
        let source = MemoryStore::new("source");
        let target = MemoryStore::new("target");
        source.insert(
            Collection::Datasets,
            [Record::new()
                .with("id", "d1")
                .with("_timestamp", "2019-05-01T10:00:00Z")],
        );
        let comparator = FingerprintComparator::new("_timestamp");

        let checks = check_collections(
            &comparator,
            &source,
            &target,
            &[Collection::Datasets, Collection::Files],
            &Predicate::all(),
        );
        assert_eq!(checks[0].in_sync, Some(false));
        assert_eq!(checks[0].source.as_ref().unwrap().count, 1);
        assert_eq!(
            checks[0].source.as_ref().unwrap().min.as_deref(),
            Some("2019-05-01T10:00:00.000000Z")
        );
        assert_eq!(checks[1].in_sync, Some(true));

        target.set_unreachable(true);
        let checks = check_collections(
            &comparator,
            &source,
            &target,
            &[Collection::Datasets],
            &Predicate::all(),
        );
        assert_eq!(checks[0].in_sync, None);
        assert!(checks[0].target.is_none());
        assert_eq!(describe(checks[0].target.as_ref()), "unavailable");
    }
}

//! Audit command implementation.

use super::{check_format, parse_start, parse_stop, CliResult, StoreOptions};
use catsync_engine::{AuditReport, ReplicaAuditor, TimeWindow};
use catsync_store::{FederationConfig, HttpFederation, Timestamp};
use chrono::Utc;
use serde::Serialize;

/// Days audited when no window is given.
const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Arguments of the audit command.
#[derive(Debug, Clone)]
pub struct AuditArgs {
    /// Registry search endpoint.
    pub registry: String,
    /// Project to audit.
    pub project: String,
    /// Window start.
    pub start: Option<String>,
    /// Window end.
    pub stop: Option<String>,
    /// Ignore the window.
    pub all_time: bool,
    /// Report only.
    pub dry_run: bool,
    /// Nodes never queried as remotes.
    pub exclude_nodes: Vec<String>,
    /// Store URL template for discovered nodes.
    pub node_template: String,
}

/// A remote primary the local replica is not older than.
#[derive(Debug, Serialize)]
pub struct StaleEntry {
    /// Node hosting the primary.
    pub node: String,
    /// Lineage.
    pub master_id: String,
    /// Highest remote version.
    pub remote_version: i64,
    /// Highest local version.
    pub local_version: i64,
}

/// Audit result.
#[derive(Debug, Serialize)]
pub struct AuditSummary {
    /// Project audited.
    pub project: String,
    /// Window audited, or `all` when unbounded.
    pub window: String,
    /// Nothing was changed.
    pub dry_run: bool,
    /// Demoted replica ids.
    pub demoted: Vec<String>,
    /// Primaries not newer than the local replica.
    pub stale_primaries: Vec<StaleEntry>,
    /// Nodes compared.
    pub nodes_checked: Vec<String>,
    /// Nodes that could not be queried.
    pub nodes_skipped: Vec<String>,
}

impl AuditSummary {
    fn new(project: &str, window: Option<&TimeWindow>, dry_run: bool, report: AuditReport) -> Self {
        Self {
            project: project.to_string(),
            window: window.map_or_else(|| "all".to_string(), ToString::to_string),
            dry_run,
            demoted: report.demoted_ids,
            stale_primaries: report
                .stale_primaries
                .into_iter()
                .map(|s| StaleEntry {
                    node: s.node,
                    master_id: s.master_id,
                    remote_version: s.remote_version,
                    local_version: s.local_version,
                })
                .collect(),
            nodes_checked: report.nodes_checked,
            nodes_skipped: report.nodes_skipped,
        }
    }
}

/// Resolves the audit window; the last week when no bound is given.
pub fn resolve_window(args: &AuditArgs, now: Timestamp) -> CliResult<Option<TimeWindow>> {
    if args.all_time {
        return Ok(None);
    }
    if args.start.is_none() && args.stop.is_none() {
        return Ok(Some(TimeWindow::last_days(now, DEFAULT_WINDOW_DAYS)));
    }
    let start = args.start.as_deref().map(parse_start).transpose()?;
    let stop = args.stop.as_deref().map(parse_stop).transpose()?;
    if let (Some(start), Some(stop)) = (start, stop) {
        if start > stop {
            return Err(format!("window start {start} is after its end {stop}").into());
        }
    }
    Ok(Some(TimeWindow::new(start, stop)))
}

/// Runs the audit command.
pub fn run(options: &StoreOptions, local: &str, args: &AuditArgs, format: &str) -> CliResult<()> {
    check_format(format)?;
    let window = resolve_window(args, Utc::now())?;
    let local = options.connect(local)?;

    let mut federation_config = FederationConfig::new(args.registry.as_str(), local.config().clone())?
        .with_node_url_template(args.node_template.clone());
    for node in &args.exclude_nodes {
        federation_config = federation_config.exclude_node(node.clone());
    }
    let federation = HttpFederation::new(federation_config);

    let report = ReplicaAuditor::new(options.sync_config()).audit(
        &local,
        &federation,
        &args.project,
        args.dry_run,
        window.as_ref(),
    )?;
    let summary = AuditSummary::new(&args.project, window.as_ref(), args.dry_run, report);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text(&summary),
    }
    Ok(())
}

fn print_text(summary: &AuditSummary) {
    println!("Audit of {} over {}", summary.project, summary.window);
    println!("  Nodes checked: {}", summary.nodes_checked.len());
    for node in &summary.nodes_skipped {
        println!("  Node skipped: {node}");
    }
    let verb = if summary.dry_run { "Would demote" } else { "Demoted" };
    println!("  {verb}: {}", summary.demoted.len());
    for id in &summary.demoted {
        println!("    {id}");
    }
    if !summary.stale_primaries.is_empty() {
        println!("  Primaries not newer than the local replica:");
        for s in &summary.stale_primaries {
            println!(
                "    {} on {} (remote v{}, local v{})",
                s.master_id, s.node, s.remote_version, s.local_version
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn args() -> AuditArgs {
        AuditArgs {
            registry: "https://registry.example.org/search".to_string(),
            project: "CMIP6".to_string(),
            start: None,
            stop: None,
            all_time: false,
            dry_run: true,
            exclude_nodes: Vec::new(),
            node_template: "https://{node}/solr".to_string(),
        }
    }

    #[test]
    fn default_window_is_last_week() {
        let now = Utc.with_ymd_and_hms(2019, 5, 8, 12, 0, 0).unwrap();
        let window = resolve_window(&args(), now).unwrap().unwrap();
        assert_eq!(window.start, Some(Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap()));
        assert_eq!(window.stop, Some(now));
    }

    #[test]
    fn all_time_has_no_window() {
        let a = AuditArgs {
            all_time: true,
            ..args()
        };
        assert!(resolve_window(&a, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn explicit_bounds() {
        let a = AuditArgs {
            start: Some("2019-05-01".to_string()),
            ..args()
        };
        let window = resolve_window(&a, Utc::now()).unwrap().unwrap();
        assert_eq!(window.start, Some(Utc.with_ymd_and_hms(2019, 5, 1, 0, 0, 0).unwrap()));
        assert_eq!(window.stop, None);

        let reversed = AuditArgs {
            start: Some("2019-06-01".to_string()),
            stop: Some("2019-05-01".to_string()),
            ..args()
        };
        assert!(resolve_window(&reversed, Utc::now()).is_err());

        let bad = AuditArgs {
            stop: Some("yesterday".to_string()),
            ..args()
        };
        assert!(resolve_window(&bad, Utc::now()).is_err());
    }

    #[test]
    fn summary_serializes() {
        let report = AuditReport {
            demoted: 1,
            demoted_ids: vec!["a.v3|local".to_string()],
            nodes_checked: vec!["node-b".to_string()],
            ..AuditReport::default()
        };
        let summary = AuditSummary::new("CMIP6", None, false, report);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["window"], "all");
        assert_eq!(json["demoted"][0], "a.v3|local");
        assert_eq!(json["nodes_checked"][0], "node-b");
    }
}

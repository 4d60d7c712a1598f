//! Federation-wide detection of stale local replicas.
//!
//! Local replicas flagged latest are grouped by lineage and compared with
//! the latest primaries of every remote node. A local replica older than a
//! remote primary of the same lineage is demoted (latest=false) together
//! with its files and aggregations. Remote stores are only ever read.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::update::{FieldOp, FieldUpdate, FieldUpdateEngine};
use catsync_store::time::format_timestamp;
use catsync_store::{
    fields, host_of, Clause, Collection, Federation, Predicate, QueryRequest, Record, StoreClient,
    StoreResult, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Inclusive window on the ordering key; open where a bound is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    /// Earliest ordering key, inclusive.
    pub start: Option<Timestamp>,
    /// Latest ordering key, inclusive.
    pub stop: Option<Timestamp>,
}

impl TimeWindow {
    /// Creates a window.
    pub fn new(start: Option<Timestamp>, stop: Option<Timestamp>) -> Self {
        Self { start, stop }
    }

    /// The `days` days up to `now`.
    pub fn last_days(now: Timestamp, days: i64) -> Self {
        Self::new(Some(now - chrono::Duration::days(days)), Some(now))
    }

    /// Range clause on `field`, or `None` when both ends are open.
    pub fn clause(&self, field: &str) -> Option<Clause> {
        if self.start.is_none() && self.stop.is_none() {
            return None;
        }
        Some(Clause::Range {
            field: field.to_string(),
            lo: self.start.as_ref().map(format_timestamp),
            hi: self.stop.as_ref().map(format_timestamp),
            lo_inclusive: true,
            hi_inclusive: true,
        })
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |ts: &Option<Timestamp>| ts.as_ref().map_or("*".to_string(), format_timestamp);
        write!(f, "[{} TO {}]", show(&self.start), show(&self.stop))
    }
}

/// A remote primary that is not newer than the local replica of its lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalePrimary {
    /// Node hosting the primary.
    pub node: String,
    /// Lineage.
    pub master_id: String,
    /// Id of the remote primary at its highest version.
    pub remote_id: String,
    /// Highest remote primary version.
    pub remote_version: i64,
    /// Highest local replica version.
    pub local_version: i64,
}

/// Outcome of an audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Local replicas demoted, or that would be in a dry run.
    pub demoted: u64,
    /// Ids of those replicas.
    pub demoted_ids: Vec<String>,
    /// Remote primaries the local replica is not older than.
    pub stale_primaries: Vec<StalePrimary>,
    /// Nodes compared.
    pub nodes_checked: Vec<String>,
    /// Nodes that could not be queried.
    pub nodes_skipped: Vec<String>,
}

/// One dataset version of a lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Version {
    id: String,
    version: i64,
}

/// Versions per lineage, each list sorted by version.
type Lineages = BTreeMap<String, Vec<Version>>;

/// Compares local replicas with remote primaries.
#[derive(Debug, Clone)]
pub struct ReplicaAuditor {
    config: SyncConfig,
    updater: FieldUpdateEngine,
}

impl ReplicaAuditor {
    /// Creates an auditor.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            updater: FieldUpdateEngine::new(&config),
            config,
        }
    }

    /// Audits `project` across the federation.
    ///
    /// Discovery failure and duplicate `(master_id, version)` pairs abort the
    /// audit. A node that cannot be reached is skipped.
    pub fn audit(
        &self,
        local: &dyn StoreClient,
        federation: &dyn Federation,
        project: &str,
        dry_run: bool,
        window: Option<&TimeWindow>,
    ) -> SyncResult<AuditReport> {
        let nodes = federation.discover()?;
        info!(project, nodes = nodes.len(), dry_run, "starting audit");

        let replicas = self
            .load(local, project, true, window)
            .map_err(SyncError::from)
            .and_then(|records| group_by_lineage(local.endpoint(), records))?;
        info!(lineages = replicas.len(), "loaded local replicas");

        let mut report = AuditReport::default();
        let mut demoted: BTreeSet<String> = BTreeSet::new();

        let local_host = host_of(local.endpoint());
        for node in &nodes {
            if host_of(&node.name) == local_host {
                debug!(node = %node, "skipping local node");
                continue;
            }
            let primaries = match federation
                .connect(node)
                .and_then(|remote| self.load(remote.as_ref(), project, false, window))
            {
                Ok(records) => group_by_lineage(&node.name, records)?,
                Err(err) => {
                    warn!(node = %node, "skipping node: {err}");
                    report.nodes_skipped.push(node.name.clone());
                    continue;
                }
            };
            report.nodes_checked.push(node.name.clone());

            for (master_id, remote) in &primaries {
                let Some(local_versions) = replicas.get(master_id) else {
                    continue;
                };
                let local_list: Vec<i64> = local_versions.iter().map(|v| v.version).collect();
                let remote_list: Vec<i64> = remote.iter().map(|v| v.version).collect();
                if local_list == remote_list {
                    continue;
                }
                let (Some(local_max), Some(remote_top)) = (local_list.last(), remote.last()) else {
                    continue;
                };

                if remote_top.version > *local_max {
                    for replica in local_versions
                        .iter()
                        .filter(|r| r.version < remote_top.version)
                    {
                        if !demoted.insert(replica.id.clone()) {
                            continue;
                        }
                        info!(
                            id = %replica.id,
                            local_version = replica.version,
                            node = %node,
                            remote_version = remote_top.version,
                            dry_run,
                            "demoting stale replica"
                        );
                        if !dry_run {
                            self.demote(local, &replica.id)?;
                        }
                        report.demoted_ids.push(replica.id.clone());
                    }
                } else {
                    debug!(master_id = %master_id, node = %node, "remote primary not newer than local replica");
                    report.stale_primaries.push(StalePrimary {
                        node: node.name.clone(),
                        master_id: master_id.clone(),
                        remote_id: remote_top.id.clone(),
                        remote_version: remote_top.version,
                        local_version: *local_max,
                    });
                }
            }
        }

        report.demoted = report.demoted_ids.len() as u64;
        info!(
            demoted = report.demoted,
            stale_primaries = report.stale_primaries.len(),
            nodes_skipped = report.nodes_skipped.len(),
            "audit finished"
        );
        Ok(report)
    }

    fn demote(&self, local: &dyn StoreClient, id: &str) -> SyncResult<()> {
        let update = FieldUpdate::new(
            Collection::Datasets,
            Predicate::term(fields::ID, id.to_string()),
        )
        .with_op(FieldOp::set(fields::LATEST, ["false"]));
        self.updater.apply(local, &update)?;
        for child in Collection::CHILDREN {
            self.updater.apply(local, &update.for_children(child, id))?;
        }
        Ok(())
    }

    fn load(
        &self,
        store: &dyn StoreClient,
        project: &str,
        replica: bool,
        window: Option<&TimeWindow>,
    ) -> StoreResult<Vec<Record>> {
        let mut predicate = Predicate::term(fields::REPLICA, replica.to_string())
            .and(Clause::term(fields::LATEST, "true"))
            .and(Clause::term(fields::PROJECT, project));
        if let Some(clause) = window.and_then(|w| w.clause(&self.config.timestamp_field)) {
            predicate = predicate.and(clause);
        }

        let page_size = self.config.listing_page_size.max(1);
        let mut records = Vec::new();
        let mut offset = 0u64;
        loop {
            let request = QueryRequest::new(predicate.clone(), offset, page_size).with_fields([
                fields::ID,
                fields::MASTER_ID,
                fields::VERSION,
            ]);
            let page = store.query(Collection::Datasets, &request)?;
            let fetched = page.records.len() as u64;
            records.extend(page.records);
            offset += fetched;
            if fetched == 0 || offset >= page.total_matches {
                break;
            }
        }
        Ok(records)
    }
}

/// Groups records by lineage, rejecting duplicate versions.
fn group_by_lineage(origin: &str, records: Vec<Record>) -> SyncResult<Lineages> {
    let mut lineages = Lineages::new();
    for record in records {
        let (Some(id), Some(master_id), Some(version)) =
            (record.id(), record.master_id(), record.version())
        else {
            warn!(origin, record = ?record.id(), "record lacks id, master_id or version, ignoring");
            continue;
        };
        let versions = lineages.entry(master_id.clone()).or_default();
        if versions.iter().any(|v| v.version == version) {
            return Err(SyncError::InvariantViolation(format!(
                "{origin} holds more than one latest record for ({master_id}, {version})"
            )));
        }
        versions.push(Version { id, version });
    }
    for versions in lineages.values_mut() {
        versions.sort_by_key(|v| v.version);
    }
    Ok(lineages)
}

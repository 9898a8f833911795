//! Read-only cluster diagnostics and the health summary.

use tracing::warn;

use crate::cluster::{ClusterAdapter, OutputFormat, ResourceQuery};
use crate::error::Result;
use crate::ui;

/// Pod counts by coarse phase bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodTally {
    pub running: usize,
    pub crashing: usize,
    pub pending: usize,
}

impl PodTally {
    /// Count lines of a `get pods --no-headers` listing.
    #[must_use]
    pub fn from_listing(listing: &str) -> Self {
        listing
            .lines()
            .fold(Self::default(), |mut tally, line| {
                if line.contains("Running") {
                    tally.running += 1;
                }
                if line.contains("CrashLoopBackOff") || line.contains("Error") {
                    tally.crashing += 1;
                }
                if line.contains("Pending") {
                    tally.pending += 1;
                }
                tally
            })
    }
}

/// One pod row of the health listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPhase {
    pub namespace: String,
    pub name: String,
    pub phase: String,
}

impl PodPhase {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.phase == "Failed" || self.phase.contains("Error") || self.phase.contains("CrashLoop")
    }
}

/// Result of `health`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub total: usize,
    pub running: usize,
    pub failed: Vec<PodPhase>,
}

impl HealthReport {
    /// Parse `namespace|name|phase` lines.
    #[must_use]
    pub fn from_listing(listing: &str) -> Self {
        let mut report = Self::default();
        for line in listing.lines() {
            let mut parts = line.trim().splitn(3, '|');
            let (Some(namespace), Some(name), Some(phase)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let pod = PodPhase {
                namespace: namespace.to_string(),
                name: name.to_string(),
                phase: phase.to_string(),
            };
            report.total += 1;
            if pod.phase == "Running" {
                report.running += 1;
            }
            if pod.is_failed() {
                report.failed.push(pod);
            }
        }
        report
    }

    #[must_use]
    pub fn healthy(&self) -> bool {
        self.failed.is_empty()
    }
}

const HEALTH_JSONPATH: &str =
    r#"{range .items[*]}{.metadata.namespace}{"|"}{.metadata.name}{"|"}{.status.phase}{"\n"}{end}"#;

/// Tally every pod; unhealthy pods are reported, never an error.
pub async fn health(cluster: &dyn ClusterAdapter) -> Result<HealthReport> {
    ui::print_section("Platform Health");
    let listing = cluster
        .get_jsonpath(&ResourceQuery::new("pods").all_namespaces(), HEALTH_JSONPATH)
        .await?;
    let report = HealthReport::from_listing(&listing);

    for pod in &report.failed {
        ui::print_error(&format!("{}/{}: {}", pod.namespace, pod.name, pod.phase));
    }
    let summary = format!(
        "{}/{} pods running ({} failed)",
        report.running,
        report.total,
        report.failed.len()
    );
    if report.healthy() {
        ui::print_success(&summary);
    } else {
        ui::print_warning(&summary);
        ui::print_info("Run `ceres fix` to attempt automatic remediation");
    }
    Ok(report)
}

/// Connectivity, nodes, pod tally, failed pods, resource usage, storage.
///
/// Only the connectivity check is fatal.
pub async fn diagnose(cluster: &dyn ClusterAdapter) -> Result<PodTally> {
    ui::print_section("Cluster Diagnostics");

    ui::print_step("Cluster connectivity");
    let info = cluster.cluster_info().await?;
    ui::print_block(&info);

    ui::print_step("Nodes");
    match cluster.get(&ResourceQuery::new("nodes"), OutputFormat::Wide).await {
        Ok(nodes) => ui::print_block(&nodes),
        Err(e) => ui::print_warning(&format!("Cannot list nodes: {e}")),
    }

    ui::print_step("Pods");
    let listing = cluster
        .get(&ResourceQuery::new("pods").all_namespaces(), OutputFormat::NoHeaders)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Cannot list pods");
            String::new()
        });
    let tally = PodTally::from_listing(&listing);
    ui::print_kv("Running", &tally.running.to_string());
    ui::print_kv("Crashing", &tally.crashing.to_string());
    ui::print_kv("Pending", &tally.pending.to_string());

    if tally.crashing > 0 {
        ui::print_step("Failed pods");
        let failed = cluster
            .get(
                &ResourceQuery::new("pods")
                    .all_namespaces()
                    .field_selector("status.phase!=Running,status.phase!=Succeeded"),
                OutputFormat::Table,
            )
            .await;
        match failed {
            Ok(text) => ui::print_block(&text),
            Err(e) => ui::print_warning(&format!("Cannot list failed pods: {e}")),
        }
    }

    ui::print_step("Resource usage");
    match cluster.top_nodes().await {
        Ok(text) => ui::print_block(&text),
        Err(_) => ui::print_info("Metrics unavailable (is metrics-server installed?)"),
    }

    ui::print_step("Persistent volume claims");
    match cluster.get(&ResourceQuery::new("pvc").all_namespaces(), OutputFormat::Table).await {
        Ok(text) => ui::print_block(&text),
        Err(e) => ui::print_warning(&format!("Cannot list PVCs: {e}")),
    }

    Ok(tally)
}

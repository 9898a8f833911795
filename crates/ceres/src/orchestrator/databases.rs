//! One-shot database creation job.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::readiness::poll_until;
use crate::cluster::{ClusterAdapter, ResourceQuery};
use crate::error::{CeresError, Result};

/// Name of the batch job defined by the databases manifest.
pub const DATABASE_JOB: &str = "create-databases";

/// Apply the job, wait for it, report its log, and clean it up.
#[derive(Debug, Clone)]
pub struct DatabaseJob {
    pub namespace: String,
    pub interval: Duration,
    pub max_polls: u32,
}

impl DatabaseJob {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            interval: Duration::from_secs(1),
            max_polls: 30,
        }
    }

    /// Returns the log lines reporting created or already-existing databases.
    ///
    /// The job is deleted only after it succeeds; a timed-out job is left in
    /// place for inspection.
    pub async fn run(&self, cluster: &dyn ClusterAdapter, manifest: &Path) -> Result<Vec<String>> {
        cluster.apply_file(manifest).await?;

        let query = &ResourceQuery::named("job", DATABASE_JOB).namespace(&self.namespace);
        let outcome = poll_until(
            move || async move {
                let succeeded = cluster
                    .get_jsonpath(query, "{.status.succeeded}")
                    .await?;
                Ok(succeeded.trim() == "1")
            },
            self.interval,
            self.max_polls,
        )
        .await;

        if !outcome.is_ready() {
            warn!(job = DATABASE_JOB, namespace = %self.namespace, "Database creation job did not complete");
            return Err(CeresError::Timeout {
                what: format!(
                    "database creation job {}/{DATABASE_JOB} (left in place; inspect with kubectl logs -n {} job/{DATABASE_JOB})",
                    self.namespace, self.namespace
                ),
                waited_secs: self.interval.as_secs() * u64::from(self.max_polls),
            });
        }

        let logs = cluster
            .logs(&self.namespace, &format!("job/{DATABASE_JOB}"), None, None)
            .await
            .unwrap_or_default();
        let lines = report_lines(&logs);

        cluster.delete("job", DATABASE_JOB, &self.namespace).await?;
        info!(databases = lines.len(), "Database creation job completed");
        Ok(lines)
    }
}

/// Lines that mention a created or pre-existing database.
#[must_use]
pub fn report_lines(logs: &str) -> Vec<String> {
    logs.lines()
        .map(str::trim)
        .filter(|l| l.contains("CREATE DATABASE") || l.contains("exists"))
        .map(str::to_string)
        .collect()
}

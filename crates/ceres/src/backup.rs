//! Velero backups, driven through the velero CLI inside its deployment.

use chrono::{DateTime, Local};
use tracing::info;

use crate::cluster::{OutputFormat, ResourceQuery, SharedCluster};
use crate::error::{CeresError, Result};
use crate::helm::PackageManager;
use crate::orchestrator::features::{velero_values, VELERO_NAMESPACE};
use crate::process::args;
use crate::ui;

const VELERO_TARGET: &str = "deploy/velero";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

type Clock = Box<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub struct BackupManager {
    cluster: SharedCluster,
    clock: Clock,
}

impl BackupManager {
    #[must_use]
    pub fn new(cluster: SharedCluster) -> Self {
        Self {
            cluster,
            clock: Box::new(Local::now),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn timestamp(&self) -> String {
        (self.clock)().format(TIMESTAMP_FORMAT).to_string()
    }

    async fn velero(&self, command: &[&str]) -> Result<String> {
        let mut argv = vec!["velero".to_string()];
        argv.extend(args(command));
        self.cluster
            .exec(VELERO_NAMESPACE, VELERO_TARGET, None, &argv, None)
            .await
    }

    /// Create a backup and wait for it; a blank name becomes
    /// `backup-<timestamp>`. Returns the backup name.
    pub async fn create(&self, name: &str) -> Result<String> {
        let name = match name.trim() {
            "" => format!("backup-{}", self.timestamp()),
            given => given.to_string(),
        };
        ui::print_step(&format!("Creating backup {name}"));
        self.velero(&["backup", "create", &name, "--wait"]).await?;
        info!(backup = %name, "Backup created");
        Ok(name)
    }

    /// Backup names in the order Velero lists them.
    pub async fn list(&self) -> Result<Vec<String>> {
        let output = self.velero(&["backup", "get"]).await?;
        Ok(parse_backup_names(&output))
    }

    /// Restore from `backup`; returns the restore name.
    pub async fn restore(&self, backup: &str) -> Result<String> {
        let backup = backup.trim();
        if backup.is_empty() {
            return Err(CeresError::Validation("backup name is required".to_string()));
        }
        let restore = format!("restore-{}", self.timestamp());
        ui::print_step(&format!("Restoring {backup} as {restore}"));
        self.velero(&["restore", "create", &restore, "--from-backup", backup, "--wait"])
            .await?;
        info!(backup, restore = %restore, "Restore completed");
        Ok(restore)
    }

    /// Daily 02:00 backup kept for 30 days.
    pub async fn schedule_daily(&self) -> Result<()> {
        self.velero(&[
            "schedule",
            "create",
            "daily-backup",
            "--schedule=0 2 * * *",
            "--ttl",
            "720h",
        ])
        .await?;
        Ok(())
    }

    /// Velero pods.
    pub async fn status(&self) -> Result<String> {
        self.cluster
            .get(
                &ResourceQuery::new("pods").namespace(VELERO_NAMESPACE),
                OutputFormat::Table,
            )
            .await
    }

    pub async fn install(&self, helm: &dyn PackageManager) -> Result<()> {
        helm.add_repo("vmware-tanzu", "https://vmware-tanzu.github.io/helm-charts")
            .await?;
        helm.update_repos().await?;
        let mut values = velero_values();
        values.push(("snapshotsEnabled".to_string(), "false".to_string()));
        helm.install("velero", "vmware-tanzu/velero", VELERO_NAMESPACE, None, values)
            .await
    }
}

/// First column of every non-header line of `velero backup get`.
#[must_use]
pub fn parse_backup_names(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

//! Day-two operations: health, diagnose, fix.

use anyhow::{Context, Result};
use clap::Args;

use ceres_cli::orchestrator::DeployOptions;

use super::Platform;

/// Tally pod health across all namespaces.
#[derive(Args)]
pub struct HealthCommand {}

impl HealthCommand {
    pub async fn run(&self) -> Result<()> {
        Platform::from_env()
            .orchestrator(DeployOptions::default())
            .health()
            .await
            .context("Health check failed")?;
        Ok(())
    }
}

/// Connectivity, nodes, pods, resource usage and storage.
#[derive(Args)]
pub struct DiagnoseCommand {}

impl DiagnoseCommand {
    pub async fn run(&self) -> Result<()> {
        Platform::from_env()
            .orchestrator(DeployOptions::default())
            .diagnose()
            .await
            .context("Diagnostics failed")?;
        Ok(())
    }
}

/// Remediate failing pods.
#[derive(Args)]
pub struct FixCommand {
    /// Only pods whose name contains this.
    service: Option<String>,
}

impl FixCommand {
    pub async fn run(&self) -> Result<()> {
        let report = Platform::from_env()
            .orchestrator(DeployOptions::default())
            .fix(self.service.as_deref())
            .await
            .context("Fix failed")?;
        tracing::info!(
            remediated = report.remediated.len(),
            remaining = report.remaining.len(),
            "Fix finished"
        );
        Ok(())
    }
}

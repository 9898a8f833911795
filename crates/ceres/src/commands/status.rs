use anyhow::{Context, Result};
use clap::Args;

use ceres_cli::orchestrator::DeployOptions;

use super::Platform;

/// Show the deployment record and pods.
#[derive(Args)]
pub struct StatusCommand {
    /// Only list pods in this namespace.
    #[arg(short, long)]
    namespace: Option<String>,
}

impl StatusCommand {
    pub async fn run(&self) -> Result<()> {
        Platform::from_env()
            .orchestrator(DeployOptions::default())
            .status(self.namespace.as_deref())
            .await
            .context("Failed to get status")
    }
}

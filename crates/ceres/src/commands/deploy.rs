use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use ceres_cli::orchestrator::DeployOptions;
use ceres_cli::ui;

use super::Platform;

/// Install, reconcile or upgrade the platform.
#[derive(Args)]
pub struct DeployCommand {
    /// Cloud provider (aws, azure, gcp, proxmox, k3s).
    #[arg(long, env = "CERES_CLOUD", default_value = "proxmox")]
    cloud: String,

    /// Environment (dev, staging, prod).
    #[arg(long, env = "CERES_ENVIRONMENT", default_value = "prod")]
    environment: String,

    /// Platform namespace.
    #[arg(long, env = "CERES_NAMESPACE", default_value = "ceres")]
    namespace: String,

    /// Print the plan without changing anything.
    #[arg(long)]
    dry_run: bool,

    /// Host shown for NodePort access.
    #[arg(long, env = "CERES_EXTERNAL_HOST", default_value = "192.168.1.3")]
    external_host: String,
}

impl DeployCommand {
    pub async fn run(&self) -> Result<()> {
        info!(
            cloud = %self.cloud,
            environment = %self.environment,
            namespace = %self.namespace,
            "Starting deployment"
        );
        let platform = Platform::from_env();
        let options = DeployOptions {
            cloud: self.cloud.clone(),
            environment: self.environment.clone(),
            namespace: self.namespace.clone(),
            dry_run: self.dry_run,
            external_host: self.external_host.clone(),
        };

        let outcome = platform
            .orchestrator(options)
            .deploy()
            .await
            .context("Deployment failed")?;

        if !self.dry_run {
            println!();
            ui::print_success(&format!(
                "Deployment complete ({}, {} manifests applied)",
                outcome.transition,
                outcome.applied.len()
            ));
            if !outcome.warnings.is_empty() {
                ui::print_warning(&format!("{} warnings:", outcome.warnings.len()));
                for warning in &outcome.warnings {
                    ui::print_list_item(warning);
                }
            }
        }
        Ok(())
    }
}

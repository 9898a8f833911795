use anyhow::{Context, Result};
use clap::Args;

use ceres_cli::config::platform_config_path;
use ceres_cli::ui;
use ceres_cli::validator::PrerequisitesValidator;

use super::Platform;

/// Check local tools, cluster access and the platform config.
#[derive(Args)]
pub struct ValidateCommand {
    /// Report only; never fail.
    #[arg(long)]
    check_only: bool,
}

impl ValidateCommand {
    pub async fn run(&self) -> Result<()> {
        ui::print_section("Validating prerequisites");
        let platform = Platform::from_env();
        let config = platform_config_path(&platform.resolver);
        PrerequisitesValidator::new(platform.cluster, config)
            .validate(self.check_only)
            .await
            .context("Validation failed")?;
        Ok(())
    }
}

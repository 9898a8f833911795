use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ceres_cli::config::{platform_config_path, PlatformConfig};
use ceres_cli::ui;

use super::Platform;

/// Inspect the platform config file.
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Check required fields and the cloud provider.
    Validate,
}

impl ConfigCommand {
    pub async fn run(&self) -> Result<()> {
        let path = platform_config_path(&Platform::from_env().resolver);
        let config = PlatformConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?;

        match self.action {
            ConfigAction::Show => {
                ui::print_section("Ceres Configuration");
                ui::print_kv("File", &path.display().to_string());
                println!();
                print!("{}", config.to_yaml()?);
            }
            ConfigAction::Validate => {
                let problems = config.problems();
                if problems.is_empty() {
                    ui::print_success("Configuration is valid");
                } else {
                    for problem in &problems {
                        ui::print_error(problem);
                    }
                    anyhow::bail!("Configuration has {} problem(s)", problems.len());
                }
            }
        }
        Ok(())
    }
}

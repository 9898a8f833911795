use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ceres_cli::backup::BackupManager;
use ceres_cli::ui;

use super::Platform;

/// Velero backups.
#[derive(Args)]
pub struct BackupCommand {
    #[command(subcommand)]
    action: BackupAction,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Create a backup and wait for it.
    Create {
        /// Backup name; defaults to backup-<timestamp>.
        name: Option<String>,
    },
    /// List backups.
    List,
    /// Restore from a backup.
    Restore { name: String },
    /// Create the daily 02:00 schedule.
    Schedule,
    /// Show Velero pods.
    Status,
    /// Install Velero with the MinIO backend.
    Install,
}

impl BackupCommand {
    pub async fn run(&self) -> Result<()> {
        let platform = Platform::from_env();
        let backups = BackupManager::new(platform.cluster.clone());

        match &self.action {
            BackupAction::Create { name } => {
                let name = backups
                    .create(name.as_deref().unwrap_or_default())
                    .await
                    .context("Backup failed")?;
                ui::print_success(&format!("Backup {name} created"));
            }
            BackupAction::List => {
                let names = backups.list().await.context("Cannot list backups")?;
                if names.is_empty() {
                    ui::print_info("No backups");
                }
                for name in &names {
                    ui::print_list_item(name);
                }
            }
            BackupAction::Restore { name } => {
                let restore = backups.restore(name).await.context("Restore failed")?;
                ui::print_success(&format!("Restore {restore} completed"));
            }
            BackupAction::Schedule => {
                backups
                    .schedule_daily()
                    .await
                    .context("Cannot create schedule")?;
                ui::print_success("Daily backup scheduled (02:00, kept 30 days)");
            }
            BackupAction::Status => {
                ui::print_section("Velero");
                ui::print_block(&backups.status().await?);
            }
            BackupAction::Install => {
                backups
                    .install(platform.helm().as_ref())
                    .await
                    .context("Velero install failed")?;
                ui::print_success("Velero installed");
            }
        }
        Ok(())
    }
}

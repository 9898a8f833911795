use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ceres_cli::mail::MailManager;

use super::Platform;

/// Mail stack status and test delivery.
#[derive(Args)]
pub struct MailCommand {
    #[command(subcommand)]
    action: MailAction,
}

#[derive(Subcommand)]
enum MailAction {
    /// Show mail pods and access details.
    Status,
    /// Send a test message.
    Test { email: String },
}

impl MailCommand {
    pub async fn run(&self) -> Result<()> {
        let manager = MailManager::from_env(Platform::from_env().cluster);
        match &self.action {
            MailAction::Status => manager.status().await.context("Mail status failed")?,
            MailAction::Test { email } => manager
                .send_test(email)
                .await
                .context("Test mail failed")?,
        }
        Ok(())
    }
}

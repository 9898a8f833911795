use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ceres_cli::sso::{self, SsoManager, SsoService};

use super::Platform;

/// Keycloak realm, OAuth2 proxy and service integration.
#[derive(Args)]
pub struct SsoCommand {
    #[command(subcommand)]
    action: SsoAction,
}

#[derive(Subcommand)]
enum SsoAction {
    /// Import the realm and deploy the OAuth2 proxy.
    Install,
    /// Integrate one service.
    Integrate { service: String },
    /// Integrate every supported service.
    IntegrateAll,
    /// Show Keycloak, proxy and ingress state.
    Status,
}

impl SsoCommand {
    pub async fn run(&self) -> Result<()> {
        let platform = Platform::from_env();
        if let SsoAction::Integrate { service } = &self.action {
            // Reject unknown names before touching the cluster.
            service.parse::<SsoService>()?;
        }
        let keycloak = sso::client_from_env(&platform.cluster)
            .await
            .context("Cannot build Keycloak admin client")?;
        let manager = SsoManager::new(platform.cluster.clone(), keycloak, platform.resolver);

        match &self.action {
            SsoAction::Install => manager.install().await.context("SSO install failed")?,
            SsoAction::Integrate { service } => manager
                .integrate(service.parse()?)
                .await
                .with_context(|| format!("Failed to integrate {service}"))?,
            SsoAction::IntegrateAll => {
                manager.integrate_all().await;
            }
            SsoAction::Status => manager.status().await?,
        }
        Ok(())
    }
}

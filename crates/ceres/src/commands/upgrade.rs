use anyhow::Result;
use clap::Args;

use ceres_cli::orchestrator::features::FeatureUpgrade;
use ceres_cli::sso::{self, SsoManager};
use ceres_cli::ui;

use super::Platform;

/// Add platform features: cert-manager, Velero, Promtail, Mailcow and SSO.
#[derive(Args)]
pub struct UpgradeCommand {
    /// Platform namespace.
    #[arg(long, env = "CERES_NAMESPACE", default_value = "ceres")]
    namespace: String,
}

impl UpgradeCommand {
    pub async fn run(&self) -> Result<()> {
        let platform = Platform::from_env();
        let report = FeatureUpgrade::new(
            platform.cluster.clone(),
            platform.helm(),
            platform.resolver.clone(),
            &self.namespace,
        )
        .run()
        .await;
        let mut warnings = report.warnings;

        let sso_result = match sso::client_from_env(&platform.cluster).await {
            Ok(keycloak) => {
                SsoManager::new(platform.cluster.clone(), keycloak, platform.resolver.clone())
                    .install()
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = sso_result {
            let message = format!("sso: {e}");
            ui::print_warning(&message);
            warnings.push(message);
        }

        println!();
        if warnings.is_empty() {
            ui::print_success("Upgrade complete");
        } else {
            ui::print_warning(&format!(
                "Upgrade finished with {} warning(s); completed: {}",
                warnings.len(),
                report.completed.join(", ")
            ));
        }
        Ok(())
    }
}

//! The onboarding mail: root CA and a freshly provisioned VPN peer.

use std::sync::Arc;

use ceres_cli::cluster::{Kubectl, SharedCluster};
use ceres_cli::mail::{Attachment, MailSender, SmtpSettings};
use ceres_cli::process::SystemRunner;
use ceres_cli::tls;
use ceres_cli::vpn::PeerProvisioner;
use tracing::info;

use crate::settings::ConsoleConfig;

pub const CA_FILENAME: &str = "ceres-root-ca.crt";
pub const VPN_FILENAME: &str = "ceres-vpn.conf";

/// Cluster and VPN server access needed to build and send the package.
pub struct PackageMailer {
    cluster: SharedCluster,
    provisioner: PeerProvisioner<SystemRunner>,
}

impl PackageMailer {
    #[must_use]
    pub fn new(cluster: SharedCluster, provisioner: PeerProvisioner<SystemRunner>) -> Self {
        Self {
            cluster,
            provisioner,
        }
    }

    /// `kubectl` and `wg` on this host.
    #[must_use]
    pub fn local() -> Self {
        Self::new(
            Arc::new(Kubectl::new(SystemRunner::new())),
            PeerProvisioner::new(SystemRunner::new()),
        )
    }

    /// Build the attachments selected in `config` and send them.
    ///
    /// Errors are operator-facing messages for the page flash.
    pub async fn send(&self, config: &ConsoleConfig) -> Result<(), String> {
        let recipients = check(config)?;

        let mut attachments = Vec::new();
        if config.include_ca {
            let pem = tls::root_ca_pem(self.cluster.as_ref())
                .await
                .map_err(|e| format!("Could not read the root CA from the cluster: {e}"))?;
            attachments.push(Attachment::new(
                CA_FILENAME,
                "application/x-x509-ca-cert",
                pem,
            ));
        }
        if config.include_vpn {
            let peer = self
                .provisioner
                .provision(config.vpn_endpoint.trim(), config.vpn_port, None)
                .await
                .map_err(|e| format!("Could not create the VPN config: {e}"))?;
            attachments.push(Attachment::new(
                VPN_FILENAME,
                "text/plain",
                peer.render().into_bytes(),
            ));
        }

        let from = if config.from.trim().is_empty() {
            ceres_cli::config::env_or("CERES_MAIL_FROM", ceres_cli::mail::sender::DEFAULT_FROM)
        } else {
            config.from.trim().to_string()
        };
        MailSender::new(self.cluster.clone(), SmtpSettings::from_env(), &from)
            .send(&recipients, &config.subject, &config.body, attachments)
            .await
            .map_err(|e| format!("Sending failed: {e}"))?;
        info!(recipients = recipients.len(), "Onboarding package sent");
        Ok(())
    }
}

/// Form checks that need no cluster access.
pub fn check(config: &ConsoleConfig) -> Result<Vec<String>, String> {
    let recipients = config.recipients();
    if recipients.is_empty() {
        return Err("Recipient (To) is required".to_string());
    }
    if config.include_vpn && config.vpn_endpoint.trim().is_empty() {
        return Err("VPN endpoint is required for the VPN attachment".to_string());
    }
    Ok(recipients)
}

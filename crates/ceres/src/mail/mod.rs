//! Mail: status of the mail stack and message delivery.

pub mod mime;
pub mod sender;

use crate::cluster::{OutputFormat, ResourceQuery, SharedCluster};
use crate::config::{env_bool, env_opt};
use crate::error::Result;
use crate::orchestrator::plan::MAIL_NAMESPACE;
use crate::ui;

pub use self::mime::{normalize_recipients, Attachment, Message};
pub use self::sender::{MailSender, SmtpSettings};

/// Mail is handled outside the cluster (`CERES_MAIL_MODE=external` or a
/// truthy `CERES_SKIP_MAILCOW`).
#[must_use]
pub fn external_mode() -> bool {
    env_opt("CERES_MAIL_MODE").is_some_and(|m| m.eq_ignore_ascii_case("external"))
        || env_bool("CERES_SKIP_MAILCOW", false)
}

pub struct MailManager {
    cluster: SharedCluster,
    sender: MailSender,
    external: bool,
}

impl MailManager {
    #[must_use]
    pub fn new(cluster: SharedCluster, sender: MailSender, external: bool) -> Self {
        Self {
            cluster,
            sender,
            external,
        }
    }

    #[must_use]
    pub fn from_env(cluster: SharedCluster) -> Self {
        let sender = MailSender::from_env(cluster.clone());
        Self::new(cluster, sender, external_mode())
    }

    #[must_use]
    pub fn sender(&self) -> &MailSender {
        &self.sender
    }

    pub async fn status(&self) -> Result<()> {
        ui::print_section("Mail");
        if !self.external {
            let listing = self
                .cluster
                .get(
                    &ResourceQuery::new("pods,svc").namespace(MAIL_NAMESPACE),
                    OutputFormat::Table,
                )
                .await?;
            ui::print_block(&listing);
        }
        self.print_access_info();
        Ok(())
    }

    pub async fn send_test(&self, to: &str) -> Result<()> {
        ui::print_step(&format!("Sending test mail to {to}"));
        self.sender
            .send(
                &[to.to_string()],
                "CERES Test Email",
                "This is a test email from CERES.",
                Vec::new(),
            )
            .await?;
        ui::print_success("Test mail sent");
        Ok(())
    }

    fn print_access_info(&self) {
        println!();
        if self.external {
            ui::print_info("External mail: configured outside Kubernetes");
            match self.sender.smtp() {
                Some(smtp) => ui::print_kv("SMTP", &format!("{}:{}", smtp.host, smtp.port)),
                None => ui::print_warning(
                    "SMTP not set: configure CERES_SMTP_HOST, CERES_SMTP_PORT, CERES_SMTP_USER, CERES_SMTP_PASS",
                ),
            }
        } else {
            ui::print_kv("Webmail", "http://mail.ceres.local");
            ui::print_kv("SMTP (internal)", &format!("mailcow-smtp.{MAIL_NAMESPACE}.svc:587"));
            ui::print_kv("IMAP", &format!("mailcow-imap.{MAIL_NAMESPACE}.svc:993"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serial_test::serial;

    use super::*;
    use crate::cluster::testing::FakeCluster;

    #[test]
    #[serial]
    fn test_external_mode_from_env() {
        std::env::remove_var("CERES_MAIL_MODE");
        std::env::remove_var("CERES_SKIP_MAILCOW");
        assert!(!external_mode());

        std::env::set_var("CERES_MAIL_MODE", "External");
        assert!(external_mode());
        std::env::remove_var("CERES_MAIL_MODE");

        std::env::set_var("CERES_SKIP_MAILCOW", "on");
        assert!(external_mode());
        std::env::remove_var("CERES_SKIP_MAILCOW");
    }

    #[tokio::test]
    async fn test_external_status_does_not_query_cluster() {
        let cluster = Arc::new(FakeCluster::new());
        let sender = MailSender::new(cluster.clone(), None, "admin@ceres.local");
        let manager = MailManager::new(cluster.clone(), sender, true);

        manager.status().await.unwrap();

        assert!(cluster.calls().is_empty());
    }
}

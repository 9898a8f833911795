//! Mail delivery over SMTP or through the postfix container of the mail pod.

use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, info};

use super::mime::{normalize_recipients, Attachment, Message};
use crate::cluster::{ResourceQuery, SharedCluster};
use crate::config::{env_bool, env_opt, env_or, env_parse};
use crate::error::{CeresError, Result};
use crate::orchestrator::plan::MAIL_NAMESPACE;
use crate::process::args;

/// Sender used when `CERES_MAIL_FROM` is unset.
pub const DEFAULT_FROM: &str = "admin@ceres.local";

/// SMTP relay settings from `CERES_SMTP_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: String,
    pub starttls: bool,
    /// Implicit TLS, e.g. port 465.
    pub implicit_tls: bool,
}

impl SmtpSettings {
    /// `None` unless `CERES_SMTP_HOST` is set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let host = env_opt("CERES_SMTP_HOST")?;
        Some(Self {
            host,
            port: env_parse("CERES_SMTP_PORT", 587),
            user: env_opt("CERES_SMTP_USER"),
            password: env_or("CERES_SMTP_PASS", ""),
            starttls: env_bool("CERES_SMTP_STARTTLS", true),
            implicit_tls: env_bool("CERES_SMTP_TLS", false),
        })
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let tls_params = || {
            TlsParameters::new(self.host.clone())
                .map_err(|e| CeresError::Transport(format!("smtp TLS setup failed: {e}")))
        };
        let tls = if self.implicit_tls {
            Tls::Wrapper(tls_params()?)
        } else if self.starttls {
            Tls::Opportunistic(tls_params()?)
        } else {
            Tls::None
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
            .port(self.port)
            .tls(tls);
        if let Some(user) = &self.user {
            builder = builder
                .credentials(Credentials::new(user.clone(), self.password.clone()))
                .authentication(vec![Mechanism::Plain]);
        }
        Ok(builder.build())
    }

    async fn send(&self, from: &str, to: &[String], raw: &str) -> Result<()> {
        let parse = |addr: &str| {
            addr.parse::<Address>()
                .map_err(|e| CeresError::Validation(format!("invalid address '{addr}': {e}")))
        };
        let recipients = to.iter().map(|t| parse(t)).collect::<Result<Vec<_>>>()?;
        let envelope = Envelope::new(Some(parse(from)?), recipients)
            .map_err(|e| CeresError::Validation(format!("invalid envelope: {e}")))?;

        self.transport()?
            .send_raw(&envelope, raw.as_bytes())
            .await
            .map_err(|e| {
                CeresError::Transport(format!("smtp delivery via {}:{} failed: {e}", self.host, self.port))
            })?;
        Ok(())
    }
}

/// Delivers composed messages.
pub struct MailSender {
    cluster: SharedCluster,
    smtp: Option<SmtpSettings>,
    from: String,
}

impl MailSender {
    #[must_use]
    pub fn new(cluster: SharedCluster, smtp: Option<SmtpSettings>, from: &str) -> Self {
        Self {
            cluster,
            smtp,
            from: from.to_string(),
        }
    }

    /// SMTP when `CERES_SMTP_HOST` is set, otherwise the mail pod.
    #[must_use]
    pub fn from_env(cluster: SharedCluster) -> Self {
        Self::new(
            cluster,
            SmtpSettings::from_env(),
            &env_or("CERES_MAIL_FROM", DEFAULT_FROM),
        )
    }

    #[must_use]
    pub fn smtp(&self) -> Option<&SmtpSettings> {
        self.smtp.as_ref()
    }

    pub async fn send(
        &self,
        to: &[String],
        subject: &str,
        body: &str,
        attachments: Vec<Attachment>,
    ) -> Result<()> {
        let to = normalize_recipients(to);
        if to.is_empty() {
            return Err(CeresError::Validation("no recipients".to_string()));
        }
        let raw = Message {
            from: self.from.clone(),
            to: to.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachments,
        }
        .compose();

        match &self.smtp {
            Some(smtp) => smtp.send(&self.from, &to, &raw).await?,
            None => self.send_via_pod(&raw).await?,
        }
        info!(recipients = to.len(), "Mail sent");
        Ok(())
    }

    /// First pod labelled `app=mailcow`.
    pub async fn mail_pod(&self) -> Result<String> {
        let pod = self
            .cluster
            .get_jsonpath(
                &ResourceQuery::new("pods")
                    .namespace(MAIL_NAMESPACE)
                    .selector("app=mailcow"),
                "{.items[0].metadata.name}",
            )
            .await?;
        let pod = pod.trim();
        if pod.is_empty() {
            return Err(CeresError::Transport("mailcow pod not found".to_string()));
        }
        Ok(pod.to_string())
    }

    async fn send_via_pod(&self, raw: &str) -> Result<()> {
        let pod = self.mail_pod().await?;
        debug!(pod = %pod, "Piping message to sendmail");
        self.cluster
            .exec(
                MAIL_NAMESPACE,
                &pod,
                Some("postfix"),
                &args(&["sendmail", "-t"]),
                Some(raw.as_bytes()),
            )
            .await
            .map_err(|e| CeresError::Transport(format!("sendmail failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serial_test::serial;

    use super::*;
    use crate::cluster::testing::FakeCluster;

    const POD_KEY: &str = "pods -n mailcow -l app=mailcow -o jsonpath={.items[0].metadata.name}";

    #[tokio::test]
    async fn test_pod_delivery_uses_sendmail() {
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .on_get(POD_KEY, vec!["mailcow-0"])
            .on_exec("mailcow/mailcow-0 sendmail -t", "");
        let sender = MailSender::new(cluster.clone(), None, DEFAULT_FROM);

        sender
            .send(&["ops@example.com".to_string()], "", "hi", Vec::new())
            .await
            .unwrap();

        assert_eq!(cluster.count_calls("exec mailcow/mailcow-0 sendmail -t"), 1);
    }

    #[tokio::test]
    async fn test_missing_pod_is_transport_error() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.on_get(POD_KEY, vec![""]);
        let sender = MailSender::new(cluster, None, DEFAULT_FROM);

        let err = sender
            .send(&["ops@example.com".to_string()], "s", "b", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CeresError::Transport(_)));
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let sender = MailSender::new(Arc::new(FakeCluster::new()), None, DEFAULT_FROM);
        let err = sender
            .send(&[" , ".to_string()], "s", "b", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CeresError::Validation(_)));
    }

    #[test]
    #[serial]
    fn test_smtp_settings_from_env() {
        std::env::remove_var("CERES_SMTP_HOST");
        assert!(SmtpSettings::from_env().is_none());

        std::env::set_var("CERES_SMTP_HOST", "smtp.example.com");
        std::env::set_var("CERES_SMTP_PORT", "not-a-port");
        std::env::set_var("CERES_SMTP_TLS", "yes");
        let settings = SmtpSettings::from_env().unwrap();
        assert_eq!(settings.port, 587);
        assert!(settings.implicit_tls);
        assert!(settings.starttls);
        assert!(settings.user.is_none());

        for key in ["CERES_SMTP_HOST", "CERES_SMTP_PORT", "CERES_SMTP_TLS"] {
            std::env::remove_var(key);
        }
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_connecting() {
        let smtp = SmtpSettings {
            host: "127.0.0.1".into(),
            port: 1,
            user: None,
            password: String::new(),
            starttls: false,
            implicit_tls: false,
        };
        let err = smtp
            .send("admin@ceres.local", &["not an address".to_string()], "x")
            .await
            .unwrap_err();
        assert!(matches!(err, CeresError::Validation(_)));
    }
}

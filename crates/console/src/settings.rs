//! Persistent console settings.

use std::fs;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt as _;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use ceres_cli::config::{env_or, env_parse};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_CONSOLE_CONFIG: &str = "/var/lib/ceres-ui/console.json";
pub const DEFAULT_MAIL_UI_CONFIG: &str = "/var/lib/ceres-ui/config.json";

const DEFAULT_CLOUD: &str = "k3s";
const DEFAULT_ENVIRONMENT: &str = "prod";
const DEFAULT_NAMESPACE: &str = "ceres";
const DEFAULT_SUBJECT: &str = "CERES: VPN + certificate";
const DEFAULT_BODY: &str = "Hello!\n\nAttached:\n1) CERES Root CA certificate (install it as a trusted root)\n2) WireGuard configuration (import it into the WireGuard app)\n\n";
const DEFAULT_VPN_PORT: u16 = 51820;

/// Deploy target and mail-package defaults edited from the settings page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleConfig {
    pub cloud: String,
    pub environment: String,
    pub namespace: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub vpn_endpoint: String,
    pub vpn_port: u16,
    #[serde(rename = "includeCA")]
    pub include_ca: bool,
    #[serde(rename = "includeVPN")]
    pub include_vpn: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            cloud: env_or("CERES_UI_CLOUD", DEFAULT_CLOUD),
            environment: env_or("CERES_UI_ENV", DEFAULT_ENVIRONMENT),
            namespace: env_or("CERES_UI_NAMESPACE", DEFAULT_NAMESPACE),
            from: env_or("CERES_UI_FROM", ceres_cli::mail::sender::DEFAULT_FROM),
            to: env_or("CERES_UI_TO", ""),
            subject: env_or("CERES_UI_SUBJECT", DEFAULT_SUBJECT),
            body: env_or("CERES_UI_BODY", DEFAULT_BODY),
            vpn_endpoint: env_or("CERES_UI_VPN_ENDPOINT", "192.168.1.3"),
            vpn_port: env_parse("CERES_UI_VPN_PORT", DEFAULT_VPN_PORT),
            include_ca: true,
            include_vpn: true,
        }
    }
}

impl ConsoleConfig {
    /// Read `path`; a missing or unparsable file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No console config, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = serde_json::from_str::<Self>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring malformed console config");
            Self::default()
        });
        config.fill_blanks();
        Ok(config)
    }

    /// Write pretty JSON, creating parent directories. The file is 0600.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(body.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn fill_blanks(&mut self) {
        if self.cloud.is_empty() {
            self.cloud = DEFAULT_CLOUD.to_string();
        }
        if self.environment.is_empty() {
            self.environment = DEFAULT_ENVIRONMENT.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if self.subject.is_empty() {
            self.subject = DEFAULT_SUBJECT.to_string();
        }
        if self.vpn_port == 0 {
            self.vpn_port = DEFAULT_VPN_PORT;
        }
    }

    /// Apply a submitted settings or compose form.
    ///
    /// Text fields are trimmed (the body is kept verbatim); fields the form
    /// does not carry keep their value. Checkboxes are on only when sent as
    /// `on`.
    pub fn apply_form(&mut self, form: &ConfigForm) {
        let set = |target: &mut String, value: &Option<String>| {
            if let Some(value) = value {
                *target = value.trim().to_string();
            }
        };
        set(&mut self.cloud, &form.cloud);
        set(&mut self.environment, &form.environment);
        set(&mut self.namespace, &form.namespace);
        set(&mut self.from, &form.from);
        set(&mut self.to, &form.to);
        set(&mut self.subject, &form.subject);
        set(&mut self.vpn_endpoint, &form.vpn_endpoint);
        if let Some(body) = &form.body {
            self.body.clone_from(body);
        }
        self.vpn_port = form
            .vpn_port
            .as_deref()
            .and_then(|p| p.trim().parse().ok())
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_VPN_PORT);
        self.include_ca = form.include_ca.as_deref() == Some("on");
        self.include_vpn = form.include_vpn.as_deref() == Some("on");
    }

    /// Recipients from the comma separated `to` field.
    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Form body of the settings and mail pages.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigForm {
    pub cloud: Option<String>,
    pub environment: Option<String>,
    pub namespace: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub vpn_endpoint: Option<String>,
    pub vpn_port: Option<String>,
    #[serde(rename = "includeCA")]
    pub include_ca: Option<String>,
    #[serde(rename = "includeVPN")]
    pub include_vpn: Option<String>,
}

/// Config file plus its in-memory copy.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<ConsoleConfig>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = ConsoleConfig::load(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self) -> ConsoleConfig {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Persist `config` and make it current.
    pub fn save(&self, config: ConsoleConfig) -> Result<()> {
        config.save(&self.path)?;
        match self.current.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        Ok(())
    }
}

//! Configuration: environment settings, the instance env file, the platform
//! YAML file, and manifest path resolution.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CeresError, Result};

/// Version this build deploys.
pub const CERES_VERSION: &str = "3.1.0";

/// Cloud providers accepted by `deploy --cloud` and the platform config.
pub const VALID_CLOUDS: &[&str] = &["aws", "azure", "gcp", "proxmox", "k3s"];

/// Default location of the instance env file.
pub const DEFAULT_ENV_FILE: &str = "/etc/ceres/ceres.env";

/// Parse the boolean spellings accepted in env vars.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Trimmed env var, `None` when unset or blank.
#[must_use]
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[must_use]
pub fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

#[must_use]
pub fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key).and_then(|v| parse_bool(&v)).unwrap_or(default)
}

/// Parsed env var, falling back to `default` when unset or unparsable.
#[must_use]
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parse `KEY=VALUE` lines: blank lines and `#` comments are skipped, an
/// `export ` prefix is allowed, and matching surrounding quotes are stripped.
#[must_use]
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Load the instance env file into the process environment.
///
/// Variables already present in the environment win. A missing file is not an
/// error. Returns the number of variables set.
pub fn load_instance_env(path: &Path) -> Result<usize> {
    if !path.exists() {
        debug!(path = %path.display(), "No instance env file");
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)?;
    let mut applied = 0;
    for (key, value) in parse_env_file(&content) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    info!(path = %path.display(), applied, "Loaded instance env file");
    Ok(applied)
}

/// Instance env file path from `CERES_ENV_FILE` or the default.
#[must_use]
pub fn instance_env_path() -> PathBuf {
    PathBuf::from(env_or("CERES_ENV_FILE", DEFAULT_ENV_FILE))
}

/// Platform description loaded from `ceres.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub platform: PlatformSection,
    pub cloud: CloudSection,
    pub services: ServicesSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub name: String,
    pub version: String,
    pub domain: String,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    pub provider: String,
    pub region: String,
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesSection {
    pub postgresql: DatabaseService,
    pub redis: CacheService,
    pub keycloak: ReplicatedService,
    pub gitlab: ReplicatedService,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseService {
    pub enabled: bool,
    pub version: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheService {
    pub enabled: bool,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatedService {
    pub enabled: bool,
    pub replicas: u32,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            name: "ceres".into(),
            version: CERES_VERSION.into(),
            domain: "ceres.local".into(),
            environment: "prod".into(),
        }
    }
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            provider: "proxmox".into(),
            region: "local".into(),
            project: "ceres".into(),
        }
    }
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            postgresql: DatabaseService {
                enabled: true,
                version: "16".into(),
                database: "ceres".into(),
            },
            redis: CacheService {
                enabled: true,
                version: "7".into(),
            },
            keycloak: ReplicatedService {
                enabled: true,
                replicas: 1,
            },
            gitlab: ReplicatedService {
                enabled: true,
                replicas: 1,
            },
        }
    }
}

impl Default for DatabaseService {
    fn default() -> Self {
        ServicesSection::default().postgresql
    }
}

impl Default for CacheService {
    fn default() -> Self {
        ServicesSection::default().redis
    }
}

impl Default for ReplicatedService {
    fn default() -> Self {
        Self {
            enabled: true,
            replicas: 1,
        }
    }
}

impl PlatformConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Platform config not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            CeresError::Validation(format!("invalid platform config {}: {e}", path.display()))
        })
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| CeresError::Validation(format!("cannot render config: {e}")))
    }

    /// Every problem found, empty when valid.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.platform.name.trim().is_empty() {
            problems.push("platform.name is required".to_string());
        }
        if self.platform.domain.trim().is_empty() {
            problems.push("platform.domain is required".to_string());
        }
        if self.cloud.provider.trim().is_empty() {
            problems.push("cloud.provider is required".to_string());
        } else if !VALID_CLOUDS.contains(&self.cloud.provider.as_str()) {
            problems.push(format!(
                "cloud.provider '{}' is not one of {}",
                self.cloud.provider,
                VALID_CLOUDS.join(", ")
            ));
        }
        if self.cloud.region.trim().is_empty() {
            problems.push("cloud.region is required".to_string());
        }
        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CeresError::Validation(problems.join("; ")))
        }
    }
}

/// Platform config path from `CERES_CONFIG`, else `ceres.yaml` under the first search root.
#[must_use]
pub fn platform_config_path(resolver: &ManifestResolver) -> PathBuf {
    env_opt("CERES_CONFIG").map_or_else(|| resolver.resolve("ceres.yaml"), PathBuf::from)
}

/// Validate a cloud provider name.
pub fn validate_cloud(cloud: &str) -> Result<()> {
    if VALID_CLOUDS.contains(&cloud) {
        Ok(())
    } else {
        Err(CeresError::Validation(format!(
            "unsupported cloud '{cloud}', expected one of {}",
            VALID_CLOUDS.join(", ")
        )))
    }
}

/// Locates manifest files relative to the Ceres checkout.
#[derive(Debug, Clone, Default)]
pub struct ManifestResolver {
    roots: Vec<PathBuf>,
}

impl ManifestResolver {
    /// Search the given roots in order.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// `CERES_ROOT`, `CERES_REPO_ROOT`, the working directory, the executable's
    /// directory and its parent.
    #[must_use]
    pub fn from_env() -> Self {
        let mut roots = Vec::new();
        for key in ["CERES_ROOT", "CERES_REPO_ROOT"] {
            if let Some(v) = env_opt(key) {
                roots.push(PathBuf::from(v));
            }
        }
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            if let Some(parent) = dir.parent() {
                let parent = parent.to_path_buf();
                roots.push(dir);
                roots.push(parent);
            } else {
                roots.push(dir);
            }
        }
        Self { roots }
    }

    /// First existing `root/relative`; absolute paths and URLs pass through,
    /// and an unresolvable path is returned as given.
    #[must_use]
    pub fn resolve(&self, relative: &str) -> PathBuf {
        if relative.contains("://") || Path::new(relative).is_absolute() {
            return PathBuf::from(relative);
        }
        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(relative))
    }

    /// First search root, used as the job working directory.
    #[must_use]
    pub fn primary_root(&self) -> Option<&Path> {
        self.roots.first().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool_spellings() {
        for v in ["1", "true", "YES", "y", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["0", "false", "no", "N", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_env_file() {
        let content = r#"
# instance settings
CERES_SMTP_HOST=smtp.example.com
export CERES_SMTP_PORT=465
CERES_MAIL_FROM="ops@example.com"
CERES_UI_BODY='hello world'
BROKEN_LINE
=novalue
"#;
        let parsed = parse_env_file(content);
        assert_eq!(
            parsed,
            vec![
                ("CERES_SMTP_HOST".to_string(), "smtp.example.com".to_string()),
                ("CERES_SMTP_PORT".to_string(), "465".to_string()),
                ("CERES_MAIL_FROM".to_string(), "ops@example.com".to_string()),
                ("CERES_UI_BODY".to_string(), "hello world".to_string()),
            ]
        );
    }

    #[test]
    #[serial]
    fn test_load_instance_env_keeps_existing_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ceres.env");
        std::fs::write(
            &path,
            "CERES_TEST_ENV_A=from-file\nCERES_TEST_ENV_B=from-file\n",
        )
        .unwrap();
        std::env::set_var("CERES_TEST_ENV_A", "from-env");
        std::env::remove_var("CERES_TEST_ENV_B");

        let applied = load_instance_env(&path).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(std::env::var("CERES_TEST_ENV_A").unwrap(), "from-env");
        assert_eq!(std::env::var("CERES_TEST_ENV_B").unwrap(), "from-file");
        std::env::remove_var("CERES_TEST_ENV_A");
        std::env::remove_var("CERES_TEST_ENV_B");
    }

    #[test]
    #[serial]
    fn test_env_helpers_fall_back() {
        std::env::set_var("CERES_TEST_PORT", "not-a-number");
        assert_eq!(env_parse("CERES_TEST_PORT", 587u16), 587);
        std::env::set_var("CERES_TEST_PORT", " 2525 ");
        assert_eq!(env_parse("CERES_TEST_PORT", 587u16), 2525);
        std::env::remove_var("CERES_TEST_PORT");
        assert!(env_bool("CERES_TEST_UNSET_FLAG", true));
    }

    #[test]
    fn test_platform_config_defaults_and_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let missing = PlatformConfig::load(&dir.path().join("ceres.yaml")).unwrap();
        assert_eq!(missing, PlatformConfig::default());
        missing.validate().unwrap();

        let path = dir.path().join("ceres.yaml");
        std::fs::write(&path, "cloud:\n  provider: aws\n  region: eu-west-1\n").unwrap();
        let cfg = PlatformConfig::load(&path).unwrap();
        assert_eq!(cfg.cloud.provider, "aws");
        assert_eq!(cfg.platform.domain, "ceres.local");
        assert!(cfg.services.postgresql.enabled);
    }

    #[test]
    fn test_platform_config_problems() {
        let mut cfg = PlatformConfig::default();
        cfg.cloud.provider = "openstack".into();
        cfg.platform.domain = String::new();
        let problems = cfg.problems();
        assert_eq!(problems.len(), 2);
        assert!(cfg.validate().unwrap_err().to_string().contains("openstack"));
    }

    #[test]
    fn test_validate_cloud() {
        validate_cloud("k3s").unwrap();
        assert!(validate_cloud("digitalocean").is_err());
    }

    #[test]
    fn test_manifest_resolution_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(second.path().join("deployment")).unwrap();
        std::fs::write(second.path().join("deployment/redis.yaml"), "kind: List").unwrap();

        let resolver =
            ManifestResolver::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);

        assert_eq!(
            resolver.resolve("deployment/redis.yaml"),
            second.path().join("deployment/redis.yaml")
        );
        assert_eq!(
            resolver.resolve("deployment/missing.yaml"),
            PathBuf::from("deployment/missing.yaml")
        );
        assert_eq!(
            resolver.resolve("https://example.com/x.yaml"),
            PathBuf::from("https://example.com/x.yaml")
        );
        assert_eq!(resolver.resolve("/abs/x.yaml"), PathBuf::from("/abs/x.yaml"));
    }
}

//! Deployment state persistence.
//!
//! The platform's install record lives in a single ConfigMap. Writes carry
//! the `resourceVersion` that was read, so two operators racing on the same
//! cluster get a conflict instead of silently overwriting each other.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use crate::cluster::{OutputFormat, ResourceQuery, SharedCluster};
use crate::error::{CeresError, Result};

/// Name of the state ConfigMap.
pub const STATE_CONFIGMAP: &str = "ceres-deployment-state";
/// Namespace of the state ConfigMap.
pub const STATE_NAMESPACE: &str = "kube-system";

/// Service status reported when the record has no entry.
pub const SERVICE_NOT_FOUND: &str = "not-found";

/// The platform install record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentState {
    pub installed: bool,
    pub version: String,
    pub services: BTreeMap<String, String>,
    pub endpoints: BTreeMap<String, String>,
    pub install_date: Option<String>,
    pub upgrade_date: Option<String>,
}

fn parse_map(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn render_map(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl DeploymentState {
    /// Decode ConfigMap `data`.
    #[must_use]
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).map(|v| v.trim().to_string());
        Self {
            installed: get("installed").is_some_and(|v| v == "true"),
            version: get("version").unwrap_or_default(),
            services: data.get("services").map(|s| parse_map(s)).unwrap_or_default(),
            endpoints: data.get("endpoints").map(|s| parse_map(s)).unwrap_or_default(),
            install_date: get("installDate").filter(|v| !v.is_empty()),
            upgrade_date: get("upgradeDate").filter(|v| !v.is_empty()),
        }
    }

    /// Encode as ConfigMap `data`.
    #[must_use]
    pub fn to_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("installed".to_string(), self.installed.to_string());
        data.insert("version".to_string(), self.version.clone());
        data.insert("services".to_string(), render_map(&self.services));
        data.insert("endpoints".to_string(), render_map(&self.endpoints));
        if let Some(d) = &self.install_date {
            data.insert("installDate".to_string(), d.clone());
        }
        if let Some(d) = &self.upgrade_date {
            data.insert("upgradeDate".to_string(), d.clone());
        }
        data
    }

    /// Merge `update` into this record.
    ///
    /// Rejects an update that would leave `installed = true` with no version.
    pub fn merge(&mut self, update: &StateUpdate) -> Result<()> {
        let mut next = self.clone();
        if let Some(installed) = update.installed {
            next.installed = installed;
        }
        if let Some(version) = &update.version {
            next.version.clone_from(version);
        }
        next.services
            .extend(update.services.iter().map(|(k, v)| (k.clone(), v.clone())));
        next.endpoints
            .extend(update.endpoints.iter().map(|(k, v)| (k.clone(), v.clone())));
        if update.install_date.is_some() {
            next.install_date.clone_from(&update.install_date);
        }
        if update.upgrade_date.is_some() {
            next.upgrade_date.clone_from(&update.upgrade_date);
        }
        if next.installed && next.version.trim().is_empty() {
            return Err(CeresError::State(
                "refusing to mark the platform installed without a version".to_string(),
            ));
        }
        *self = next;
        Ok(())
    }
}

/// Partial update merged into the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub installed: Option<bool>,
    pub version: Option<String>,
    pub services: BTreeMap<String, String>,
    pub endpoints: BTreeMap<String, String>,
    pub install_date: Option<String>,
    pub upgrade_date: Option<String>,
}

impl StateUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn installed(mut self, installed: bool) -> Self {
        self.installed = Some(installed);
        self
    }

    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    #[must_use]
    pub fn service(mut self, name: &str, status: &str) -> Self {
        self.services.insert(name.to_string(), status.to_string());
        self
    }

    #[must_use]
    pub fn endpoint(mut self, name: &str, endpoint: &str) -> Self {
        self.endpoints.insert(name.to_string(), endpoint.to_string());
        self
    }

    #[must_use]
    pub fn install_date(mut self, timestamp: &str) -> Self {
        self.install_date = Some(timestamp.to_string());
        self
    }

    #[must_use]
    pub fn upgrade_date(mut self, timestamp: &str) -> Self {
        self.upgrade_date = Some(timestamp.to_string());
        self
    }
}

/// A record plus the concurrency token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedState {
    pub state: DeploymentState,
    pub resource_version: Option<String>,
}

/// Access to the deployment record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current record, `None` when it has never been written.
    async fn read(&self) -> Result<Option<VersionedState>>;

    /// Merge `update` into the record, creating it if absent.
    async fn write(&self, update: StateUpdate) -> Result<DeploymentState>;

    /// Status string of one service, [`SERVICE_NOT_FOUND`] when unknown.
    async fn service_status(&self, name: &str) -> Result<String> {
        Ok(self
            .read()
            .await?
            .and_then(|v| v.state.services.get(name).cloned())
            .unwrap_or_else(|| SERVICE_NOT_FOUND.to_string()))
    }

    async fn set_service_status(&self, name: &str, status: &str) -> Result<()> {
        self.write(StateUpdate::new().service(name, status))
            .await
            .map(|_| ())
    }

    async fn set_endpoint(&self, name: &str, endpoint: &str) -> Result<()> {
        self.write(StateUpdate::new().endpoint(name, endpoint))
            .await
            .map(|_| ())
    }

    /// Mark the platform installed at `version`.
    async fn mark_installed(&self, version: &str, timestamp: &str) -> Result<DeploymentState> {
        self.write(
            StateUpdate::new()
                .installed(true)
                .version(version)
                .install_date(timestamp),
        )
        .await
    }

    async fn endpoints(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .read()
            .await?
            .map(|v| v.state.endpoints)
            .unwrap_or_default())
    }
}

/// [`StateStore`] backed by a ConfigMap.
pub struct ConfigMapStateStore {
    cluster: SharedCluster,
    name: String,
    namespace: String,
}

impl ConfigMapStateStore {
    #[must_use]
    pub fn new(cluster: SharedCluster) -> Self {
        Self {
            cluster,
            name: STATE_CONFIGMAP.to_string(),
            namespace: STATE_NAMESPACE.to_string(),
        }
    }

    fn manifest(&self, state: &DeploymentState, resource_version: Option<String>) -> Result<String> {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..ObjectMeta::default()
            },
            data: Some(state.to_data()),
            ..ConfigMap::default()
        };
        Ok(serde_json::to_string(&cm)?)
    }
}

#[async_trait]
impl StateStore for ConfigMapStateStore {
    async fn read(&self) -> Result<Option<VersionedState>> {
        let query = ResourceQuery::named("configmap", &self.name).namespace(&self.namespace);
        let text = match self.cluster.get(&query, OutputFormat::Json).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => {
                debug!(configmap = %self.name, "No deployment state record");
                return Ok(None);
            }
            Err(e) => {
                return Err(CeresError::State(format!(
                    "cannot read ConfigMap {}/{}: {e}. Check cluster access (kubectl cluster-info) and retry",
                    self.namespace, self.name
                )))
            }
        };
        let cm: ConfigMap = serde_json::from_str(&text).map_err(|e| {
            CeresError::State(format!(
                "ConfigMap {}/{} is not valid: {e}",
                self.namespace, self.name
            ))
        })?;
        Ok(Some(VersionedState {
            state: DeploymentState::from_data(&cm.data.unwrap_or_default()),
            resource_version: cm.metadata.resource_version,
        }))
    }

    async fn write(&self, update: StateUpdate) -> Result<DeploymentState> {
        let current = self.read().await?;
        let (mut state, token) = match current {
            Some(v) => (v.state, v.resource_version),
            None => (DeploymentState::default(), None),
        };
        state.merge(&update)?;

        let result = if let Some(rv) = &token {
            let manifest = self.manifest(&state, Some(rv.clone()))?;
            self.cluster.replace_manifest(&manifest).await
        } else {
            let manifest = self.manifest(&state, None)?;
            self.cluster.create_manifest(&manifest).await
        };

        match result {
            Ok(_) => {
                info!(configmap = %self.name, installed = state.installed, version = %state.version, "Deployment state written");
                Ok(state)
            }
            Err(e) if e.is_conflict() => Err(CeresError::StateConflict {
                resource_version: token.unwrap_or_else(|| "<absent>".to_string()),
            }),
            Err(e) => Err(e),
        }
    }
}

/// In-process [`StateStore`].
#[derive(Default)]
pub struct MemoryStateStore {
    record: Mutex<Option<(DeploymentState, u64)>>,
    unreachable: bool,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: DeploymentState) -> Self {
        Self {
            record: Mutex::new(Some((state, 1))),
            unreachable: false,
        }
    }

    /// A store whose reads always fail.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            record: Mutex::new(None),
            unreachable: true,
        }
    }

    /// Current record without the token.
    #[must_use]
    pub fn snapshot(&self) -> Option<DeploymentState> {
        self.record
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|(s, _)| s.clone()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<(DeploymentState, u64)>>> {
        self.record
            .lock()
            .map_err(|_| CeresError::State("state lock poisoned".to_string()))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self) -> Result<Option<VersionedState>> {
        if self.unreachable {
            return Err(CeresError::State("state store unreachable".to_string()));
        }
        Ok(self.lock()?.as_ref().map(|(state, version)| VersionedState {
            state: state.clone(),
            resource_version: Some(version.to_string()),
        }))
    }

    async fn write(&self, update: StateUpdate) -> Result<DeploymentState> {
        if self.unreachable {
            return Err(CeresError::State("state store unreachable".to_string()));
        }
        let mut guard = self.lock()?;
        let (mut state, version) = (*guard).clone().unwrap_or_default();
        state.merge(&update)?;
        *guard = Some((state.clone(), version + 1));
        Ok(state)
    }
}

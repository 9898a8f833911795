//! Subcommand handlers.

pub mod backup;
pub mod config;
pub mod deploy;
pub mod mail;
pub mod onboarding;
pub mod ops;
pub mod sso;
pub mod status;
pub mod upgrade;
pub mod validate;
pub mod vpn;

use std::sync::Arc;

use ceres_cli::cluster::{Kubectl, SharedCluster};
use ceres_cli::config::ManifestResolver;
use ceres_cli::helm::{Helm, PackageManager};
use ceres_cli::orchestrator::{DeployOptions, Orchestrator};
use ceres_cli::process::SystemRunner;
use ceres_cli::state::{ConfigMapStateStore, StateStore};

/// Adapters every handler builds on, wired to the real binaries.
pub struct Platform {
    pub cluster: SharedCluster,
    pub resolver: ManifestResolver,
}

impl Platform {
    pub fn from_env() -> Self {
        let resolver = ManifestResolver::from_env();
        let runner = match resolver.primary_root().filter(|root| root.is_dir()) {
            Some(root) => SystemRunner::with_workdir(root),
            None => SystemRunner::new(),
        };
        Self {
            cluster: Arc::new(Kubectl::new(runner)),
            resolver,
        }
    }

    pub fn helm(&self) -> Arc<dyn PackageManager> {
        Arc::new(Helm::new(SystemRunner::new()))
    }

    pub fn state(&self) -> Arc<dyn StateStore> {
        Arc::new(ConfigMapStateStore::new(self.cluster.clone()))
    }

    pub fn orchestrator(&self, options: DeployOptions) -> Orchestrator {
        Orchestrator::new(
            self.cluster.clone(),
            self.state(),
            self.resolver.clone(),
            options,
        )
    }
}

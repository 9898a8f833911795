//! Deployment orchestrator.
//!
//! Every `deploy` starts by reading the deployment record and classifying the
//! platform as uninstalled, installed at this build's version, or installed at
//! an older one. That picks exactly one transition:
//!
//! - **fresh install**: namespaces, then the plan in order, waiting on the
//!   core data services; required steps abort the run.
//! - **reconcile**: re-apply the whole plan; every failure is a warning.
//! - **upgrade**: reconcile, then record the new version.
//!
//! An unreadable record aborts instead of guessing.

pub mod access;
pub mod databases;
pub mod diagnostics;
pub mod features;
pub mod plan;
pub mod readiness;
pub mod remediation;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::{ResourceQuery, SharedCluster};
use crate::config::{validate_cloud, ManifestResolver, CERES_VERSION};
use crate::error::{CeresError, Result};
use crate::state::{DeploymentState, StateStore, StateUpdate};
use crate::ui;

use self::databases::DatabaseJob;
use self::plan::{ManifestStep, PlanEntry, ALL_SERVICES_MANIFEST, DATABASES_MANIFEST};
use self::remediation::{classify, parse_failing_pods, FailingPod, Remediation};

/// Where the platform stands relative to this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformState {
    Uninstalled,
    InstalledCurrent,
    InstalledStale { version: String },
}

impl PlatformState {
    /// An absent record, or one with `installed = false`, is uninstalled.
    #[must_use]
    pub fn classify(record: Option<&DeploymentState>, current: &str) -> Self {
        match record {
            Some(state) if state.installed && state.version == current => Self::InstalledCurrent,
            Some(state) if state.installed => Self::InstalledStale {
                version: state.version.clone(),
            },
            _ => Self::Uninstalled,
        }
    }

    #[must_use]
    pub fn transition(&self) -> Transition {
        match self {
            Self::Uninstalled => Transition::FreshInstall,
            Self::InstalledCurrent => Transition::Reconcile,
            Self::InstalledStale { version } => Transition::Upgrade {
                from: version.clone(),
            },
        }
    }
}

/// The path a `deploy` takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    FreshInstall,
    Reconcile,
    Upgrade { from: String },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreshInstall => f.write_str("fresh install"),
            Self::Reconcile => f.write_str("reconcile"),
            Self::Upgrade { from } => write!(f, "upgrade from {from} to {CERES_VERSION}"),
        }
    }
}

/// Options from `ceres deploy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub cloud: String,
    pub environment: String,
    pub namespace: String,
    pub dry_run: bool,
    /// Host printed for NodePort access.
    pub external_host: String,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            cloud: "k3s".to_string(),
            environment: "prod".to_string(),
            namespace: "ceres".to_string(),
            dry_run: false,
            external_host: "192.168.1.3".to_string(),
        }
    }
}

/// Pauses used by `fix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Wait after remediation before listing what is still failing.
    pub fix_settle: Duration,
    /// Wait between deleting a pod with a stale socket and re-applying services.
    pub socket_pause: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            fix_settle: Duration::from_secs(30),
            socket_pause: Duration::from_secs(5),
        }
    }
}

/// What a `deploy` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub transition: Transition,
    /// Manifests applied successfully, in order.
    pub applied: Vec<String>,
    pub warnings: Vec<String>,
}

/// What a `fix` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixReport {
    pub remediated: Vec<(FailingPod, Remediation)>,
    pub remaining: Vec<FailingPod>,
}

#[derive(Default)]
struct RunLog {
    applied: Vec<String>,
    warnings: Vec<String>,
    services: BTreeMap<String, String>,
}

impl RunLog {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        ui::print_warning(&message);
        self.warnings.push(message);
    }
}

const FAILING_PODS_SELECTOR: &str = "status.phase!=Running,status.phase!=Succeeded";
const FAILING_PODS_JSONPATH: &str =
    r#"{range .items[*]}{.metadata.namespace}{"/"}{.metadata.name}{"\n"}{end}"#;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Drives the cluster through install, reconcile and upgrade.
pub struct Orchestrator {
    cluster: SharedCluster,
    state: Arc<dyn StateStore>,
    resolver: ManifestResolver,
    options: DeployOptions,
    timings: Timings,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        cluster: SharedCluster,
        state: Arc<dyn StateStore>,
        resolver: ManifestResolver,
        options: DeployOptions,
    ) -> Self {
        Self {
            cluster,
            state,
            resolver,
            options,
            timings: Timings::default(),
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Classify the platform and run the matching transition.
    pub async fn deploy(&self) -> Result<DeployOutcome> {
        validate_cloud(&self.options.cloud)?;

        let record = self.state.read().await.map_err(|e| {
            warn!(error = %e, "Cannot determine deployment state");
            e
        })?;
        let platform = PlatformState::classify(record.as_ref().map(|v| &v.state), CERES_VERSION);
        let transition = platform.transition();
        info!(
            transition = %transition,
            namespace = %self.options.namespace,
            cloud = %self.options.cloud,
            environment = %self.options.environment,
            "Deploying"
        );

        if self.options.dry_run {
            self.print_plan(&transition);
            return Ok(DeployOutcome {
                transition,
                applied: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let mut run = RunLog::default();
        match &transition {
            Transition::FreshInstall => self.fresh_install(&mut run).await?,
            Transition::Reconcile => {
                ui::print_section("Reconciling platform");
                self.reconcile(&mut run).await?;
            }
            Transition::Upgrade { from } => {
                ui::print_section(&format!("Upgrading platform {from} → {CERES_VERSION}"));
                self.reconcile(&mut run).await?;
                self.state
                    .write(
                        StateUpdate::new()
                            .version(CERES_VERSION)
                            .upgrade_date(&now()),
                    )
                    .await?;
                info!(from = %from, to = CERES_VERSION, "Platform upgraded");
            }
        }

        info!(%transition, warnings = run.warnings.len(), "Deployment finished");

        Ok(DeployOutcome {
            transition,
            applied: run.applied,
            warnings: run.warnings,
        })
    }

    fn print_plan(&self, transition: &Transition) {
        ui::print_section("Deployment plan (dry run)");
        ui::print_kv("Transition", &transition.to_string());
        ui::print_kv("Cloud", &self.options.cloud);
        ui::print_kv("Environment", &self.options.environment);
        ui::print_kv("Namespaces", &plan::infrastructure_namespaces(&self.options.namespace).join(", "));
        println!();
        for entry in plan::install_plan(&self.options.namespace) {
            ui::print_list_item(&entry.label());
        }
        println!();
        ui::print_info("No changes were made");
    }

    async fn fresh_install(&self, run: &mut RunLog) -> Result<()> {
        ui::print_section("Installing platform");
        let namespace = &self.options.namespace;

        for ns in plan::infrastructure_namespaces(namespace) {
            self.cluster
                .create_namespace(&ns)
                .await
                .map_err(|e| e.in_step(format!("create namespace {ns}")))?;
        }
        self.state
            .write(StateUpdate::new().installed(false))
            .await?;

        let entries = plan::install_plan(namespace);
        let total = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            ui::print_progress_step(index + 1, total, &entry.label());
            match entry {
                PlanEntry::Manifest(step) => self.install_step(step, run).await?,
                PlanEntry::Databases => {
                    let lines = DatabaseJob::new(&plan::core_namespace(namespace))
                        .run(self.cluster.as_ref(), &self.resolver.resolve(DATABASES_MANIFEST))
                        .await
                        .map_err(|e| e.in_step("database creation"))?;
                    for line in &lines {
                        ui::print_list_item(line);
                    }
                    run.applied.push(DATABASES_MANIFEST.to_string());
                }
            }
        }

        let endpoints = access::gather_endpoints(self.cluster.as_ref(), namespace).await;
        let mut update = StateUpdate::new();
        update.services.clone_from(&run.services);
        for ep in &endpoints {
            update = update.endpoint(ep.name, &ep.address());
        }
        self.state.write(update).await?;
        self.state.mark_installed(CERES_VERSION, &now()).await?;

        access::print_access_info(&endpoints, &self.options.external_host);
        Ok(())
    }

    async fn install_step(&self, step: &ManifestStep, run: &mut RunLog) -> Result<()> {
        let path = self.resolver.resolve(step.manifest);
        if let Err(e) = self.cluster.apply_file(&path).await {
            if step.required {
                return Err(e.in_step(format!("apply {}", step.manifest)));
            }
            run.warn(format!("{} not applied: {e}", step.manifest));
            run.services.insert(step.name.to_string(), "degraded".to_string());
            return Ok(());
        }
        run.applied.push(step.manifest.to_string());

        let mut status = "deployed";
        if let Some(wait) = &step.readiness {
            let bar = ui::spinner(&format!("Waiting for {}", wait.check.describe()));
            let outcome = wait.run(self.cluster.as_ref()).await;
            bar.finish_and_clear();
            if outcome.is_ready() {
                ui::print_success(&format!("{} ready", step.name));
            } else if step.readiness_required {
                return Err(CeresError::Timeout {
                    what: wait.check.describe(),
                    waited_secs: wait.timeout.as_secs(),
                }
                .in_step(step.name));
            } else {
                run.warn(format!(
                    "{} not ready after {}s, continuing",
                    wait.check.describe(),
                    wait.timeout.as_secs()
                ));
                status = "degraded";
            }
        }
        run.services.insert(step.name.to_string(), status.to_string());
        Ok(())
    }

    /// Re-apply the plan; individual failures are warnings.
    async fn reconcile(&self, run: &mut RunLog) -> Result<()> {
        let namespace = &self.options.namespace;
        for ns in plan::infrastructure_namespaces(namespace) {
            if let Err(e) = self.cluster.create_namespace(&ns).await {
                run.warn(format!("namespace {ns}: {e}"));
            }
        }

        let entries = plan::install_plan(namespace);
        let total = entries.len();
        for (index, entry) in entries.iter().enumerate() {
            ui::print_progress_step(index + 1, total, &entry.label());
            match entry {
                PlanEntry::Manifest(step) => {
                    let path = self.resolver.resolve(step.manifest);
                    let status = match self.cluster.apply_file(&path).await {
                        Ok(_) => {
                            run.applied.push(step.manifest.to_string());
                            "deployed"
                        }
                        Err(e) => {
                            run.warn(format!("{} not applied: {e}", step.manifest));
                            "degraded"
                        }
                    };
                    run.services.insert(step.name.to_string(), status.to_string());
                }
                PlanEntry::Databases => {
                    match DatabaseJob::new(&plan::core_namespace(namespace))
                        .run(self.cluster.as_ref(), &self.resolver.resolve(DATABASES_MANIFEST))
                        .await
                    {
                        Ok(lines) => {
                            for line in &lines {
                                ui::print_list_item(line);
                            }
                            run.applied.push(DATABASES_MANIFEST.to_string());
                        }
                        Err(e) => run.warn(format!("database creation: {e}")),
                    }
                }
            }
        }

        let mut update = StateUpdate::new();
        update.services.clone_from(&run.services);
        self.state.write(update).await?;
        Ok(())
    }

    /// Pods listing plus the state record summary.
    pub async fn status(&self, namespace: Option<&str>) -> Result<()> {
        ui::print_section("Platform Status");
        match self.state.read().await {
            Ok(Some(record)) => {
                let state = record.state;
                ui::print_kv("Installed", &state.installed.to_string());
                ui::print_kv("Version", if state.version.is_empty() { "-" } else { state.version.as_str() });
                if let Some(date) = &state.install_date {
                    ui::print_kv("Installed at", date);
                }
                if let Some(date) = &state.upgrade_date {
                    ui::print_kv("Upgraded at", date);
                }
                for (name, status) in &state.services {
                    ui::print_list_item(&format!("{name}: {status}"));
                }
            }
            Ok(None) => ui::print_info("Platform is not installed"),
            Err(e) => ui::print_warning(&format!("Deployment state unavailable: {e}")),
        }

        ui::print_step("Pods");
        let query = match namespace {
            Some(ns) => ResourceQuery::new("pods").namespace(ns),
            None => ResourceQuery::new("pods").all_namespaces(),
        };
        let pods = self
            .cluster
            .get(&query, crate::cluster::OutputFormat::Wide)
            .await?;
        ui::print_block(&pods);
        Ok(())
    }

    pub async fn health(&self) -> Result<diagnostics::HealthReport> {
        diagnostics::health(self.cluster.as_ref()).await
    }

    pub async fn diagnose(&self) -> Result<diagnostics::PodTally> {
        diagnostics::diagnose(self.cluster.as_ref()).await
    }

    async fn failing_pods(&self) -> Result<Vec<FailingPod>> {
        let listing = self
            .cluster
            .get_jsonpath(
                &ResourceQuery::new("pods")
                    .all_namespaces()
                    .field_selector(FAILING_PODS_SELECTOR),
                FAILING_PODS_JSONPATH,
            )
            .await?;
        Ok(parse_failing_pods(&listing))
    }

    /// Remediate failing pods, optionally only those whose name contains
    /// `service`.
    pub async fn fix(&self, service: Option<&str>) -> Result<FixReport> {
        ui::print_section("Fixing failing pods");
        let matches = |pod: &FailingPod| service.is_none_or(|s| pod.name.contains(s));
        let failing: Vec<FailingPod> = self
            .failing_pods()
            .await?
            .into_iter()
            .filter(|p| matches(p))
            .collect();

        let mut report = FixReport::default();
        if failing.is_empty() {
            ui::print_success("No failing pods");
            return Ok(report);
        }

        for pod in failing {
            let logs = self
                .cluster
                .logs(&pod.namespace, &pod.name, None, Some(20))
                .await
                .unwrap_or_else(|e| {
                    warn!(pod = %pod, error = %e, "Cannot read pod logs");
                    String::new()
                });
            let action = classify(&logs);
            ui::print_step(&format!("{pod}: {action}"));
            info!(pod = %pod, action = %action, "Remediating");

            if let Err(e) = self.cluster.delete("pod", &pod.name, &pod.namespace).await {
                ui::print_warning(&format!("Cannot delete {pod}: {e}"));
                continue;
            }
            if action == Remediation::SocketFix {
                tokio::time::sleep(self.timings.socket_pause).await;
                let path = self.resolver.resolve(ALL_SERVICES_MANIFEST);
                if let Err(e) = self.cluster.apply_file(&path).await {
                    ui::print_warning(&format!("Cannot re-apply services: {e}"));
                }
            }
            report.remediated.push((pod, action));
        }

        ui::print_info(&format!(
            "Waiting {}s for pods to settle",
            self.timings.fix_settle.as_secs()
        ));
        tokio::time::sleep(self.timings.fix_settle).await;

        report.remaining = self
            .failing_pods()
            .await?
            .into_iter()
            .filter(|p| matches(p))
            .collect();
        if report.remaining.is_empty() {
            ui::print_success("All pods recovered");
        } else {
            ui::print_warning("Still failing:");
            for pod in &report.remaining {
                ui::print_list_item(&pod.to_string());
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::FakeCluster;
    use crate::state::MemoryStateStore;

    const POSTGRES_READY: &str =
        "statefulset postgresql -n ceres-core -o jsonpath={.status.readyReplicas}";
    const REDIS_READY: &str = "deployment redis -n ceres-core -o jsonpath={.status.readyReplicas}";
    const JOB_DONE: &str = "job create-databases -n ceres-core -o jsonpath={.status.succeeded}";
    const KEYCLOAK_PODS: &str = "pods -n ceres -l app=keycloak -o jsonpath={.items[*].status.phase}";
    const MAILCOW_PODS: &str =
        "pods -n mailcow -l app=mailcow -o jsonpath={.items[*].status.phase}";

    fn healthy_cluster() -> Arc<FakeCluster> {
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .on_get(POSTGRES_READY, vec!["", "1"])
            .on_get(REDIS_READY, vec!["1"])
            .on_get(JOB_DONE, vec!["1"])
            .on_get(KEYCLOAK_PODS, vec!["Running"])
            .on_get(MAILCOW_PODS, vec!["Pending Running"]);
        cluster
    }

    fn orchestrator(cluster: &Arc<FakeCluster>, store: &Arc<MemoryStateStore>) -> Orchestrator {
        Orchestrator::new(
            cluster.clone(),
            store.clone(),
            ManifestResolver::new(Vec::new()),
            DeployOptions::default(),
        )
    }

    fn installed(version: &str) -> DeploymentState {
        DeploymentState {
            installed: true,
            version: version.to_string(),
            install_date: Some("2025-01-01T00:00:00+00:00".to_string()),
            ..DeploymentState::default()
        }
    }

    fn all_manifests() -> Vec<String> {
        plan::install_plan("ceres")
            .into_iter()
            .map(|e| match e {
                PlanEntry::Manifest(s) => s.manifest.to_string(),
                PlanEntry::Databases => DATABASES_MANIFEST.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_classify_pre_states() {
        assert_eq!(
            PlatformState::classify(None, "3.1.0").transition(),
            Transition::FreshInstall
        );
        let not_installed = DeploymentState {
            version: "3.1.0".into(),
            ..DeploymentState::default()
        };
        assert_eq!(
            PlatformState::classify(Some(&not_installed), "3.1.0"),
            PlatformState::Uninstalled
        );
        assert_eq!(
            PlatformState::classify(Some(&installed("3.1.0")), "3.1.0").transition(),
            Transition::Reconcile
        );
        assert_eq!(
            PlatformState::classify(Some(&installed("3.0.0")), "3.1.0").transition(),
            Transition::Upgrade {
                from: "3.0.0".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_install_from_absent_state() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::new());

        let outcome = orchestrator(&cluster, &store).deploy().await.unwrap();

        assert_eq!(outcome.transition, Transition::FreshInstall);
        assert_eq!(outcome.applied, all_manifests());
        assert!(outcome.warnings.is_empty());
        assert_eq!(cluster.count_calls("create namespace"), 3);
        assert_eq!(cluster.count_calls(&format!("get {POSTGRES_READY}")), 2);

        let state = store.snapshot().unwrap();
        assert!(state.installed);
        assert_eq!(state.version, CERES_VERSION);
        assert!(state.install_date.is_some());
        assert!(state.upgrade_date.is_none());
        assert_eq!(state.services["postgresql"], "deployed");
        assert_eq!(state.services["mailcow"], "deployed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_state_reconciles_without_waiting() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::with_state(installed(CERES_VERSION)));

        let outcome = orchestrator(&cluster, &store).deploy().await.unwrap();

        assert_eq!(outcome.transition, Transition::Reconcile);
        assert_eq!(outcome.applied, all_manifests());
        assert_eq!(cluster.count_calls("get statefulset"), 0);
        assert_eq!(cluster.count_calls("get pods"), 0);

        let state = store.snapshot().unwrap();
        assert_eq!(state.install_date.as_deref(), Some("2025-01-01T00:00:00+00:00"));
        assert!(state.upgrade_date.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_state_upgrades() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::with_state(installed("3.0.0")));

        let outcome = orchestrator(&cluster, &store).deploy().await.unwrap();

        assert_eq!(
            outcome.transition,
            Transition::Upgrade {
                from: "3.0.0".into()
            }
        );
        assert_eq!(outcome.applied, all_manifests());
        let state = store.snapshot().unwrap();
        assert_eq!(state.version, CERES_VERSION);
        assert!(state.upgrade_date.is_some());
        assert!(state.installed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_is_idempotent() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::with_state(installed(CERES_VERSION)));
        let orch = orchestrator(&cluster, &store);

        let first = orch.deploy().await.unwrap();
        let after_first = store.snapshot();
        cluster.reset_calls();
        let second = orch.deploy().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.snapshot(), after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_state_fails_closed() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::unreachable());

        let err = orchestrator(&cluster, &store).deploy().await.unwrap_err();

        assert!(matches!(err, CeresError::State(_)));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_required_apply_failure_aborts_fresh_install() {
        let cluster = healthy_cluster();
        cluster.fail_apply("postgresql-fixed.yaml");
        let store = Arc::new(MemoryStateStore::new());

        let err = orchestrator(&cluster, &store).deploy().await.unwrap_err();

        assert!(matches!(err, CeresError::Step { .. }));
        assert!(err.to_string().contains("postgresql-fixed.yaml"));
        assert!(!cluster.applied().iter().any(|p| p.ends_with("redis.yaml")));
        assert!(!store.snapshot().unwrap().installed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_core_readiness_timeout_aborts_fresh_install() {
        let cluster = healthy_cluster();
        cluster.on_get(REDIS_READY, vec!["0"]);
        let store = Arc::new(MemoryStateStore::new());

        let err = orchestrator(&cluster, &store).deploy().await.unwrap_err();

        assert!(err.to_string().contains("redis"));
        assert_eq!(cluster.count_calls(&format!("get {REDIS_READY}")), 60);
        assert_eq!(cluster.count_calls("apply deployment/create-databases.yaml"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_required_readiness_timeout_continues() {
        let cluster = healthy_cluster();
        cluster.on_get(KEYCLOAK_PODS, vec!["Pending"]);
        let store = Arc::new(MemoryStateStore::new());

        let outcome = orchestrator(&cluster, &store).deploy().await.unwrap();

        assert_eq!(cluster.count_calls(&format!("get {KEYCLOAK_PODS}")), 36);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.applied, all_manifests());
        let state = store.snapshot().unwrap();
        assert!(state.installed);
        assert_eq!(state.services["keycloak"], "degraded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_continues_past_failed_apply() {
        let cluster = healthy_cluster();
        cluster.fail_apply("keycloak.yaml");
        let store = Arc::new(MemoryStateStore::with_state(installed(CERES_VERSION)));

        let outcome = orchestrator(&cluster, &store).deploy().await.unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome
            .applied
            .contains(&plan::INGRESS_MANIFEST.to_string()));
        assert_eq!(store.snapshot().unwrap().services["keycloak"], "degraded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_makes_no_mutations() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::new());
        let orch = Orchestrator::new(
            cluster.clone(),
            store.clone(),
            ManifestResolver::new(Vec::new()),
            DeployOptions {
                dry_run: true,
                ..DeployOptions::default()
            },
        );

        let outcome = orch.deploy().await.unwrap();

        assert_eq!(outcome.transition, Transition::FreshInstall);
        assert!(outcome.applied.is_empty());
        assert!(cluster.calls().is_empty());
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_invalid_cloud_is_rejected() {
        let cluster = healthy_cluster();
        let store = Arc::new(MemoryStateStore::new());
        let orch = Orchestrator::new(
            cluster.clone(),
            store,
            ManifestResolver::new(Vec::new()),
            DeployOptions {
                cloud: "openstack".into(),
                ..DeployOptions::default()
            },
        );
        assert!(matches!(
            orch.deploy().await.unwrap_err(),
            CeresError::Validation(_)
        ));
    }

    fn failing_key() -> String {
        format!(
            "pods --all-namespaces --field-selector={FAILING_PODS_SELECTOR} -o jsonpath={FAILING_PODS_JSONPATH}"
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_applies_matching_remediation() {
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .on_get(
                &failing_key(),
                vec!["ceres/gitlab-1\nmailcow/php-fpm-0\nceres/wiki-2", "ceres/wiki-2"],
            )
            .on_logs("ceres/gitlab-1", "mkdir /var/opt: Permission denied")
            .on_logs("mailcow/php-fpm-0", "failed to bind unix domain socket")
            .on_logs("ceres/wiki-2", "segfault");
        let store = Arc::new(MemoryStateStore::new());

        let report = orchestrator(&cluster, &store).fix(None).await.unwrap();

        let actions: Vec<Remediation> = report.remediated.iter().map(|(_, a)| *a).collect();
        assert_eq!(
            actions,
            vec![
                Remediation::PermissionFix,
                Remediation::SocketFix,
                Remediation::Restart
            ]
        );
        assert_eq!(cluster.count_calls("delete pod"), 3);
        assert_eq!(
            cluster.count_calls(&format!("apply {ALL_SERVICES_MANIFEST}")),
            1
        );
        assert_eq!(report.remaining.len(), 1);
        assert_eq!(report.remaining[0].name, "wiki-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_filters_by_service() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.on_get(&failing_key(), vec!["ceres/gitlab-1\nceres/keycloak-0", ""]);
        let store = Arc::new(MemoryStateStore::new());

        let report = orchestrator(&cluster, &store)
            .fix(Some("keycloak"))
            .await
            .unwrap();

        assert_eq!(report.remediated.len(), 1);
        assert_eq!(report.remediated[0].0.name, "keycloak-0");
        assert_eq!(cluster.count_calls("delete pod gitlab-1"), 0);
    }
}

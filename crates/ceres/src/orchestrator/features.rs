//! Platform feature upgrade (`ceres upgrade`).
//!
//! Separate from the version upgrade that `deploy` performs: this adds
//! certificates, backups, log shipping and mail to an existing install and
//! clears out namespaces of services the platform no longer ships.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::plan::{core_namespace, KEYCLOAK_MANIFEST, MAILCOW_MANIFEST, MAIL_NAMESPACE, PROMTAIL_MANIFEST};
use super::readiness::{ReadinessCheck, ReadinessWait};
use crate::cluster::SharedCluster;
use crate::config::ManifestResolver;
use crate::error::Result;
use crate::helm::PackageManager;
use crate::ui;

/// Namespaces of services superseded by the current stack.
pub const DUPLICATE_NAMESPACES: &[&str] = &["elasticsearch", "kibana", "harbor", "jenkins", "uptime-kuma"];

pub const CERT_MANAGER_MANIFEST: &str = "deployment/cert-manager.yaml";
pub const VELERO_MANIFEST: &str = "deployment/velero.yaml";
pub const CERT_MANAGER_VERSION: &str = "v1.13.0";
pub const VELERO_NAMESPACE: &str = "velero";

/// Helm values for Velero backed by the in-cluster MinIO.
#[must_use]
pub fn velero_values() -> Vec<(String, String)> {
    [
        ("initContainers[0].name", "velero-plugin-for-aws"),
        ("initContainers[0].image", "velero/velero-plugin-for-aws:v1.8.0"),
        ("initContainers[0].volumeMounts[0].mountPath", "/target"),
        ("initContainers[0].volumeMounts[0].name", "plugins"),
        ("configuration.provider", "aws"),
        ("configuration.backupStorageLocation.name", "default"),
        ("configuration.backupStorageLocation.bucket", "ceres-backups"),
        ("configuration.backupStorageLocation.config.region", "minio"),
        ("configuration.backupStorageLocation.config.s3ForcePathStyle", "true"),
        (
            "configuration.backupStorageLocation.config.s3Url",
            "http://minio.minio.svc.cluster.local:9000",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// One step of the feature upgrade, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStep {
    RemoveDuplicates,
    Keycloak,
    CertManager,
    Velero,
    Promtail,
    Mailcow,
}

impl FeatureStep {
    pub const ALL: [Self; 6] = [
        Self::RemoveDuplicates,
        Self::Keycloak,
        Self::CertManager,
        Self::Velero,
        Self::Promtail,
        Self::Mailcow,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RemoveDuplicates => "remove duplicates",
            Self::Keycloak => "keycloak",
            Self::CertManager => "cert-manager",
            Self::Velero => "velero",
            Self::Promtail => "promtail",
            Self::Mailcow => "mailcow",
        }
    }
}

/// Steps that finished and the warnings from the ones that did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureReport {
    pub completed: Vec<&'static str>,
    pub warnings: Vec<String>,
}

pub struct FeatureUpgrade {
    cluster: SharedCluster,
    helm: Arc<dyn PackageManager>,
    resolver: ManifestResolver,
    namespace: String,
    /// Pause between the cert-manager chart and its issuers.
    issuer_pause: Duration,
}

impl FeatureUpgrade {
    #[must_use]
    pub fn new(
        cluster: SharedCluster,
        helm: Arc<dyn PackageManager>,
        resolver: ManifestResolver,
        namespace: &str,
    ) -> Self {
        Self {
            cluster,
            helm,
            resolver,
            namespace: namespace.to_string(),
            issuer_pause: Duration::from_secs(10),
        }
    }

    /// Run every step; failures are collected, never returned.
    pub async fn run(&self) -> FeatureReport {
        ui::print_section("Platform upgrade");
        let mut report = FeatureReport::default();
        let total = FeatureStep::ALL.len();

        for (index, step) in FeatureStep::ALL.into_iter().enumerate() {
            let name = step.name();
            ui::print_progress_step(index + 1, total, name);
            let result = match step {
                FeatureStep::RemoveDuplicates => self.remove_duplicates().await,
                FeatureStep::Keycloak => self.redeploy_keycloak().await,
                FeatureStep::CertManager => self.install_cert_manager().await,
                FeatureStep::Velero => self.install_velero().await,
                FeatureStep::Promtail => self.apply(PROMTAIL_MANIFEST).await,
                FeatureStep::Mailcow => self.install_mailcow().await,
            };
            match result {
                Ok(()) => {
                    ui::print_success(&format!("{name} done"));
                    report.completed.push(name);
                }
                Err(e) => {
                    warn!(step = name, error = %e, "Upgrade step failed");
                    ui::print_warning(&format!("{name}: {e}"));
                    report.warnings.push(format!("{name}: {e}"));
                }
            }
        }
        report
    }

    async fn apply(&self, manifest: &str) -> Result<()> {
        self.cluster
            .apply_file(&self.resolver.resolve(manifest))
            .await
            .map(|_| ())
    }

    async fn wait_for_pods(&self, namespace: &str, selector: &str, timeout: Duration) {
        let wait = ReadinessWait {
            check: ReadinessCheck::Pods {
                namespace: namespace.to_string(),
                selector: selector.to_string(),
            },
            timeout,
            interval: Duration::from_secs(5),
        };
        let bar = ui::spinner(&format!("Waiting for {}", wait.check.describe()));
        let outcome = wait.run(self.cluster.as_ref()).await;
        bar.finish_and_clear();
        if !outcome.is_ready() {
            ui::print_warning(&format!(
                "{} not running after {}s",
                wait.check.describe(),
                timeout.as_secs()
            ));
        }
    }

    pub async fn remove_duplicates(&self) -> Result<()> {
        for ns in DUPLICATE_NAMESPACES {
            match self.cluster.delete_namespace(ns).await {
                Ok(()) => ui::print_list_item(&format!("removed namespace {ns}")),
                Err(e) => ui::print_warning(&format!("cannot remove namespace {ns}: {e}")),
            }
        }
        Ok(())
    }

    /// Delete and re-apply the Keycloak deployment.
    pub async fn redeploy_keycloak(&self) -> Result<()> {
        self.cluster
            .delete("deployment", "keycloak", &self.namespace)
            .await?;
        self.apply(KEYCLOAK_MANIFEST).await?;
        self.wait_for_pods(&self.namespace, "app=keycloak", Duration::from_secs(300))
            .await;
        Ok(())
    }

    pub async fn install_cert_manager(&self) -> Result<()> {
        self.helm
            .add_repo("jetstack", "https://charts.jetstack.io")
            .await?;
        self.helm.update_repos().await?;
        self.helm
            .install(
                "cert-manager",
                "jetstack/cert-manager",
                "cert-manager",
                Some(CERT_MANAGER_VERSION.to_string()),
                vec![("installCRDs".to_string(), "true".to_string())],
            )
            .await?;
        tokio::time::sleep(self.issuer_pause).await;
        self.apply(CERT_MANAGER_MANIFEST).await?;
        info!("cert-manager installed with selfsigned and letsencrypt-prod issuers");
        Ok(())
    }

    /// Helm chart first, plain manifest when the chart cannot be installed.
    pub async fn install_velero(&self) -> Result<()> {
        let chart = async {
            self.helm
                .add_repo("vmware-tanzu", "https://vmware-tanzu.github.io/helm-charts")
                .await?;
            self.helm.update_repos().await?;
            self.helm
                .install(
                    "velero",
                    "vmware-tanzu/velero",
                    VELERO_NAMESPACE,
                    None,
                    velero_values(),
                )
                .await
        };
        if let Err(e) = chart.await {
            ui::print_warning(&format!("Velero chart failed ({e}), applying {VELERO_MANIFEST}"));
            self.apply(VELERO_MANIFEST)
                .await
                .map_err(|fallback| fallback.in_step(format!("velero chart failed ({e}), then manifest")))?;
        }
        self.wait_for_pods(
            VELERO_NAMESPACE,
            "app.kubernetes.io/name=velero",
            Duration::from_secs(180),
        )
        .await;
        Ok(())
    }

    pub async fn install_mailcow(&self) -> Result<()> {
        self.apply(MAILCOW_MANIFEST).await?;
        self.wait_for_pods(MAIL_NAMESPACE, "app=mailcow", Duration::from_secs(180))
            .await;
        ui::print_kv("SMTP", &format!("mailcow-smtp.{MAIL_NAMESPACE}.svc:587"));
        ui::print_kv("Databases", &core_namespace(&self.namespace));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cluster::testing::FakeCluster;
    use crate::error::CeresError;
    use crate::helm::MockPackageManager;

    fn recording_helm(fail_velero: bool) -> (MockPackageManager, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut helm = MockPackageManager::new();

        let l = log.clone();
        helm.expect_add_repo().returning(move |name: &str, _url: &str| {
            l.lock().unwrap().push(format!("repo {name}"));
            Ok(())
        });
        helm.expect_update_repos().returning(|| Ok(()));
        let l = log.clone();
        helm.expect_install().returning(
            move |release: &str,
                  _chart: &str,
                  _ns: &str,
                  version: Option<String>,
                  values: Vec<(String, String)>| {
                l.lock().unwrap().push(format!(
                    "install {release} {} {}",
                    version.unwrap_or_default(),
                    values.len()
                ));
                if fail_velero && release == "velero" {
                    return Err(CeresError::CommandFailed {
                        program: "helm install".into(),
                        status: "exit status 1".into(),
                        output: "chart not found".into(),
                    });
                }
                Ok(())
            },
        );
        (helm, log)
    }

    fn running_cluster() -> Arc<FakeCluster> {
        let cluster = Arc::new(FakeCluster::new());
        for (ns, sel) in [
            ("ceres", "app=keycloak"),
            ("velero", "app.kubernetes.io/name=velero"),
            ("mailcow", "app=mailcow"),
        ] {
            cluster.on_get(
                &format!("pods -n {ns} -l {sel} -o jsonpath={{.items[*].status.phase}}"),
                vec!["Running"],
            );
        }
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_steps_complete() {
        let cluster = running_cluster();
        let (helm, log) = recording_helm(false);
        let upgrade = FeatureUpgrade::new(
            cluster.clone(),
            Arc::new(helm),
            ManifestResolver::new(Vec::new()),
            "ceres",
        );

        let report = upgrade.run().await;

        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(
            report.completed,
            vec!["remove duplicates", "keycloak", "cert-manager", "velero", "promtail", "mailcow"]
        );
        assert_eq!(cluster.count_calls(&format!("apply {PROMTAIL_MANIFEST}")), 1);
        assert_eq!(cluster.count_calls(&format!("apply {MAILCOW_MANIFEST}")), 1);
        assert_eq!(cluster.count_calls("delete namespace"), DUPLICATE_NAMESPACES.len());
        assert_eq!(cluster.count_calls("delete deployment keycloak -n ceres"), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "repo jetstack",
                "install cert-manager v1.13.0 1",
                "repo vmware-tanzu",
                "install velero  10",
            ]
        );
        assert_eq!(cluster.count_calls(&format!("apply {VELERO_MANIFEST}")), 0);
        assert_eq!(cluster.count_calls(&format!("apply {CERT_MANAGER_MANIFEST}")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_velero_falls_back_to_manifest() {
        let cluster = running_cluster();
        let (helm, _log) = recording_helm(true);
        let upgrade = FeatureUpgrade::new(
            cluster.clone(),
            Arc::new(helm),
            ManifestResolver::new(Vec::new()),
            "ceres",
        );

        upgrade.install_velero().await.unwrap();

        assert_eq!(cluster.count_calls(&format!("apply {VELERO_MANIFEST}")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_does_not_stop_the_rest() {
        let cluster = running_cluster();
        cluster.fail_apply("keycloak.yaml");
        let (helm, _log) = recording_helm(false);
        let upgrade = FeatureUpgrade::new(
            cluster.clone(),
            Arc::new(helm),
            ManifestResolver::new(Vec::new()),
            "ceres",
        );

        let report = upgrade.run().await;

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("keycloak"));
        assert!(report.completed.contains(&"mailcow"));
    }
}

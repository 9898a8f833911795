//! The fixed install/reconcile plan.

use std::time::Duration;

use super::readiness::{ReadinessCheck, ReadinessWait};

pub const PROMTAIL_MANIFEST: &str = "deployment/promtail.yaml";
pub const POSTGRES_MANIFEST: &str = "deployment/postgresql-fixed.yaml";
pub const REDIS_MANIFEST: &str = "deployment/redis.yaml";
pub const DATABASES_MANIFEST: &str = "deployment/create-databases.yaml";
pub const KEYCLOAK_MANIFEST: &str = "deployment/keycloak.yaml";
pub const MAILCOW_MANIFEST: &str = "deployment/mailcow.yaml";
pub const ALL_SERVICES_MANIFEST: &str = "deployment/all-services.yaml";
pub const NODEPORT_MANIFEST: &str = "deployment/nodeport-services.yaml";
pub const INGRESS_MANIFEST: &str = "deployment/ingress-domains.yaml";

/// Namespace of the mail stack.
pub const MAIL_NAMESPACE: &str = "mailcow";
/// Namespace of the monitoring stack.
pub const MONITORING_NAMESPACE: &str = "monitoring";

/// One manifest apply with an optional readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestStep {
    /// Service name recorded in the state store.
    pub name: &'static str,
    pub manifest: &'static str,
    pub readiness: Option<ReadinessWait>,
    /// A failed apply aborts a fresh install.
    pub required: bool,
    /// A readiness timeout aborts a fresh install.
    pub readiness_required: bool,
}

/// One entry of the ordered plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEntry {
    Manifest(ManifestStep),
    /// One-shot database creation job.
    Databases,
}

impl PlanEntry {
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Manifest(step) => format!("{} ({})", step.name, step.manifest),
            Self::Databases => format!("databases ({DATABASES_MANIFEST})"),
        }
    }
}

/// Namespace holding the stateful core data services.
#[must_use]
pub fn core_namespace(namespace: &str) -> String {
    format!("{namespace}-core")
}

/// Namespaces created before any manifest is applied.
#[must_use]
pub fn infrastructure_namespaces(namespace: &str) -> Vec<String> {
    vec![
        namespace.to_string(),
        core_namespace(namespace),
        MONITORING_NAMESPACE.to_string(),
    ]
}

fn manifest(name: &'static str, path: &'static str, required: bool) -> ManifestStep {
    ManifestStep {
        name,
        manifest: path,
        readiness: None,
        required,
        readiness_required: false,
    }
}

/// The ordered plan for `namespace`.
#[must_use]
pub fn install_plan(namespace: &str) -> Vec<PlanEntry> {
    let core = core_namespace(namespace);
    let second = Duration::from_secs(1);
    let five = Duration::from_secs(5);

    vec![
        PlanEntry::Manifest(manifest("promtail", PROMTAIL_MANIFEST, false)),
        PlanEntry::Manifest(ManifestStep {
            readiness: Some(ReadinessWait {
                check: ReadinessCheck::Replicas {
                    kind: "statefulset",
                    name: "postgresql",
                    namespace: core.clone(),
                },
                timeout: Duration::from_secs(120),
                interval: second,
            }),
            readiness_required: true,
            ..manifest("postgresql", POSTGRES_MANIFEST, true)
        }),
        PlanEntry::Manifest(ManifestStep {
            readiness: Some(ReadinessWait {
                check: ReadinessCheck::Replicas {
                    kind: "deployment",
                    name: "redis",
                    namespace: core,
                },
                timeout: Duration::from_secs(60),
                interval: second,
            }),
            readiness_required: true,
            ..manifest("redis", REDIS_MANIFEST, true)
        }),
        PlanEntry::Databases,
        PlanEntry::Manifest(ManifestStep {
            readiness: Some(ReadinessWait {
                check: ReadinessCheck::Pods {
                    namespace: namespace.to_string(),
                    selector: "app=keycloak".to_string(),
                },
                timeout: Duration::from_secs(180),
                interval: five,
            }),
            ..manifest("keycloak", KEYCLOAK_MANIFEST, true)
        }),
        PlanEntry::Manifest(ManifestStep {
            readiness: Some(ReadinessWait {
                check: ReadinessCheck::Pods {
                    namespace: MAIL_NAMESPACE.to_string(),
                    selector: "app=mailcow".to_string(),
                },
                timeout: Duration::from_secs(180),
                interval: five,
            }),
            ..manifest("mailcow", MAILCOW_MANIFEST, true)
        }),
        PlanEntry::Manifest(manifest("services", ALL_SERVICES_MANIFEST, true)),
        PlanEntry::Manifest(manifest("nodeport", NODEPORT_MANIFEST, true)),
        PlanEntry::Manifest(manifest("ingress", INGRESS_MANIFEST, true)),
    ]
}

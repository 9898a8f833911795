//! Access information shown after an install.

use crate::cluster::{ClusterAdapter, ResourceQuery};
use crate::ui;

/// A service address derived from the cluster at display time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: &'static str,
    pub cluster_address: String,
    pub port: u16,
    pub credentials_hint: Option<&'static str>,
}

impl ServiceEndpoint {
    /// `address:port` as stored in the state record.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.cluster_address, self.port)
    }
}

struct AccessPoint {
    name: &'static str,
    service: &'static str,
    namespace: Namespace,
    port: u16,
    credentials: Option<&'static str>,
}

enum Namespace {
    Platform,
    Core,
    Fixed(&'static str),
}

const ACCESS_POINTS: &[AccessPoint] = &[
    AccessPoint {
        name: "postgresql",
        service: "postgresql",
        namespace: Namespace::Core,
        port: 5432,
        credentials: Some("postgres / ceres_postgres_2025"),
    },
    AccessPoint {
        name: "redis",
        service: "redis",
        namespace: Namespace::Core,
        port: 6379,
        credentials: Some("password ceres_redis_2025"),
    },
    AccessPoint {
        name: "keycloak",
        service: "keycloak",
        namespace: Namespace::Platform,
        port: 8080,
        credentials: Some("admin / see secret keycloak-secret"),
    },
    AccessPoint {
        name: "grafana",
        service: "grafana",
        namespace: Namespace::Fixed("monitoring"),
        port: 3000,
        credentials: Some("admin / Grafana@Admin2025"),
    },
    AccessPoint {
        name: "prometheus",
        service: "prometheus",
        namespace: Namespace::Fixed("monitoring"),
        port: 9090,
        credentials: None,
    },
];

/// Look up ClusterIPs; services without an address are omitted.
pub async fn gather_endpoints(cluster: &dyn ClusterAdapter, namespace: &str) -> Vec<ServiceEndpoint> {
    let core = super::plan::core_namespace(namespace);
    let mut endpoints = Vec::new();
    for point in ACCESS_POINTS {
        let ns = match point.namespace {
            Namespace::Platform => namespace,
            Namespace::Core => core.as_str(),
            Namespace::Fixed(ns) => ns,
        };
        let ip = cluster
            .get_jsonpath(
                &ResourceQuery::named("svc", point.service).namespace(ns),
                "{.spec.clusterIP}",
            )
            .await
            .unwrap_or_default();
        let ip = ip.trim();
        if ip.is_empty() || ip == "None" {
            continue;
        }
        endpoints.push(ServiceEndpoint {
            name: point.name,
            cluster_address: ip.to_string(),
            port: point.port,
            credentials_hint: point.credentials,
        });
    }
    endpoints
}

/// Print the access block for the given endpoints.
pub fn print_access_info(endpoints: &[ServiceEndpoint], external_host: &str) {
    ui::print_section("Access Information");
    for ep in endpoints {
        let value = match ep.credentials_hint {
            Some(hint) => format!("{}  ({hint})", ep.address()),
            None => ep.address(),
        };
        ui::print_kv(ep.name, &value);
    }
    println!();
    ui::print_step("External access");
    ui::print_list_item(&format!("HTTP:  http://{external_host}:30080"));
    ui::print_list_item(&format!("HTTPS: https://{external_host}:30443"));
    println!();
    ui::print_info("Cluster addresses are reachable over the VPN: run `ceres vpn setup`");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::FakeCluster;

    #[tokio::test]
    async fn test_missing_services_are_omitted() {
        let cluster = FakeCluster::new();
        cluster.on_get(
            "svc postgresql -n ceres-core -o jsonpath={.spec.clusterIP}",
            vec!["10.43.0.12"],
        );
        cluster.on_get(
            "svc grafana -n monitoring -o jsonpath={.spec.clusterIP}",
            vec!["10.43.0.40"],
        );

        let endpoints = gather_endpoints(&cluster, "ceres").await;

        let names: Vec<_> = endpoints.iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["postgresql", "grafana"]);
        assert_eq!(endpoints[0].address(), "10.43.0.12:5432");
    }
}

//! Root CA certificate published by cert-manager.

use k8s_openapi::api::core::v1::Secret;

use crate::cluster::{ClusterAdapter, ResourceQuery};
use crate::error::{CeresError, Result};

pub const ROOT_CA_NAMESPACE: &str = "cert-manager";
pub const ROOT_CA_SECRET: &str = "ceres-root-ca";

/// PEM bytes from a TLS secret: `tls.crt`, else `ca.crt`.
pub async fn read_pem(cluster: &dyn ClusterAdapter, namespace: &str, name: &str) -> Result<Vec<u8>> {
    let value = cluster
        .get_json(&ResourceQuery::named("secret", name).namespace(namespace))
        .await?;
    let secret: Secret = serde_json::from_value(value)?;
    let missing = |detail: &str| CeresError::UnexpectedOutput {
        what: format!("secret {namespace}/{name}"),
        detail: detail.to_string(),
    };

    let mut data = secret.data.ok_or_else(|| missing("no data"))?;
    ["tls.crt", "ca.crt"]
        .into_iter()
        .filter_map(|key| data.remove(key))
        .map(|bytes| bytes.0)
        .find(|pem| !pem.is_empty())
        .ok_or_else(|| missing("missing tls.crt/ca.crt"))
}

/// The platform root CA.
pub async fn root_ca_pem(cluster: &dyn ClusterAdapter) -> Result<Vec<u8>> {
    read_pem(cluster, ROOT_CA_NAMESPACE, ROOT_CA_SECRET).await
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    use super::*;
    use crate::cluster::testing::FakeCluster;

    const KEY: &str = "secret ceres-root-ca -n cert-manager -o json";

    fn secret_json(data: &str) -> String {
        format!(
            r#"{{"apiVersion":"v1","kind":"Secret","metadata":{{"name":"ceres-root-ca"}},"data":{data}}}"#
        )
    }

    #[tokio::test]
    async fn test_prefers_tls_crt() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let body = secret_json(&format!(
            r#"{{"tls.crt":"{}","ca.crt":"{}"}}"#,
            STANDARD.encode(pem),
            STANDARD.encode("other")
        ));
        let cluster = FakeCluster::new();
        cluster.on_get(KEY, vec![body.as_str()]);

        assert_eq!(root_ca_pem(&cluster).await.unwrap(), pem.as_bytes());
    }

    #[tokio::test]
    async fn test_falls_back_to_ca_crt() {
        let body = secret_json(&format!(r#"{{"ca.crt":"{}"}}"#, STANDARD.encode("ca")));
        let cluster = FakeCluster::new();
        cluster.on_get(KEY, vec![body.as_str()]);

        assert_eq!(root_ca_pem(&cluster).await.unwrap(), b"ca");
    }

    #[tokio::test]
    async fn test_missing_keys() {
        let body = secret_json(r#"{"tls.key":"eA=="}"#);
        let cluster = FakeCluster::new();
        cluster.on_get(KEY, vec![body.as_str()]);

        let err = root_ca_pem(&cluster).await.unwrap_err();
        assert!(err.to_string().contains("missing tls.crt/ca.crt"));
    }
}

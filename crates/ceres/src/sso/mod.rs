//! Single sign-on: Keycloak realm import, OAuth2 proxy, and per-service
//! OIDC integration.

pub mod keycloak;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info, warn};

use crate::cluster::{OutputFormat, ResourceQuery, SharedCluster};
use crate::config::{env_bool, env_opt, env_or, ManifestResolver};
use crate::error::{CeresError, Result};
use crate::orchestrator::readiness::poll_until;
use crate::process::args;
use crate::ui;

pub use self::keycloak::{KeycloakClient, KeycloakClientRep, KeycloakUser};

pub const REALM_FILE: &str = "config/keycloak-realm.json";
pub const OAUTH2_PROXY_MANIFEST: &str = "deployment/oauth2-proxy.yaml";
pub const KEYCLOAK_NAMESPACE: &str = "ceres";
pub const DEFAULT_KEYCLOAK_URL: &str = "https://keycloak.ceres.local";
pub const DEFAULT_REALM: &str = "ceres";

const KEYCLOAK_SELECTOR: &str = "app=keycloak";
const REALM_POD_PATH: &str = "/tmp/realm.json";
const ISSUER: &str = "https://keycloak.ceres.local/realms/ceres";

/// Clients whose secrets are reported after an install.
const SECRET_CLIENTS: &[&str] = &[
    "gitlab",
    "grafana",
    "mattermost",
    "wikijs",
    "nextcloud",
    "oauth2-proxy",
];

/// Keycloak admin user and password.
///
/// Environment first (`CERES_KEYCLOAK_ADMIN`, `CERES_KEYCLOAK_ADMIN_PASSWORD`,
/// `KEYCLOAK_ADMIN_PASSWORD`), then the `admin-password` key of the
/// `keycloak-secret` secret.
pub async fn admin_credentials(cluster: &SharedCluster) -> Result<(String, String)> {
    let user = env_or("CERES_KEYCLOAK_ADMIN", "admin");
    if let Some(password) =
        env_opt("CERES_KEYCLOAK_ADMIN_PASSWORD").or_else(|| env_opt("KEYCLOAK_ADMIN_PASSWORD"))
    {
        return Ok((user, password));
    }

    let encoded = cluster
        .get_jsonpath(
            &ResourceQuery::named("secret", "keycloak-secret").namespace(KEYCLOAK_NAMESPACE),
            "{.data.admin-password}",
        )
        .await?;
    let decoded = STANDARD.decode(encoded.trim()).map_err(|e| CeresError::UnexpectedOutput {
        what: "secret keycloak-secret".to_string(),
        detail: format!("admin-password is not base64: {e}"),
    })?;
    let password = String::from_utf8_lossy(&decoded).trim().to_string();
    if password.is_empty() {
        return Err(CeresError::Validation(
            "Keycloak admin password not found: set CERES_KEYCLOAK_ADMIN_PASSWORD".to_string(),
        ));
    }
    Ok((user, password))
}

/// Admin client for the platform realm from `CERES_KEYCLOAK_URL`
/// (default `https://keycloak.ceres.local`) and `CERES_KEYCLOAK_INSECURE_TLS`
/// (default true, the ingress uses a self-signed CA).
pub async fn client_from_env(cluster: &SharedCluster) -> Result<KeycloakClient> {
    let (user, password) = admin_credentials(cluster).await?;
    KeycloakClient::new(
        &env_or("CERES_KEYCLOAK_URL", DEFAULT_KEYCLOAK_URL),
        DEFAULT_REALM,
        &user,
        &password,
        env_bool("CERES_KEYCLOAK_INSECURE_TLS", true),
    )
}

/// Services that can be put behind SSO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsoService {
    Gitlab,
    Grafana,
    Mattermost,
    Wikijs,
    Nextcloud,
    Mailcow,
    Portainer,
    Adminer,
    Minio,
    Prometheus,
}

impl SsoService {
    pub const ALL: [SsoService; 10] = [
        Self::Gitlab,
        Self::Grafana,
        Self::Mattermost,
        Self::Wikijs,
        Self::Nextcloud,
        Self::Mailcow,
        Self::Portainer,
        Self::Adminer,
        Self::Minio,
        Self::Prometheus,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Gitlab => "gitlab",
            Self::Grafana => "grafana",
            Self::Mattermost => "mattermost",
            Self::Wikijs => "wikijs",
            Self::Nextcloud => "nextcloud",
            Self::Mailcow => "mailcow",
            Self::Portainer => "portainer",
            Self::Adminer => "adminer",
            Self::Minio => "minio",
            Self::Prometheus => "prometheus",
        }
    }

    /// Speaks OIDC itself; the rest sit behind the OAuth2 proxy.
    #[must_use]
    pub fn has_oidc_client(self) -> bool {
        matches!(
            self,
            Self::Gitlab | Self::Grafana | Self::Mattermost | Self::Wikijs | Self::Nextcloud
        )
    }
}

impl fmt::Display for SsoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SsoService {
    type Err = CeresError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|svc| svc.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CeresError::Validation(format!("unknown service: {s}")))
    }
}

/// Waits used by [`SsoManager::install`].
#[derive(Debug, Clone, Copy)]
pub struct SsoTimings {
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Pause after the pod reports Running.
    pub settle: Duration,
}

impl Default for SsoTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_polls: 60,
            settle: Duration::from_secs(30),
        }
    }
}

pub struct SsoManager {
    cluster: SharedCluster,
    keycloak: KeycloakClient,
    resolver: ManifestResolver,
    timings: SsoTimings,
}

impl SsoManager {
    #[must_use]
    pub fn new(cluster: SharedCluster, keycloak: KeycloakClient, resolver: ManifestResolver) -> Self {
        Self {
            cluster,
            keycloak,
            resolver,
            timings: SsoTimings::default(),
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: SsoTimings) -> Self {
        self.timings = timings;
        self
    }

    pub async fn install(&self) -> Result<()> {
        ui::print_section("SSO install");

        ui::print_step("Waiting for Keycloak");
        self.wait_for_keycloak().await?;

        ui::print_step("Importing realm");
        self.import_realm().await.map_err(|e| e.in_step("realm import"))?;

        for manifest in [OAUTH2_PROXY_MANIFEST, crate::orchestrator::plan::INGRESS_MANIFEST] {
            ui::print_step(&format!("Applying {manifest}"));
            let path = self.resolver.resolve(manifest);
            self.cluster
                .apply_file(&path)
                .await
                .map_err(|e| e.in_step(format!("apply {manifest}")))?;
        }

        let secrets = self.client_secrets().await?;
        ui::print_success("SSO components installed");
        println!();
        ui::print_info("Client secrets:");
        for (client, secret) in &secrets {
            ui::print_kv(client, secret.as_deref().unwrap_or("ERROR: could not retrieve"));
        }
        println!();
        ui::print_kv("Keycloak admin", "https://keycloak.ceres.local");
        Ok(())
    }

    async fn keycloak_pod(&self) -> Result<String> {
        let pod = self
            .cluster
            .get_jsonpath(
                &ResourceQuery::new("pods")
                    .namespace(KEYCLOAK_NAMESPACE)
                    .selector(KEYCLOAK_SELECTOR),
                "{.items[0].metadata.name}",
            )
            .await?;
        match pod.trim() {
            "" => Err(CeresError::Transport("keycloak pod not found".to_string())),
            name => Ok(name.to_string()),
        }
    }

    async fn wait_for_keycloak(&self) -> Result<()> {
        let query = ResourceQuery::new("pods")
            .namespace(KEYCLOAK_NAMESPACE)
            .selector(KEYCLOAK_SELECTOR);
        let query = &query;
        let cluster = &self.cluster;
        let outcome = poll_until(
            move || async move {
                let phase = cluster
                    .get_jsonpath(query, "{.items[0].status.phase}")
                    .await?;
                Ok(phase.trim() == "Running")
            },
            self.timings.poll_interval,
            self.timings.max_polls,
        )
        .await;

        if !outcome.is_ready() {
            let waited = self.timings.poll_interval * self.timings.max_polls.saturating_sub(1);
            return Err(CeresError::Timeout {
                what: "keycloak pod".to_string(),
                waited_secs: waited.as_secs(),
            });
        }
        ui::print_info("Keycloak pod running, waiting for initialization");
        tokio::time::sleep(self.timings.settle).await;
        Ok(())
    }

    async fn import_realm(&self) -> Result<()> {
        let pod = self.keycloak_pod().await?;
        let realm_file = self.resolver.resolve(REALM_FILE);
        self.cluster
            .copy_to_pod(&realm_file, KEYCLOAK_NAMESPACE, &pod, REALM_POD_PATH)
            .await?;

        let imported = self
            .cluster
            .exec(
                KEYCLOAK_NAMESPACE,
                &pod,
                None,
                &args(&[
                    "/opt/keycloak/bin/kc.sh",
                    "import",
                    "--file",
                    REALM_POD_PATH,
                    "--override",
                    "true",
                ]),
                None,
            )
            .await;
        match imported {
            Ok(_) => {
                ui::print_success("Realm imported");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "kc.sh import failed, falling back to the admin API");
                let content = tokio::fs::read_to_string(&realm_file).await?;
                let realm: serde_json::Value = serde_json::from_str(&content)?;
                self.keycloak.create_realm(&realm).await?;
                ui::print_success("Realm imported via admin API");
                Ok(())
            }
        }
    }

    /// Secret per client in [`SECRET_CLIENTS`] order; `None` where it could
    /// not be retrieved.
    pub async fn client_secrets(&self) -> Result<Vec<(String, Option<String>)>> {
        let clients = self.keycloak.list_clients().await?;
        let mut out = Vec::with_capacity(SECRET_CLIENTS.len());
        for name in SECRET_CLIENTS {
            let secret = match clients.iter().find(|c| c.client_id == *name) {
                Some(client) => match self.keycloak.client_secret(&client.id).await {
                    Ok(secret) if !secret.is_empty() => Some(secret),
                    Ok(_) => None,
                    Err(e) => {
                        debug!(client = name, error = %e, "Client secret lookup failed");
                        None
                    }
                },
                None => None,
            };
            out.push(((*name).to_string(), secret));
        }
        Ok(out)
    }

    async fn secret_for(&self, service: SsoService) -> Result<String> {
        self.client_secrets()
            .await?
            .into_iter()
            .find(|(name, _)| name == service.name())
            .and_then(|(_, secret)| secret)
            .ok_or_else(|| {
                CeresError::Transport(format!("could not retrieve {service} client secret"))
            })
    }

    pub async fn integrate(&self, service: SsoService) -> Result<()> {
        ui::print_step(&format!("Integrating {service} with SSO"));
        if !service.has_oidc_client() {
            ui::print_success(&format!("{service} is protected by the OAuth2 proxy"));
            ui::print_info("No additional configuration required; access it via its domain name");
            return Ok(());
        }

        let secret = self.secret_for(service).await?;
        ui::print_success("Client secret retrieved");
        if service == SsoService::Nextcloud {
            return self.configure_nextcloud(&secret).await;
        }

        println!();
        ui::print_info("Configure the service with:");
        for (key, value) in oidc_settings(service, &secret) {
            ui::print_kv(key, &value);
        }
        Ok(())
    }

    async fn configure_nextcloud(&self, secret: &str) -> Result<()> {
        let pod = self
            .cluster
            .get_jsonpath(
                &ResourceQuery::new("pods")
                    .namespace("nextcloud")
                    .selector("app=nextcloud"),
                "{.items[0].metadata.name}",
            )
            .await?;
        let pod = pod.trim();
        if pod.is_empty() {
            return Err(CeresError::Transport("nextcloud pod not found".to_string()));
        }

        let occ = |script: String| args(&["su", "-s", "/bin/bash", "www-data", "-c", &script]);
        match self
            .cluster
            .exec(
                "nextcloud",
                pod,
                None,
                &occ("php occ app:install user_oidc".to_string()),
                None,
            )
            .await
        {
            Ok(output) => ui::print_block(&output),
            // Already installed reports a failure too.
            Err(e) => debug!(error = %e, "user_oidc app install"),
        }

        let script = format!(
            "php occ config:app:set user_oidc provider_url --value=\"{ISSUER}\" && \
             php occ config:app:set user_oidc client_id --value=\"nextcloud\" && \
             php occ config:app:set user_oidc client_secret --value=\"{secret}\""
        );
        self.cluster
            .exec("nextcloud", pod, None, &occ(script), None)
            .await
            .map_err(|e| e.in_step("configure nextcloud OIDC"))?;
        ui::print_success("Nextcloud OIDC configured");
        info!("Nextcloud OIDC configured");
        Ok(())
    }

    /// Integrate every service; failures are reported and skipped.
    pub async fn integrate_all(&self) -> Vec<(SsoService, CeresError)> {
        ui::print_section("SSO integration");
        let mut failures = Vec::new();
        for service in SsoService::ALL {
            if let Err(e) = self.integrate(service).await {
                ui::print_warning(&format!("{service}: {e}"));
                failures.push((service, e));
            }
        }
        ui::print_success("SSO integration complete");
        failures
    }

    pub async fn status(&self) -> Result<()> {
        ui::print_section("SSO status");
        let listings = [
            (
                "Keycloak",
                ResourceQuery::new("pods")
                    .namespace(KEYCLOAK_NAMESPACE)
                    .selector(KEYCLOAK_SELECTOR),
            ),
            ("OAuth2 Proxy", ResourceQuery::new("pods").namespace("oauth2-proxy")),
            ("Ingress routes", ResourceQuery::new("ingress").all_namespaces()),
        ];
        for (title, query) in listings {
            println!();
            ui::print_info(title);
            match self.cluster.get(&query, OutputFormat::Table).await {
                Ok(listing) => ui::print_block(&listing),
                Err(e) => ui::print_warning(&e.to_string()),
            }
        }
        Ok(())
    }
}

/// Settings an operator enters in the service's admin UI.
#[must_use]
pub fn oidc_settings(service: SsoService, secret: &str) -> Vec<(&'static str, String)> {
    let endpoint = |path: &str| format!("{ISSUER}/protocol/openid-connect/{path}");
    let mut settings = vec![
        ("Client ID", service.name().to_string()),
        ("Client Secret", secret.to_string()),
        ("Issuer", ISSUER.to_string()),
        ("Auth Endpoint", endpoint("auth")),
        ("Token Endpoint", endpoint("token")),
        ("User Info Endpoint", endpoint("userinfo")),
    ];
    match service {
        SsoService::Gitlab => settings.push((
            "Restart",
            "kubectl rollout restart deployment/gitlab -n gitlab".to_string(),
        )),
        SsoService::Grafana => settings.push((
            "Restart",
            "kubectl rollout restart deployment/grafana -n monitoring".to_string(),
        )),
        SsoService::Mattermost => settings.push((
            "Where",
            "System Console > Authentication > GitLab".to_string(),
        )),
        SsoService::Wikijs => settings.push((
            "Where",
            "Administration > Authentication > OpenID Connect".to_string(),
        )),
        _ => {}
    }
    settings
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use serial_test::serial;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cluster::testing::FakeCluster;

    const PHASE_KEY: &str = "pods -n ceres -l app=keycloak -o jsonpath={.items[0].status.phase}";
    const POD_KEY: &str = "pods -n ceres -l app=keycloak -o jsonpath={.items[0].metadata.name}";

    async fn keycloak_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/master/protocol/openid-connect/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 300})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/admin/realms/ceres/clients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "c-grafana", "clientId": "grafana"},
                {"id": "c-nextcloud", "clientId": "nextcloud"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/admin/realms/ceres/clients/c-grafana/client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "g-secret"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/admin/realms/ceres/clients/c-nextcloud/client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "n-secret"})))
            .mount(&server)
            .await;
        server
    }

    fn manager(cluster: &Arc<FakeCluster>, server: &MockServer) -> SsoManager {
        let keycloak = KeycloakClient::new(&server.uri(), "ceres", "admin", "pw", false).unwrap();
        SsoManager::new(
            cluster.clone(),
            keycloak,
            ManifestResolver::new(Vec::new()),
        )
        .with_timings(SsoTimings {
            poll_interval: Duration::ZERO,
            max_polls: 3,
            settle: Duration::ZERO,
        })
    }

    #[test]
    fn test_service_names() {
        assert_eq!("Grafana".parse::<SsoService>().unwrap(), SsoService::Grafana);
        assert!(matches!(
            "jenkins".parse::<SsoService>().unwrap_err(),
            CeresError::Validation(_)
        ));
        assert_eq!(
            SsoService::ALL.iter().filter(|s| s.has_oidc_client()).count(),
            5
        );
    }

    #[tokio::test]
    async fn test_client_secrets_marks_missing_clients() {
        let server = keycloak_server().await;
        let cluster = Arc::new(FakeCluster::new());
        let secrets = manager(&cluster, &server).client_secrets().await.unwrap();

        assert_eq!(secrets.len(), SECRET_CLIENTS.len());
        assert_eq!(secrets[1], ("grafana".to_string(), Some("g-secret".to_string())));
        assert_eq!(secrets[0], ("gitlab".to_string(), None));
    }

    #[tokio::test]
    async fn test_integrate_proxy_service_needs_no_keycloak() {
        let server = MockServer::start().await;
        let cluster = Arc::new(FakeCluster::new());
        manager(&cluster, &server)
            .integrate(SsoService::Minio)
            .await
            .unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_integrate_without_secret_fails() {
        let server = keycloak_server().await;
        let cluster = Arc::new(FakeCluster::new());
        let err = manager(&cluster, &server)
            .integrate(SsoService::Gitlab)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gitlab client secret"));
    }

    #[tokio::test]
    async fn test_integrate_nextcloud_runs_occ() {
        let server = keycloak_server().await;
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .on_get(
                "pods -n nextcloud -l app=nextcloud -o jsonpath={.items[0].metadata.name}",
                vec!["nextcloud-0"],
            )
            .on_exec("nextcloud/nextcloud-0 su -s /bin/bash www-data -c", "ok");

        manager(&cluster, &server)
            .integrate(SsoService::Nextcloud)
            .await
            .unwrap();

        let calls = cluster.calls();
        let configure = calls
            .iter()
            .find(|c| c.contains("client_secret"))
            .unwrap();
        assert!(configure.contains("--value=\"n-secret\""));
    }

    #[tokio::test]
    async fn test_integrate_all_is_best_effort() {
        let server = keycloak_server().await;
        let cluster = Arc::new(FakeCluster::new());
        let failures = manager(&cluster, &server).integrate_all().await;

        let failed: Vec<_> = failures.iter().map(|(s, _)| *s).collect();
        // gitlab, mattermost and wikijs have no client; nextcloud has no pod.
        assert_eq!(
            failed,
            vec![
                SsoService::Gitlab,
                SsoService::Mattermost,
                SsoService::Wikijs,
                SsoService::Nextcloud
            ]
        );
    }

    #[tokio::test]
    async fn test_install_times_out_when_keycloak_never_runs() {
        let server = MockServer::start().await;
        let cluster = Arc::new(FakeCluster::new());
        cluster.on_get(PHASE_KEY, vec!["Pending"]);

        let err = manager(&cluster, &server).install().await.unwrap_err();
        assert!(matches!(err, CeresError::Timeout { .. }));
        assert_eq!(cluster.count_calls(&format!("get {PHASE_KEY}")), 3);
    }

    #[tokio::test]
    async fn test_install_imports_with_kc_sh() {
        let server = keycloak_server().await;
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .on_get(PHASE_KEY, vec!["Pending", "Running"])
            .on_get(POD_KEY, vec!["keycloak-0"])
            .on_exec("ceres/keycloak-0 /opt/keycloak/bin/kc.sh import", "imported");

        manager(&cluster, &server).install().await.unwrap();

        assert_eq!(
            cluster.count_calls("cp config/keycloak-realm.json ceres/keycloak-0:/tmp/realm.json"),
            1
        );
        assert_eq!(
            cluster.applied(),
            vec![
                "deployment/oauth2-proxy.yaml",
                "deployment/ingress-domains.yaml"
            ]
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_admin_credentials_from_secret() {
        std::env::remove_var("CERES_KEYCLOAK_ADMIN");
        std::env::remove_var("CERES_KEYCLOAK_ADMIN_PASSWORD");
        std::env::remove_var("KEYCLOAK_ADMIN_PASSWORD");
        let encoded = STANDARD.encode("s3cret\n");
        let fake = Arc::new(FakeCluster::new());
        fake.on_get(
            "secret keycloak-secret -n ceres -o jsonpath={.data.admin-password}",
            vec![encoded.as_str()],
        );
        let cluster: SharedCluster = fake;

        let (user, password) = admin_credentials(&cluster).await.unwrap();
        assert_eq!(user, "admin");
        assert_eq!(password, "s3cret");

        std::env::set_var("KEYCLOAK_ADMIN_PASSWORD", "from-env");
        let (_, password) = admin_credentials(&cluster).await.unwrap();
        assert_eq!(password, "from-env");
        std::env::remove_var("KEYCLOAK_ADMIN_PASSWORD");
    }
}

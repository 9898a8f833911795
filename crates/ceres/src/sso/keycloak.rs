//! Keycloak admin REST client.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{CeresError, Result};

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// An OIDC client as listed by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakClientRep {
    pub id: String,
    pub client_id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
struct SecretResponse {
    #[serde(default)]
    value: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Admin client for one realm, authenticated against `master` with a
/// password grant.
pub struct KeycloakClient {
    base_url: String,
    realm: String,
    admin_user: String,
    admin_password: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl KeycloakClient {
    pub fn new(
        base_url: &str,
        realm: &str,
        admin_user: &str,
        admin_password: &str,
        insecure_tls: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            admin_user: admin_user.to_string(),
            admin_password: admin_password.to_string(),
            http,
            token: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn admin_url(&self, path: &str) -> String {
        format!("{}/admin/realms/{}{path}", self.base_url, self.realm)
    }

    async fn token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/realms/master/protocol/openid-connect/token",
            self.base_url
        );
        debug!(url = %url, "Requesting Keycloak admin token");
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", self.admin_user.as_str()),
                ("password", self.admin_password.as_str()),
            ])
            .send()
            .await?;
        let response = check(response, "token request").await?;
        let body: TokenResponse = response.json().await?;
        if body.access_token.is_empty() {
            return Err(CeresError::Transport(
                "keycloak token response missing access_token".to_string(),
            ));
        }

        let value = body.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });
        Ok(value)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let token = self.token().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self.request(Method::GET, url, None).await?;
        Ok(check(response, what).await?.json().await?)
    }

    /// User whose username matches exactly.
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<KeycloakUser>> {
        let token = self.token().await?;
        let response = self
            .http
            .get(self.admin_url("/users"))
            .query(&[("username", username), ("exact", "true")])
            .bearer_auth(token)
            .send()
            .await?;
        let users: Vec<KeycloakUser> = check(response, "user lookup").await?.json().await?;
        Ok(users.into_iter().next())
    }

    /// Create `user` and return its id.
    pub async fn create_user(&self, user: &KeycloakUser) -> Result<String> {
        let body = serde_json::to_value(user)?;
        let response = self
            .request(Method::POST, &self.admin_url("/users"), Some(&body))
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(failure(response, "create user").await);
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_end_matches('/').to_string());
        if let Some(id) = location.as_deref().and_then(|l| l.rsplit('/').next()) {
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }

        self.find_user_by_username(&user.username)
            .await?
            .and_then(|u| u.id)
            .ok_or_else(|| {
                CeresError::UnexpectedOutput {
                    what: "keycloak create user".to_string(),
                    detail: "user created but its id could not be retrieved".to_string(),
                }
            })
    }

    /// Email the user a link to perform `actions`.
    pub async fn send_execute_actions_email(
        &self,
        user_id: &str,
        actions: &[String],
        redirect_uri: Option<&str>,
        lifespan: Option<Duration>,
    ) -> Result<()> {
        if actions.is_empty() {
            return Err(CeresError::Validation("actions must not be empty".to_string()));
        }
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(uri) = redirect_uri.filter(|u| !u.is_empty()) {
            query.push(("redirect_uri", uri.to_string()));
        }
        if let Some(lifespan) = lifespan {
            query.push(("lifespan", lifespan.as_secs().to_string()));
        }

        let token = self.token().await?;
        let response = self
            .http
            .put(self.admin_url(&format!("/users/{user_id}/execute-actions-email")))
            .query(&query)
            .bearer_auth(token)
            .json(actions)
            .send()
            .await?;
        check(response, "execute-actions email").await?;
        Ok(())
    }

    pub async fn list_clients(&self) -> Result<Vec<KeycloakClientRep>> {
        self.get_json(&self.admin_url("/clients"), "list clients")
            .await
    }

    /// Secret of the client with internal id `client_uuid`.
    pub async fn client_secret(&self, client_uuid: &str) -> Result<String> {
        let secret: SecretResponse = self
            .get_json(
                &self.admin_url(&format!("/clients/{client_uuid}/client-secret")),
                "client secret",
            )
            .await?;
        Ok(secret.value)
    }

    /// Confidential OIDC client with the standard flow enabled.
    pub async fn create_client(&self, client_id: &str, redirect_uri: &str) -> Result<()> {
        let body = serde_json::json!({
            "clientId": client_id,
            "enabled": true,
            "protocol": "openid-connect",
            "publicClient": false,
            "redirectUris": [redirect_uri],
            "standardFlowEnabled": true,
            "implicitFlowEnabled": false,
            "directAccessGrantsEnabled": true,
        });
        let response = self
            .request(Method::POST, &self.admin_url("/clients"), Some(&body))
            .await?;
        check(response, "create client").await?;
        Ok(())
    }

    /// Import a realm representation.
    pub async fn create_realm(&self, realm: &serde_json::Value) -> Result<()> {
        let url = format!("{}/admin/realms", self.base_url);
        let response = self.request(Method::POST, &url, Some(realm)).await?;
        check(response, "create realm").await?;
        Ok(())
    }
}

async fn failure(response: Response, what: &str) -> CeresError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    CeresError::Transport(format!("keycloak {what} failed: {status}: {}", body.trim()))
}

async fn check(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(failure(response, what).await)
    }
}

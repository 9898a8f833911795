//! HTTP basic auth in front of every page except `/healthz`.

use anyhow::{bail, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: String,
    challenge: HeaderValue,
}

impl BasicAuth {
    /// Both credentials are required.
    pub fn new(user: &str, password: &str, realm: &str) -> Result<Self> {
        let (user, password) = (user.trim(), password.trim());
        if user.is_empty() || password.is_empty() {
            bail!("basic auth is required: set CERES_UI_BASIC_USER and CERES_UI_BASIC_PASS");
        }
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            challenge: HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))?,
        })
    }

    /// `CERES_UI_BASIC_USER` / `CERES_UI_BASIC_PASS`.
    pub fn from_env(realm: &str) -> Result<Self> {
        Self::new(
            &std::env::var("CERES_UI_BASIC_USER").unwrap_or_default(),
            &std::env::var("CERES_UI_BASIC_PASS").unwrap_or_default(),
            realm,
        )
    }

    /// Compare the `Authorization` header in constant time.
    #[must_use]
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some((user, password)) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(decode_basic)
        else {
            return false;
        };
        let user_ok = user.as_bytes().ct_eq(self.user.as_bytes());
        let password_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & password_ok).into()
    }

    fn reject(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, self.challenge.clone())],
            "Unauthorized",
        )
            .into_response()
    }
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Middleware for `from_fn_with_state`.
pub async fn require_basic_auth(
    State(auth): State<BasicAuth>,
    request: Request,
    next: Next,
) -> Response {
    if auth.verify(request.headers()) {
        next.run(request).await
    } else {
        auth.reject()
    }
}

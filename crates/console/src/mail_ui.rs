//! Stand-alone mail front-end: compose and send the CA + VPN package.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::middleware;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use tracing::{info, warn};

use crate::auth::{require_basic_auth, BasicAuth};
use crate::package::PackageMailer;
use crate::settings::{ConfigForm, ConsoleConfig, SettingsStore};
use crate::templates::{Flash, PageContext, Templates};

pub const DEFAULT_LISTEN: &str = ":8090";
const TITLE: &str = "CERES Mail";

pub struct MailUiState {
    pub settings: SettingsStore,
    pub templates: Templates,
    pub mailer: PackageMailer,
}

impl MailUiState {
    /// Settings from `CERES_UI_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = ceres_cli::config::env_or(
            "CERES_UI_CONFIG",
            crate::settings::DEFAULT_MAIL_UI_CONFIG,
        );
        Ok(Self {
            settings: SettingsStore::open(&path)?,
            templates: Templates::new()?,
            mailer: PackageMailer::local(),
        })
    }

    fn page(&self, template: &str, cfg: ConsoleConfig, flash: Option<Flash>) -> Response {
        let context = PageContext {
            title: TITLE.to_string(),
            console: false,
            cfg,
            jobs: Vec::new(),
            flash,
            services: Vec::new(),
            action: "/send".to_string(),
        };
        self.templates.page(template, &context)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn compose(State(state): State<Arc<MailUiState>>) -> Response {
    state.page("mail", state.settings.get(), None)
}

async fn send(State(state): State<Arc<MailUiState>>, Form(form): Form<ConfigForm>) -> Response {
    let mut config = state.settings.get();
    config.apply_form(&form);
    match state.mailer.send(&config).await {
        Ok(()) => state.page("mail", config, Some(Flash::ok("Mail sent"))),
        Err(message) => {
            warn!(error = %message, "Mail not sent");
            state.page("mail", config, Some(Flash::error(message)))
        }
    }
}

async fn settings_form(State(state): State<Arc<MailUiState>>) -> Response {
    state.page("settings", state.settings.get(), None)
}

async fn save_settings(
    State(state): State<Arc<MailUiState>>,
    Form(form): Form<ConfigForm>,
) -> Response {
    let mut config = state.settings.get();
    config.apply_form(&form);
    match state.settings.save(config.clone()) {
        Ok(()) => Redirect::to("/").into_response(),
        Err(e) => state.page(
            "settings",
            config,
            Some(Flash::error(format!("Could not save settings: {e:#}"))),
        ),
    }
}

pub fn build_router(state: Arc<MailUiState>, auth: BasicAuth) -> Router {
    let protected = Router::new()
        .route("/", get(compose))
        .route("/send", post(send).get(|| async { Redirect::to("/") }))
        .route("/settings", get(settings_form).post(save_settings))
        .route_layer(middleware::from_fn_with_state(auth, require_basic_auth));

    crate::with_common_layers(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(protected)
            .with_state(state),
    )
}

pub async fn run_server(state: Arc<MailUiState>, auth: BasicAuth, addr: &str) -> Result<()> {
    let app = build_router(state, auth);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Mail UI listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

//! Operator console: settings, job triggers and the onboarding mail form.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use ceres_cli::sso::SsoService;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::{require_basic_auth, BasicAuth};
use crate::jobs::{JobRegistry, JobSpec};
use crate::package::PackageMailer;
use crate::settings::{ConfigForm, SettingsStore};
use crate::templates::{Flash, JobRow, PageContext, Templates};

pub const DEFAULT_LISTEN: &str = ":8091";
const TITLE: &str = "CERES Console";

/// Shared handler state.
pub struct ConsoleState {
    pub settings: SettingsStore,
    pub jobs: Arc<JobRegistry>,
    pub templates: Templates,
    pub mailer: PackageMailer,
    /// `ceres` binary the jobs run.
    pub ceres_bin: PathBuf,
}

impl ConsoleState {
    /// Wire the console from `CERES_CONSOLE_CONFIG`, `CERES_ROOT` and
    /// `CERES_BIN`.
    pub fn from_env() -> Result<Self> {
        let config_path = ceres_cli::config::env_or(
            "CERES_CONSOLE_CONFIG",
            crate::settings::DEFAULT_CONSOLE_CONFIG,
        );
        let workdir = ceres_cli::config::env_opt("CERES_ROOT").map(PathBuf::from);
        Ok(Self {
            settings: SettingsStore::open(&config_path)?,
            jobs: Arc::new(JobRegistry::new(workdir)),
            templates: Templates::new()?,
            mailer: PackageMailer::local(),
            ceres_bin: ceres_binary()?,
        })
    }
}

/// `CERES_BIN`, else `ceres` next to the running executable.
pub fn ceres_binary() -> Result<PathBuf> {
    if let Some(bin) = ceres_cli::config::env_opt("CERES_BIN") {
        return Ok(PathBuf::from(bin));
    }
    let exe = std::env::current_exe().context("failed to locate the console executable")?;
    Ok(exe.with_file_name("ceres"))
}

/// Page a trigger belongs to; refusals are shown there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Index,
    Ops,
    Sso,
    Backup,
    Mail,
}

impl Page {
    fn template(self) -> &'static str {
        match self {
            Page::Index => "index",
            Page::Ops => "ops",
            Page::Sso => "sso",
            Page::Backup => "backup",
            Page::Mail => "mail",
        }
    }
}

/// Console buttons, one per `POST /run/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Deploy,
    Status,
    Health,
    Diagnose,
    Fix,
    Upgrade,
    SsoStatus,
    SsoInstall,
    SsoIntegrateAll,
    SsoIntegrate,
    BackupList,
    BackupCreate,
    BackupRestore,
    MailStatus,
}

/// Trigger form fields; every one is optional.
#[derive(Debug, Default, Deserialize)]
pub struct RunForm {
    pub confirm: Option<String>,
    pub service: Option<String>,
    pub name: Option<String>,
}

fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn confirmed(form: &RunForm, word: &str) -> Result<(), String> {
    if field(&form.confirm) == Some(word) {
        Ok(())
    } else {
        Err(format!("Type {word} in the confirmation field to continue"))
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(slug: &str) -> std::result::Result<Self, ()> {
        Ok(match slug {
            "deploy" => Action::Deploy,
            "status" => Action::Status,
            "health" => Action::Health,
            "diagnose" => Action::Diagnose,
            "fix" => Action::Fix,
            "upgrade" => Action::Upgrade,
            "sso-status" => Action::SsoStatus,
            "sso-install" => Action::SsoInstall,
            "sso-integrate-all" => Action::SsoIntegrateAll,
            "sso-integrate" => Action::SsoIntegrate,
            "backup-list" => Action::BackupList,
            "backup-create" => Action::BackupCreate,
            "backup-restore" => Action::BackupRestore,
            "mail-status" => Action::MailStatus,
            _ => return Err(()),
        })
    }
}

impl Action {
    #[must_use]
    pub fn page(self) -> Page {
        match self {
            Action::Deploy | Action::Status => Page::Index,
            Action::Health | Action::Diagnose | Action::Fix | Action::Upgrade => Page::Ops,
            Action::SsoStatus
            | Action::SsoInstall
            | Action::SsoIntegrateAll
            | Action::SsoIntegrate => Page::Sso,
            Action::BackupList | Action::BackupCreate | Action::BackupRestore => Page::Backup,
            Action::MailStatus => Page::Mail,
        }
    }

    /// Cluster-changing actions run one at a time.
    #[must_use]
    pub fn mutating(self) -> bool {
        matches!(
            self,
            Action::Deploy | Action::Upgrade | Action::BackupRestore
        )
    }

    /// `ceres` arguments for this trigger, or the reason it is refused.
    pub fn command(
        self,
        form: &RunForm,
        config: &crate::settings::ConsoleConfig,
    ) -> std::result::Result<Vec<String>, String> {
        let argv = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        let command = match self {
            Action::Deploy => {
                confirmed(form, "DEPLOY")?;
                argv(&[
                    "deploy",
                    "--cloud",
                    &config.cloud,
                    "--environment",
                    &config.environment,
                    "--namespace",
                    &config.namespace,
                ])
            }
            Action::Status => argv(&["status", "--namespace", &config.namespace]),
            Action::Health => argv(&["health"]),
            Action::Diagnose => argv(&["diagnose"]),
            Action::Fix => {
                let mut args = argv(&["fix"]);
                args.extend(field(&form.service).map(str::to_string));
                args
            }
            Action::Upgrade => {
                confirmed(form, "UPGRADE")?;
                argv(&["upgrade"])
            }
            Action::SsoStatus => argv(&["sso", "status"]),
            Action::SsoInstall => argv(&["sso", "install"]),
            Action::SsoIntegrateAll => argv(&["sso", "integrate-all"]),
            Action::SsoIntegrate => {
                let service = field(&form.service).ok_or("Choose a service to integrate")?;
                let service = SsoService::from_str(service).map_err(|e| e.to_string())?;
                argv(&["sso", "integrate", service.name()])
            }
            Action::BackupList => argv(&["backup", "list"]),
            Action::BackupCreate => {
                let mut args = argv(&["backup", "create"]);
                args.extend(field(&form.name).map(str::to_string));
                args
            }
            Action::BackupRestore => {
                let name = field(&form.name).ok_or("Backup name is required")?;
                confirmed(form, "RESTORE")?;
                argv(&["backup", "restore", name])
            }
            Action::MailStatus => argv(&["mail", "status"]),
        };
        Ok(command)
    }
}

fn render(state: &ConsoleState, page: Page, flash: Option<Flash>) -> Response {
    render_with(state, page, state.settings.get(), flash)
}

fn render_with(
    state: &ConsoleState,
    page: Page,
    cfg: crate::settings::ConsoleConfig,
    flash: Option<Flash>,
) -> Response {
    let context = PageContext {
        title: TITLE.to_string(),
        console: true,
        cfg,
        jobs: state.jobs.list().iter().map(JobRow::from).collect(),
        flash,
        services: SsoService::ALL.iter().map(|s| s.name()).collect(),
        action: "/mail".to_string(),
    };
    state.templates.page(page.template(), &context)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn index(State(state): State<Arc<ConsoleState>>) -> Response {
    render(&state, Page::Index, None)
}

async fn ops(State(state): State<Arc<ConsoleState>>) -> Response {
    render(&state, Page::Ops, None)
}

async fn sso(State(state): State<Arc<ConsoleState>>) -> Response {
    render(&state, Page::Sso, None)
}

async fn backup(State(state): State<Arc<ConsoleState>>) -> Response {
    render(&state, Page::Backup, None)
}

async fn mail_form(State(state): State<Arc<ConsoleState>>) -> Response {
    render(&state, Page::Mail, None)
}

async fn settings_form(State(state): State<Arc<ConsoleState>>) -> Response {
    let context = PageContext {
        title: TITLE.to_string(),
        console: true,
        cfg: state.settings.get(),
        jobs: Vec::new(),
        flash: None,
        services: Vec::new(),
        action: "/mail".to_string(),
    };
    state.templates.page("settings", &context)
}

async fn save_settings(
    State(state): State<Arc<ConsoleState>>,
    Form(form): Form<ConfigForm>,
) -> Response {
    let mut config = state.settings.get();
    config.apply_form(&form);
    match state.settings.save(config) {
        Ok(()) => Redirect::to("/").into_response(),
        Err(e) => render(
            &state,
            Page::Index,
            Some(Flash::error(format!("Could not save settings: {e:#}"))),
        ),
    }
}

async fn send_mail(
    State(state): State<Arc<ConsoleState>>,
    Form(form): Form<ConfigForm>,
) -> Response {
    let mut config = state.settings.get();
    config.apply_form(&form);

    if let Err(message) = state.mailer.send(&config).await {
        warn!(error = %message, "Onboarding mail not sent");
        return render_with(&state, Page::Mail, config, Some(Flash::error(message)));
    }
    if let Err(e) = state.settings.save(config.clone()) {
        warn!(error = %format!("{e:#}"), "Mail sent but settings not saved");
    }
    render_with(&state, Page::Mail, config, Some(Flash::ok("Sent")))
}

async fn run_action(
    State(state): State<Arc<ConsoleState>>,
    Path(slug): Path<String>,
    Form(form): Form<RunForm>,
) -> Response {
    let Ok(action) = slug.parse::<Action>() else {
        return (StatusCode::NOT_FOUND, "unknown action").into_response();
    };
    let config = state.settings.get();
    let args = match action.command(&form, &config) {
        Ok(args) => args,
        Err(message) => return render(&state, action.page(), Some(Flash::error(message))),
    };

    let spec = JobSpec {
        name: format!(
            "ceres {}",
            args.iter()
                .take_while(|a| !a.starts_with('-'))
                .take(2)
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        ),
        program: state.ceres_bin.clone(),
        args,
        mutating: action.mutating(),
    };
    match state.jobs.start(spec) {
        Ok(id) => {
            info!(job = %id, action = %slug, "Console job triggered");
            Redirect::to(&format!("/jobs/{id}")).into_response()
        }
        Err(e) => render(&state, action.page(), Some(Flash::error(e.to_string()))),
    }
}

async fn job_page(State(state): State<Arc<ConsoleState>>, Path(id): Path<String>) -> Response {
    match state.jobs.get(&id) {
        Some(job) => state.templates.job_page(&job, true),
        None => (StatusCode::NOT_FOUND, "job not found").into_response(),
    }
}

/// Console routes; everything but `/healthz` requires basic auth.
pub fn build_router(state: Arc<ConsoleState>, auth: BasicAuth) -> Router {
    let protected = Router::new()
        .route("/", get(index))
        .route("/settings", get(settings_form).post(save_settings))
        .route("/ops", get(ops))
        .route("/sso", get(sso))
        .route("/backup", get(backup))
        .route("/mail", get(mail_form).post(send_mail))
        .route("/run/{action}", post(run_action))
        .route("/jobs/{id}", get(job_page))
        .route_layer(middleware::from_fn_with_state(auth, require_basic_auth));

    crate::with_common_layers(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(protected)
            .with_state(state),
    )
}

/// Serve the console until the listener fails.
pub async fn run_server(state: Arc<ConsoleState>, auth: BasicAuth, addr: &str) -> Result<()> {
    let app = build_router(state, auth);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Console listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

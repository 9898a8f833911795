//! Console and mail UI routes served on a random local port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ceres_console::jobs::JobRegistry;
use ceres_console::mail_ui::{self, MailUiState};
use ceres_console::package::PackageMailer;
use ceres_console::server::{self, ConsoleState};
use ceres_console::settings::SettingsStore;
use ceres_console::templates::Templates;
use ceres_console::BasicAuth;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::net::TcpListener;

const USER: &str = "admin";
const PASS: &str = "s3cret";

async fn serve(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start_console(dir: &TempDir) -> SocketAddr {
    let state = Arc::new(ConsoleState {
        settings: SettingsStore::open(dir.path().join("console.json")).unwrap(),
        jobs: Arc::new(JobRegistry::new(None)),
        templates: Templates::new().unwrap(),
        mailer: PackageMailer::local(),
        ceres_bin: PathBuf::from("echo"),
    });
    let auth = BasicAuth::new(USER, PASS, "CERES Console").unwrap();
    serve(server::build_router(state, auth)).await
}

async fn start_mail_ui(dir: &TempDir) -> SocketAddr {
    let state = Arc::new(MailUiState {
        settings: SettingsStore::open(dir.path().join("ui/config.json")).unwrap(),
        templates: Templates::new().unwrap(),
        mailer: PackageMailer::local(),
    });
    let auth = BasicAuth::new(USER, PASS, "CERES UI").unwrap();
    serve(mail_ui::build_router(state, auth)).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_healthz_needs_no_auth() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_console(&dir).await;

    let response = client()
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_pages_require_basic_auth() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_console(&dir).await;

    let response = client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()["www-authenticate"],
        "Basic realm=\"CERES Console\""
    );

    let response = client()
        .get(format!("http://{addr}/ops"))
        .basic_auth(USER, Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client()
        .get(format!("http://{addr}/ops"))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_deploy_without_confirmation_is_refused_inline() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_console(&dir).await;

    let response = client()
        .post(format!("http://{addr}/run/deploy"))
        .basic_auth(USER, Some(PASS))
        .form(&[("confirm", "yes")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("Type DEPLOY in the confirmation field"));
}

#[tokio::test]
async fn test_trigger_redirects_to_job_page() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_console(&dir).await;
    let client = client();

    let response = client
        .post(format!("http://{addr}/run/status"))
        .basic_auth(USER, Some(PASS))
        .form(&[("confirm", "")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()["location"].to_str().unwrap().to_string();
    assert!(location.starts_with("/jobs/"));

    let mut body = String::new();
    for _ in 0..100 {
        body = client
            .get(format!("http://{addr}{location}"))
            .basic_auth(USER, Some(PASS))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        if body.contains("<b>done</b>") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(body.contains("<b>done</b>"), "{body}");
    assert!(body.contains("status --namespace ceres"));
}

#[tokio::test]
async fn test_unknown_job_and_action_are_404() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_console(&dir).await;
    let client = client();

    let response = client
        .get(format!("http://{addr}/jobs/0123456789abcdef"))
        .basic_auth(USER, Some(PASS))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("http://{addr}/run/reboot"))
        .basic_auth(USER, Some(PASS))
        .form(&[("confirm", "")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_settings_saved_and_redirected() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_console(&dir).await;

    let response = client()
        .post(format!("http://{addr}/settings"))
        .basic_auth(USER, Some(PASS))
        .form(&[
            ("cloud", " aws "),
            ("environment", "staging"),
            ("namespace", "ceres"),
            ("vpnPort", "51821"),
            ("includeCA", "on"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()["location"], "/");

    let saved = std::fs::read_to_string(dir.path().join("console.json")).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["cloud"], "aws");
    assert_eq!(saved["environment"], "staging");
    assert_eq!(saved["vpnPort"], 51821);
    assert_eq!(saved["includeCA"], true);
    assert_eq!(saved["includeVPN"], false);
}

#[tokio::test]
async fn test_mail_ui_requires_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_mail_ui(&dir).await;

    let response = client()
        .post(format!("http://{addr}/send"))
        .basic_auth(USER, Some(PASS))
        .form(&[("to", " "), ("subject", "hi"), ("includeCA", "on")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("Recipient (To) is required"));
    assert!(!dir.path().join("ui/config.json").exists());
}

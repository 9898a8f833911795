//! Ceres web front-ends.
//!
//! Two axum applications share this crate:
//!
//! - the operator console (`ceres-console`), which runs `ceres` subcommands as
//!   tracked background jobs and sends onboarding mail;
//! - the mail UI (`ceres-mail-ui`), a compose form for the CA + VPN package.
//!
//! Both sit behind HTTP basic auth and keep their settings in a JSON file.

pub mod auth;
pub mod jobs;
pub mod mail_ui;
pub mod package;
pub mod server;
pub mod settings;
pub mod templates;

use std::path::Path;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use auth::BasicAuth;
pub use jobs::{Job, JobError, JobRegistry, JobStatus};
pub use settings::{ConsoleConfig, SettingsStore};

/// Turn a port-only listen address such as `:8091` into `0.0.0.0:8091`.
#[must_use]
pub fn normalize_listen_addr(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    }
}

/// Upper bound per request, mail delivery included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const FORM_LIMIT: usize = 256 * 1024;

/// Tracing, request timeout and form size limit for both front-ends.
pub(crate) fn with_common_layers(router: Router) -> Router {
    router
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .layer(DefaultBodyLimit::max(FORM_LIMIT))
}

/// Log filter shared by both binaries; `RUST_LOG` wins when set.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,ceres_console=debug,tower_http=info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load the instance env file, start logging, then report how the load went.
///
/// The file is read first so that a `RUST_LOG` it sets takes effect.
pub fn init_with_instance_env() -> usize {
    let path = ceres_cli::config::instance_env_path();
    let loaded = ceres_cli::config::load_instance_env(&path);
    init_tracing();
    report_instance_env(&path, loaded)
}

fn report_instance_env(path: &Path, loaded: ceres_cli::Result<usize>) -> usize {
    match loaded {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read instance env");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_instance_env_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ceres_cli::config::load_instance_env(dir.path());
        assert!(loaded.is_err());
        assert_eq!(report_instance_env(dir.path(), loaded), 0);
        assert_eq!(report_instance_env(dir.path(), Ok(2)), 2);
    }

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr(":8091"), "0.0.0.0:8091");
        assert_eq!(normalize_listen_addr(" 127.0.0.1:9000 "), "127.0.0.1:9000");
    }
}

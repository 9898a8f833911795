//! CERES operator console.

use std::sync::Arc;

use anyhow::Result;
use ceres_console::server::{self, ConsoleState};
use ceres_console::{normalize_listen_addr, BasicAuth};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    ceres_console::init_with_instance_env();

    let auth = BasicAuth::from_env("CERES Console")?;
    let state = Arc::new(ConsoleState::from_env()?);
    info!(
        config = %state.settings.path().display(),
        ceres = %state.ceres_bin.display(),
        "Starting CERES console"
    );

    let addr = normalize_listen_addr(&ceres_cli::config::env_or(
        "CERES_CONSOLE_LISTEN",
        server::DEFAULT_LISTEN,
    ));
    server::run_server(state, auth, &addr).await
}

//! CERES mail UI.

use std::sync::Arc;

use anyhow::Result;
use ceres_console::mail_ui::{self, MailUiState};
use ceres_console::{normalize_listen_addr, BasicAuth};

#[tokio::main]
async fn main() -> Result<()> {
    ceres_console::init_with_instance_env();

    let auth = BasicAuth::from_env("CERES UI")?;
    let state = Arc::new(MailUiState::from_env()?);
    let addr = normalize_listen_addr(&ceres_cli::config::env_or(
        "CERES_UI_LISTEN",
        mail_ui::DEFAULT_LISTEN,
    ));
    mail_ui::run_server(state, auth, &addr).await
}

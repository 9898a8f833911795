use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ceres_cli::sso::{self, KeycloakClient, KeycloakUser, DEFAULT_KEYCLOAK_URL, DEFAULT_REALM};
use ceres_cli::ui;

use super::Platform;

const SETUP_LINK_LIFESPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// User onboarding through Keycloak.
#[derive(Args)]
pub struct OnboardingCommand {
    #[command(subcommand)]
    action: OnboardingAction,
}

#[derive(Subcommand)]
enum OnboardingAction {
    /// Create a user and email a password setup link.
    CreateUser(CreateUser),
}

#[derive(Args)]
struct CreateUser {
    #[arg(long, env = "CERES_KEYCLOAK_URL", default_value = DEFAULT_KEYCLOAK_URL)]
    keycloak_url: String,

    #[arg(long, default_value = DEFAULT_REALM)]
    realm: String,

    /// Skip TLS verification (self-signed ingress).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    insecure_tls: bool,

    #[arg(long)]
    username: String,

    #[arg(long)]
    email: String,

    #[arg(long)]
    first_name: Option<String>,

    #[arg(long)]
    last_name: Option<String>,
}

impl OnboardingCommand {
    pub async fn run(&self) -> Result<()> {
        match &self.action {
            OnboardingAction::CreateUser(args) => args.run().await,
        }
    }
}

impl CreateUser {
    async fn run(&self) -> Result<()> {
        let username = self.username.trim();
        let email = self.email.trim();
        if username.is_empty() {
            anyhow::bail!("--username is required");
        }
        if email.is_empty() {
            anyhow::bail!("--email is required");
        }

        let platform = Platform::from_env();
        let (admin_user, admin_password) = sso::admin_credentials(&platform.cluster).await?;
        let client = KeycloakClient::new(
            &self.keycloak_url,
            &self.realm,
            &admin_user,
            &admin_password,
            self.insecure_tls,
        )?;

        if let Some(existing) = client.find_user_by_username(username).await? {
            ui::print_success(&format!(
                "User already exists: {} ({})",
                existing.username,
                existing.email.as_deref().unwrap_or("-")
            ));
            return Ok(());
        }

        let user = KeycloakUser {
            username: username.to_string(),
            enabled: true,
            email: Some(email.to_string()),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            required_actions: vec!["UPDATE_PASSWORD".to_string()],
            ..KeycloakUser::default()
        };
        let user_id = client.create_user(&user).await?;

        client
            .send_execute_actions_email(
                &user_id,
                &["UPDATE_PASSWORD".to_string()],
                None,
                Some(SETUP_LINK_LIFESPAN),
            )
            .await
            .context("User created but the setup email failed")?;

        ui::print_success(&format!(
            "Created user {username} and sent password setup email to {email}"
        ));
        Ok(())
    }
}

//! Ceres CLI.
//!
//! Deploys the Ceres platform onto a Kubernetes cluster and runs the
//! day-two operations around it.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use ceres_cli::config::{instance_env_path, load_instance_env};
use ceres_cli::ui;
use commands::backup::BackupCommand;
use commands::config::ConfigCommand;
use commands::deploy::DeployCommand;
use commands::mail::MailCommand;
use commands::onboarding::OnboardingCommand;
use commands::ops::{DiagnoseCommand, FixCommand, HealthCommand};
use commands::sso::SsoCommand;
use commands::status::StatusCommand;
use commands::upgrade::UpgradeCommand;
use commands::validate::ValidateCommand;
use commands::vpn::VpnCommand;

/// Ceres - platform deployment and operations.
#[derive(Parser)]
#[command(
    name = "ceres",
    version,
    about = "Ceres platform deployment and operations",
    long_about = "Deploy the Ceres platform to a Kubernetes cluster and operate it.\n\n\
                  `deploy` is idempotent: it installs a fresh cluster, reconciles an\n\
                  installed one, and upgrades one recorded at an older version."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the platform (install, reconcile or upgrade).
    Deploy(DeployCommand),
    /// Show deployment status.
    Status(StatusCommand),
    /// Manage the platform configuration.
    Config(ConfigCommand),
    /// Validate prerequisites.
    Validate(ValidateCommand),
    /// Manage the VPN connection.
    Vpn(VpnCommand),
    /// Run cluster diagnostics.
    Diagnose(DiagnoseCommand),
    /// Automatically fix failing pods.
    Fix(FixCommand),
    /// Add platform features (cert-manager, Velero, SSO, ...).
    Upgrade(UpgradeCommand),
    /// Manage backups.
    Backup(BackupCommand),
    /// Mail status and test delivery.
    Mail(MailCommand),
    /// Single sign-on.
    Sso(SsoCommand),
    /// Platform health check.
    Health(HealthCommand),
    /// User onboarding.
    Onboarding(OnboardingCommand),
}

#[tokio::main]
async fn main() {
    // Instance settings must be visible to clap's `env` lookups.
    let env_file = instance_env_path();
    let loaded = load_instance_env(&env_file);

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,ceres_cli=debug")
        } else {
            EnvFilter::new("warn,ceres_cli=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match loaded {
        Ok(count) if count > 0 => {
            tracing::debug!(path = %env_file.display(), count, "Loaded instance env");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(path = %env_file.display(), error = %e, "Cannot read instance env"),
    }

    if matches!(cli.command, Commands::Deploy(_)) {
        ui::print_banner();
    }

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Deploy(cmd) => cmd.run().await,
        Commands::Status(cmd) => cmd.run().await,
        Commands::Config(cmd) => cmd.run().await,
        Commands::Validate(cmd) => cmd.run().await,
        Commands::Vpn(cmd) => cmd.run().await,
        Commands::Diagnose(cmd) => cmd.run().await,
        Commands::Fix(cmd) => cmd.run().await,
        Commands::Upgrade(cmd) => cmd.run().await,
        Commands::Backup(cmd) => cmd.run().await,
        Commands::Mail(cmd) => cmd.run().await,
        Commands::Sso(cmd) => cmd.run().await,
        Commands::Health(cmd) => cmd.run().await,
        Commands::Onboarding(cmd) => cmd.run().await,
    }
}

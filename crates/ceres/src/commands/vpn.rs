use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ceres_cli::process::SystemRunner;
use ceres_cli::ui;
use ceres_cli::vpn::VpnClient;

/// WireGuard connection to the cluster network.
#[derive(Args)]
pub struct VpnCommand {
    #[command(subcommand)]
    action: VpnAction,
}

#[derive(Subcommand)]
enum VpnAction {
    /// Exchange keys with the server and connect.
    Setup {
        /// VPN server address.
        #[arg(long, env = "CERES_VPN_SERVER", default_value = "192.168.1.3")]
        server: String,
    },
    /// Show the tunnel state.
    Status,
    /// Bring the tunnel down.
    Disconnect,
}

impl VpnCommand {
    pub async fn run(&self) -> Result<()> {
        match &self.action {
            VpnAction::Setup { server } => {
                VpnClient::new(SystemRunner::new(), server)
                    .setup()
                    .await
                    .context("VPN setup failed")?;
            }
            VpnAction::Status => {
                let status = VpnClient::new(SystemRunner::new(), "")
                    .status()
                    .await
                    .context("VPN not connected")?;
                println!("{status}");
            }
            VpnAction::Disconnect => {
                VpnClient::new(SystemRunner::new(), "")
                    .disconnect()
                    .await
                    .context("VPN disconnect failed")?;
                ui::print_success("VPN disconnected");
            }
        }
        Ok(())
    }
}

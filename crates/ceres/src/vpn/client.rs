//! Workstation side: key exchange over ssh and `wg-quick`.

use tracing::info;

use super::{
    first_free_host, generate_keys, used_addresses, ClientConfig, DEFAULT_PORT, SERVER_INTERFACE,
};
use crate::error::{CeresError, Result};
use crate::process::{args, CommandRunner};
use crate::ui;

pub const TUNNEL_NAME: &str = "ceres";
pub const CONFIG_PATH: &str = "/etc/wireguard/ceres.conf";
const SERVER_KEY_PATH: &str = "/etc/wireguard/publickey";

pub struct VpnClient<R> {
    runner: R,
    server: String,
    port: u16,
}

impl<R: CommandRunner> VpnClient<R> {
    pub fn new(runner: R, server: &str) -> Self {
        Self {
            runner,
            server: server.to_string(),
            port: DEFAULT_PORT,
        }
    }

    fn ssh_target(&self) -> String {
        format!("root@{}", self.server)
    }

    async fn ssh(&self, command: &[&str]) -> Result<String> {
        let mut argv = vec![self.ssh_target()];
        argv.extend(args(command));
        Ok(self.runner.run_checked("ssh", &argv, None).await?.stdout)
    }

    async fn ensure_wireguard(&self) -> Result<()> {
        let installed = self
            .runner
            .run("wg", &args(&["--version"]), None)
            .await
            .is_ok_and(|out| out.success());
        if installed {
            Ok(())
        } else {
            Err(CeresError::CommandNotFound(
                "wg (install wireguard-tools: apt-get install wireguard, brew install wireguard-tools)"
                    .to_string(),
            ))
        }
    }

    /// Exchange keys with the server, write the tunnel config and bring it
    /// up. Returns the address assigned to this workstation.
    pub async fn setup(&self) -> Result<ClientConfig> {
        ui::print_section("VPN setup");
        self.ensure_wireguard().await?;

        ui::print_step("Fetching server public key");
        let server_public_key = self.ssh(&["cat", SERVER_KEY_PATH]).await?.trim().to_string();
        if server_public_key.is_empty() {
            return Err(CeresError::UnexpectedOutput {
                what: SERVER_KEY_PATH.to_string(),
                detail: "empty server public key".to_string(),
            });
        }

        ui::print_step("Generating client keys");
        let keys = generate_keys(&self.runner).await?;

        let used = self
            .ssh(&["wg", "show", SERVER_INTERFACE, "allowed-ips"])
            .await?;
        let address = first_free_host(&used_addresses(&used)).ok_or_else(|| {
            CeresError::Validation("no free client addresses on the VPN server".to_string())
        })?;

        ui::print_step(&format!("Registering peer {address}"));
        self.ssh(&[
            "wg",
            "set",
            SERVER_INTERFACE,
            "peer",
            &keys.public_key,
            "allowed-ips",
            &format!("{address}/32"),
        ])
        .await?;

        let config = ClientConfig {
            private_key: keys.private_key,
            address,
            server_public_key,
            endpoint_host: self.server.clone(),
            endpoint_port: self.port,
        };
        self.runner
            .run_checked(
                "sudo",
                &args(&["install", "-m", "600", "/dev/stdin", CONFIG_PATH]),
                Some(config.render().as_bytes()),
            )
            .await?;

        ui::print_step("Connecting");
        self.runner
            .run_checked("sudo", &args(&["wg-quick", "up", TUNNEL_NAME]), None)
            .await?;

        info!(address = %address, server = %self.server, "VPN connected");
        ui::print_success("VPN setup complete");
        ui::print_kv("VPN IP", &address.to_string());
        ui::print_info("Access services via their ClusterIP directly");
        Ok(config)
    }

    /// `wg show`.
    pub async fn status(&self) -> Result<String> {
        Ok(self
            .runner
            .run_checked("wg", &args(&["show"]), None)
            .await?
            .stdout)
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.runner
            .run_checked("sudo", &args(&["wg-quick", "down", TUNNEL_NAME]), None)
            .await?;
        Ok(())
    }
}

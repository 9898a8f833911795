//! Peer provisioning on the VPN server.

use std::net::Ipv4Addr;

use tracing::{debug, info};

use super::{
    first_free_host, generate_keys, parse_public_key, used_addresses, ClientConfig, DEFAULT_PORT,
    SERVER_INTERFACE,
};
use crate::error::{CeresError, Result};
use crate::process::{args, CommandRunner};

/// Registers new peers on the local `wg0` and renders their configs.
pub struct PeerProvisioner<R> {
    runner: R,
}

impl<R: CommandRunner> PeerProvisioner<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub async fn server_public_key(&self) -> Result<String> {
        let output = self
            .runner
            .run_checked("wg", &args(&["show", SERVER_INTERFACE]), None)
            .await?;
        parse_public_key(&output.stdout).ok_or_else(|| CeresError::UnexpectedOutput {
            what: format!("wg show {SERVER_INTERFACE}"),
            detail: "server public key not found".to_string(),
        })
    }

    /// Lowest unassigned peer address.
    pub async fn next_free_address(&self) -> Result<Ipv4Addr> {
        let listing = match self
            .runner
            .run_checked("wg", &args(&["show", SERVER_INTERFACE, "allowed-ips"]), None)
            .await
        {
            Ok(output) => output.stdout,
            Err(e) => {
                debug!(error = %e, "allowed-ips listing failed, parsing full wg show");
                self.runner
                    .run_checked("wg", &args(&["show", SERVER_INTERFACE]), None)
                    .await?
                    .stdout
            }
        };
        first_free_host(&used_addresses(&listing)).ok_or_else(|| {
            CeresError::Validation("no free client addresses in 10.8.0.0/24".to_string())
        })
    }

    /// Generate keys, register the peer and return its config.
    ///
    /// `address` of `None` takes the next free one; a port of 0 means
    /// 51820.
    pub async fn provision(
        &self,
        endpoint_host: &str,
        endpoint_port: u16,
        address: Option<Ipv4Addr>,
    ) -> Result<ClientConfig> {
        let address = match address {
            Some(ip) => ip,
            None => self.next_free_address().await?,
        };
        let endpoint_port = if endpoint_port == 0 {
            DEFAULT_PORT
        } else {
            endpoint_port
        };
        let server_public_key = self.server_public_key().await?;
        let keys = generate_keys(&self.runner).await?;

        self.runner
            .run_checked(
                "wg",
                &args(&[
                    "set",
                    SERVER_INTERFACE,
                    "peer",
                    &keys.public_key,
                    "allowed-ips",
                    &format!("{address}/32"),
                ]),
                None,
            )
            .await?;
        info!(address = %address, "VPN peer registered");

        Ok(ClientConfig {
            private_key: keys.private_key,
            address,
            server_public_key,
            endpoint_host: endpoint_host.to_string(),
            endpoint_port,
        })
    }
}

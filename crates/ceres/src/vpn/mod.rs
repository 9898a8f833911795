//! WireGuard access to the cluster network.
//!
//! The client side runs on an operator workstation and talks to the VPN
//! server over ssh. The server side runs next to `wg0` and provisions peers
//! for the console.

pub mod client;
pub mod server;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::error::{CeresError, Result};
use crate::process::{args, CommandRunner};

pub use self::client::VpnClient;
pub use self::server::PeerProvisioner;

pub const DEFAULT_PORT: u16 = 51820;
pub const SERVER_INTERFACE: &str = "wg0";
/// Cluster DNS service address.
pub const CLUSTER_DNS: &str = "10.43.0.10";
/// VPN subnet plus the pod and service CIDRs.
pub const ROUTED_NETWORKS: &str = "10.8.0.0/24, 10.42.0.0/16, 10.43.0.0/16";
pub const PERSISTENT_KEEPALIVE: u16 = 25;

const FIRST_HOST: u8 = 2;
const LAST_HOST: u8 = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// `wg genkey` piped into `wg pubkey`.
pub async fn generate_keys<R: CommandRunner + ?Sized>(runner: &R) -> Result<KeyPair> {
    let private_key = runner
        .run_checked("wg", &args(&["genkey"]), None)
        .await?
        .stdout
        .trim()
        .to_string();
    let public_key = runner
        .run_checked("wg", &args(&["pubkey"]), Some(private_key.as_bytes()))
        .await?
        .stdout
        .trim()
        .to_string();
    if private_key.is_empty() || public_key.is_empty() {
        return Err(CeresError::UnexpectedOutput {
            what: "wg genkey".to_string(),
            detail: "empty key".to_string(),
        });
    }
    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// A peer's `wg-quick` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub private_key: String,
    pub address: Ipv4Addr,
    pub server_public_key: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
}

impl ClientConfig {
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             Address = {}/24\n\
             DNS = {CLUSTER_DNS}\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}:{}\n\
             AllowedIPs = {ROUTED_NETWORKS}\n\
             PersistentKeepalive = {PERSISTENT_KEEPALIVE}\n",
            self.private_key,
            self.address,
            self.server_public_key,
            self.endpoint_host,
            self.endpoint_port,
        )
    }
}

/// Value of the `public key:` line of `wg show <iface>`.
#[must_use]
pub fn parse_public_key(wg_show: &str) -> Option<String> {
    wg_show
        .lines()
        .filter_map(|line| line.trim().strip_prefix("public key:"))
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
}

/// Addresses already assigned to peers, from either `wg show <iface>
/// allowed-ips` (`<key>\t10.8.0.2/32`) or plain `wg show <iface>`
/// (`allowed ips: 10.8.0.2/32`).
#[must_use]
pub fn used_addresses(output: &str) -> BTreeSet<Ipv4Addr> {
    output
        .lines()
        .map(|line| {
            let line = line.trim();
            line.strip_prefix("allowed ips:").unwrap_or(line)
        })
        .flat_map(|line| line.split(|c: char| c == '\t' || c == ' ' || c == ','))
        .filter_map(|field| field.split_once('/'))
        .filter_map(|(ip, _)| ip.parse::<Ipv4Addr>().ok())
        .collect()
}

/// Lowest host in `10.8.0.2..=10.8.0.254` not in `used`.
#[must_use]
pub fn first_free_host(used: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    (FIRST_HOST..=LAST_HOST)
        .map(|host| Ipv4Addr::new(10, 8, 0, host))
        .find(|ip| !used.contains(ip))
}

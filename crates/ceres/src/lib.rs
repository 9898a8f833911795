//! Ceres platform deployment library.
//!
//! Adapters over the cluster CLI and the chart package manager, the
//! deployment state record, the deployment orchestrator, and the managers
//! for backups, mail, single sign-on and VPN access.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod backup;
pub mod cluster;
pub mod config;
pub mod error;
pub mod helm;
pub mod mail;
pub mod orchestrator;
pub mod process;
pub mod sso;
pub mod state;
pub mod tls;
pub mod ui;
pub mod validator;
pub mod vpn;

pub use error::{CeresError, Result};

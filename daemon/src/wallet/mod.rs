//! Wallet session collaborator
//!
//! The daemon never touches keys or signatures. A UI client runs the actual
//! wallet library and announces the accounts it exposes; the session machine
//! only consumes the resulting identity.

mod client;

pub use client::ClientWallet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Identity;

/// Wallet connection mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Browser extension provider (MetaMask, Trust Wallet)
    Injected,
    /// WalletConnect relay
    WalletConnect,
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorKind::Injected => write!(f, "injected"),
            ConnectorKind::WalletConnect => write!(f, "wallet_connect"),
        }
    }
}

/// Passive wallet state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalletStatus {
    pub identity: Option<Identity>,
    pub connected: bool,
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no {0} wallet provider available, install MetaMask or Trust Wallet")]
    NoProvider(ConnectorKind),

    #[error("{0} wallet exposed no accounts")]
    NoAccounts(ConnectorKind),
}

#[async_trait]
pub trait WalletSession: Send + Sync {
    /// Connect through `connector`, returning the selected account
    async fn connect(&self, connector: ConnectorKind) -> Result<Identity, WalletError>;

    /// Resume a connection the user already authorized, without prompting.
    /// `None` when there is nothing to resume.
    async fn restore(&self) -> Result<Option<Identity>, WalletError>;

    /// Drop the current connection
    async fn disconnect(&self) -> Result<(), WalletError>;

    /// Current identity and connection flag
    fn status(&self) -> WalletStatus;
}

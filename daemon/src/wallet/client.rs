//! Wallet session driven by a UI client's wallet library
//!
//! The client announces which connectors are present and the accounts each
//! one exposes. Connecting picks the first account of the requested
//! connector; later announcements for the active connector change the
//! identity the way an EIP-1193 `accountsChanged` event does.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ConnectorKind, WalletError, WalletSession, WalletStatus};
use crate::session::Identity;

#[derive(Debug, Default)]
struct Inner {
    /// Accounts announced per connector, in wallet order
    accounts: HashMap<ConnectorKind, Vec<Identity>>,
    /// Connector of the live connection
    active: Option<ConnectorKind>,
}

#[derive(Debug, Default)]
pub struct ClientWallet {
    inner: Mutex<Inner>,
}

impl ClientWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the accounts a connector currently exposes. Blank entries are
    /// ignored. Returns true when this changes the connected identity.
    pub fn announce(&self, connector: ConnectorKind, accounts: &[String]) -> bool {
        let parsed: Vec<Identity> = accounts.iter().filter_map(|a| Identity::parse(a)).collect();

        let mut inner = self.lock();
        let before = Self::identity_of(&inner);
        debug!(%connector, count = parsed.len(), "accounts announced");
        inner.accounts.insert(connector, parsed);
        Self::identity_of(&inner) != before
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn identity_of(inner: &Inner) -> Option<Identity> {
        let connector = inner.active?;
        inner.accounts.get(&connector)?.first().cloned()
    }
}

#[async_trait]
impl WalletSession for ClientWallet {
    async fn connect(&self, connector: ConnectorKind) -> Result<Identity, WalletError> {
        let mut inner = self.lock();
        let accounts = inner
            .accounts
            .get(&connector)
            .ok_or(WalletError::NoProvider(connector))?;
        let identity = accounts
            .first()
            .cloned()
            .ok_or(WalletError::NoAccounts(connector))?;

        inner.active = Some(connector);
        info!(%connector, %identity, "wallet connected");
        Ok(identity)
    }

    /// Only the injected provider exposes authorized accounts without a
    /// prompt
    async fn restore(&self) -> Result<Option<Identity>, WalletError> {
        let mut inner = self.lock();
        if inner.active.is_some() {
            return Ok(Self::identity_of(&inner));
        }

        let connector = ConnectorKind::Injected;
        let Some(identity) = inner.accounts.get(&connector).and_then(|a| a.first()).cloned() else {
            return Ok(None);
        };

        inner.active = Some(connector);
        info!(%connector, %identity, "authorized wallet connection restored");
        Ok(Some(identity))
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        let mut inner = self.lock();
        if let Some(connector) = inner.active.take() {
            info!(%connector, "wallet disconnected");
        }
        Ok(())
    }

    fn status(&self) -> WalletStatus {
        let inner = self.lock();
        let identity = Self::identity_of(&inner);
        WalletStatus {
            connected: identity.is_some(),
            identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[tokio::test]
    async fn test_connect_without_provider_fails() {
        let wallet = ClientWallet::new();
        let result = wallet.connect(ConnectorKind::Injected).await;
        assert!(matches!(result, Err(WalletError::NoProvider(ConnectorKind::Injected))));
    }

    #[tokio::test]
    async fn test_connect_without_accounts_fails() {
        let wallet = ClientWallet::new();
        wallet.announce(ConnectorKind::WalletConnect, &[]);
        let result = wallet.connect(ConnectorKind::WalletConnect).await;
        assert!(matches!(result, Err(WalletError::NoAccounts(_))));
    }

    #[tokio::test]
    async fn test_connect_picks_first_account() {
        let wallet = ClientWallet::new();
        wallet.announce(ConnectorKind::Injected, &["0xABC".into(), "0xDEF".into()]);

        let identity = wallet.connect(ConnectorKind::Injected).await.unwrap();
        assert_eq!(identity.as_str(), "0xABC");
        assert!(wallet.status().connected);
    }

    #[tokio::test]
    async fn test_account_switch_reports_change() {
        let wallet = ClientWallet::new();
        wallet.announce(ConnectorKind::Injected, &["0xABC".into()]);
        wallet.connect(ConnectorKind::Injected).await.unwrap();

        assert!(!wallet.announce(ConnectorKind::Injected, &["0xABC".into()]));
        assert!(wallet.announce(ConnectorKind::Injected, &["0xDEF".into()]));
        assert_eq!(wallet.status().identity.unwrap().as_str(), "0xDEF");

        // Other connectors do not affect the live identity
        assert!(!wallet.announce(ConnectorKind::WalletConnect, &["0x123".into()]));
    }

    #[tokio::test]
    async fn test_restore_resumes_injected_accounts() {
        let wallet = ClientWallet::new();
        assert_eq!(assert_ok!(wallet.restore().await), None);

        wallet.announce(ConnectorKind::WalletConnect, &["0x123".into()]);
        assert_eq!(assert_ok!(wallet.restore().await), None);
        assert!(!wallet.status().connected);

        wallet.announce(ConnectorKind::Injected, &["0xABC".into(), "0xDEF".into()]);
        let identity = assert_ok!(wallet.restore().await).unwrap();
        assert_eq!(identity.as_str(), "0xABC");
        assert!(wallet.status().connected);

        // Later announcements on the restored connector switch identity
        assert!(wallet.announce(ConnectorKind::Injected, &["0xDEF".into()]));
    }

    #[tokio::test]
    async fn test_disconnect_clears_status() {
        let wallet = ClientWallet::new();
        wallet.announce(ConnectorKind::Injected, &["0xABC".into()]);
        wallet.connect(ConnectorKind::Injected).await.unwrap();

        assert_ok!(wallet.disconnect().await);
        assert_eq!(wallet.status(), WalletStatus::default());
    }
}

//! Session-level failures surfaced to UI clients

use thiserror::Error;

use super::machine::State;
use crate::registry::RegistryError;
use crate::store::StoreError;
use crate::voice::VoiceError;
use crate::wallet::WalletError;

/// Every failure the session machine reports. None of these are fatal; the
/// user retries by repeating the action.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect wallet: {0}")]
    WalletConnect(#[source] WalletError),

    #[error("failed to check wallet connection: {0}")]
    WalletCheck(#[source] WalletError),

    #[error("failed to disconnect wallet: {0}")]
    WalletDisconnect(#[source] WalletError),

    #[error("failed to create assistant: {0}")]
    AssistantCreation(#[from] RegistryError),

    #[error("assistant storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    #[error("voice session error: {0}")]
    VoiceSession(#[from] VoiceError),

    #[error("cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: State },

    #[error("an assistant creation is already in progress")]
    CreationPending,

    #[error("end the current call before choosing another assistant")]
    CallActive,

    #[error("no assistant with id {0}")]
    UnknownAssistant(String),

    #[error("{0} is required")]
    InvalidDraft(&'static str),

    #[error("request cancelled: {0}")]
    Cancelled(&'static str),
}

impl SessionError {
    /// Stable machine-readable code for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::WalletConnect(_) => "wallet_connect_failed",
            SessionError::WalletCheck(_) => "wallet_check_failed",
            SessionError::WalletDisconnect(_) => "wallet_disconnect_failed",
            SessionError::AssistantCreation(_) => "assistant_creation_failed",
            SessionError::StorageUnavailable(_) => "storage_unavailable",
            SessionError::VoiceSession(_) => "voice_session_failed",
            SessionError::InvalidTransition { .. } => "invalid_transition",
            SessionError::CreationPending => "creation_pending",
            SessionError::CallActive => "call_active",
            SessionError::UnknownAssistant(_) => "unknown_assistant",
            SessionError::InvalidDraft(_) => "invalid_draft",
            SessionError::Cancelled(_) => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::ConnectorKind;

    #[test]
    fn test_error_codes() {
        let err = SessionError::WalletConnect(WalletError::NoProvider(ConnectorKind::Injected));
        assert_eq!(err.code(), "wallet_connect_failed");
        assert!(err.to_string().contains("install MetaMask"));

        let err = SessionError::InvalidTransition {
            action: "select an assistant",
            state: State::Disconnected,
        };
        assert_eq!(err.to_string(), "cannot select an assistant while disconnected");
    }
}

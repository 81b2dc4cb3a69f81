//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Requests may carry a client-chosen `request_id` which is echoed on the
//! response;
//! responses to session actions arrive in completion order, not request
//! order.

use serde::{Deserialize, Serialize};

use crate::events::SessionEvent;
use crate::session::{Action, AssistantDraft, SessionError, Snapshot, State};
use crate::voice::VoiceEvent;
use crate::wallet::ConnectorKind;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Request the full session snapshot
    GetSession,

    /// Subscribe to session event notifications
    Subscribe,

    /// Connect the wallet through the given connector
    Connect { connector: ConnectorKind },

    /// Resume a wallet connection the user authorized earlier
    Restore,

    Disconnect,

    /// The client's wallet library reported its current accounts
    AccountsChanged {
        connector: ConnectorKind,
        accounts: Vec<String>,
    },

    /// Show the creation form
    CreateNew,

    CreateAssistant(AssistantDraft),

    SelectAssistant { id: String },

    ChooseAnother,

    /// Start or stop a call with the selected assistant
    ToggleCall,

    /// The client's voice SDK reported an event for the current call
    VoiceEvent { event: VoiceEvent },
}

/// A request as framed on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,

    #[serde(flatten)]
    pub request: Request,
}

/// A response as framed on the wire, carrying the id of its request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,

    #[serde(flatten)]
    pub response: Response,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Session snapshot after the request was applied
    Session(Snapshot),

    /// Subscription confirmed
    Subscribed,

    /// Report accepted, no snapshot attached
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: SessionEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current session state
    pub state: State,

    /// Whether a registry credential is configured
    pub registry_configured: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: State::default(),
            registry_configured: false,
            uptime_secs: 0,
        }
    }
}

impl Request {
    /// The session action this request maps to, if any
    pub fn into_action(self) -> Option<Action> {
        let action = match self {
            Request::GetSession => Action::Snapshot,
            Request::Connect { connector } => Action::Connect(connector),
            Request::Restore => Action::Restore,
            Request::Disconnect => Action::Disconnect,
            Request::AccountsChanged { .. } => Action::IdentityChanged,
            Request::CreateNew => Action::CreateNew,
            Request::CreateAssistant(draft) => Action::CreateAssistant(draft),
            Request::SelectAssistant { id } => Action::SelectAssistant(id),
            Request::ChooseAnother => Action::ChooseAnother,
            Request::ToggleCall => Action::ToggleCall,
            Request::Ping | Request::GetStatus | Request::Subscribe | Request::VoiceEvent { .. } => {
                return None
            }
        };
        Some(action)
    }
}

impl From<Result<Snapshot, SessionError>> for Response {
    fn from(result: Result<Snapshot, SessionError>) -> Self {
        match result {
            Ok(snapshot) => Response::Session(snapshot),
            Err(e) => Response::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_request_serialization() {
        let req = Request::Connect {
            connector: ConnectorKind::WalletConnect,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("connect"));
        assert!(json.contains("wallet_connect"));
    }

    #[test]
    fn test_create_request_deserialization() {
        let json = r#"{"type":"create_assistant","name":"Helper","system_prompt":"Be kind","first_message":"Hi"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req.into_action() {
            Some(Action::CreateAssistant(draft)) => {
                assert_eq!(draft.name, "Helper");
                assert!(draft.language_recognition_enabled);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_voice_event_request() {
        let json = r#"{"type":"voice_event","event":{"type":"transcript","role":"user","text":"hi"}}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match &req {
            Request::VoiceEvent { event } => assert_eq!(
                event,
                &VoiceEvent::Transcript {
                    role: Role::User,
                    text: "hi".into(),
                }
            ),
            other => panic!("unexpected request: {:?}", other),
        }
        assert!(req.into_action().is_none());
    }

    #[test]
    fn test_request_frame_carries_id() {
        let json = r#"{"request_id":7,"type":"select_assistant","id":"a1"}"#;
        let frame: RequestFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.request_id, Some(7));
        assert!(matches!(frame.request, Request::SelectAssistant { id } if id == "a1"));

        let json = r#"{"type":"ping"}"#;
        let frame: RequestFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.request_id, None);
        assert!(matches!(frame.request, Request::Ping));
    }

    #[test]
    fn test_response_frame_echoes_id() {
        let frame = ResponseFrame {
            request_id: Some(3),
            response: Response::Pong,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["request_id"], 3);
        assert_eq!(json["type"], "pong");

        let frame = ResponseFrame {
            request_id: None,
            response: Response::Accepted,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("request_id"));
    }

    #[test]
    fn test_restore_request() {
        let req: Request = serde_json::from_str(r#"{"type":"restore"}"#).unwrap();
        assert!(matches!(req.into_action(), Some(Action::Restore)));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("disconnected"));
    }

    #[test]
    fn test_error_response_from_session_error() {
        let resp: Response = Err(SessionError::CallActive).into();
        match resp {
            Response::Error { code, .. } => assert_eq!(code, "call_active"),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}

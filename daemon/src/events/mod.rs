//! Events broadcast by the session machine
//!
//! Subscribed UI clients receive these as push notifications. Call requests
//! double as instructions for the client's voice SDK.

use serde::{Deserialize, Serialize};

use crate::session::{Assistant, Identity, Message, State};
use crate::visualizer::Frame;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Top-level state changed
    StateChanged { from: State, to: State },

    /// Wallet connected as `identity`
    Connected { identity: Identity },

    /// Full reset to the disconnected state
    Disconnected,

    /// Assistant list (re)derived for the current identity
    AssistantsLoaded { assistants: Vec<Assistant> },

    /// A new assistant was registered and appended
    AssistantCreated { assistant: Assistant },

    AssistantSelected { assistant: Assistant },

    AssistantDeselected,

    /// The client should start a call with this assistant
    CallRequested { assistant_id: String },

    /// The client should hang up the current call
    CallStopRequested,

    CallStarted,

    CallEnded,

    /// New transcript line in the current conversation
    Transcript { message: Message },

    /// Visualizer frame for the current volume
    Visualizer { frame: Frame, svg: String },

    /// A transient, user-visible failure
    Error { code: String, message: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::StateChanged { from, to } => write!(f, "STATE_CHANGED ({} -> {})", from, to),
            SessionEvent::Connected { identity } => write!(f, "CONNECTED ({})", identity),
            SessionEvent::Disconnected => write!(f, "DISCONNECTED"),
            SessionEvent::AssistantsLoaded { assistants } => {
                write!(f, "ASSISTANTS_LOADED ({})", assistants.len())
            }
            SessionEvent::AssistantCreated { assistant } => {
                write!(f, "ASSISTANT_CREATED ({})", assistant.id)
            }
            SessionEvent::AssistantSelected { assistant } => {
                write!(f, "ASSISTANT_SELECTED ({})", assistant.id)
            }
            SessionEvent::AssistantDeselected => write!(f, "ASSISTANT_DESELECTED"),
            SessionEvent::CallRequested { assistant_id } => {
                write!(f, "CALL_REQUESTED ({})", assistant_id)
            }
            SessionEvent::CallStopRequested => write!(f, "CALL_STOP_REQUESTED"),
            SessionEvent::CallStarted => write!(f, "CALL_STARTED"),
            SessionEvent::CallEnded => write!(f, "CALL_ENDED"),
            SessionEvent::Transcript { message } => write!(f, "TRANSCRIPT ({:?})", message.role),
            SessionEvent::Visualizer { .. } => write!(f, "VISUALIZER"),
            SessionEvent::Error { code, .. } => write!(f, "ERROR ({})", code),
        }
    }
}

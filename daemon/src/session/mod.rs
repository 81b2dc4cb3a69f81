//! Assistant session state machine
//!
//! Drives the flow from wallet connection through assistant management to a
//! live conversation. Four top-level states:
//! - Disconnected: no identity, initial state
//! - Browsing: connected, assistant list shown
//! - Creating: connected, creation form shown
//! - Conversing: an assistant is selected, call idle or live

mod error;
mod machine;
mod model;

pub use error::SessionError;
pub use machine::{Action, Collaborators, Command, SessionMachine, Snapshot, State};
pub use model::{Assistant, AssistantDraft, Identity, Message, Role};

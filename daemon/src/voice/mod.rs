//! Voice session collaborator
//!
//! A voice session is one live call with an assistant. Starting a session
//! yields a subscription carrying call lifecycle, volume and transcript
//! events; dropping the subscription tears the stream down. Volume is a
//! level, not a log: only the latest reading is kept.

mod relay;

pub use relay::RelayVoice;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::session::Role;

/// Events streamed from an active voice session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// The call is connected and audio is flowing
    CallStarted,

    /// The call ended on the platform side
    CallEnded,

    /// Output audio level, nominally 0.0 to 1.0
    Volume { level: f32 },

    /// A finalized transcript line
    Transcript { role: Role, text: String },
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("a voice session is already active for assistant {0}")]
    AlreadyActive(String),
}

/// Receiving end of a voice session's event stream
#[derive(Debug)]
pub struct VoiceSubscription {
    /// Lifecycle and transcript events, delivered in order and never shed
    events: mpsc::UnboundedReceiver<VoiceEvent>,
    /// Latest output level
    volume: watch::Receiver<f32>,
}

impl VoiceSubscription {
    pub fn new(events: mpsc::UnboundedReceiver<VoiceEvent>, volume: watch::Receiver<f32>) -> Self {
        Self { events, volume }
    }

    /// Next event, or `None` once the session side has gone away. Pending
    /// lifecycle and transcript events are returned before a volume update.
    pub async fn recv(&mut self) -> Option<VoiceEvent> {
        tokio::select! {
            biased;
            event = self.events.recv() => event,
            Ok(()) = self.volume.changed() => {
                let level = *self.volume.borrow_and_update();
                Some(VoiceEvent::Volume { level })
            }
        }
    }
}

#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Begin a call with `assistant_id`
    async fn start_session(&self, assistant_id: &str) -> Result<VoiceSubscription, VoiceError>;

    /// End the current call, if any
    async fn stop_session(&self) -> Result<(), VoiceError>;
}

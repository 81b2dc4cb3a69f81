//! Voice session relayed through a UI client
//!
//! The call itself runs in the client's voice SDK. The daemon asks for calls
//! to start or stop through session events, and the client reports what the
//! SDK emits back over IPC. Reports are forwarded into the live subscription
//! without blocking; when no call is active they are dropped. Bursts of
//! volume reports collapse into the latest level.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::{VoiceError, VoiceEvent, VoiceSession, VoiceSubscription};

struct ActiveCall {
    assistant_id: String,
    events: mpsc::UnboundedSender<VoiceEvent>,
    volume: watch::Sender<f32>,
}

impl ActiveCall {
    fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[derive(Default)]
pub struct RelayVoice {
    active: Mutex<Option<ActiveCall>>,
}

impl RelayVoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a client-reported event to the live call. Returns false if
    /// the event was dropped.
    pub fn publish(&self, event: VoiceEvent) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(call) = active.as_ref() else {
            debug!(?event, "no active call, dropping voice event");
            return false;
        };

        let delivered = match event {
            VoiceEvent::Volume { level } => call.volume.send(level).is_ok(),
            event => call.events.send(event).is_ok(),
        };

        if !delivered {
            debug!(assistant_id = %call.assistant_id, "subscription closed");
            *active = None;
        }
        delivered
    }
}

#[async_trait]
impl VoiceSession for RelayVoice {
    async fn start_session(&self, assistant_id: &str) -> Result<VoiceSubscription, VoiceError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(call) = active.as_ref() {
            if !call.is_closed() {
                return Err(VoiceError::AlreadyActive(call.assistant_id.clone()));
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (volume_tx, volume_rx) = watch::channel(0.0);
        *active = Some(ActiveCall {
            assistant_id: assistant_id.to_string(),
            events: events_tx,
            volume: volume_tx,
        });

        info!(%assistant_id, "voice session relayed to client");
        Ok(VoiceSubscription::new(events_rx, volume_rx))
    }

    async fn stop_session(&self) -> Result<(), VoiceError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(call) = active.take() {
            info!(assistant_id = %call.assistant_id, "voice session stopped");
        }
        Ok(())
    }
}

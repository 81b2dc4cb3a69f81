//! Core session state machine implementation
//!
//! All mutations go through named transitions. The machine owns a single
//! event loop: client commands, registry completions and voice events are
//! processed one at a time, and registry calls run as background tasks so
//! they never block the loop.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::model::{Assistant, AssistantDraft, Identity, Message};
use crate::events::SessionEvent;
use crate::registry::{AssistantRegistry, RegistryError};
use crate::store::AssistantStore;
use crate::visualizer::{self, Signal};
use crate::voice::{VoiceEvent, VoiceSession, VoiceSubscription};
use crate::wallet::{ConnectorKind, WalletSession};

/// Top-level session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// No wallet connected
    Disconnected,
    /// Connected, choosing among stored assistants
    Browsing,
    /// Connected, filling in the creation form
    Creating,
    /// Connected with an assistant selected
    Conversing,
}

impl Default for State {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Disconnected => write!(f, "disconnected"),
            State::Browsing => write!(f, "browsing"),
            State::Creating => write!(f, "creating"),
            State::Conversing => write!(f, "conversing"),
        }
    }
}

/// Voice call progress within the Conversing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    /// Requested, waiting for the platform to report the call live
    Starting,
    Live,
}

/// User-initiated actions
#[derive(Debug)]
pub enum Action {
    Connect(ConnectorKind),
    /// Resume a wallet connection authorized in an earlier session
    Restore,
    Disconnect,
    /// The wallet reported a different account (or none)
    IdentityChanged,
    CreateNew,
    CreateAssistant(AssistantDraft),
    SelectAssistant(String),
    ChooseAnother,
    ToggleCall,
    /// Read-only: report the current snapshot
    Snapshot,
}

pub type Reply = oneshot::Sender<Result<Snapshot, SessionError>>;

/// An action plus the channel its outcome is reported on
#[derive(Debug)]
pub struct Command {
    pub action: Action,
    pub reply: Reply,
}

/// Everything a UI needs to render the current screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: State,
    pub identity: Option<Identity>,
    pub assistants: Vec<Assistant>,
    pub selected: Option<Assistant>,
    pub creation_pending: bool,
    pub call: Option<CallState>,
    pub conversation: Vec<Message>,
    /// Most recent transient failure, cleared by the next action
    pub last_error: Option<String>,
}

/// External collaborators the machine composes
pub struct Collaborators {
    pub wallet: Arc<dyn WalletSession>,
    pub store: Arc<dyn AssistantStore>,
    pub registry: Arc<dyn AssistantRegistry>,
    pub voice: Arc<dyn VoiceSession>,
}

enum Phase {
    Disconnected,
    Connected(Connection),
}

struct Connection {
    identity: Identity,
    assistants: Vec<Assistant>,
    view: View,
}

enum View {
    Browsing,
    Creating,
    Conversing(Conversation),
}

struct Conversation {
    assistant: Assistant,
    messages: Vec<Message>,
    call: CallState,
    volume: f32,
}

impl Conversation {
    fn new(assistant: Assistant) -> Self {
        Self {
            assistant,
            messages: Vec::new(),
            call: CallState::Idle,
            volume: 0.0,
        }
    }
}

struct PendingCreate {
    ticket: u64,
    reply: Option<Reply>,
    task: JoinHandle<()>,
}

struct CreationOutcome {
    ticket: u64,
    draft: AssistantDraft,
    result: Result<String, RegistryError>,
}

enum Input {
    Command(Command),
    Created(CreationOutcome),
    Voice(Option<VoiceEvent>),
}

/// The state machine that owns the session
pub struct SessionMachine {
    phase: Phase,
    collaborators: Collaborators,
    /// In-flight registry call, at most one
    pending: Option<PendingCreate>,
    next_ticket: u64,
    creation_tx: mpsc::Sender<CreationOutcome>,
    creation_rx: mpsc::Receiver<CreationOutcome>,
    /// Event stream of the live call
    voice_events: Option<VoiceSubscription>,
    last_error: Option<String>,
    state_entered_at: Instant,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionMachine {
    pub fn new(collaborators: Collaborators, event_tx: broadcast::Sender<SessionEvent>) -> Self {
        let (creation_tx, creation_rx) = mpsc::channel(8);
        Self {
            phase: Phase::Disconnected,
            collaborators,
            pending: None,
            next_ticket: 0,
            creation_tx,
            creation_rx,
            voice_events: None,
            last_error: None,
            state_entered_at: Instant::now(),
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> State {
        match &self.phase {
            Phase::Disconnected => State::Disconnected,
            Phase::Connected(conn) => match conn.view {
                View::Browsing => State::Browsing,
                View::Creating => State::Creating,
                View::Conversing(_) => State::Conversing,
            },
        }
    }

    /// Run the machine until the command channel closes
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<Command>) {
        info!("session machine started in Disconnected state");

        loop {
            let input = tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => break,
                },
                Some(outcome) = self.creation_rx.recv() => Input::Created(outcome),
                event = next_voice_event(&mut self.voice_events) => Input::Voice(event),
            };

            match input {
                Input::Command(command) => self.handle_command(command).await,
                Input::Created(outcome) => self.finish_create(outcome),
                Input::Voice(event) => self.handle_voice_event(event),
            }
        }

        self.shutdown().await;
    }

    /// Hang up any live call and abandon pending work
    pub async fn shutdown(&mut self) {
        self.teardown_call().await;
        self.cancel_pending("daemon shutting down");
        info!("session machine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let Command { action, reply } = command;
        debug!(?action, state = %self.state(), "handling action");

        if !matches!(action, Action::Snapshot) {
            self.last_error = None;
        }

        let result = match action {
            Action::Connect(connector) => self.connect(connector).await,
            Action::Restore => self.restore().await,
            Action::Disconnect => self.disconnect().await,
            Action::IdentityChanged => self.identity_changed().await,
            Action::CreateNew => self.create_new(),
            Action::CreateAssistant(draft) => match self.begin_create(draft) {
                Ok(()) => {
                    // Answered once the registry call completes
                    if let Some(pending) = self.pending.as_mut() {
                        pending.reply = Some(reply);
                    }
                    return;
                }
                Err(e) => Err(e),
            },
            Action::SelectAssistant(id) => self.select_assistant(&id),
            Action::ChooseAnother => self.choose_another(),
            Action::ToggleCall => self.toggle_call().await,
            Action::Snapshot => Ok(()),
        };

        self.respond(reply, result);
    }

    fn respond(&mut self, reply: Reply, result: Result<(), SessionError>) {
        let outcome = match result {
            Ok(()) => Ok(self.snapshot()),
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        };
        let _ = reply.send(outcome);
    }

    /// Connect the wallet and load the identity's assistants
    async fn connect(&mut self, connector: ConnectorKind) -> Result<(), SessionError> {
        if !matches!(self.phase, Phase::Disconnected) {
            return Err(self.invalid("connect a wallet"));
        }

        let identity = self
            .collaborators
            .wallet
            .connect(connector)
            .await
            .map_err(SessionError::WalletConnect)?;

        self.enter_connected(identity);
        Ok(())
    }

    /// Pick up an already-authorized wallet without prompting. A no-op when
    /// connected or when the wallet has nothing to resume.
    async fn restore(&mut self) -> Result<(), SessionError> {
        if matches!(self.phase, Phase::Connected(_)) {
            return Ok(());
        }

        let restored = self
            .collaborators
            .wallet
            .restore()
            .await
            .map_err(SessionError::WalletCheck)?;

        match restored {
            Some(identity) => {
                info!(%identity, "wallet connection restored");
                self.enter_connected(identity);
            }
            None => debug!("no authorized wallet account to restore"),
        }
        Ok(())
    }

    /// Full reset. Any live call is stopped before state is cleared.
    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.teardown_call().await;
        self.cancel_pending("wallet disconnected");

        let result = self
            .collaborators
            .wallet
            .disconnect()
            .await
            .map_err(SessionError::WalletDisconnect);

        if matches!(self.phase, Phase::Connected(_)) {
            self.reset();
        }
        result
    }

    /// Reconcile with the wallet's current account
    async fn identity_changed(&mut self) -> Result<(), SessionError> {
        let current = match &self.phase {
            Phase::Connected(conn) => conn.identity.clone(),
            Phase::Disconnected => {
                debug!("identity change ignored while disconnected");
                return Ok(());
            }
        };

        let status = self.collaborators.wallet.status();
        let next = if status.connected { status.identity } else { None };

        match next {
            Some(next) if next == current => {
                debug!(identity = %current, "identity unchanged");
            }
            Some(next) => {
                info!(from = %current, to = %next, "wallet identity switched");
                self.teardown_call().await;
                self.cancel_pending("wallet identity changed");
                self.enter_connected(next);
            }
            None => {
                info!(identity = %current, "wallet reported no account");
                self.teardown_call().await;
                self.cancel_pending("wallet disconnected");
                self.reset();
            }
        }
        Ok(())
    }

    fn create_new(&mut self) -> Result<(), SessionError> {
        match self.state() {
            State::Browsing => {
                self.set_view(View::Creating);
                Ok(())
            }
            State::Creating => Ok(()),
            _ => Err(self.invalid("open the creation form")),
        }
    }

    /// Validate the draft and start the registry call in the background
    fn begin_create(&mut self, draft: AssistantDraft) -> Result<(), SessionError> {
        if self.state() != State::Creating {
            return Err(self.invalid("create an assistant"));
        }
        if self.pending.is_some() {
            return Err(SessionError::CreationPending);
        }
        if let Some(field) = draft.missing_field() {
            return Err(SessionError::InvalidDraft(field));
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let registry = Arc::clone(&self.collaborators.registry);
        let tx = self.creation_tx.clone();
        let task = tokio::spawn(async move {
            let result = registry.create_assistant(&draft).await;
            let _ = tx.send(CreationOutcome { ticket, draft, result }).await;
        });

        info!(ticket, "assistant creation started");
        self.pending = Some(PendingCreate {
            ticket,
            reply: None,
            task,
        });
        Ok(())
    }

    fn finish_create(&mut self, outcome: CreationOutcome) {
        match &self.pending {
            Some(pending) if pending.ticket == outcome.ticket => {}
            _ => {
                debug!(ticket = outcome.ticket, "dropping stale creation result");
                return;
            }
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        let result = self.complete_create(outcome);
        let reply = match result {
            Ok(()) => Ok(self.snapshot()),
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        };

        if let Some(tx) = pending.reply {
            let _ = tx.send(reply);
        }
    }

    /// Append, persist and select a freshly registered assistant. Failures
    /// leave the form open and the stored list untouched.
    fn complete_create(&mut self, outcome: CreationOutcome) -> Result<(), SessionError> {
        let id = outcome.result?;
        let assistant = Assistant {
            id,
            name: outcome.draft.name,
        };

        let saved = match &mut self.phase {
            Phase::Connected(conn) if matches!(conn.view, View::Creating) => {
                conn.assistants.push(assistant.clone());
                self.collaborators.store.save(&conn.identity, &conn.assistants)
            }
            _ => return Err(SessionError::Cancelled("creation form closed")),
        };

        // The new assistant stays usable for this session even if persisting fails
        if let Err(e) = saved {
            self.record_error(&SessionError::StorageUnavailable(e));
        }

        info!(id = %assistant.id, name = %assistant.name, "assistant added");
        self.emit(SessionEvent::AssistantCreated {
            assistant: assistant.clone(),
        });
        self.set_view(View::Conversing(Conversation::new(assistant.clone())));
        self.emit(SessionEvent::AssistantSelected { assistant });
        Ok(())
    }

    fn select_assistant(&mut self, id: &str) -> Result<(), SessionError> {
        let assistant = match &self.phase {
            Phase::Connected(conn) if matches!(conn.view, View::Browsing) => conn
                .assistants
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| SessionError::UnknownAssistant(id.to_string()))?,
            _ => return Err(self.invalid("select an assistant")),
        };

        self.set_view(View::Conversing(Conversation::new(assistant.clone())));
        self.emit(SessionEvent::AssistantSelected { assistant });
        Ok(())
    }

    /// Back to the list. Refused while a call is starting or live.
    fn choose_another(&mut self) -> Result<(), SessionError> {
        match self.conversation().map(|conv| conv.call) {
            Some(CallState::Starting | CallState::Live) => Err(SessionError::CallActive),
            Some(CallState::Idle) => {
                self.set_view(View::Browsing);
                self.emit(SessionEvent::AssistantDeselected);
                Ok(())
            }
            None => Err(self.invalid("choose another assistant")),
        }
    }

    async fn toggle_call(&mut self) -> Result<(), SessionError> {
        let (assistant_id, call) = match self.conversation() {
            Some(conv) => (conv.assistant.id.clone(), conv.call),
            None => return Err(self.invalid("toggle a call")),
        };

        if call != CallState::Idle {
            return self.stop_call().await;
        }

        let subscription = self.collaborators.voice.start_session(&assistant_id).await?;
        self.voice_events = Some(subscription);
        if let Some(conv) = self.conversation_mut() {
            conv.messages.clear();
            conv.call = CallState::Starting;
            conv.volume = 0.0;
        }

        info!(%assistant_id, "call requested");
        self.emit(SessionEvent::CallRequested { assistant_id });
        Ok(())
    }

    /// Stop the voice session. Local call state is cleared even when the
    /// collaborator reports an error.
    async fn stop_call(&mut self) -> Result<(), SessionError> {
        let result = self.collaborators.voice.stop_session().await;
        self.emit(SessionEvent::CallStopRequested);
        self.mark_call_ended();
        result.map_err(SessionError::from)
    }

    async fn teardown_call(&mut self) {
        let call_active = self
            .conversation()
            .is_some_and(|conv| conv.call != CallState::Idle);

        if call_active || self.voice_events.is_some() {
            if let Err(e) = self.stop_call().await {
                warn!(error = %e, "voice session did not stop cleanly");
            }
        }
    }

    fn mark_call_ended(&mut self) {
        self.voice_events = None;

        let ended = match self.conversation_mut() {
            Some(conv) if conv.call != CallState::Idle => {
                conv.call = CallState::Idle;
                conv.volume = 0.0;
                conv.messages.clear();
                true
            }
            _ => false,
        };

        if ended {
            info!("call ended");
            self.emit(SessionEvent::CallEnded);
            self.emit_frame();
        }
    }

    fn handle_voice_event(&mut self, event: Option<VoiceEvent>) {
        let Some(event) = event else {
            debug!("voice subscription closed");
            self.mark_call_ended();
            return;
        };

        match event {
            VoiceEvent::CallStarted => {
                if let Some(conv) = self.conversation_mut() {
                    conv.call = CallState::Live;
                }
                info!("call live");
                self.emit(SessionEvent::CallStarted);
                self.emit_frame();
            }
            VoiceEvent::CallEnded => self.mark_call_ended(),
            VoiceEvent::Volume { level } => {
                if let Some(conv) = self.conversation_mut() {
                    conv.volume = visualizer::clamp_volume(level);
                }
                self.emit_frame();
            }
            VoiceEvent::Transcript { role, text } => {
                let message = Message { role, text };
                if let Some(conv) = self.conversation_mut() {
                    conv.messages.push(message.clone());
                }
                self.emit(SessionEvent::Transcript { message });
            }
        }
    }

    /// Build the render-ready view of the session
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            state: self.state(),
            identity: None,
            assistants: Vec::new(),
            selected: None,
            creation_pending: self.pending.is_some(),
            call: None,
            conversation: Vec::new(),
            last_error: self.last_error.clone(),
        };

        if let Phase::Connected(conn) = &self.phase {
            snapshot.identity = Some(conn.identity.clone());
            snapshot.assistants = conn.assistants.clone();
            if let View::Conversing(conv) = &conn.view {
                snapshot.selected = Some(conv.assistant.clone());
                snapshot.call = Some(conv.call);
                snapshot.conversation = conv.messages.clone();
            }
        }
        snapshot
    }

    fn enter_connected(&mut self, identity: Identity) {
        let assistants = match self.collaborators.store.load(&identity) {
            Ok(assistants) => assistants,
            Err(e) => {
                self.record_error(&SessionError::StorageUnavailable(e));
                Vec::new()
            }
        };

        info!(%identity, count = assistants.len(), "assistants loaded");
        self.emit(SessionEvent::Connected {
            identity: identity.clone(),
        });
        self.emit(SessionEvent::AssistantsLoaded {
            assistants: assistants.clone(),
        });

        self.set_phase(Phase::Connected(Connection {
            identity,
            assistants,
            view: View::Browsing,
        }));
    }

    fn reset(&mut self) {
        self.set_phase(Phase::Disconnected);
        self.emit(SessionEvent::Disconnected);
    }

    fn cancel_pending(&mut self, reason: &'static str) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            info!(ticket = pending.ticket, reason, "assistant creation abandoned");
            if let Some(tx) = pending.reply {
                let _ = tx.send(Err(SessionError::Cancelled(reason)));
            }
        }
    }

    fn conversation(&self) -> Option<&Conversation> {
        match &self.phase {
            Phase::Connected(Connection {
                view: View::Conversing(conv),
                ..
            }) => Some(conv),
            _ => None,
        }
    }

    fn conversation_mut(&mut self) -> Option<&mut Conversation> {
        match &mut self.phase {
            Phase::Connected(Connection {
                view: View::Conversing(conv),
                ..
            }) => Some(conv),
            _ => None,
        }
    }

    fn set_view(&mut self, view: View) {
        let from = self.state();
        if let Phase::Connected(conn) = &mut self.phase {
            conn.view = view;
        }
        self.after_transition(from);
    }

    fn set_phase(&mut self, phase: Phase) {
        let from = self.state();
        self.phase = phase;
        self.after_transition(from);
    }

    /// Log and broadcast a state change
    fn after_transition(&mut self, from: State) {
        let to = self.state();
        if from == to {
            return;
        }

        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;
        info!(
            from = %from,
            to = %to,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state_entered_at = Instant::now();
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit_frame(&self) {
        let signal = match self.conversation() {
            Some(conv) => Signal {
                volume: conv.volume,
                active: conv.call == CallState::Live,
            },
            None => Signal {
                volume: 0.0,
                active: false,
            },
        };

        let frame = visualizer::render(signal, &mut rand::thread_rng());
        let svg = frame.to_svg();
        self.emit(SessionEvent::Visualizer { frame, svg });
    }

    fn record_error(&mut self, error: &SessionError) {
        warn!(code = error.code(), error = %error, "session error");
        self.last_error = Some(error.to_string());
        self.emit(SessionEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.state(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}

async fn next_voice_event(subscription: &mut Option<VoiceSubscription>) -> Option<VoiceEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

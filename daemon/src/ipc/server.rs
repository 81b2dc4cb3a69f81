//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! session events to subscribed clients. Session actions are forwarded to
//! the state machine's command channel in arrival order; their replies are
//! awaited off the connection loop so a slow action (assistant creation)
//! does not hold up later requests on the same connection. Wallet and voice
//! reports go to the client-driven collaborators directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::session::{Action, Command, SessionError, Snapshot, State};
use crate::voice::RelayVoice;
use crate::wallet::ClientWallet;

use super::protocol::{DaemonStatus, Notification, Request, RequestFrame, Response, ResponseFrame};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Handles the server needs to reach the rest of the daemon
#[derive(Clone)]
pub struct Bridge {
    pub commands: mpsc::Sender<Command>,
    pub wallet: Arc<ClientWallet>,
    pub voice: Arc<RelayVoice>,
    pub events: broadcast::Sender<SessionEvent>,
    pub registry_configured: bool,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    bridge: Bridge,
    shutdown_tx: broadcast::Sender<()>,
}

/// Outcome of handling one request
enum Handled {
    Ready(Response),
    /// Handed to the session machine, answered when it replies
    Forwarded(oneshot::Receiver<Result<Snapshot, SessionError>>),
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, bridge: Bridge) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus {
                registry_configured: bridge.registry_configured,
                ..DaemonStatus::default()
            },
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            bridge,
            shutdown_tx,
        })
    }

    /// Update the session state reported by `get_status`
    pub async fn set_state(&self, state: State) {
        let mut server_state = self.state.write().await;
        let old_state = server_state.status.state;
        server_state.status.state = state;

        if old_state != state {
            debug!(from = %old_state, to = %state, "IPC server: state updated");
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref()
            .context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let bridge = self.bridge.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, bridge) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        bridge: Bridge,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so that pushing notifications
        // never interrupts a partially read request
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(16);
        let read_task = tokio::spawn(Self::read_frames(reader, frame_tx));

        let mut notifications: Option<broadcast::Receiver<SessionEvent>> = None;
        // Replies still owed by the session machine; dropped with the client
        let mut awaiting: JoinSet<ResponseFrame> = JoinSet::new();

        let result = loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("client disconnected");
                        break Ok(());
                    };

                    let reply = match serde_json::from_slice::<RequestFrame>(&frame) {
                        Ok(RequestFrame { request_id, request }) => {
                            debug!(?request_id, ?request, "received request");
                            if matches!(request, Request::Subscribe) && notifications.is_none() {
                                notifications = Some(bridge.events.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            match Self::process_request(request, &state, &bridge).await {
                                Handled::Ready(response) => ResponseFrame { request_id, response },
                                Handled::Forwarded(rx) => {
                                    awaiting.spawn(async move {
                                        ResponseFrame {
                                            request_id,
                                            response: answer(rx).await,
                                        }
                                    });
                                    continue;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse request");
                            ResponseFrame {
                                request_id: None,
                                response: Response::Error {
                                    code: "bad_request".to_string(),
                                    message: e.to_string(),
                                },
                            }
                        }
                    };

                    if let Err(e) = Self::send_message(&mut writer, &reply).await {
                        break Err(e);
                    }
                }

                Some(joined) = awaiting.join_next() => {
                    let reply = match joined {
                        Ok(reply) => reply,
                        Err(e) => {
                            warn!(?e, "reply task failed");
                            continue;
                        }
                    };
                    if let Err(e) = Self::send_message(&mut writer, &reply).await {
                        break Err(e);
                    }
                }

                event = next_notification(&mut notifications) => {
                    match event {
                        Ok(event) => {
                            let notification = Notification::Event { event };
                            if let Err(e) = Self::send_message(&mut writer, &notification).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "notification receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            notifications = None;
                        }
                    }
                }
            }
        };

        read_task.abort();
        result
    }

    /// Read length-prefixed frames until EOF or a protocol violation
    async fn read_frames(mut reader: OwnedReadHalf, frame_tx: mpsc::Sender<Vec<u8>>) {
        loop {
            match Self::read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if frame_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(?e, "dropping client");
                    return;
                }
            }
        }
    }

    /// Read one frame, `None` on clean EOF
    async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];

        // Read message length (4-byte little-endian)
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            bail!("message too large: {len} bytes");
        }

        // Read message body
        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;
        Ok(Some(msg_buf))
    }

    /// Send a length-prefixed JSON message
    async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: serde::Serialize,
    {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request. Session actions are queued on the machine before
    /// this returns.
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        bridge: &Bridge,
    ) -> Handled {
        match request {
            Request::Ping => Handled::Ready(Response::Pong),

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                Handled::Ready(Response::Status(state.status.clone()))
            }

            Request::Subscribe => Handled::Ready(Response::Subscribed),

            Request::VoiceEvent { event } => {
                if !bridge.voice.publish(event) {
                    debug!("voice event not delivered");
                }
                Handled::Ready(Response::Accepted)
            }

            Request::AccountsChanged { connector, accounts } => {
                if bridge.wallet.announce(connector, &accounts) {
                    Self::dispatch(bridge, Action::IdentityChanged).await
                } else {
                    Handled::Ready(Response::Accepted)
                }
            }

            other => match other.into_action() {
                Some(action) => Self::dispatch(bridge, action).await,
                None => Handled::Ready(Response::Error {
                    code: "unsupported".to_string(),
                    message: "request has no session action".to_string(),
                }),
            },
        }
    }

    /// Queue an action on the session machine
    async fn dispatch(bridge: &Bridge, action: Action) -> Handled {
        let (reply, rx) = oneshot::channel();

        if bridge.commands.send(Command { action, reply }).await.is_err() {
            return Handled::Ready(unavailable());
        }
        Handled::Forwarded(rx)
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Wait for the session machine's outcome of a forwarded action
async fn answer(rx: oneshot::Receiver<Result<Snapshot, SessionError>>) -> Response {
    match rx.await {
        Ok(result) => result.into(),
        Err(_) => unavailable(),
    }
}

fn unavailable() -> Response {
    Response::Error {
        code: "unavailable".to_string(),
        message: "session machine is not running".to_string(),
    }
}

async fn next_notification(
    notifications: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match notifications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::session::AssistantDraft;
    use crate::wallet::ConnectorKind;

    fn bridge() -> (Bridge, mpsc::Receiver<Command>) {
        let (commands, command_rx) = mpsc::channel(4);
        let (events, _) = broadcast::channel(16);
        let bridge = Bridge {
            commands,
            wallet: Arc::new(ClientWallet::new()),
            voice: Arc::new(RelayVoice::new()),
            events,
            registry_configured: true,
        };
        (bridge, command_rx)
    }

    fn snapshot(state: State) -> Snapshot {
        Snapshot {
            state,
            identity: None,
            assistants: Vec::new(),
            selected: None,
            creation_pending: false,
            call: None,
            conversation: Vec::new(),
            last_error: None,
        }
    }

    async fn resolve(handled: Handled) -> Response {
        match handled {
            Handled::Ready(response) => response,
            Handled::Forwarded(rx) => answer(rx).await,
        }
    }

    async fn read_body(stream: &mut UnixStream) -> Vec<u8> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        body
    }

    async fn roundtrip(stream: &mut UnixStream, request: &Request) -> Response {
        Server::send_message(stream, request).await.unwrap();
        serde_json::from_slice(&read_body(stream).await).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (bridge, _commands) = bridge();
        let server = Arc::new(Server::new(&socket, bridge).unwrap());

        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        assert!(matches!(roundtrip(&mut stream, &Request::Ping).await, Response::Pong));

        server.set_state(State::Browsing).await;
        match roundtrip(&mut stream, &Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.state, State::Browsing);
                assert!(status.registry_configured);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        server.shutdown().await;
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_actions_are_forwarded_to_machine() {
        let (bridge, mut commands) = bridge();
        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                assert!(matches!(command.action, Action::CreateNew));
                let _ = command.reply.send(Ok(snapshot(State::Creating)));
            }
        });

        match resolve(Server::process_request(Request::CreateNew, &state, &bridge).await).await {
            Response::Session(snap) => assert_eq!(snap.state, State::Creating),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unchanged_accounts_skip_machine() {
        let (bridge, mut commands) = bridge();
        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        let request = Request::AccountsChanged {
            connector: ConnectorKind::Injected,
            accounts: vec!["0xABC".into()],
        };
        let response = resolve(Server::process_request(request, &state, &bridge).await).await;

        assert!(matches!(response, Response::Accepted));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stopped_machine_reports_unavailable() {
        let (bridge, commands) = bridge();
        drop(commands);

        match resolve(Server::dispatch(&bridge, Action::Disconnect).await).await {
            Response::Error { code, .. } => assert_eq!(code, "unavailable"),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_create_does_not_block_connection() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (bridge, mut commands) = bridge();
        let server = Arc::new(Server::new(&socket, bridge).unwrap());

        // Holds the creation reply until a disconnect abandons it
        tokio::spawn(async move {
            let mut held = None;
            while let Some(command) = commands.recv().await {
                match command.action {
                    Action::CreateAssistant(_) => held = Some(command.reply),
                    Action::Disconnect => {
                        let _ = command.reply.send(Ok(snapshot(State::Disconnected)));
                        if let Some(reply) = held.take() {
                            let _ = reply.send(Err(SessionError::Cancelled("wallet disconnected")));
                        }
                    }
                    other => panic!("unexpected action: {:?}", other),
                }
            }
        });

        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        let create = RequestFrame {
            request_id: Some(1),
            request: Request::CreateAssistant(AssistantDraft {
                name: "Helper".into(),
                system_prompt: "Be brief".into(),
                first_message: "Hello".into(),
                language_recognition_enabled: true,
            }),
        };
        let disconnect = RequestFrame {
            request_id: Some(2),
            request: Request::Disconnect,
        };
        Server::send_message(&mut stream, &create).await.unwrap();
        Server::send_message(&mut stream, &disconnect).await.unwrap();

        let mut replies = HashMap::new();
        for _ in 0..2 {
            let body = tokio::time::timeout(Duration::from_secs(2), read_body(&mut stream))
                .await
                .expect("reply within timeout");
            let frame: ResponseFrame = serde_json::from_slice(&body).unwrap();
            replies.insert(frame.request_id.unwrap(), frame.response);
        }

        assert!(matches!(
            replies.get(&2),
            Some(Response::Session(snap)) if snap.state == State::Disconnected
        ));
        assert!(matches!(
            replies.get(&1),
            Some(Response::Error { code, .. }) if code == "cancelled"
        ));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribed_client_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (bridge, _commands) = bridge();
        let events = bridge.events.clone();
        let server = Arc::new(Server::new(&socket, bridge).unwrap());

        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        assert!(matches!(
            roundtrip(&mut stream, &Request::Subscribe).await,
            Response::Subscribed
        ));

        events.send(SessionEvent::CallStarted).unwrap();

        let notification: Notification = serde_json::from_slice(&read_body(&mut stream).await).unwrap();
        assert!(matches!(
            notification,
            Notification::Event {
                event: SessionEvent::CallStarted
            }
        ));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (bridge, _commands) = bridge();
        let server = Arc::new(Server::new(&socket, bridge).unwrap());

        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        let body = br#"{"type":"teleport"}"#;
        stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();

        let response: Response = serde_json::from_slice(&read_body(&mut stream).await).unwrap();
        assert!(matches!(response, Response::Error { code, .. } if code == "bad_request"));

        // The connection survives a bad frame
        assert!(matches!(roundtrip(&mut stream, &Request::Ping).await, Response::Pong));
        server.shutdown().await;
    }
}

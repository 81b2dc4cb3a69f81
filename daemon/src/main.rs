//! web3-voice-daemon: session daemon for wallet-scoped voice assistants
//!
//! This daemon runs alongside a UI client and provides:
//! - Explicit state machine for the connect → select/create → converse flow
//! - Per-identity persistence of created assistants
//! - Assistant creation against the hosted voice-AI registry, keeping the
//!   API credential out of client code
//! - IPC server for the UI, with push notifications of session events
//!
//! Wallet signing and the audio pipeline stay in the client; the daemon
//! consumes the accounts and voice events the client reports.

mod config;
mod events;
mod ipc;
mod lifecycle;
mod registry;
mod session;
mod store;
mod visualizer;
mod voice;
mod wallet;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::SessionEvent;
use crate::ipc::{Bridge, Server};
use crate::lifecycle::ShutdownSignal;
use crate::registry::HttpRegistry;
use crate::session::{Collaborators, SessionMachine};
use crate::store::{AssistantStore, FileStore, MemoryStore};
use crate::voice::RelayVoice;
use crate::wallet::ClientWallet;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "web3-voice-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        registry = %config.registry.base_url,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // IPC server -> state machine
    let (command_tx, command_rx) = mpsc::channel(32);
    // State machine -> IPC server and subscribed clients
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(256);

    let store: Arc<dyn AssistantStore> = match FileStore::open(config.store_dir()) {
        Ok(store) => {
            info!(dir = ?store.dir(), "assistant store opened");
            Arc::new(store)
        }
        Err(e) => {
            error!(?e, "failed to open assistant store");
            warn!("continuing with in-memory assistant store - lists will not survive restart");
            Arc::new(MemoryStore::new())
        }
    };

    let registry_configured = config.registry.api_key.is_some();
    let registry = HttpRegistry::new(config.registry)
        .context("failed to build registry client")?;

    let wallet = Arc::new(ClientWallet::new());
    let voice = Arc::new(RelayVoice::new());

    let mut state_machine = SessionMachine::new(
        Collaborators {
            wallet: wallet.clone(),
            store,
            registry: Arc::new(registry),
            voice: voice.clone(),
        },
        event_tx.clone(),
    );

    let server = Server::new(
        &config.socket_path,
        Bridge {
            commands: command_tx,
            wallet,
            voice,
            events: event_tx.clone(),
            registry_configured,
        },
    )?;

    let mut status_rx = event_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the state machine (processes client commands)
        _ = state_machine.run(command_rx) => {
            info!("state machine exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the server's status view in sync with the machine
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(SessionEvent::StateChanged { to, .. }) => {
                        server_for_events.set_state(to).await;
                    }
                    Ok(event) => {
                        debug!(%event, "session event");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("session event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    state_machine.shutdown().await;
    server.shutdown().await;

    info!("web3-voice-daemon stopped");

    Ok(())
}

//! potato-daemon: voice companion daemon
//!
//! This daemon provides:
//! - Wake word gated speech capture with silence-based command finalization
//! - A session loop that sends each command to a local language model and
//!   speaks the reply while driving an expression indicator
//! - IPC server exposing the session snapshot to frontends
//!
//! Speech recognition is read from the console; speech output goes through
//! an optional external TTS command.

mod capture;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod services;
mod session;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::StateEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::services::{
    CommandSpeaker, ConsoleSpeaker, ConsoleTranscriber, GrantedPermission, OllamaResponder,
    Speaker,
};
use crate::session::{Services, SessionController};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "potato-daemon starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        model = %config.responder.model,
        wake_phrases = ?config.capture.wake_phrases,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // Capture machine + session controller -> IPC subscribers and the logger
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    let speaker: Arc<dyn Speaker> = match CommandSpeaker::from_command(&config.tts_command) {
        Some(speaker) => {
            info!(command = ?config.tts_command, "speaking through external command");
            Arc::new(speaker)
        }
        None => {
            info!("no TTS command configured, replies are printed");
            Arc::new(ConsoleSpeaker)
        }
    };

    let services = Services {
        speaker,
        responder: Arc::new(OllamaResponder::new(&config.responder)),
        permission: Arc::new(GrantedPermission),
    };

    let mut controller = SessionController::new(
        ConsoleTranscriber::new(),
        services,
        config.capture.clone(),
        config.session.clone(),
        event_tx.clone(),
    );

    let server = Server::new(&config.socket_path, controller.handle(), event_tx.clone())?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = controller.run() => {
            info!("session exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "state event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("state event logger exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    controller.shutdown();
    server.shutdown().await;

    info!("potato-daemon stopped");

    Ok(())
}

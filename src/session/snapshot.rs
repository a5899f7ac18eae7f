//! Read-only view of the session for the presentation layer

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::capture::CaptureState;

use super::controller::{ControlCommand, SessionInput};
use super::expression::Expression;

/// Everything a frontend needs to draw the companion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub capture_state: CaptureState,
    /// Whether the microphone is currently open
    pub capture_active: bool,
    pub expression: Expression,
    pub glyph: String,
    /// Human-readable status line
    pub status: String,
    /// Command being answered, or reply being spoken
    pub spoken_text: String,
    pub authorized: bool,
    pub listening_enabled: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            capture_state: CaptureState::default(),
            capture_active: false,
            expression: Expression::Idle,
            glyph: Expression::Idle.glyph().to_string(),
            status: "Initializing...".to_string(),
            spoken_text: String::new(),
            authorized: false,
            listening_enabled: true,
        }
    }
}

/// The session loop has exited
#[derive(Debug, thiserror::Error)]
#[error("session is not running")]
pub struct SessionUnavailable;

/// Cloneable handle for observing and steering a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control_tx: mpsc::Sender<SessionInput>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(super) fn new(
        control_tx: mpsc::Sender<SessionInput>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            control_tx,
            snapshot_rx,
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Pause or resume listening for the wake word
    pub async fn set_listening(&self, enabled: bool) -> Result<(), SessionUnavailable> {
        let command = if enabled {
            ControlCommand::Resume
        } else {
            ControlCommand::Pause
        };
        self.control_tx
            .send(SessionInput::Control(command))
            .await
            .map_err(|_| SessionUnavailable)
    }
}

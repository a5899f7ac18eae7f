//! Events module for session observers
//!
//! Structured events emitted by the capture state machine and the session
//! controller, broadcast to logging and to subscribed IPC clients.

use serde::{Deserialize, Serialize};

use crate::capture::CaptureState;
use crate::session::Expression;

/// Events emitted during a voice interaction cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// A recognition session opened the microphone
    CaptureStarted { session: u64 },

    /// A recognition session released the microphone
    CaptureStopped { session: u64 },

    /// The transcriber could not be started; capture stays off
    CaptureFailed { reason: String },

    /// The capture state machine changed state
    CaptureStateChanged {
        from: CaptureState,
        to: CaptureState,
    },

    /// A wake alias appeared in the transcript
    WakeWordDetected { phrase: String },

    /// The quiet interval elapsed and a command was produced
    CommandFinalized { command: String },

    /// The responder answered
    ResponseReady { expression: Expression },

    /// The responder failed; the apology is spoken instead
    ResponseFailed { reason: String },

    /// An utterance was handed to the speaker
    SpeechStarted,

    /// The speaker finished (or gave up on) the utterance
    SpeechFinished,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::CaptureStarted { session } => write!(f, "CAPTURE_STARTED (#{})", session),
            StateEvent::CaptureStopped { session } => write!(f, "CAPTURE_STOPPED (#{})", session),
            StateEvent::CaptureFailed { reason } => write!(f, "CAPTURE_FAILED ({})", reason),
            StateEvent::CaptureStateChanged { from, to } => {
                write!(f, "CAPTURE_STATE_CHANGED ({} -> {})", from, to)
            }
            StateEvent::WakeWordDetected { phrase } => write!(f, "WAKE_WORD_DETECTED ({})", phrase),
            StateEvent::CommandFinalized { command } => {
                write!(f, "COMMAND_FINALIZED ({} chars)", command.chars().count())
            }
            StateEvent::ResponseReady { expression } => write!(f, "RESPONSE_READY ({})", expression),
            StateEvent::ResponseFailed { reason } => write!(f, "RESPONSE_FAILED ({})", reason),
            StateEvent::SpeechStarted => write!(f, "SPEECH_STARTED"),
            StateEvent::SpeechFinished => write!(f, "SPEECH_FINISHED"),
        }
    }
}

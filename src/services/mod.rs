//! Collaborator services driven by the session
//!
//! The session never talks to audio hardware or a model directly. It goes
//! through the traits defined here:
//! - `Transcriber`: streaming speech-to-text with start/stop
//! - `Speaker`: text-to-speech playback with a completion signal
//! - `Responder`: text-in/text-out inference
//! - `PermissionProvider`: microphone + recognition authorization
//!
//! Concrete backends used by the daemon live in the submodules.

mod console;
mod ollama;
mod permission;
mod speaker;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use console::ConsoleTranscriber;
pub use ollama::OllamaResponder;
pub use permission::GrantedPermission;
pub use speaker::{CommandSpeaker, ConsoleSpeaker};

/// A single update from a streaming transcription session
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// Intermediate hypothesis for the whole session so far
    Partial(String),
    /// Last hypothesis; the session ends after this event
    Final(String),
    /// The recognizer failed; the session is over
    Error(CaptureError),
}

/// Errors raised by the capture side (audio engine + recognizer)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("audio engine failed to start: {0}")]
    EngineStart(String),

    #[error("transcription stream closed unexpectedly")]
    StreamClosed,

    #[error("recognizer error: {0}")]
    Recognizer(String),
}

/// Errors raised by the responder
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("model is not loaded: {0}")]
    NotReady(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("responder returned HTTP {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Errors raised by a speaker
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("cannot speak empty text")]
    EmptyUtterance,

    #[error("failed to launch speech command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("speech command exited with {0}")]
    Exit(std::process::ExitStatus),
}

/// Streaming speech-to-text engine
///
/// `start` opens one recognition session and hands back its event stream.
/// The stream ends when `stop` is called or after a `Final`/`Error` event.
pub trait Transcriber: Send + 'static {
    /// Begin capturing audio and return the session's transcript events
    fn start(&mut self) -> Result<mpsc::Receiver<TranscriptEvent>, CaptureError>;

    /// Release the audio input and end the recognition session
    fn stop(&mut self);

    /// Whether an audio session is currently open
    fn is_running(&self) -> bool;
}

/// Text-to-speech playback
#[async_trait]
pub trait Speaker: Send + Sync + 'static {
    /// Speak `text`, resolving once playback has finished or was stopped
    ///
    /// Calls never interleave: a second call waits for the first to end.
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;

    /// Interrupt the utterance currently playing, if any
    fn stop_speaking(&self);
}

/// Language model behind the assistant
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Load the model or check the backend is reachable
    async fn warm_up(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    /// Produce raw reply text for a user command
    async fn respond(&self, prompt: &str) -> Result<String, InferenceError>;
}

/// Microphone + speech recognition authorization
pub trait PermissionProvider: Send + Sync + 'static {
    /// Ask the platform for access; the answer is observed via `is_authorized`
    fn request_access(&self) {}

    /// Whether capture is currently authorized
    fn is_authorized(&self) -> bool;
}

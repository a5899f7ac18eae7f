//! Session controller
//!
//! Owns the capture state machine and sequences one interaction cycle:
//! wake word, command capture, inference, speech, then back to listening.
//! Inference and playback run in spawned tasks that report back through the
//! session input channel, so the controller task is the only writer of
//! session state. Capture is restarted only after the speaker is done.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureInput, CaptureState, CaptureStateMachine};
use crate::config::{CaptureConfig, SessionConfig};
use crate::events::StateEvent;
use crate::services::{
    InferenceError, PermissionProvider, Responder, SpeechError, Speaker, Transcriber,
};

use super::expression::Expression;
use super::reply::ModelReply;
use super::snapshot::{SessionHandle, SessionSnapshot};

const SESSION_CHANNEL_CAPACITY: usize = 16;

const STATUS_REQUESTING_PERMISSION: &str = "Requesting microphone permission...";
const STATUS_LOADING_MODEL: &str = "Loading model...";
const STATUS_MODEL_FAILED: &str = "Model failed to load";
const STATUS_AWAITING_WAKE: &str = "Waiting for wake word...";
const STATUS_LISTENING: &str = "Listening...";
const STATUS_THINKING: &str = "Thinking...";
const STATUS_SPEAKING: &str = "Speaking...";
const STATUS_ERROR: &str = "Error";
const STATUS_CAPTURE_FAILED: &str = "Microphone unavailable";
const STATUS_PAUSED: &str = "Paused";
const STATUS_STOPPED: &str = "Stopped";

/// Results of spawned work and requests from frontends
#[derive(Debug)]
pub enum SessionInput {
    ReplyReady {
        cycle: u64,
        result: Result<String, InferenceError>,
    },
    SpeechFinished {
        cycle: u64,
        result: Result<(), SpeechError>,
    },
    WarmUpFinished {
        result: Result<(), InferenceError>,
    },
    Control(ControlCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop listening for the wake word
    Pause,
    /// Resume listening, retrying model warm-up if it failed
    Resume,
}

/// Where the current interaction cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Thinking(u64),
    Speaking(u64),
}

/// External collaborators of a session
pub struct Services {
    pub speaker: Arc<dyn Speaker>,
    pub responder: Arc<dyn Responder>,
    pub permission: Arc<dyn PermissionProvider>,
}

/// Drives capture, inference and speech for one companion
pub struct SessionController<T: Transcriber> {
    capture: CaptureStateMachine<T>,
    capture_rx: mpsc::Receiver<CaptureInput>,
    speaker: Arc<dyn Speaker>,
    responder: Arc<dyn Responder>,
    permission: Arc<dyn PermissionProvider>,
    config: SessionConfig,
    expression: Expression,
    status: String,
    spoken_text: String,
    phase: Phase,
    /// Id of the latest interaction cycle
    cycle: u64,
    /// Whether the responder warmed up successfully
    ready: bool,
    listening_enabled: bool,
    /// Inference or playback task of the current cycle
    inflight: Option<JoinHandle<()>>,
    /// Responder warm-up in progress
    warm_up: Option<JoinHandle<()>>,
    input_tx: mpsc::Sender<SessionInput>,
    input_rx: mpsc::Receiver<SessionInput>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl<T: Transcriber> SessionController<T> {
    pub fn new(
        transcriber: T,
        services: Services,
        capture_config: CaptureConfig,
        config: SessionConfig,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        let (capture, capture_rx) =
            CaptureStateMachine::new(transcriber, capture_config, event_tx.clone());
        let (input_tx, input_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        Self {
            capture,
            capture_rx,
            speaker: services.speaker,
            responder: services.responder,
            permission: services.permission,
            config,
            expression: Expression::Idle,
            status: SessionSnapshot::default().status,
            spoken_text: String::new(),
            phase: Phase::Idle,
            cycle: 0,
            ready: false,
            listening_enabled: true,
            inflight: None,
            warm_up: None,
            input_tx,
            input_rx,
            snapshot_tx,
            event_tx,
        }
    }

    /// Handle for frontends; stays valid while the controller exists
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.input_tx.clone(), self.snapshot_tx.subscribe())
    }

    /// Authorize, warm up the responder, then process inputs until cancelled
    pub async fn run(&mut self) {
        info!("session started");

        self.await_authorization().await;
        self.capture.set_authorized(true);
        self.begin_warm_up();
        self.publish();

        loop {
            tokio::select! {
                Some(input) = self.capture_rx.recv() => self.on_capture_input(input),
                Some(input) = self.input_rx.recv() => self.on_session_input(input),
                else => break,
            }
        }

        info!("session stopped");
    }

    /// Release the microphone, cancel in-flight work and silence the speaker
    pub fn shutdown(&mut self) {
        info!("session shutting down");
        self.capture.stop();
        if let Some(task) = self.inflight.take() {
            task.abort();
        }
        if let Some(task) = self.warm_up.take() {
            task.abort();
        }
        self.speaker.stop_speaking();

        self.phase = Phase::Idle;
        self.expression = Expression::Idle;
        self.spoken_text.clear();
        self.set_status(STATUS_STOPPED);
        self.publish();
    }

    async fn await_authorization(&mut self) {
        self.set_status(STATUS_REQUESTING_PERMISSION);
        self.publish();

        self.permission.request_access();
        let mut waiting = false;
        while !self.permission.is_authorized() {
            if !waiting {
                info!(
                    interval = ?self.config.permission_poll_interval,
                    "microphone not authorized, polling"
                );
                waiting = true;
            }
            tokio::time::sleep(self.config.permission_poll_interval).await;
        }

        info!("microphone authorized");
    }

    /// Warm the responder up in the background; the loop keeps serving
    /// control requests meanwhile
    fn begin_warm_up(&mut self) {
        self.set_status(STATUS_LOADING_MODEL);
        if self.warm_up.is_some() {
            return;
        }

        let responder = Arc::clone(&self.responder);
        let input_tx = self.input_tx.clone();
        let deadline = self.config.response_timeout;
        self.warm_up = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(deadline, responder.warm_up()).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout(deadline)),
            };
            let _ = input_tx.send(SessionInput::WarmUpFinished { result }).await;
        }));
    }

    /// On failure the session idles with a sad face until resumed
    fn on_warm_up_finished(&mut self, result: Result<(), InferenceError>) {
        self.warm_up = None;

        match result {
            Ok(()) => {
                info!("responder warmed up");
                self.ready = true;
                if self.listening_enabled {
                    self.start_listening();
                } else {
                    self.set_status(STATUS_PAUSED);
                }
            }
            Err(e) => {
                error!(%e, "responder failed to load");
                self.ready = false;
                self.expression = Expression::Sad;
                self.set_status(STATUS_MODEL_FAILED);
            }
        }
    }

    fn start_listening(&mut self) {
        if !self.listening_enabled || self.phase != Phase::Idle {
            return;
        }

        match self.capture.start() {
            Ok(()) => {
                self.expression = Expression::Idle;
                self.set_status(STATUS_AWAITING_WAKE);
            }
            Err(e) => {
                warn!(%e, "capture unavailable");
                self.set_status(STATUS_CAPTURE_FAILED);
            }
        }
        self.publish();
    }

    fn on_capture_input(&mut self, input: CaptureInput) {
        let before = self.capture.state();
        let command = self.capture.handle_input(input);
        if self.capture.state() != before {
            self.apply_capture_state();
        }

        if let Some(e) = self.capture.start_failure() {
            warn!(%e, "capture is off until listening is resumed");
            self.set_status(STATUS_CAPTURE_FAILED);
        }

        if let Some(command) = command {
            self.dispatch(command);
        }
        self.publish();
    }

    /// Mirror the capture state on the face and status line
    fn apply_capture_state(&mut self) {
        match self.capture.state() {
            CaptureState::AwaitingWakeWord => {
                if !matches!(self.phase, Phase::Speaking(_)) {
                    self.expression = Expression::Idle;
                }
                self.set_status(STATUS_AWAITING_WAKE);
            }
            CaptureState::CapturingCommand => {
                self.expression = Expression::Listening;
                self.set_status(STATUS_LISTENING);
            }
            CaptureState::Processing => {
                self.expression = Expression::Thinking;
                self.set_status(STATUS_THINKING);
            }
        }
    }

    /// Hand a finalized command to the responder
    fn dispatch(&mut self, command: String) {
        self.cycle += 1;
        let cycle = self.cycle;
        self.phase = Phase::Thinking(cycle);
        self.expression = Expression::Thinking;
        self.set_status(STATUS_THINKING);
        self.spoken_text = command.clone();

        info!(cycle, %command, "sending command to responder");

        let responder = Arc::clone(&self.responder);
        let input_tx = self.input_tx.clone();
        let timeout = self.config.response_timeout;
        self.inflight = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, responder.respond(&command)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout(timeout)),
            };
            let _ = input_tx
                .send(SessionInput::ReplyReady { cycle, result })
                .await;
        }));
    }

    fn on_session_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::ReplyReady { cycle, result } => self.on_reply(cycle, result),
            SessionInput::SpeechFinished { cycle, result } => {
                self.on_speech_finished(cycle, result)
            }
            SessionInput::WarmUpFinished { result } => self.on_warm_up_finished(result),
            SessionInput::Control(ControlCommand::Pause) => self.pause(),
            SessionInput::Control(ControlCommand::Resume) => self.resume(),
        }
        self.publish();
    }

    fn on_reply(&mut self, cycle: u64, result: Result<String, InferenceError>) {
        if self.phase != Phase::Thinking(cycle) {
            debug!(cycle, "dropping reply of a finished cycle");
            return;
        }
        self.inflight = None;

        let utterance = match result {
            Ok(raw) => {
                let reply = ModelReply::parse(&raw);
                let expression = Expression::resolve(&reply.expression);
                debug!(label = %reply.expression, %expression, "reply expression");

                self.expression = expression;
                self.set_status(STATUS_SPEAKING);
                self.emit(StateEvent::ResponseReady { expression });
                reply.speech
            }
            Err(e) => {
                warn!(%e, cycle, "responder failed, apologizing");
                self.expression = Expression::Sad;
                self.set_status(STATUS_ERROR);
                self.emit(StateEvent::ResponseFailed {
                    reason: e.to_string(),
                });
                self.config.error_utterance.clone()
            }
        };

        self.speak(cycle, utterance);
    }

    fn speak(&mut self, cycle: u64, text: String) {
        self.phase = Phase::Speaking(cycle);
        self.spoken_text = text.clone();
        self.emit(StateEvent::SpeechStarted);

        let speaker = Arc::clone(&self.speaker);
        let input_tx = self.input_tx.clone();
        self.inflight = Some(tokio::spawn(async move {
            let result = speaker.speak(&text).await;
            let _ = input_tx
                .send(SessionInput::SpeechFinished { cycle, result })
                .await;
        }));
    }

    /// Close the cycle: reset the face and give the microphone back
    fn on_speech_finished(&mut self, cycle: u64, result: Result<(), SpeechError>) {
        if self.phase != Phase::Speaking(cycle) {
            debug!(cycle, "dropping speech completion of a finished cycle");
            return;
        }
        self.inflight = None;

        if let Err(e) = result {
            warn!(%e, cycle, "speech output failed");
        }
        self.emit(StateEvent::SpeechFinished);

        self.phase = Phase::Idle;
        self.expression = Expression::Idle;
        self.spoken_text.clear();
        self.set_status(STATUS_AWAITING_WAKE);

        if !self.listening_enabled {
            self.capture.stop();
            self.set_status(STATUS_PAUSED);
            return;
        }
        if let Err(e) = self.capture.complete_cycle() {
            warn!(%e, "capture did not restart after the reply");
            self.set_status(STATUS_CAPTURE_FAILED);
        }
    }

    fn pause(&mut self) {
        if !self.listening_enabled {
            return;
        }
        info!("listening paused");
        self.listening_enabled = false;

        // A running cycle finishes first; capture is stopped once it does
        if self.phase == Phase::Idle {
            if !self.capture.pending_text().is_empty() {
                debug!(discarded = self.capture.pending_text(), "dropping unfinished command");
            }
            self.capture.stop();
            self.expression = Expression::Idle;
            self.set_status(STATUS_PAUSED);
        }
    }

    fn resume(&mut self) {
        if self.listening_enabled && self.capture.is_capturing() {
            return;
        }
        info!("listening resumed");
        self.listening_enabled = true;

        if self.phase != Phase::Idle {
            return;
        }
        if !self.ready {
            // Capture starts once the warm-up reports back
            self.begin_warm_up();
            return;
        }
        self.start_listening();
    }

    fn set_status(&mut self, status: &str) {
        if self.status != status {
            debug!(status, "session status");
            self.status = status.to_string();
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            capture_state: self.capture.state(),
            capture_active: self.capture.is_capturing(),
            expression: self.expression,
            glyph: self.expression.glyph().to_string(),
            status: self.status.clone(),
            spoken_text: self.spoken_text.clone(),
            authorized: self.capture.is_authorized(),
            listening_enabled: self.listening_enabled,
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}

//! Core capture state machine
//!
//! Handles transitions between AwaitingWakeWord, CapturingCommand and
//! Processing based on transcript events, and bounds an open-ended speech
//! stream into a single command by waiting for transcript silence.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::CaptureConfig;
use crate::events::StateEvent;
use crate::services::{CaptureError, TranscriptEvent, Transcriber};

use super::timer::DeferredTimer;
use super::wake::WakeMatcher;

/// Queued inputs: transcript updates and timer fires
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// The three capture states; the machine cycles through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Passive listening until a wake phrase shows up in the transcript
    #[default]
    AwaitingWakeWord,
    /// Recording the command that follows the wake phrase
    CapturingCommand,
    /// Command handed off; audio is released until the cycle completes
    Processing,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::AwaitingWakeWord => write!(f, "AwaitingWakeWord"),
            CaptureState::CapturingCommand => write!(f, "CapturingCommand"),
            CaptureState::Processing => write!(f, "Processing"),
        }
    }
}

/// Everything the machine reacts to, delivered through one channel
#[derive(Debug)]
pub enum CaptureInput {
    /// Event from recognition session `session`
    Transcript { session: u64, event: TranscriptEvent },
    /// The finalization timer of generation `generation` fired
    QuietElapsed { generation: u64 },
    /// The restart backoff of generation `generation` fired
    BackoffElapsed { generation: u64 },
}

/// Wake-word gated capture of spoken commands
pub struct CaptureStateMachine<T: Transcriber> {
    transcriber: T,
    wake: WakeMatcher,
    config: CaptureConfig,
    state: CaptureState,
    /// Latest transcript text of the running session
    pending: String,
    authorized: bool,
    /// Why the last start attempt failed; cleared by a successful start
    start_failure: Option<CaptureError>,
    /// Id of the most recent recognition session
    session: u64,
    /// Forwards the running session's events into `input_tx`
    forwarder: Option<JoinHandle<()>>,
    finalize: DeferredTimer,
    backoff: DeferredTimer,
    input_tx: mpsc::Sender<CaptureInput>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl<T: Transcriber> CaptureStateMachine<T> {
    /// Create a machine and the receiver its inputs arrive on
    ///
    /// The owner must feed every input from the receiver back into
    /// `handle_input`, from a single task.
    pub fn new(
        transcriber: T,
        config: CaptureConfig,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> (Self, mpsc::Receiver<CaptureInput>) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let wake = WakeMatcher::new(&config.wake_phrases);
        debug!(phrases = ?wake.phrases(), "wake matcher configured");

        let machine = Self {
            transcriber,
            wake,
            config,
            state: CaptureState::AwaitingWakeWord,
            pending: String::new(),
            authorized: false,
            start_failure: None,
            session: 0,
            forwarder: None,
            finalize: DeferredTimer::new(),
            backoff: DeferredTimer::new(),
            input_tx,
            event_tx,
        };
        (machine, input_rx)
    }

    /// Get the current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Transcript text collected so far
    pub fn pending_text(&self) -> &str {
        &self.pending
    }

    /// Whether a recognition session currently holds the microphone
    pub fn is_capturing(&self) -> bool {
        self.forwarder.is_some()
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Error of the last failed start, if capture has not started since
    ///
    /// Restarts after a wake word or a backoff happen inside `handle_input`;
    /// this is how their failure reaches the owner.
    pub fn start_failure(&self) -> Option<&CaptureError> {
        self.start_failure.as_ref()
    }

    /// Record the microphone authorization; revoking it tears capture down
    pub fn set_authorized(&mut self, authorized: bool) {
        self.authorized = authorized;
        if !authorized {
            self.stop();
        }
    }

    /// Start capture unless it is running, unauthorized or a command is
    /// being processed. Those cases are no-ops, not errors.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if !self.authorized {
            debug!("capture start skipped, not authorized");
            return Ok(());
        }
        if self.forwarder.is_some() {
            debug!("capture already running");
            return Ok(());
        }
        if self.state == CaptureState::Processing {
            debug!("capture start skipped while processing");
            return Ok(());
        }

        self.backoff.cancel();

        let events = match self.transcriber.start() {
            Ok(events) => events,
            Err(e) => {
                warn!(%e, "failed to start capture");
                self.start_failure = Some(e.clone());
                self.emit(StateEvent::CaptureFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.start_failure = None;

        self.session += 1;
        let session = self.session;
        self.forwarder = Some(tokio::spawn(forward_transcripts(
            session,
            events,
            self.input_tx.clone(),
        )));

        info!(session, state = %self.state, "capture started");
        self.emit(StateEvent::CaptureStarted { session });
        Ok(())
    }

    /// Tear capture down and return to AwaitingWakeWord
    ///
    /// Safe to call in any state and more than once. Capture stays off until
    /// the next explicit `start`.
    pub fn stop(&mut self) {
        self.finalize.cancel();
        self.backoff.cancel();
        self.stop_session();
        self.pending.clear();
        self.start_failure = None;
        self.transition_to(CaptureState::AwaitingWakeWord);
    }

    /// Called once the response to a finalized command has been delivered
    pub fn complete_cycle(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Processing {
            debug!(state = %self.state, "cycle completed outside processing");
        }
        self.pending.clear();
        self.transition_to(CaptureState::AwaitingWakeWord);
        self.start()
    }

    /// Apply one input. Returns the finalized command, if this input
    /// produced one.
    pub fn handle_input(&mut self, input: CaptureInput) -> Option<String> {
        match input {
            CaptureInput::Transcript { session, event } => {
                self.handle_transcript_event(session, event);
                None
            }
            CaptureInput::QuietElapsed { generation } => self.handle_quiet_elapsed(generation),
            CaptureInput::BackoffElapsed { generation } => {
                self.handle_backoff_elapsed(generation);
                None
            }
        }
    }

    fn handle_transcript_event(&mut self, session: u64, event: TranscriptEvent) {
        if session != self.session || self.forwarder.is_none() {
            trace!(session, current = self.session, "dropping stale transcript event");
            return;
        }

        match event {
            TranscriptEvent::Partial(text) => self.handle_transcript(text),
            TranscriptEvent::Final(text) => {
                self.handle_transcript(text);
                // A wake word already replaced this session
                if session == self.session && self.forwarder.is_some() {
                    debug!(session, "recognition session finished");
                    self.handle_session_end();
                }
            }
            TranscriptEvent::Error(cause) => {
                warn!(%cause, state = %self.state, "recognition session failed");
                self.handle_session_end();
            }
        }
    }

    fn handle_transcript(&mut self, text: String) {
        match self.state {
            CaptureState::AwaitingWakeWord => {
                let phrase = self.wake.find(&text).map(str::to_owned);
                self.pending = text;

                if let Some(phrase) = phrase {
                    info!(%phrase, "wake word detected");
                    self.emit(StateEvent::WakeWordDetected { phrase });

                    // Fresh session so the command transcript starts empty
                    self.stop_session();
                    self.pending.clear();
                    self.transition_to(CaptureState::CapturingCommand);

                    if let Err(e) = self.start() {
                        warn!(%e, "could not restart capture for the command");
                        self.transition_to(CaptureState::AwaitingWakeWord);
                    }
                }
            }
            CaptureState::CapturingCommand => {
                trace!(%text, "command transcript updated");
                self.pending = text;
                self.finalize
                    .schedule(self.config.quiet_interval, &self.input_tx, |generation| {
                        CaptureInput::QuietElapsed { generation }
                    });
            }
            CaptureState::Processing => {
                trace!("transcript ignored while processing");
            }
        }
    }

    fn handle_session_end(&mut self) {
        self.stop_session();

        match self.state {
            CaptureState::AwaitingWakeWord => self.schedule_backoff(),
            CaptureState::CapturingCommand if !self.finalize.is_pending() => {
                debug!("command session ended with nothing to finalize");
                self.return_to_wake_word();
            }
            // A pending finalization still delivers the command
            _ => {}
        }
    }

    fn handle_quiet_elapsed(&mut self, generation: u64) -> Option<String> {
        if !self.finalize.take_fire(generation) {
            trace!(generation, "stale finalization timer");
            return None;
        }
        if self.state != CaptureState::CapturingCommand {
            return None;
        }
        if self.pending.trim().is_empty() {
            debug!("quiet interval elapsed with an empty transcript");
            if !self.is_capturing() {
                self.return_to_wake_word();
            }
            return None;
        }

        let command = std::mem::take(&mut self.pending);
        info!(%command, "command finalized");

        self.stop_session();
        self.transition_to(CaptureState::Processing);
        self.emit(StateEvent::CommandFinalized {
            command: command.clone(),
        });

        Some(command)
    }

    fn handle_backoff_elapsed(&mut self, generation: u64) {
        if !self.backoff.take_fire(generation) {
            trace!(generation, "stale backoff timer");
            return;
        }
        if self.state != CaptureState::AwaitingWakeWord {
            return;
        }

        info!("restarting capture after backoff");
        if let Err(e) = self.start() {
            warn!(%e, "capture restart failed, waiting for an explicit start");
        }
    }

    fn return_to_wake_word(&mut self) {
        self.finalize.cancel();
        self.pending.clear();
        self.transition_to(CaptureState::AwaitingWakeWord);
        self.schedule_backoff();
    }

    fn schedule_backoff(&mut self) {
        let delay = self.config.backoff_interval;
        debug!(?delay, "scheduling capture restart");
        self.backoff.schedule(delay, &self.input_tx, |generation| {
            CaptureInput::BackoffElapsed { generation }
        });
    }

    /// Release the microphone and drop the recognition session
    fn stop_session(&mut self) {
        let was_active = self.forwarder.is_some();

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.transcriber.is_running() {
            self.transcriber.stop();
        }

        if was_active {
            debug!(session = self.session, "capture stopped");
            self.emit(StateEvent::CaptureStopped {
                session: self.session,
            });
        }
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: CaptureState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }

        info!(from = %old_state, to = %new_state, "capture transition");
        self.state = new_state;
        self.emit(StateEvent::CaptureStateChanged {
            from: old_state,
            to: new_state,
        });
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting capture event");
        let _ = self.event_tx.send(event);
    }
}

impl<T: Transcriber> Drop for CaptureStateMachine<T> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.transcriber.is_running() {
            self.transcriber.stop();
        }
    }
}

/// Tag a session's transcript events and hand them to the machine
async fn forward_transcripts(
    session: u64,
    mut events: mpsc::Receiver<TranscriptEvent>,
    input_tx: mpsc::Sender<CaptureInput>,
) {
    while let Some(event) = events.recv().await {
        if input_tx
            .send(CaptureInput::Transcript { session, event })
            .await
            .is_err()
        {
            return;
        }
    }

    // The stream ended without the transcriber saying so
    let _ = input_tx
        .send(CaptureInput::Transcript {
            session,
            event: TranscriptEvent::Error(CaptureError::StreamClosed),
        })
        .await;
}

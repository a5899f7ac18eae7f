//! Console transcriber
//!
//! Stands in for a speech engine: stdin is read on a dedicated thread and
//! each line extends the transcript of the current session, the way a
//! streaming recognizer refines its hypothesis. An empty line ends the
//! session with a `Final` event.

use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{CaptureError, TranscriptEvent, Transcriber};

/// Buffered transcript updates per session
const SESSION_CHANNEL_CAPACITY: usize = 32;

/// Transcriber fed by lines typed on stdin
pub struct ConsoleTranscriber {
    shared: Arc<Mutex<ConsoleSession>>,
    reader_started: bool,
    running: bool,
}

/// State shared with the reader thread
#[derive(Default)]
struct ConsoleSession {
    /// Sink of the open session, if any
    sink: Option<mpsc::Sender<TranscriptEvent>>,
    /// Cumulative transcript of the open session
    transcript: String,
    /// stdin reached EOF
    closed: bool,
}

impl ConsoleTranscriber {
    /// Create a console transcriber; the reader thread starts lazily
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(ConsoleSession::default())),
            reader_started: false,
            running: false,
        }
    }

    fn spawn_reader(&mut self) -> Result<(), CaptureError> {
        if self.reader_started {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);

        thread::Builder::new()
            .name("console-transcriber".to_string())
            .spawn(move || {
                info!("console transcriber thread started");

                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => feed_line(&shared, &line),
                        Err(e) => {
                            warn!(?e, "failed to read console input");
                            fail_session(&shared, CaptureError::Recognizer(e.to_string()));
                            break;
                        }
                    }
                }

                close_input(&shared);
                info!("console transcriber thread stopped");
            })
            .map_err(|e| CaptureError::EngineStart(e.to_string()))?;

        self.reader_started = true;
        Ok(())
    }
}

impl Default for ConsoleTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for ConsoleTranscriber {
    fn start(&mut self) -> Result<mpsc::Receiver<TranscriptEvent>, CaptureError> {
        self.spawn_reader()?;

        let mut session = lock(&self.shared);
        if session.closed {
            return Err(CaptureError::EngineStart("console input closed".to_string()));
        }

        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        session.sink = Some(tx);
        session.transcript.clear();
        self.running = true;

        Ok(rx)
    }

    fn stop(&mut self) {
        let mut session = lock(&self.shared);
        session.sink = None;
        session.transcript.clear();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

fn lock(shared: &Mutex<ConsoleSession>) -> MutexGuard<'_, ConsoleSession> {
    // A panicking reader thread leaves plain data behind; keep using it
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turn one console line into a transcript event for the open session
fn feed_line(shared: &Mutex<ConsoleSession>, line: &str) {
    let mut session = lock(shared);
    let Some(sink) = session.sink.clone() else {
        debug!("console input ignored, capture not running");
        return;
    };

    let line = line.trim();
    let event = if line.is_empty() {
        session.sink = None;
        TranscriptEvent::Final(std::mem::take(&mut session.transcript))
    } else {
        if !session.transcript.is_empty() {
            session.transcript.push(' ');
        }
        session.transcript.push_str(line);
        TranscriptEvent::Partial(session.transcript.clone())
    };

    if sink.try_send(event).is_err() {
        warn!("transcript channel full or closed, dropping update");
    }
}

/// End the open session with a recognizer error
fn fail_session(shared: &Mutex<ConsoleSession>, cause: CaptureError) {
    let mut session = lock(shared);
    session.transcript.clear();
    if let Some(sink) = session.sink.take() {
        let _ = sink.try_send(TranscriptEvent::Error(cause));
    }
}

fn close_input(shared: &Mutex<ConsoleSession>) {
    let mut session = lock(shared);
    session.closed = true;
    if let Some(sink) = session.sink.take() {
        let _ = sink.try_send(TranscriptEvent::Error(CaptureError::StreamClosed));
    }
}

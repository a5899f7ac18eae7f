//! Test doubles for the collaborator services
//!
//! The speaker and responder doubles hold a clone of the transcriber double
//! so they can record whether the microphone was open while they ran.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::services::{
    CaptureError, InferenceError, PermissionProvider, Responder, SpeechError, Speaker,
    TranscriptEvent, Transcriber,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[derive(Default)]
struct MicState {
    sink: Option<mpsc::Sender<TranscriptEvent>>,
    running: bool,
    starts: usize,
    failing_starts: usize,
}

/// Scriptable transcriber; clones share one microphone
#[derive(Clone, Default)]
pub struct MockTranscriber {
    inner: Arc<Mutex<MicState>>,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, event: TranscriptEvent) {
        let state = lock(&self.inner);
        let sink = state.sink.as_ref().expect("no open recognition session");
        sink.try_send(event).expect("transcript channel full");
    }

    pub fn partial(&self, text: &str) {
        self.send(TranscriptEvent::Partial(text.to_string()));
    }

    pub fn finish(&self, text: &str) {
        self.send(TranscriptEvent::Final(text.to_string()));
    }

    pub fn fail(&self, cause: &str) {
        self.send(TranscriptEvent::Error(CaptureError::Recognizer(cause.to_string())));
    }

    /// Drop the event stream without a closing event
    pub fn hang_up(&self) {
        lock(&self.inner).sink = None;
    }

    pub fn fail_next_starts(&self, count: usize) {
        lock(&self.inner).failing_starts = count;
    }

    /// Number of successful starts
    pub fn starts(&self) -> usize {
        lock(&self.inner).starts
    }

    /// Whether the microphone is open
    pub fn is_live(&self) -> bool {
        lock(&self.inner).running
    }
}

impl Transcriber for MockTranscriber {
    fn start(&mut self) -> Result<mpsc::Receiver<TranscriptEvent>, CaptureError> {
        let mut state = lock(&self.inner);
        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            return Err(CaptureError::EngineStart("mock audio engine".to_string()));
        }

        let (tx, rx) = mpsc::channel(32);
        state.sink = Some(tx);
        state.running = true;
        state.starts += 1;
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut state = lock(&self.inner);
        state.sink = None;
        state.running = false;
    }

    fn is_running(&self) -> bool {
        lock(&self.inner).running
    }
}

/// Speaker that records utterances and takes `delay` to say each one
pub struct MockSpeaker {
    mic: MockTranscriber,
    delay: Duration,
    spoken: Mutex<Vec<String>>,
    overlaps: AtomicUsize,
    stops: AtomicUsize,
}

impl MockSpeaker {
    pub fn new(mic: MockTranscriber, delay: Duration) -> Self {
        Self {
            mic,
            delay,
            spoken: Mutex::new(Vec::new()),
            overlaps: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }

    /// Utterances started while the microphone was open
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Speaker for MockSpeaker {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        if self.mic.is_live() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        lock(&self.spoken).push(text.to_string());
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    fn stop_speaking(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Responder with queued answers
pub struct MockResponder {
    mic: MockTranscriber,
    delay: Duration,
    warm_up_delay: Duration,
    default_reply: String,
    replies: Mutex<VecDeque<Result<String, InferenceError>>>,
    prompts: Mutex<Vec<(String, Instant)>>,
    overlaps: AtomicUsize,
    failing_warm_ups: AtomicUsize,
}

impl MockResponder {
    pub fn new(mic: MockTranscriber, default_reply: &str) -> Self {
        Self {
            mic,
            delay: Duration::ZERO,
            warm_up_delay: Duration::ZERO,
            default_reply: default_reply.to_string(),
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            overlaps: AtomicUsize::new(0),
            failing_warm_ups: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_warm_up_delay(mut self, delay: Duration) -> Self {
        self.warm_up_delay = delay;
        self
    }

    /// Answer the next prompt with `reply` instead of the default
    pub fn push_reply(&self, reply: Result<String, InferenceError>) {
        lock(&self.replies).push_back(reply);
    }

    pub fn fail_warm_ups(&self, count: usize) {
        self.failing_warm_ups.store(count, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn prompt_times(&self) -> Vec<Instant> {
        lock(&self.prompts).iter().map(|(_, t)| *t).collect()
    }

    /// Requests made while the microphone was open
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn warm_up(&self) -> Result<(), InferenceError> {
        if !self.warm_up_delay.is_zero() {
            tokio::time::sleep(self.warm_up_delay).await;
        }
        let remaining = self.failing_warm_ups.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_warm_ups.store(remaining - 1, Ordering::SeqCst);
            return Err(InferenceError::NotReady("mock model missing".to_string()));
        }
        Ok(())
    }

    async fn respond(&self, prompt: &str) -> Result<String, InferenceError> {
        if self.mic.is_live() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        lock(&self.prompts).push((prompt.to_string(), Instant::now()));
        tokio::time::sleep(self.delay).await;

        let queued = lock(&self.replies).pop_front();
        queued.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}

/// Permission that the test grants explicitly
#[derive(Default)]
pub struct MockPermission {
    authorized: AtomicBool,
    requests: AtomicUsize,
}

impl MockPermission {
    pub fn new(authorized: bool) -> Self {
        Self {
            authorized: AtomicBool::new(authorized),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn grant(&self) {
        self.authorized.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PermissionProvider for MockPermission {
    fn request_access(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }
}

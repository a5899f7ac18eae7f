//! Generation-checked single-shot timer
//!
//! Scheduling aborts the previous sleep task and bumps a generation counter.
//! The fire message carries the generation it was scheduled with, and the
//! owner only acts on it when `take_fire` confirms it is still current, so a
//! fire that was already queued when the timer was rescheduled or cancelled
//! is discarded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Single-shot deferred message with at most one live instance
#[derive(Debug, Default)]
pub struct DeferredTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl DeferredTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending instance, then send `make(generation)` on `tx`
    /// after `delay`. Returns the generation of the new instance.
    pub fn schedule<T, F>(&mut self, delay: Duration, tx: &mpsc::Sender<T>, make: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        self.cancel();

        let generation = self.generation;
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(generation)).await;
        }));

        generation
    }

    /// Cancel the pending instance; its fire, if already queued, goes stale
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether an instance is scheduled and has not been consumed
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Consume a fire. Returns false for stale generations.
    pub fn take_fire(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for DeferredTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

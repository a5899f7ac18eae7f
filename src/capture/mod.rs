//! Capture module: wake word gating and command finalization
//!
//! Provides an explicit state machine with three states:
//! - AwaitingWakeWord: transcribing passively, looking for the wake phrase
//! - CapturingCommand: recording the command, finalized after a quiet interval
//! - Processing: command handed off, microphone released

mod machine;
mod timer;
mod wake;

pub use machine::{CaptureInput, CaptureState, CaptureStateMachine};

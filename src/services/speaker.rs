//! Speech output backends

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use super::{SpeechError, Speaker};

/// Speaks through an external TTS program (`say`, `espeak-ng`, ...)
///
/// The utterance is passed as the last argument. Playback is over when the
/// program exits.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    /// Held for the duration of one utterance so playback never overlaps
    turn: Mutex<()>,
    interrupt: Notify,
}

impl CommandSpeaker {
    /// Build a speaker from a command line; `None` when it is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            turn: Mutex::new(()),
            interrupt: Notify::new(),
        })
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyUtterance);
        }

        let _turn = self.turn.lock().await;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        debug!(program = %self.program, chars = text.chars().count(), "speaking");

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(SpeechError::Exit(status))
                }
            }
            _ = self.interrupt.notified() => {
                debug!("speech interrupted");
                let _ = child.kill().await;
                Ok(())
            }
        }
    }

    fn stop_speaking(&self) {
        self.interrupt.notify_waiters();
    }
}

/// Prints utterances to stdout; used when no TTS command is configured
#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

#[async_trait]
impl Speaker for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyUtterance);
        }
        info!(text, "speaking to console");
        println!("potato> {text}");
        Ok(())
    }

    fn stop_speaking(&self) {}
}

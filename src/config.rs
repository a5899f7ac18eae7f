//! Configuration loading and management
//!
//! Everything has a default; environment variables prefixed `POTATO_`
//! override individual values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Fixed instructions handed to the responder once per session
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are Potato, a friendly and expressive little robot.
Reply with a single JSON object and nothing else: no greeting, no explanation, no code fence.
The object must have exactly two keys:
- "speech": what you say out loud.
- "expression": your current mood, exactly one of "Idle", "Listening", "Thinking", "Happy", "Sad", "Surprised".

Example:
{
  "speech": "Hi, I'm Potato.",
  "expression": "Happy"
}"#;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub capture: CaptureConfig,
    pub session: SessionConfig,
    pub responder: ResponderConfig,

    /// TTS command line; empty prints replies to the console
    pub tts_command: Vec<String>,
}

/// Wake word and timing parameters of the capture state machine
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Aliases of the wake phrase, matched case-insensitively as substrings
    pub wake_phrases: Vec<String>,

    /// Transcript silence that finalizes a command
    pub quiet_interval: Duration,

    /// Delay before restarting a recognition session that ended on its own
    pub backoff_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            wake_phrases: vec!["ポテト".to_string(), "potato".to_string()],
            quiet_interval: Duration::from_millis(2000),
            backoff_interval: Duration::from_millis(2000),
        }
    }
}

/// Parameters of the orchestration loop
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often authorization is re-checked while denied
    pub permission_poll_interval: Duration,

    /// Deadline for a single responder call
    pub response_timeout: Duration,

    /// Spoken when the responder fails
    pub error_utterance: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            permission_poll_interval: Duration::from_millis(500),
            response_timeout: Duration::from_secs(60),
            error_utterance: "Sorry, something went wrong.".to_string(),
        }
    }
}

/// Responder backend settings
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub instructions: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:1.7b".to_string(),
            temperature: 0.6,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("potato");

        let socket_path = lookup("POTATO_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let mut capture = CaptureConfig::default();
        if let Some(phrases) = lookup("POTATO_WAKE_PHRASES") {
            let phrases: Vec<String> = phrases
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            anyhow::ensure!(!phrases.is_empty(), "POTATO_WAKE_PHRASES has no phrase");
            capture.wake_phrases = phrases;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "POTATO_QUIET_INTERVAL_MS")? {
            capture.quiet_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "POTATO_BACKOFF_INTERVAL_MS")? {
            capture.backoff_interval = Duration::from_millis(ms);
        }

        let mut session = SessionConfig::default();
        if let Some(ms) = parse_var::<u64, _>(&lookup, "POTATO_PERMISSION_POLL_MS")? {
            session.permission_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "POTATO_RESPONSE_TIMEOUT_SECS")? {
            session.response_timeout = Duration::from_secs(secs);
        }
        if let Some(utterance) = lookup("POTATO_ERROR_UTTERANCE") {
            session.error_utterance = utterance;
        }

        let mut responder = ResponderConfig::default();
        if let Some(url) = lookup("POTATO_OLLAMA_URL") {
            responder.base_url = url;
        }
        if let Some(model) = lookup("POTATO_OLLAMA_MODEL") {
            responder.model = model;
        }
        if let Some(temperature) = parse_var::<f32, _>(&lookup, "POTATO_TEMPERATURE")? {
            responder.temperature = temperature;
        }

        let tts_command = lookup("POTATO_TTS_COMMAND")
            .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            socket_path,
            data_dir,
            capture,
            session,
            responder,
            tts_command,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[("HOME", "/home/test")]).unwrap();

        assert!(config.socket_path.to_string_lossy().contains("potato"));
        assert_eq!(config.capture.wake_phrases, vec!["ポテト", "potato"]);
        assert_eq!(config.capture.quiet_interval, Duration::from_millis(2000));
        assert_eq!(config.capture.backoff_interval, Duration::from_millis(2000));
        assert_eq!(config.session.permission_poll_interval, Duration::from_millis(500));
        assert!(config.tts_command.is_empty());
        assert!(config.responder.instructions.contains("\"expression\""));
    }

    #[test]
    fn test_intervals_are_independent() {
        let config = load(&[
            ("HOME", "/home/test"),
            ("POTATO_QUIET_INTERVAL_MS", "1200"),
            ("POTATO_BACKOFF_INTERVAL_MS", "5000"),
        ])
        .unwrap();

        assert_eq!(config.capture.quiet_interval, Duration::from_millis(1200));
        assert_eq!(config.capture.backoff_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HOME", "/home/test"),
            ("POTATO_SOCKET", "/tmp/potato.sock"),
            ("POTATO_WAKE_PHRASES", "hey spud, spud ,"),
            ("POTATO_TTS_COMMAND", "espeak-ng -v en"),
            ("POTATO_OLLAMA_MODEL", "llama3"),
        ])
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/potato.sock"));
        assert_eq!(config.capture.wake_phrases, vec!["hey spud", "spud"]);
        assert_eq!(config.tts_command, vec!["espeak-ng", "-v", "en"]);
        assert_eq!(config.responder.model, "llama3");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = load(&[("HOME", "/home/test"), ("POTATO_QUIET_INTERVAL_MS", "soon")])
            .unwrap_err();
        assert!(err.to_string().contains("POTATO_QUIET_INTERVAL_MS"));
    }

    #[test]
    fn test_missing_home() {
        assert!(load(&[]).is_err());
    }
}

//! Facial expression shown by the companion

use serde::{Deserialize, Serialize};

/// The six expressions the presentation layer knows how to draw
///
/// Serialized with the exact labels the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Expression {
    #[default]
    Idle,
    Listening,
    Thinking,
    Happy,
    Sad,
    Surprised,
}

impl Expression {
    /// Exact, case-sensitive lookup of a model-provided label
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Idle" => Some(Self::Idle),
            "Listening" => Some(Self::Listening),
            "Thinking" => Some(Self::Thinking),
            "Happy" => Some(Self::Happy),
            "Sad" => Some(Self::Sad),
            "Surprised" => Some(Self::Surprised),
            _ => None,
        }
    }

    /// Map a model-provided label, falling back to Happy when unknown
    pub fn resolve(label: &str) -> Self {
        Self::from_label(label).unwrap_or(Self::Happy)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Listening => "Listening",
            Self::Thinking => "Thinking",
            Self::Happy => "Happy",
            Self::Sad => "Sad",
            Self::Surprised => "Surprised",
        }
    }

    /// Glyph for text-only frontends
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Idle => "😐",
            Self::Listening => "👂",
            Self::Thinking => "🤔",
            Self::Happy => "😄",
            Self::Sad => "😢",
            Self::Surprised => "😲",
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

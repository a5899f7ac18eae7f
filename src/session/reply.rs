//! Structured reply extraction from raw model output
//!
//! The model is asked for a bare JSON object but often wraps it in prose.
//! The outermost `{ ... }` span is decoded; anything that does not decode is
//! spoken as-is with a Thinking face.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Expression label used when the output carries no usable structure
pub const FALLBACK_EXPRESSION: &str = "Thinking";

/// What the model wants to say and how it feels about it
///
/// `expression` is the raw label; it is validated when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReply {
    pub speech: String,
    pub expression: String,
}

impl ModelReply {
    /// Extract a reply from raw model text. Never fails.
    pub fn parse(raw: &str) -> Self {
        match Self::extract(raw) {
            Some(reply) => {
                debug!(expression = %reply.expression, "structured reply decoded");
                reply
            }
            None => {
                warn!(raw_len = raw.len(), "reply degraded, speaking raw model output");
                Self {
                    speech: raw.to_string(),
                    expression: FALLBACK_EXPRESSION.to_string(),
                }
            }
        }
    }

    /// Decode the span from the first `{` to the last `}`, if there is one
    pub fn extract(raw: &str) -> Option<Self> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if start >= end {
            return None;
        }

        serde_json::from_str(&raw[start..=end]).ok()
    }
}

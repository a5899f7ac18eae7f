//! Responder backed by an Ollama-compatible chat API
//!
//! Sends the fixed instruction text as the system message followed by the
//! user's command, non-streaming, and returns the assistant message content
//! untouched. Structured parsing of that text happens in the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ResponderConfig;

use super::{InferenceError, Responder};

/// Chat message in Ollama's wire format
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Body of `POST /api/chat`
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

/// Body of `GET /api/tags`
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

/// Responder talking to a local Ollama server
pub struct OllamaResponder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    instructions: String,
}

impl OllamaResponder {
    /// Create a responder bound to the configured model and instructions
    pub fn new(config: &ResponderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            instructions: config.instructions.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn chat_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl Responder for OllamaResponder {
    async fn warm_up(&self) -> Result<(), InferenceError> {
        let response = self
            .client
            .get(self.endpoint("api/tags"))
            .send()
            .await
            .map_err(|e| InferenceError::NotReady(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::Status(response.status().as_u16()));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        if !has_model(&tags.models, &self.model) {
            return Err(InferenceError::NotReady(format!(
                "model {} is not installed",
                self.model
            )));
        }

        info!(model = %self.model, "responder ready");
        Ok(())
    }

    async fn respond(&self, prompt: &str) -> Result<String, InferenceError> {
        debug!(model = %self.model, prompt, "requesting chat completion");

        let response = self
            .client
            .post(self.endpoint("api/chat"))
            .json(&self.chat_request(prompt))
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InferenceError::Status(response.status().as_u16()));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        debug!(raw = %chat.message.content, "raw model output");
        Ok(chat.message.content)
    }
}

/// Ollama reports untagged models as `name:latest`
fn has_model(models: &[ModelEntry], wanted: &str) -> bool {
    models.iter().any(|entry| {
        entry.name == wanted
            || (!wanted.contains(':') && entry.name == format!("{wanted}:latest"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> OllamaResponder {
        OllamaResponder::new(&ResponderConfig {
            base_url: "http://localhost:11434/".to_string(),
            model: "qwen3:1.7b".to_string(),
            temperature: 0.6,
            instructions: "reply in JSON".to_string(),
        })
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(
            responder().endpoint("api/chat"),
            "http://localhost:11434/api/chat"
        );
    }

    #[test]
    fn test_chat_request_carries_instructions_then_prompt() {
        let responder = responder();
        let json = serde_json::to_value(responder.chat_request("hello")).unwrap();

        assert_eq!(json["model"], "qwen3:1.7b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "reply in JSON");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert!(json["options"]["temperature"].as_f64().unwrap() > 0.5);
    }

    #[test]
    fn test_chat_response_decoding() {
        let body = r#"{"model":"qwen3:1.7b","message":{"role":"assistant","content":"{\"speech\":\"hi\"}"},"done":true}"#;
        let chat: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(chat.message.content, r#"{"speech":"hi"}"#);
    }

    #[test]
    fn test_model_lookup() {
        let models = vec![
            ModelEntry {
                name: "qwen3:1.7b".to_string(),
            },
            ModelEntry {
                name: "llama3:latest".to_string(),
            },
        ];

        assert!(has_model(&models, "qwen3:1.7b"));
        assert!(has_model(&models, "llama3"));
        assert!(!has_model(&models, "qwen3"));
        assert!(!has_model(&models, "mistral"));
    }
}

//! # Canonical Chat-Completion Types
//!
//! This module defines the canonical wire shapes used between clients and the
//! gateway. The canonical dialect mirrors the widely deployed chat-completion
//! schema: requests carry a `model` and a `messages` array, responses carry
//! `choices` and `usage`, and streaming responses are a sequence of
//! `chat.completion.chunk` records terminated by a `[DONE]` sentinel.
//!
//! Dialect adapters translate between these types and each upstream
//! provider's native format; everything inside the gateway speaks canonical.
//!
//! Unknown request fields are preserved in [`ChatRequest::extra`] and passed
//! through to the provider untouched, so clients may use provider-specific
//! parameters without the gateway having to model them.
//!
//! ## Example
//!
//! ```rust
//! use manifold_core::models::{ChatRequest, Message};
//!
//! let request = ChatRequest {
//!     model: "production-chat".to_string(),
//!     messages: vec![
//!         Message::system("You are a helpful assistant."),
//!         Message::user("Hello!"),
//!     ],
//!     temperature: Some(0.7),
//!     max_tokens: Some(256),
//!     stream: Some(false),
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chat completion request in the canonical dialect.
///
/// The `model` field is interpreted by the dispatch pipeline as a route
/// name; the route decides which upstream provider and concrete model
/// serve the request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    /// Route name (or, on the provider wire, the concrete model)
    pub model: String,
    /// Conversation history to complete
    pub messages: Vec<Message>,
    /// Controls randomness (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether to stream the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Provider-specific fields passed through untouched
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions and context
    System,
    /// User input
    User,
    /// Model output
    Assistant,
}

/// Chat completion response in the canonical dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Unique identifier for the completion
    pub id: String,
    /// Object type, always "chat.completion"
    pub object: String,
    /// Unix timestamp of creation
    pub created: u64,
    /// Concrete model that produced the completion
    pub model: String,
    /// Generated completions
    pub choices: Vec<Choice>,
    /// Token usage reported by the provider, passed through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A generated completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of the choice in the response
    pub index: u32,
    /// The generated message
    pub message: Message,
    /// Reason why generation stopped
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One record of a streaming completion.
///
/// The first chunk of a stream carries `delta.role`, body chunks carry
/// `delta.content`, and the terminal chunk carries an empty delta with
/// `finish_reason` set. The `[DONE]` sentinel is a framing concern and is
/// not represented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    /// Object type, always "chat.completion.chunk"
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

/// A single choice inside a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// Incremental payload of a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl StreamChunk {
    /// Opening chunk announcing the assistant role.
    pub fn role_open(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_delta(
            id,
            model,
            Delta {
                role: Some(Role::Assistant),
                content: None,
            },
            None,
        )
    }

    /// Body chunk carrying a content fragment.
    pub fn content(
        id: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::with_delta(
            id,
            model,
            Delta {
                role: None,
                content: Some(text.into()),
            },
            None,
        )
    }

    /// Terminal chunk with an empty delta and a finish reason.
    pub fn finish(
        id: impl Into<String>,
        model: impl Into<String>,
        finish_reason: impl Into<String>,
    ) -> Self {
        Self::with_delta(id, model, Delta::default(), Some(finish_reason.into()))
    }

    fn with_delta(
        id: impl Into<String>,
        model: impl Into<String>,
        delta: Delta,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.into(),
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "model": "default",
            "messages": [{"role": "user", "content": "hi"}],
            "top_p": 0.9,
            "stop": ["\n"]
        });

        let request: ChatRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.extra.get("top_p"), Some(&serde_json::json!(0.9)));

        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["stop"], serde_json::json!(["\n"]));
    }

    #[test]
    fn delta_serializes_sparsely() {
        let chunk = StreamChunk::finish("c1", "m", "stop");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
    }
}

//! Anthropic dialect. The messages API differs from the canonical shape in
//! three ways this adapter bridges: system prompts are a top-level
//! parameter rather than messages, `max_tokens` is mandatory on the wire,
//! and responses carry an array of content blocks instead of a single
//! string. Streaming uses a typed event dialect (`message_start`,
//! `content_block_delta`, `message_delta`, `message_stop`) that is folded
//! into canonical delta chunks.

use crate::dialect::{Auth, ChunkStream, Dialect, DialectAdapter};
use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, Choice, Message, Role, StreamChunk, Usage};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Split the conversation into the top-level system parameter and the
/// user/assistant turns. Only the leading run of system messages is
/// promoted; a system message appearing mid-conversation is demoted to a
/// user turn so the transcript order survives.
fn split_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_lines = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        match message.role {
            Role::System if turns.is_empty() => system_lines.push(message.content.clone()),
            Role::System => turns.push(AnthropicMessage {
                role: "user".to_string(),
                content: message.content.clone(),
            }),
            Role::User => turns.push(AnthropicMessage {
                role: "user".to_string(),
                content: message.content.clone(),
            }),
            Role::Assistant => turns.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: message.content.clone(),
            }),
        }
    }

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n"))
    };
    (system, turns)
}

fn map_stop_reason(stop_reason: Option<String>) -> Option<String> {
    stop_reason.map(|reason| match reason.as_str() {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        other => other.to_string(),
    })
}

impl DialectAdapter for AnthropicAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Anthropic
    }

    fn endpoint_path(&self, _model: &str, _stream: bool) -> String {
        "/v1/messages".to_string()
    }

    fn auth(&self, credential: &str) -> Auth {
        Auth::Headers(vec![
            ("authorization", format!("Bearer {credential}")),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ])
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        target_model: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let (system, messages) = split_messages(&request.messages);

        let wire = AnthropicRequest {
            model: target_model.to_string(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            stream: request.stream,
        };
        Ok(serde_json::to_value(&wire)?)
    }

    fn translate_response(&self, body: serde_json::Value) -> Result<ChatResponse, ProviderError> {
        let response: AnthropicResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Adapter {
                message: format!("response is not messages shaped: {e}"),
            })?;

        let content = response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: map_stop_reason(response.stop_reason),
            }],
            usage: response.usage.map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
        })
    }

    fn stream_chunks(&self, response: reqwest::Response, model: &str) -> ChunkStream {
        let model = model.to_string();
        Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut stream_id = "anthropic-stream".to_string();
            let mut stream_model = model;
            let mut stop_reason: Option<String> = None;

            while let Some(chunk_result) = bytes_stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::from(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let event: serde_json::Value = match serde_json::from_str(data.trim()) {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(ProviderError::Adapter {
                                message: format!("unparseable stream event: {e}"),
                            });
                            return;
                        }
                    };

                    match event.get("type").and_then(|t| t.as_str()) {
                        Some("message_start") => {
                            if let Some(message) = event.get("message") {
                                if let Some(id) = message.get("id").and_then(|v| v.as_str()) {
                                    stream_id = id.to_string();
                                }
                                if let Some(m) = message.get("model").and_then(|v| v.as_str()) {
                                    stream_model = m.to_string();
                                }
                            }
                            yield Ok(StreamChunk::role_open(&stream_id, &stream_model));
                        }
                        Some("content_block_delta") => {
                            if let Some(text) = event
                                .pointer("/delta/text")
                                .and_then(|t| t.as_str())
                            {
                                yield Ok(StreamChunk::content(&stream_id, &stream_model, text));
                            }
                        }
                        Some("message_delta") => {
                            if let Some(reason) = event
                                .pointer("/delta/stop_reason")
                                .and_then(|r| r.as_str())
                            {
                                stop_reason =
                                    map_stop_reason(Some(reason.to_string()));
                            }
                        }
                        Some("message_stop") => {
                            let reason = stop_reason.take().unwrap_or_else(|| "stop".to_string());
                            yield Ok(StreamChunk::finish(&stream_id, &stream_model, reason));
                            return;
                        }
                        Some("error") => {
                            let message = event
                                .pointer("/error/message")
                                .and_then(|m| m.as_str())
                                .unwrap_or("upstream stream error")
                                .to_string();
                            yield Err(ProviderError::Adapter { message });
                            return;
                        }
                        // ping, content_block_start, content_block_stop
                        _ => {}
                    }
                }
            }
        })
    }
}

//! Gemini dialect. Conversations map onto `contents` with `user`/`model`
//! roles and text parts, system messages fold into `systemInstruction`, and
//! generation knobs live under `generationConfig`. The credential travels
//! as a `key` query parameter rather than a header.
//!
//! Streaming does not use SSE: `streamGenerateContent` answers with one
//! JSON array whose elements arrive incrementally. The adapter splits
//! complete top-level objects out of the byte stream as they land, holding
//! at most one unfinished object in its buffer.

use crate::dialect::{Auth, ChunkStream, Dialect, DialectAdapter};
use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, Choice, Message, Role, StreamChunk, Usage};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

pub struct GeminiAdapter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiParts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiParts {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn candidate_text(candidate: &GeminiCandidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Pull the next complete top-level JSON object out of `buffer`, draining
/// it together with any array framing (`[`, `,`, `]`, whitespace) that
/// precedes it. Returns `None` until a full object has arrived.
fn next_array_object(buffer: &mut String) -> Option<String> {
    loop {
        let bytes = buffer.as_bytes();
        let start = bytes
            .iter()
            .position(|b| !matches!(b, b'[' | b']' | b',' | b' ' | b'\t' | b'\r' | b'\n'))?;
        if bytes[start] != b'{' {
            // Drop stray bytes between objects and keep scanning.
            buffer.drain(..=start);
            continue;
        }

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, byte) in bytes[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if *byte == b'\\' {
                    escaped = true;
                } else if *byte == b'"' {
                    in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start + offset;
                        let object = buffer[start..=end].to_string();
                        buffer.drain(..=end);
                        return Some(object);
                    }
                }
                _ => {}
            }
        }
        // An object has started but not finished arriving
        return None;
    }
}

impl DialectAdapter for GeminiAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Gemini
    }

    fn endpoint_path(&self, model: &str, stream: bool) -> String {
        if stream {
            format!("/models/{model}:streamGenerateContent")
        } else {
            format!("/models/{model}:generateContent")
        }
    }

    fn auth(&self, credential: &str) -> Auth {
        Auth::Query {
            key: "key",
            value: credential.to_string(),
        }
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        _target_model: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut contents = Vec::new();
        let mut system_parts = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => system_parts.push(GeminiPart {
                    text: message.content.clone(),
                }),
                Role::User => contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart {
                        text: message.content.clone(),
                    }],
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts: vec![GeminiPart {
                        text: message.content.clone(),
                    }],
                }),
            }
        }

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        let wire = GeminiRequest {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(GeminiParts {
                    parts: system_parts,
                })
            },
            generation_config,
        };
        Ok(serde_json::to_value(&wire)?)
    }

    fn translate_response(&self, body: serde_json::Value) -> Result<ChatResponse, ProviderError> {
        let response: GeminiResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Adapter {
                message: format!("response is not generateContent shaped: {e}"),
            })?;

        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| ProviderError::Adapter {
                message: "response carries no candidates".to_string(),
            })?;

        Ok(ChatResponse {
            id: format!("gemini-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response
                .model_version
                .clone()
                .unwrap_or_else(|| "gemini".to_string()),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(candidate_text(candidate)),
                finish_reason: candidate
                    .finish_reason
                    .as_deref()
                    .map(map_finish_reason)
                    .or_else(|| Some("stop".to_string())),
            }],
            usage: response.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
        })
    }

    fn stream_chunks(&self, response: reqwest::Response, model: &str) -> ChunkStream {
        let model = model.to_string();
        Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let stream_id = format!("gemini-{}", uuid::Uuid::new_v4());
            let mut opened = false;

            while let Some(chunk_result) = bytes_stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::from(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(object) = next_array_object(&mut buffer) {
                    let piece: GeminiResponse = match serde_json::from_str(&object) {
                        Ok(piece) => piece,
                        Err(e) => {
                            yield Err(ProviderError::Adapter {
                                message: format!("unparseable stream element: {e}"),
                            });
                            return;
                        }
                    };

                    let Some(candidate) = piece.candidates.first() else {
                        continue;
                    };

                    if !opened {
                        opened = true;
                        yield Ok(StreamChunk::role_open(&stream_id, &model));
                    }

                    let text = candidate_text(candidate);
                    if !text.is_empty() {
                        yield Ok(StreamChunk::content(&stream_id, &model, text));
                    }

                    if let Some(reason) = candidate.finish_reason.as_deref() {
                        yield Ok(StreamChunk::finish(
                            &stream_id,
                            &model,
                            map_finish_reason(reason),
                        ));
                        return;
                    }
                }
            }
        })
    }
}

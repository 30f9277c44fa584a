//! OpenAI-compatible dialect: the canonical shapes *are* this wire format,
//! so translation is identity and streaming is a passthrough that reframes
//! the upstream SSE records. This adapter is the default for any provider
//! that is not recognized as Anthropic or Gemini.

use crate::dialect::{Auth, ChunkStream, Dialect, DialectAdapter};
use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};
use async_stream::stream;
use futures::StreamExt;

pub struct OpenAiAdapter;

impl DialectAdapter for OpenAiAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::OpenAi
    }

    fn endpoint_path(&self, _model: &str, _stream: bool) -> String {
        "/chat/completions".to_string()
    }

    fn auth(&self, credential: &str) -> Auth {
        Auth::Bearer(credential.to_string())
    }

    fn translate_request(
        &self,
        request: &ChatRequest,
        target_model: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut wire = request.clone();
        wire.model = target_model.to_string();
        Ok(serde_json::to_value(&wire)?)
    }

    fn translate_response(&self, body: serde_json::Value) -> Result<ChatResponse, ProviderError> {
        serde_json::from_value(body).map_err(|e| ProviderError::Adapter {
            message: format!("response is not chat.completion shaped: {e}"),
        })
    }

    fn stream_chunks(&self, response: reqwest::Response, _model: &str) -> ChunkStream {
        Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

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
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => {
                            yield Err(ProviderError::Adapter {
                                message: format!("unparseable stream record: {e}"),
                            });
                            return;
                        }
                    }
                }
            }
        })
    }
}

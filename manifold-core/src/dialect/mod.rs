//! # Dialect Adapters
//!
//! Every upstream provider speaks one of three wire dialects. An adapter
//! translates the canonical chat-completion shapes to and from a provider's
//! native format, names the chat endpoint, and states how the decrypted
//! credential is attached. Adapters are stateless: one static instance per
//! dialect serves every provider of that flavor.
//!
//! Dialect detection is a pure function of provider attributes (name and
//! base-URL pattern); providers whose API is OpenAI-shaped fall through to
//! the default adapter.

use crate::catalog::ProviderSpec;
use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, StreamChunk};
use futures::Stream;
use std::pin::Pin;

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// Lazy, one-shot stream of canonical chunks translated from an upstream
/// response body. Dropping it closes the upstream connection.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Wire dialect of an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Gemini,
}

/// How a decrypted credential is attached to an upstream request.
#[derive(Debug, Clone)]
pub enum Auth {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// Arbitrary header pairs
    Headers(Vec<(&'static str, String)>),
    /// Query-string parameter, Gemini convention
    Query { key: &'static str, value: String },
}

impl Auth {
    /// Apply the scheme to an outgoing request.
    pub fn apply(self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => builder.bearer_auth(token),
            Self::Headers(headers) => headers
                .into_iter()
                .fold(builder, |b, (name, value)| b.header(name, value)),
            Self::Query { key, value } => builder.query(&[(key, value)]),
        }
    }
}

/// The canonical adapter contract.
pub trait DialectAdapter: Send + Sync {
    /// Which dialect this adapter implements.
    fn dialect(&self) -> Dialect;

    /// Chat endpoint path, appended to the provider base URL.
    fn endpoint_path(&self, model: &str, stream: bool) -> String;

    /// Credential attachment for this dialect.
    fn auth(&self, credential: &str) -> Auth;

    /// Canonical request to provider wire format, with `model` replaced by
    /// the selector's pick.
    fn translate_request(
        &self,
        request: &ChatRequest,
        target_model: &str,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Provider response body to canonical response.
    fn translate_response(&self, body: serde_json::Value) -> Result<ChatResponse, ProviderError>;

    /// Provider stream to canonical chunk stream. The adapter buffers at
    /// most one chunk; the `[DONE]` sentinel is left to the caller's
    /// framing.
    fn stream_chunks(&self, response: reqwest::Response, model: &str) -> ChunkStream;
}

/// Detect the dialect of a provider from its attributes.
pub fn detect(spec: &ProviderSpec) -> Dialect {
    let name = spec.name.to_ascii_lowercase();
    let url = spec.base_url.to_ascii_lowercase();

    if name.contains("anthropic") || name.contains("claude") || url.contains("anthropic.com") {
        Dialect::Anthropic
    } else if name.contains("gemini")
        || url.contains("generativelanguage")
        || url.contains("googleapis.com")
    {
        Dialect::Gemini
    } else {
        Dialect::OpenAi
    }
}

/// The adapter serving a given dialect.
pub fn adapter_for(dialect: Dialect) -> &'static dyn DialectAdapter {
    match dialect {
        Dialect::OpenAi => &openai::OpenAiAdapter,
        Dialect::Anthropic => &anthropic::AnthropicAdapter,
        Dialect::Gemini => &gemini::GeminiAdapter,
    }
}

/// Join a base URL and an endpoint path with exactly one `/` between them,
/// whatever slashes either side carries.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

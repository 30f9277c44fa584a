//! # Dispatch Pipeline
//!
//! The request path: resolve the route named by the request's `model`
//! field, ask the selector for a `(provider, model)` pick, translate the
//! canonical request into the provider's dialect, and forward it — buffered
//! or streaming. Transient upstream failures (timeout, connection error,
//! credential decrypt failure, 5xx) are retried against alternative
//! providers by re-entering the selector with the failed provider masked,
//! up to the configured attempt budget. Upstream 4xx is the caller's
//! problem and is surfaced immediately.
//!
//! For streaming requests the retry window closes once an upstream stream
//! has been handed to the caller: from the first body byte onwards a
//! failure is reported in-band on the stream rather than by switching
//! providers mid-response.

use crate::catalog::{Catalog, ProviderMode, RouteConfig, RouteSpec};
use crate::dialect::{adapter_for, detect, join_url, ChunkStream};
use crate::error::{DispatchError, ProviderError};
use crate::models::{ChatRequest, ChatResponse};
use crate::registry::Registry;
use crate::secrets::SecretCipher;
use crate::selector::{RouteSelector, Selection};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Dispatch tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Attempt budget *A* across providers for one request
    pub max_attempts: u32,
    /// Timeout applied to each upstream call
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// A successfully opened upstream stream, plus the pick that produced it.
pub struct DispatchedStream {
    pub selection: Selection,
    pub chunks: ChunkStream,
}

/// The request pipeline: selection, translation, forwarding, failover.
pub struct Dispatcher {
    registry: Arc<Registry>,
    selector: Arc<RouteSelector>,
    catalog: Arc<dyn Catalog>,
    cipher: Arc<dyn SecretCipher>,
    http: reqwest::Client,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        selector: Arc<RouteSelector>,
        catalog: Arc<dyn Catalog>,
        cipher: Arc<dyn SecretCipher>,
        http: reqwest::Client,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            catalog,
            cipher,
            http,
            config,
        }
    }

    /// Buffered chat completion with cross-provider failover.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, DispatchError> {
        let (route, hint) = self.resolve_route(&request.model)?;
        let mut exclude: HashSet<String> = HashSet::new();
        let mut last_failure: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            let selection =
                self.next_selection(&route, hint.as_deref(), &exclude, last_failure.as_deref())?;

            match self.attempt_buffered(&selection, request).await {
                Ok(response) => {
                    tracing::debug!(
                        route = %route.name,
                        provider = %selection.provider_name,
                        model = %selection.model,
                        attempt,
                        "dispatch succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        route = %route.name,
                        provider = %selection.provider_name,
                        attempt,
                        error = %e,
                        "retriable upstream failure, masking provider"
                    );
                    exclude.insert(selection.provider_id);
                    last_failure = Some(e.to_string());
                }
                Err(e) => return Err(terminal(e)),
            }
        }

        Err(exhausted(&route, last_failure.as_deref()))
    }

    /// Streaming chat completion. Failover happens while opening the
    /// upstream stream; the returned stream reports later failures in-band.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<DispatchedStream, DispatchError> {
        let (route, hint) = self.resolve_route(&request.model)?;
        let mut exclude: HashSet<String> = HashSet::new();
        let mut last_failure: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            let selection =
                self.next_selection(&route, hint.as_deref(), &exclude, last_failure.as_deref())?;

            match self.attempt_stream(&selection, request).await {
                Ok(chunks) => {
                    tracing::debug!(
                        route = %route.name,
                        provider = %selection.provider_name,
                        model = %selection.model,
                        attempt,
                        "upstream stream opened"
                    );
                    return Ok(DispatchedStream { selection, chunks });
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        route = %route.name,
                        provider = %selection.provider_name,
                        attempt,
                        error = %e,
                        "retriable upstream failure before stream start"
                    );
                    exclude.insert(selection.provider_id);
                    last_failure = Some(e.to_string());
                }
                Err(e) => return Err(terminal(e)),
            }
        }

        Err(exhausted(&route, last_failure.as_deref()))
    }

    /// Resolve the request's `model` field to a route. A route whose name
    /// matches wins; otherwise the first active `auto/all` route serves as
    /// the fallback, with the field passed down as a model hint when some
    /// registered provider actually declares it.
    fn resolve_route(
        &self,
        model_field: &str,
    ) -> Result<(RouteSpec, Option<String>), DispatchError> {
        let routes = self.catalog.list_routes();

        if let Some(route) = routes
            .iter()
            .find(|r| r.active && r.name == model_field)
        {
            return Ok((route.clone(), None));
        }

        let fallback = routes.iter().find(|r| {
            r.active
                && matches!(
                    &r.config,
                    RouteConfig::Auto {
                        provider_mode: ProviderMode::All,
                        ..
                    }
                )
        });
        match fallback {
            Some(route) => {
                let declared_somewhere = self
                    .registry
                    .list_active()
                    .iter()
                    .any(|p| p.spec.models.iter().any(|m| m == model_field));
                let hint = declared_somewhere.then(|| model_field.to_string());
                tracing::debug!(
                    requested = model_field,
                    fallback = %route.name,
                    hinted = hint.is_some(),
                    "no route matched, using fallback route"
                );
                Ok((route.clone(), hint))
            }
            None => Err(DispatchError::NoProviderAvailable {
                route: model_field.to_string(),
            }),
        }
    }

    /// One selector step inside the retry loop. Running out of candidates
    /// after a failed attempt is an upstream-availability problem, not a
    /// routing one.
    fn next_selection(
        &self,
        route: &RouteSpec,
        hint: Option<&str>,
        exclude: &HashSet<String>,
        last_failure: Option<&str>,
    ) -> Result<Selection, DispatchError> {
        match self.selector.select(route, hint, exclude) {
            Ok(selection) => Ok(selection),
            Err(DispatchError::NoProviderAvailable { .. }) if last_failure.is_some() => {
                Err(exhausted(route, last_failure))
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt_buffered(
        &self,
        selection: &Selection,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let (response, adapter) = self.send_upstream(selection, request, false).await?;
        let body = response.json::<serde_json::Value>().await?;
        adapter.translate_response(body)
    }

    async fn attempt_stream(
        &self,
        selection: &Selection,
        request: &ChatRequest,
    ) -> Result<ChunkStream, ProviderError> {
        let (response, adapter) = self.send_upstream(selection, request, true).await?;
        Ok(adapter.stream_chunks(response, &selection.model))
    }

    /// Translate, authenticate and POST one upstream request. Non-success
    /// statuses are pulled apart into a [`ProviderError::Api`] carrying
    /// whatever message the provider put in its error envelope.
    async fn send_upstream(
        &self,
        selection: &Selection,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<(reqwest::Response, &'static dyn crate::dialect::DialectAdapter), ProviderError>
    {
        let provider =
            self.registry
                .get(&selection.provider_id)
                .ok_or_else(|| ProviderError::Unreachable {
                    message: format!("provider {} vanished from registry", selection.provider_id),
                })?;

        let adapter = adapter_for(detect(&provider.spec));
        let credential = self.cipher.decrypt(&provider.spec.credential)?;

        let mut wire_request = request.clone();
        wire_request.stream = Some(stream);
        let body = adapter.translate_request(&wire_request, &selection.model)?;

        let url = join_url(
            &provider.spec.base_url,
            &adapter.endpoint_path(&selection.model, stream),
        );

        let builder = self
            .http
            .post(&url)
            .timeout(self.config.request_timeout)
            .json(&body);
        let response = adapter.auth(&credential).apply(builder).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok((response, adapter))
        } else {
            Err(map_error_response(response).await)
        }
    }
}

/// Pull a human-readable message out of a provider error body, falling
/// back to the raw text.
async fn map_error_response(response: reqwest::Response) -> ProviderError {
    let code = response.status().as_u16();
    let message = match response.text().await {
        Ok(body) => serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or(body),
        Err(_) => "failed to read error response".to_string(),
    };
    ProviderError::Api { code, message }
}

/// Map a non-retriable per-attempt failure into the client-facing taxonomy.
pub fn terminal(error: ProviderError) -> DispatchError {
    match error {
        ProviderError::Timeout => DispatchError::UpstreamTimeout,
        ProviderError::Unreachable { message } => DispatchError::UpstreamUnreachable { message },
        ProviderError::Api { code, message } if code < 500 => {
            DispatchError::UpstreamClientError { code, message }
        }
        ProviderError::Api { code, message } => DispatchError::UpstreamServerError { code, message },
        ProviderError::Adapter { message } => DispatchError::Adapter { message },
        ProviderError::Serialization(e) => DispatchError::Adapter {
            message: e.to_string(),
        },
        ProviderError::Decrypt(e) => DispatchError::UpstreamUnavailable {
            detail: e.to_string(),
        },
    }
}

fn exhausted(route: &RouteSpec, last_failure: Option<&str>) -> DispatchError {
    DispatchError::UpstreamUnavailable {
        detail: match last_failure {
            Some(detail) => format!("route {}: last failure: {detail}", route.name),
            None => format!("route {}: no provider could be tried", route.name),
        },
    }
}

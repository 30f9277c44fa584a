//! # HTTP Request Handlers
//!
//! The gateway's endpoints:
//!
//! - `POST /v1/chat/completions` — the canonical chat endpoint, streaming
//!   and buffered
//! - `GET /v1/models` — models aggregated across eligible providers
//! - `GET /health` — process liveness
//! - `GET /admin/providers` — provider health view
//! - `POST /admin/routes/{id}/select` — dry-run route selection
//! - `POST /admin/providers/{id}/test` — on-demand health probe
//! - `PUT /admin/providers/{id}/health` — manual health override
//!
//! Streaming responses are server-sent events: one `data: <json>\n\n` frame
//! per canonical chunk, closed by `data: [DONE]\n\n`. A failure after the
//! stream has started is reported in-band as an error-envelope frame
//! followed by the sentinel; the HTTP status is already on the wire by
//! then.

use crate::gateway_error::GatewayError;
use crate::server::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{Response, StatusCode};
use axum::response::Json;
use futures::StreamExt;
use manifold_core::dispatch::terminal;
use manifold_core::models::ChatRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::convert::Infallible;

/// Handle chat completion requests, buffered or streaming.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response<Body>, GatewayError> {
    if request.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "model must not be empty".to_string(),
        });
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest {
            message: "messages must not be empty".to_string(),
        });
    }

    if request.stream.unwrap_or(false) {
        return streaming_chat_completions(state, request).await;
    }

    let response = state.dispatcher.chat(&request).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&response)?))
        .expect("static response parts"))
}

async fn streaming_chat_completions(
    state: AppState,
    request: ChatRequest,
) -> Result<Response<Body>, GatewayError> {
    // Failover happens inside chat_stream, before any byte reaches the
    // client; from here on errors are in-band.
    let dispatched = state.dispatcher.chat_stream(&request).await?;
    tracing::debug!(
        provider = %dispatched.selection.provider_name,
        model = %dispatched.selection.model,
        "streaming response opened"
    );

    let mut chunks = dispatched.chunks;
    let body = Body::from_stream(async_stream::stream! {
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    let data = match serde_json::to_string(&chunk) {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::error!(error = %e, "unserializable stream chunk");
                            break;
                        }
                    };
                    yield Ok::<Bytes, Infallible>(Bytes::from(format!("data: {data}\n\n")));
                }
                Err(e) => {
                    tracing::error!(error = %e, "upstream stream failed mid-response");
                    let envelope = GatewayError::from(terminal(e)).envelope();
                    yield Ok(Bytes::from(format!("data: {envelope}\n\n")));
                    break;
                }
            }
        }
        yield Ok(Bytes::from("data: [DONE]\n\n"));
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(body)
        .expect("static response parts"))
}

/// Models declared by eligible providers, in the OpenAI list shape.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let mut seen = HashSet::new();
    let mut data = Vec::new();

    for provider in state.registry.list_active() {
        if !provider.eligible() {
            continue;
        }
        for model in &provider.spec.models {
            if seen.insert(model.clone()) {
                data.push(json!({
                    "id": model,
                    "object": "model",
                    "owned_by": provider.spec.name,
                }));
            }
        }
    }

    Json(json!({"object": "list", "data": data}))
}

/// Process liveness.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Provider health view for the admin surface.
pub async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    let providers: Vec<Value> = state
        .registry
        .list_all()
        .into_iter()
        .map(|p| {
            json!({
                "id": p.spec.id,
                "name": p.spec.name,
                "base_url": p.spec.base_url,
                "models": p.spec.models,
                "active": p.spec.active,
                "eligible": p.eligible(),
                "health": p.health,
            })
        })
        .collect();
    Json(json!({"providers": providers}))
}

#[derive(Debug, Deserialize)]
pub struct SelectQuery {
    pub model: Option<String>,
}

/// Dry-run the selector for a route. Advances rotation state exactly like
/// a dispatch would.
pub async fn select_route(
    State(state): State<AppState>,
    Path(route_id): Path<String>,
    Query(query): Query<SelectQuery>,
) -> Result<Json<Value>, GatewayError> {
    let selection =
        state
            .selector
            .select_by_id(&route_id, query.model.as_deref(), &HashSet::new())?;
    Ok(Json(json!({
        "provider_id": selection.provider_id,
        "provider_name": selection.provider_name,
        "model": selection.model,
    })))
}

/// On-demand probe of one provider; updates live health like the periodic
/// probe does.
pub async fn test_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let report = state
        .prober
        .test_provider(&provider_id)
        .await
        .ok_or_else(|| GatewayError::NotFound {
            message: format!("provider {provider_id} not found"),
        })?;
    Ok(Json(serde_json::to_value(&report)?))
}

#[derive(Debug, Deserialize)]
pub struct SetHealthRequest {
    pub healthy: bool,
}

/// Manual health override; the next probe result is authoritative again.
pub async fn set_provider_health(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Json(body): Json<SetHealthRequest>,
) -> Result<Json<Value>, GatewayError> {
    if !state.registry.set_health(&provider_id, body.healthy) {
        return Err(GatewayError::NotFound {
            message: format!("provider {provider_id} not found"),
        });
    }
    Ok(Json(json!({
        "id": provider_id,
        "healthy": body.healthy,
    })))
}

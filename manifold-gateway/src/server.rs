//! # HTTP Server Assembly
//!
//! Builds the axum router and the shared application state, wires the
//! middleware stack (CORS, request tracing, timeout), and owns the two
//! background tasks the gateway runs: the health prober and the catalog
//! refresh loop that keeps the registry and the selector's cursor table in
//! step with catalog changes. Both stop through one shutdown signal.

use crate::config::{Config, CredentialScheme};
use crate::handlers;
use axum::{
    routing::{get, post, put},
    Router,
};
use manifold_core::catalog::{Catalog, MemoryCatalog};
use manifold_core::dispatch::Dispatcher;
use manifold_core::health::HealthProber;
use manifold_core::registry::Registry;
use manifold_core::secrets::{Base64Cipher, PlaintextCipher, SecretCipher};
use manifold_core::selector::RouteSelector;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<MemoryCatalog>,
    pub registry: Arc<Registry>,
    pub selector: Arc<RouteSelector>,
    pub dispatcher: Arc<Dispatcher>,
    pub prober: Arc<HealthProber>,
    pub started_at: Instant,
}

/// Handles to the background tasks; dropping it without calling
/// [`GatewayRuntime::shutdown`] leaves them running until process exit.
pub struct GatewayRuntime {
    shutdown: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl GatewayRuntime {
    /// Signal the prober and refresh loop to stop, and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Build the router, state and background tasks from a validated config.
pub async fn create_server(config: Config) -> anyhow::Result<(Router, GatewayRuntime)> {
    let catalog = Arc::new(config.build_catalog()?);
    let registry = Arc::new(Registry::new(catalog.clone() as Arc<dyn Catalog>));
    let selector = Arc::new(RouteSelector::new(
        registry.clone(),
        catalog.clone() as Arc<dyn Catalog>,
    ));

    let cipher: Arc<dyn SecretCipher> = match config.credentials {
        CredentialScheme::Base64 => Arc::new(Base64Cipher),
        CredentialScheme::Plaintext => Arc::new(PlaintextCipher),
    };

    // One connection-pooling client serves probes and dispatches alike;
    // per-call timeouts are set at the request level.
    let http = reqwest::Client::builder().build()?;

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        selector.clone(),
        catalog.clone() as Arc<dyn Catalog>,
        cipher.clone(),
        http.clone(),
        config.dispatch_config(),
    ));

    let prober = Arc::new(HealthProber::new(
        registry.clone(),
        cipher,
        http,
        config.prober_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if config.health.enabled {
        tasks.push(tokio::spawn(prober.clone().run(shutdown_rx.clone())));
    } else {
        tracing::info!("health prober disabled by configuration");
    }
    tasks.push(tokio::spawn(catalog_refresh_loop(
        catalog.clone(),
        registry.clone(),
        selector.clone(),
        shutdown_rx,
    )));

    let state = AppState {
        config: Arc::new(config.clone()),
        catalog,
        registry,
        selector,
        dispatcher,
        prober,
        started_at: Instant::now(),
    };

    let app = Router::new()
        // Canonical endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        // Health and admin endpoints
        .route("/health", get(handlers::health_check))
        .route("/admin/providers", get(handlers::list_providers))
        .route("/admin/routes/{id}/select", post(handlers::select_route))
        .route("/admin/providers/{id}/test", post(handlers::test_provider))
        .route(
            "/admin/providers/{id}/health",
            put(handlers::set_provider_health),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.server.timeout))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    Ok((
        app,
        GatewayRuntime {
            shutdown: shutdown_tx,
            tasks,
        },
    ))
}

/// Keep the registry snapshot and the selector's cursor table current as
/// the catalog changes.
async fn catalog_refresh_loop(
    catalog: Arc<MemoryCatalog>,
    registry: Arc<Registry>,
    selector: Arc<RouteSelector>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut changes = catalog.subscribe();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                registry.refresh();
                let known: HashSet<String> =
                    catalog.list_routes().into_iter().map(|r| r.id).collect();
                selector.retain_routes(&known);
                tracing::debug!("registry refreshed after catalog change");
            }
            _ = shutdown.changed() => break,
        }
    }
}

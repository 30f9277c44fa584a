//! # Manifold Core
//!
//! The routing and dispatch engine behind the Manifold LLM gateway. The
//! crate turns a canonical chat-completion request into a call against one
//! of several upstream providers, each speaking its own wire dialect, and
//! keeps the fleet healthy enough to route around failures.
//!
//! ## Overview
//!
//! - **Catalog** ([`catalog`]): the durable data model — providers with
//!   their encrypted credentials and declared models, and routes with their
//!   per-mode selection policies.
//! - **Registry** ([`registry`]): the in-memory read view the hot path
//!   works against, carrying per-provider live health attributes.
//! - **Health Prober** ([`health`]): a background task probing every active
//!   provider on an interval and flipping eligibility at a consecutive-
//!   failure threshold.
//! - **Dialect Adapters** ([`dialect`]): translation between the canonical
//!   shapes and the OpenAI-compatible, Anthropic, and Gemini wire formats,
//!   including streaming.
//! - **Route Selector** ([`selector`]): health-aware `(provider, model)`
//!   selection with per-route rotation cursors.
//! - **Dispatch Pipeline** ([`dispatch`]): the request path with bounded
//!   cross-provider retry and streaming passthrough.
//!
//! ## Quick Start
//!
//! ```rust
//! use manifold_core::catalog::{Catalog, MemoryCatalog, ProviderSpec, RouteSpec, RouteConfig, ProviderMode};
//! use manifold_core::dispatch::{DispatchConfig, Dispatcher};
//! use manifold_core::models::{ChatRequest, Message};
//! use manifold_core::registry::Registry;
//! use manifold_core::secrets::PlaintextCipher;
//! use manifold_core::selector::RouteSelector;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Arc::new(MemoryCatalog::new());
//! catalog.upsert_provider(ProviderSpec {
//!     id: "openai".into(),
//!     name: "openai".into(),
//!     base_url: "https://api.openai.com/v1".into(),
//!     credential: "sk-...".into(),
//!     models: vec!["gpt-4o-mini".into()],
//!     active: true,
//! });
//! catalog.upsert_route(RouteSpec {
//!     id: "r1".into(),
//!     name: "default".into(),
//!     active: true,
//!     config: RouteConfig::Auto {
//!         provider_mode: ProviderMode::All,
//!         selected_models: vec!["gpt-4o-mini".into()],
//!     },
//!     nodes: vec![],
//! })?;
//!
//! let registry = Arc::new(Registry::new(catalog.clone() as Arc<dyn Catalog>));
//! let selector = Arc::new(RouteSelector::new(registry.clone(), catalog.clone() as Arc<dyn Catalog>));
//! let dispatcher = Dispatcher::new(
//!     registry,
//!     selector,
//!     catalog as Arc<dyn Catalog>,
//!     Arc::new(PlaintextCipher),
//!     reqwest::Client::new(),
//!     DispatchConfig::default(),
//! );
//!
//! let response = dispatcher
//!     .chat(&ChatRequest {
//!         model: "default".into(),
//!         messages: vec![Message::user("Hello!")],
//!         ..Default::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod dialect;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod models;
pub mod registry;
pub mod secrets;
pub mod selector;

pub use catalog::{Catalog, MemoryCatalog, ProviderSpec, RouteConfig, RouteSpec};
pub use dispatch::{DispatchConfig, DispatchedStream, Dispatcher};
pub use error::{DispatchError, ProviderError};
pub use health::{HealthProber, ProbeReport, ProberConfig};
pub use models::{ChatRequest, ChatResponse, Message, Role, StreamChunk};
pub use registry::{LiveHealth, ProbeStatus, Provider, Registry};
pub use secrets::{Base64Cipher, DecryptError, PlaintextCipher, SecretCipher};
pub use selector::{RouteSelector, Selection};

//! # Manifold Gateway
//!
//! The HTTP face of the Manifold LLM gateway: an axum server exposing the
//! canonical chat-completion endpoint backed by the routing and dispatch
//! engine in `manifold-core`, plus the health and admin surface around it.
//!
//! ```rust
//! use manifold_gateway::{config::Config, server::create_server};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load("config.toml")?;
//! let (app, runtime) = create_server(config).await?;
//! // serve `app`, then `runtime.shutdown().await` on exit
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod server;

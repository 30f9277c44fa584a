//! Shared harness for gateway integration tests: a gateway wired to an
//! in-process catalog, with the background prober disabled so tests drive
//! health state explicitly.
#![allow(dead_code)]

use axum_test::TestServer;
use manifold_core::catalog::{Node, NodeStrategy, ProviderMode, ProviderSpec, RouteConfig, RouteSpec};
use manifold_gateway::config::{Config, CredentialScheme};
use manifold_gateway::server::create_server;

pub fn provider(id: &str, name: &str, base_url: &str, models: &[&str]) -> ProviderSpec {
    ProviderSpec {
        id: id.to_string(),
        name: name.to_string(),
        base_url: base_url.to_string(),
        credential: "sk-test".to_string(),
        models: models.iter().map(|m| m.to_string()).collect(),
        active: true,
    }
}

pub fn auto_route(name: &str, selected: &[&str]) -> RouteSpec {
    RouteSpec {
        id: format!("route-{name}"),
        name: name.to_string(),
        active: true,
        config: RouteConfig::Auto {
            provider_mode: ProviderMode::All,
            selected_models: selected.iter().map(|m| m.to_string()).collect(),
        },
        nodes: vec![],
    }
}

pub fn specific_route(name: &str, provider_id: &str, models: &[&str]) -> RouteSpec {
    RouteSpec {
        id: format!("route-{name}"),
        name: name.to_string(),
        active: true,
        config: RouteConfig::Specific {
            selected_models: models.iter().map(|m| m.to_string()).collect(),
        },
        nodes: vec![Node {
            id: format!("node-{name}"),
            provider_id: provider_id.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            strategy: NodeStrategy::RoundRobin,
            priority: 0,
            metadata: serde_json::Value::Null,
        }],
    }
}

/// Spin up a gateway over the given catalog entries. The prober is off;
/// tests flip health through the admin endpoints when they need to.
pub async fn test_server(providers: Vec<ProviderSpec>, routes: Vec<RouteSpec>) -> TestServer {
    let mut config = Config {
        providers,
        routes,
        credentials: CredentialScheme::Plaintext,
        ..Default::default()
    };
    config.health.enabled = false;
    config.validate().expect("test config must validate");

    let (app, _runtime) = create_server(config).await.expect("server must build");
    TestServer::new(app).expect("test server must start")
}

pub fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "m",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
    })
}

pub fn chat_request(model: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": content}]
    })
}

//! # Provider and Route Catalog
//!
//! The durable halves of the data model: what an administrator configures,
//! as opposed to the live health attributes owned by the prober (those live
//! in [`crate::registry`]). Persistence is an external concern — the engine
//! consumes the [`Catalog`] read contract plus a change notification, and
//! [`MemoryCatalog`] is the in-process implementation backing both the
//! config-file bootstrap and the test suites.
//!
//! Route configs differ per mode, so they are carried as a tagged sum type
//! ([`RouteConfig`]) validated once at the catalog boundary and trusted
//! thereafter.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::watch;

/// Durable description of an upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Opaque identifier, unique within the catalog
    pub id: String,
    /// Unique human-readable name
    pub name: String,
    /// Base URL of the provider API, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Encrypted credential; only [`crate::secrets::SecretCipher`] reads it
    pub credential: String,
    /// Models the provider declares, in preference order
    #[serde(default)]
    pub models: Vec<String>,
    /// Admin intent: an inactive provider is never probed or selected
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Durable description of a route: a named selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Opaque identifier, unique within the catalog
    pub id: String,
    /// Name clients address via the request `model` field
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Per-mode configuration
    pub config: RouteConfig,
    /// Provider bindings for `specific` and `multi` modes
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One provider binding inside a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Identifier used as the rotation-cursor scope for this node
    pub id: String,
    /// Provider the node binds
    pub provider_id: String,
    /// Models the node allows the provider to serve
    #[serde(default)]
    pub models: Vec<String>,
    /// Model-picking strategy within this node
    #[serde(default)]
    pub strategy: NodeStrategy,
    /// Nodes are tried in ascending priority order
    #[serde(default)]
    pub priority: i32,
    /// Opaque administrative metadata, carried but never interpreted
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Model-picking strategy for a node in `multi` mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStrategy {
    /// Cycle through the node's allowed models
    #[default]
    RoundRobin,
    /// Always pick the node's first allowed model
    Failover,
}

/// Per-mode route configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RouteConfig {
    /// Pick among all (or one named) provider automatically
    Auto {
        #[serde(default)]
        provider_mode: ProviderMode,
        #[serde(default)]
        selected_models: Vec<String>,
    },
    /// Exactly one node names the target provider
    Specific {
        #[serde(default)]
        selected_models: Vec<String>,
    },
    /// All information lives in the nodes
    Multi {},
}

/// Provider scoping for `auto` mode: every eligible provider, or one
/// pinned by id. Serialized as `"all"` or `"provider_<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProviderMode {
    #[default]
    All,
    Provider(String),
}

impl Serialize for ProviderMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Provider(id) => serializer.serialize_str(&format!("provider_{id}")),
        }
    }
}

impl<'de> Deserialize<'de> for ProviderMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "all" => Ok(Self::All),
            other => match other.strip_prefix("provider_") {
                Some(id) if !id.is_empty() => Ok(Self::Provider(id.to_string())),
                _ => Err(serde::de::Error::custom(format!(
                    "provider_mode must be \"all\" or \"provider_<id>\", got {raw:?}"
                ))),
            },
        }
    }
}

/// Derived model strategy: `single` iff exactly one model is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStrategy {
    Single,
    Cycle,
}

impl RouteConfig {
    pub fn selected_models(&self) -> &[String] {
        match self {
            Self::Auto {
                selected_models, ..
            }
            | Self::Specific { selected_models } => selected_models,
            Self::Multi {} => &[],
        }
    }

    pub fn model_strategy(&self) -> ModelStrategy {
        if self.selected_models().len() == 1 {
            ModelStrategy::Single
        } else {
            ModelStrategy::Cycle
        }
    }
}

impl RouteSpec {
    /// Validate the mode-specific structural invariants. Called at the
    /// catalog boundary; selection trusts a validated route.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("route name must not be empty".to_string());
        }
        match &self.config {
            RouteConfig::Auto { .. } => Ok(()),
            RouteConfig::Specific { selected_models } => {
                if self.nodes.len() != 1 {
                    Err(format!(
                        "specific route {:?} must have exactly one node, has {}",
                        self.name,
                        self.nodes.len()
                    ))
                } else if selected_models.is_empty() && self.nodes[0].models.is_empty() {
                    Err(format!(
                        "specific route {:?} selects no models",
                        self.name
                    ))
                } else {
                    Ok(())
                }
            }
            RouteConfig::Multi {} => {
                if self.nodes.is_empty() {
                    return Err(format!("multi route {:?} has no nodes", self.name));
                }
                for node in &self.nodes {
                    if node.models.is_empty() {
                        return Err(format!(
                            "multi route {:?} node {:?} allows no models",
                            self.name, node.id
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Nodes in selection order.
    pub fn nodes_by_priority(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by_key(|n| n.priority);
        nodes
    }
}

/// Read contract the engine consumes. Snapshots are cheap clones; the watch
/// channel ticks on every CRUD so the registry can refresh.
pub trait Catalog: Send + Sync {
    fn list_providers(&self) -> Vec<ProviderSpec>;
    fn get_provider(&self, id: &str) -> Option<ProviderSpec>;
    fn list_routes(&self) -> Vec<RouteSpec>;
    fn get_route(&self, id: &str) -> Option<RouteSpec>;
    /// Subscribe to change notifications. The value is a generation counter;
    /// receivers only care that it moved.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// In-process catalog. Insertion order is preserved: ring order for
/// round-robin selection is catalog order.
pub struct MemoryCatalog {
    providers: RwLock<Vec<ProviderSpec>>,
    routes: RwLock<Vec<RouteSpec>>,
    generation: watch::Sender<u64>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            providers: RwLock::new(Vec::new()),
            routes: RwLock::new(Vec::new()),
            generation,
        }
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Insert or replace a provider, keyed by id.
    pub fn upsert_provider(&self, spec: ProviderSpec) {
        let mut providers = self.providers.write().expect("catalog lock poisoned");
        match providers.iter_mut().find(|p| p.id == spec.id) {
            Some(existing) => *existing = spec,
            None => providers.push(spec),
        }
        drop(providers);
        self.bump();
    }

    pub fn remove_provider(&self, id: &str) {
        self.providers
            .write()
            .expect("catalog lock poisoned")
            .retain(|p| p.id != id);
        self.bump();
    }

    /// Insert or replace a route after validating it.
    pub fn upsert_route(&self, spec: RouteSpec) -> Result<(), String> {
        spec.validate()?;
        let mut routes = self.routes.write().expect("catalog lock poisoned");
        match routes.iter_mut().find(|r| r.id == spec.id) {
            Some(existing) => *existing = spec,
            None => routes.push(spec),
        }
        drop(routes);
        self.bump();
        Ok(())
    }

    pub fn remove_route(&self, id: &str) {
        self.routes
            .write()
            .expect("catalog lock poisoned")
            .retain(|r| r.id != id);
        self.bump();
    }
}

impl Catalog for MemoryCatalog {
    fn list_providers(&self) -> Vec<ProviderSpec> {
        self.providers.read().expect("catalog lock poisoned").clone()
    }

    fn get_provider(&self, id: &str) -> Option<ProviderSpec> {
        self.providers
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    fn list_routes(&self) -> Vec<RouteSpec> {
        self.routes.read().expect("catalog lock poisoned").clone()
    }

    fn get_route(&self, id: &str) -> Option<RouteSpec> {
        self.routes
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

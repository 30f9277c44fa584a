//! # Route Selector
//!
//! Given a route and an optional model hint, the selector returns the
//! concrete `(provider, model)` pair that should serve the request,
//! honoring the route mode, per-node strategy, provider health, and the
//! per-route rotation state.
//!
//! ## Rotation
//!
//! Rotation cursors live in a `(route-id, scope-key)` table. The scope key
//! names the ring being advanced: `"providers"` for the provider ring of an
//! `auto/all` route, a provider id for that provider's model ring, or a
//! node id for a node's model ring. Each cursor is a monotonically
//! advancing counter; the pick is the counter modulo the ring size at
//! selection time, so a ring that shrinks after a health change simply
//! skips an element. Cursors are transient process state: losing them on
//! restart only resets rotation fairness.
//!
//! Each advance happens under the cursor's own map entry lock, so
//! concurrent selections on one route advance exactly once each and two
//! simultaneous callers cannot be handed the same pick unless the ring has
//! a single member. No selector operation performs I/O.
//!
//! ## Failure masking
//!
//! The dispatch pipeline passes the set of providers that already failed
//! during the current request; they are treated as ineligible for that
//! call only.

use crate::catalog::{Catalog, Node, NodeStrategy, ProviderMode, RouteConfig, RouteSpec};
use crate::error::DispatchError;
use crate::registry::{Provider, Registry};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Scope key for the provider ring of an `auto/all` route.
const PROVIDER_RING: &str = "providers";

/// A concrete dispatch target.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Selection {
    pub provider_id: String,
    pub provider_name: String,
    pub model: String,
}

/// Health- and rotation-aware route selection.
pub struct RouteSelector {
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
    cursors: DashMap<(String, String), u64>,
}

impl RouteSelector {
    pub fn new(registry: Arc<Registry>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            registry,
            catalog,
            cursors: DashMap::new(),
        }
    }

    /// Resolve a route by id and select. Admin/debug entry point.
    pub fn select_by_id(
        &self,
        route_id: &str,
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Result<Selection, DispatchError> {
        let route = self
            .catalog
            .get_route(route_id)
            .ok_or_else(|| DispatchError::RouteNotActive {
                route: route_id.to_string(),
            })?;
        self.select(&route, model_hint, exclude)
    }

    /// Select a `(provider, model)` pair for the route.
    pub fn select(
        &self,
        route: &RouteSpec,
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Result<Selection, DispatchError> {
        if !route.active {
            return Err(DispatchError::RouteNotActive {
                route: route.name.clone(),
            });
        }

        match &route.config {
            RouteConfig::Auto {
                provider_mode,
                selected_models,
            } => self.select_auto(route, provider_mode, selected_models, model_hint, exclude),
            RouteConfig::Specific { selected_models } => {
                self.select_specific(route, selected_models, model_hint, exclude)
            }
            RouteConfig::Multi {} => self.select_multi(route, model_hint, exclude),
        }
    }

    /// Drop every cursor belonging to a deleted route.
    pub fn forget_route(&self, route_id: &str) {
        self.cursors.retain(|(route, _), _| route != route_id);
    }

    /// Drop cursors for routes no longer present in the catalog.
    pub fn retain_routes(&self, known: &HashSet<String>) {
        self.cursors.retain(|(route, _), _| known.contains(route));
    }

    /// Advance the `(route, scope)` cursor and return the pick index for a
    /// ring of `ring_len` members. The entry lock makes the read-modify-
    /// write atomic per cursor.
    fn advance(&self, route_id: &str, scope: &str, ring_len: usize) -> usize {
        let mut cursor = self
            .cursors
            .entry((route_id.to_string(), scope.to_string()))
            .or_insert(0);
        let index = (*cursor % ring_len as u64) as usize;
        *cursor += 1;
        index
    }

    fn eligible_providers(&self, exclude: &HashSet<String>) -> Vec<Provider> {
        self.registry
            .list_active()
            .into_iter()
            .filter(|p| p.eligible() && !exclude.contains(&p.spec.id))
            .collect()
    }

    fn eligible_provider(
        &self,
        provider_id: &str,
        exclude: &HashSet<String>,
    ) -> Option<Provider> {
        if exclude.contains(provider_id) {
            return None;
        }
        self.registry.get(provider_id).filter(Provider::eligible)
    }

    fn select_auto(
        &self,
        route: &RouteSpec,
        provider_mode: &ProviderMode,
        selected_models: &[String],
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Result<Selection, DispatchError> {
        let provider = match provider_mode {
            ProviderMode::All => {
                let mut ring = self.eligible_providers(exclude);
                if !selected_models.is_empty() {
                    ring.retain(|p| selected_models.iter().any(|m| p.spec.models.contains(m)));
                }
                if ring.is_empty() {
                    return Err(DispatchError::NoProviderAvailable {
                        route: route.name.clone(),
                    });
                }
                let index = self.advance(&route.id, PROVIDER_RING, ring.len());
                ring.swap_remove(index)
            }
            ProviderMode::Provider(id) => self.eligible_provider(id, exclude).ok_or_else(|| {
                DispatchError::NoProviderAvailable {
                    route: route.name.clone(),
                }
            })?,
        };

        let model = self.choose_model(route, &provider, selected_models, model_hint)?;
        Ok(Selection {
            provider_id: provider.spec.id,
            provider_name: provider.spec.name,
            model,
        })
    }

    /// Model choice for `auto` mode: hint first, then the rotation over the
    /// intersection of the route's selected models with the provider's
    /// declared list, then the provider's first declared model.
    fn choose_model(
        &self,
        route: &RouteSpec,
        provider: &Provider,
        selected_models: &[String],
        model_hint: Option<&str>,
    ) -> Result<String, DispatchError> {
        let declared = &provider.spec.models;

        if let Some(hint) = model_hint {
            let admitted = selected_models.is_empty() || selected_models.iter().any(|m| m == hint);
            if admitted && declared.iter().any(|m| m == hint) {
                return Ok(hint.to_string());
            }
        }

        let ring: Vec<&String> = selected_models
            .iter()
            .filter(|m| declared.contains(*m))
            .collect();

        match ring.len() {
            0 => declared.first().cloned().ok_or_else(|| {
                DispatchError::NoProviderAvailable {
                    route: route.name.clone(),
                }
            }),
            1 => Ok(ring[0].clone()),
            len => {
                let index = self.advance(&route.id, &provider.spec.id, len);
                Ok(ring[index].clone())
            }
        }
    }

    fn select_specific(
        &self,
        route: &RouteSpec,
        selected_models: &[String],
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Result<Selection, DispatchError> {
        let node = route
            .nodes
            .first()
            .ok_or_else(|| DispatchError::NoProviderAvailable {
                route: route.name.clone(),
            })?;
        let provider = self
            .eligible_provider(&node.provider_id, exclude)
            .ok_or_else(|| DispatchError::NoProviderAvailable {
                route: route.name.clone(),
            })?;

        // The node's allowed list is the ring; the route-level selection
        // stands in when the node does not constrain models.
        let ring = if node.models.is_empty() {
            selected_models
        } else {
            &node.models[..]
        };

        let model = if let Some(hint) = model_hint.filter(|h| ring.iter().any(|m| m == h)) {
            hint.to_string()
        } else {
            match ring.len() {
                0 => {
                    return Err(DispatchError::NoProviderAvailable {
                        route: route.name.clone(),
                    })
                }
                1 => ring[0].clone(),
                len => ring[self.advance(&route.id, &node.id, len)].clone(),
            }
        };

        Ok(Selection {
            provider_id: provider.spec.id,
            provider_name: provider.spec.name,
            model,
        })
    }

    fn select_multi(
        &self,
        route: &RouteSpec,
        model_hint: Option<&str>,
        exclude: &HashSet<String>,
    ) -> Result<Selection, DispatchError> {
        for node in route.nodes_by_priority() {
            let Some(provider) = self.eligible_provider(&node.provider_id, exclude) else {
                continue;
            };
            let Some(model) = self.node_model(route, node, model_hint) else {
                continue;
            };
            return Ok(Selection {
                provider_id: provider.spec.id,
                provider_name: provider.spec.name,
                model,
            });
        }

        Err(DispatchError::NoProviderAvailable {
            route: route.name.clone(),
        })
    }

    fn node_model(&self, route: &RouteSpec, node: &Node, model_hint: Option<&str>) -> Option<String> {
        if let Some(hint) = model_hint.filter(|h| node.models.iter().any(|m| m == h)) {
            return Some(hint.to_string());
        }
        match node.strategy {
            NodeStrategy::Failover => node.models.first().cloned(),
            NodeStrategy::RoundRobin => match node.models.len() {
                0 => None,
                1 => node.models.first().cloned(),
                len => {
                    let index = self.advance(&route.id, &node.id, len);
                    node.models.get(index).cloned()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, ProviderSpec};

    fn provider(id: &str, models: &[&str]) -> ProviderSpec {
        ProviderSpec {
            id: id.to_string(),
            name: format!("provider-{id}"),
            base_url: format!("http://{id}.local"),
            credential: "sk".to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            active: true,
        }
    }

    fn node(id: &str, provider: &str, models: &[&str], strategy: NodeStrategy, priority: i32) -> Node {
        Node {
            id: id.to_string(),
            provider_id: provider.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            strategy,
            priority,
            metadata: serde_json::Value::Null,
        }
    }

    fn auto_route(id: &str, selected: &[&str]) -> RouteSpec {
        RouteSpec {
            id: id.to_string(),
            name: format!("route-{id}"),
            active: true,
            config: RouteConfig::Auto {
                provider_mode: ProviderMode::All,
                selected_models: selected.iter().map(|m| m.to_string()).collect(),
            },
            nodes: vec![],
        }
    }

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        registry: Arc<Registry>,
        selector: RouteSelector,
    }

    fn fixture(providers: Vec<ProviderSpec>) -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        for p in providers {
            catalog.upsert_provider(p);
        }
        let registry = Arc::new(Registry::new(catalog.clone() as Arc<dyn Catalog>));
        let selector = RouteSelector::new(registry.clone(), catalog.clone() as Arc<dyn Catalog>);
        Fixture {
            catalog,
            registry,
            selector,
        }
    }

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn auto_all_rotates_providers_fairly() {
        let fx = fixture(vec![provider("p1", &["m"]), provider("p2", &["m"])]);
        let route = auto_route("r1", &["m"]);

        let picks: Vec<String> = (0..4)
            .map(|_| fx.selector.select(&route, None, &none()).unwrap().provider_id)
            .collect();
        assert_eq!(picks, vec!["p1", "p2", "p1", "p2"]);
    }

    #[test]
    fn auto_all_skips_unhealthy_providers() {
        let fx = fixture(vec![provider("p1", &["m"]), provider("p2", &["m"])]);
        fx.registry.update_live("p1", |live| {
            live.healthy = false;
            live.consecutive_failures = 3;
        });
        let route = auto_route("r1", &["m"]);

        for _ in 0..2 {
            let pick = fx.selector.select(&route, None, &none()).unwrap();
            assert_eq!(pick.provider_id, "p2");
        }
    }

    #[test]
    fn auto_all_cycles_the_model_intersection() {
        let fx = fixture(vec![provider("p1", &["a", "b", "c"])]);
        let route = auto_route("r1", &["b", "c", "z"]);

        let models: Vec<String> = (0..4)
            .map(|_| fx.selector.select(&route, None, &none()).unwrap().model)
            .collect();
        // "z" is undeclared, so the ring is [b, c]
        assert_eq!(models, vec!["b", "c", "b", "c"]);
    }

    #[test]
    fn auto_all_with_no_selected_models_falls_back_to_first_declared() {
        let fx = fixture(vec![provider("p1", &["alpha", "beta"])]);
        let route = auto_route("r1", &[]);

        let pick = fx.selector.select(&route, None, &none()).unwrap();
        assert_eq!(pick.model, "alpha");
    }

    #[test]
    fn auto_all_without_declaring_provider_is_no_provider() {
        let fx = fixture(vec![provider("p1", &["other"])]);
        let route = auto_route("r1", &["m"]);

        assert!(matches!(
            fx.selector.select(&route, None, &none()),
            Err(DispatchError::NoProviderAvailable { .. })
        ));
    }

    #[test]
    fn model_hint_wins_over_rotation() {
        let fx = fixture(vec![provider("p1", &["a", "b"])]);
        let route = auto_route("r1", &["a", "b"]);

        let pick = fx.selector.select(&route, Some("b"), &none()).unwrap();
        assert_eq!(pick.model, "b");
        // The model cursor was not advanced by the hinted call
        let pick = fx.selector.select(&route, None, &none()).unwrap();
        assert_eq!(pick.model, "a");
    }

    #[test]
    fn hint_outside_selected_models_is_ignored() {
        let fx = fixture(vec![provider("p1", &["a", "x"])]);
        let route = auto_route("r1", &["a"]);

        let pick = fx.selector.select(&route, Some("x"), &none()).unwrap();
        assert_eq!(pick.model, "a");
    }

    #[test]
    fn auto_pinned_provider_must_be_eligible() {
        let fx = fixture(vec![provider("p1", &["m"]), provider("p2", &["m"])]);
        let route = RouteSpec {
            id: "r1".to_string(),
            name: "pinned".to_string(),
            active: true,
            config: RouteConfig::Auto {
                provider_mode: ProviderMode::Provider("p1".to_string()),
                selected_models: vec!["m".to_string()],
            },
            nodes: vec![],
        };

        assert_eq!(
            fx.selector.select(&route, None, &none()).unwrap().provider_id,
            "p1"
        );

        fx.registry.set_health("p1", false);
        assert!(matches!(
            fx.selector.select(&route, None, &none()),
            Err(DispatchError::NoProviderAvailable { .. })
        ));
    }

    #[test]
    fn inactive_route_is_rejected() {
        let fx = fixture(vec![provider("p1", &["m"])]);
        let mut route = auto_route("r1", &["m"]);
        route.active = false;

        assert!(matches!(
            fx.selector.select(&route, None, &none()),
            Err(DispatchError::RouteNotActive { .. })
        ));
    }

    #[test]
    fn specific_route_hints_then_cycles() {
        let fx = fixture(vec![provider("p1", &["a", "b"])]);
        let route = RouteSpec {
            id: "r1".to_string(),
            name: "specific".to_string(),
            active: true,
            config: RouteConfig::Specific {
                selected_models: vec!["a".to_string(), "b".to_string()],
            },
            nodes: vec![node("n1", "p1", &["a", "b"], NodeStrategy::RoundRobin, 0)],
        };

        let hinted = fx.selector.select(&route, Some("b"), &none()).unwrap();
        assert_eq!((hinted.provider_id.as_str(), hinted.model.as_str()), ("p1", "b"));

        let first = fx.selector.select(&route, None, &none()).unwrap();
        let second = fx.selector.select(&route, None, &none()).unwrap();
        assert_eq!(first.model, "a");
        assert_eq!(second.model, "b");
    }

    #[test]
    fn multi_falls_through_to_lower_priority_on_ineligibility() {
        let fx = fixture(vec![provider("p1", &["a"]), provider("p2", &["x", "y"])]);
        fx.registry.set_health("p1", false);

        let route = RouteSpec {
            id: "r1".to_string(),
            name: "multi".to_string(),
            active: true,
            config: RouteConfig::Multi {},
            nodes: vec![
                node("n1", "p1", &["a"], NodeStrategy::Failover, 0),
                node("n2", "p2", &["x", "y"], NodeStrategy::RoundRobin, 1),
            ],
        };

        let first = fx.selector.select(&route, None, &none()).unwrap();
        let second = fx.selector.select(&route, None, &none()).unwrap();
        assert_eq!((first.provider_id.as_str(), first.model.as_str()), ("p2", "x"));
        assert_eq!((second.provider_id.as_str(), second.model.as_str()), ("p2", "y"));
    }

    #[test]
    fn multi_failover_node_always_picks_head() {
        let fx = fixture(vec![provider("p1", &["a", "b"])]);
        let route = RouteSpec {
            id: "r1".to_string(),
            name: "multi".to_string(),
            active: true,
            config: RouteConfig::Multi {},
            nodes: vec![node("n1", "p1", &["a", "b"], NodeStrategy::Failover, 0)],
        };

        for _ in 0..3 {
            assert_eq!(fx.selector.select(&route, None, &none()).unwrap().model, "a");
        }
    }

    #[test]
    fn exclude_set_masks_a_provider_for_one_call() {
        let fx = fixture(vec![provider("p1", &["m"]), provider("p2", &["m"])]);
        let route = auto_route("r1", &["m"]);

        let mut exclude = HashSet::new();
        exclude.insert("p1".to_string());

        let masked = fx.selector.select(&route, None, &exclude).unwrap();
        assert_eq!(masked.provider_id, "p2");

        // Without the mask both providers are back in the ring
        let open: HashSet<String> = (0..2)
            .map(|_| fx.selector.select(&route, None, &none()).unwrap().provider_id)
            .collect();
        assert_eq!(open.len(), 2);
    }

    #[test]
    fn excluding_everything_is_no_provider() {
        let fx = fixture(vec![provider("p1", &["m"])]);
        let route = auto_route("r1", &["m"]);

        let mut exclude = HashSet::new();
        exclude.insert("p1".to_string());
        assert!(matches!(
            fx.selector.select(&route, None, &exclude),
            Err(DispatchError::NoProviderAvailable { .. })
        ));
    }

    #[test]
    fn ring_shrink_reuses_the_cursor_modulo_new_length() {
        let fx = fixture(vec![
            provider("p1", &["m"]),
            provider("p2", &["m"]),
            provider("p3", &["m"]),
        ]);
        let route = auto_route("r1", &["m"]);

        // Advance the provider cursor past the future ring length
        for _ in 0..2 {
            fx.selector.select(&route, None, &none()).unwrap();
        }
        fx.registry.set_health("p3", false);

        // Ring is now [p1, p2]; cursor value 2 lands back on p1
        let pick = fx.selector.select(&route, None, &none()).unwrap();
        assert_eq!(pick.provider_id, "p1");
    }

    #[test]
    fn rotation_is_fair_over_many_selections() {
        let fx = fixture(vec![
            provider("p1", &["m"]),
            provider("p2", &["m"]),
            provider("p3", &["m"]),
        ]);
        let route = auto_route("r1", &["m"]);

        let mut counts = std::collections::HashMap::new();
        let n = 100;
        for _ in 0..n {
            let pick = fx.selector.select(&route, None, &none()).unwrap();
            *counts.entry(pick.provider_id).or_insert(0u32) += 1;
        }
        for (_, count) in counts {
            assert!(count == n / 3 || count == n / 3 + 1);
        }
    }

    #[test]
    fn forget_route_resets_rotation() {
        let fx = fixture(vec![provider("p1", &["m"]), provider("p2", &["m"])]);
        let route = auto_route("r1", &["m"]);

        assert_eq!(fx.selector.select(&route, None, &none()).unwrap().provider_id, "p1");
        assert_eq!(fx.selector.select(&route, None, &none()).unwrap().provider_id, "p2");

        fx.selector.forget_route(&route.id);
        assert_eq!(fx.selector.select(&route, None, &none()).unwrap().provider_id, "p1");
    }

    #[test]
    fn select_by_id_reports_missing_routes() {
        let fx = fixture(vec![provider("p1", &["m"])]);
        assert!(matches!(
            fx.selector.select_by_id("ghost", None, &none()),
            Err(DispatchError::RouteNotActive { .. })
        ));

        fx.catalog
            .upsert_route(auto_route("r1", &["m"]))
            .unwrap();
        let pick = fx.selector.select_by_id("r1", None, &none()).unwrap();
        assert_eq!(pick.provider_id, "p1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_selections_advance_the_cursor_once_each() {
        let fx = Arc::new(fixture(vec![
            provider("p1", &["m"]),
            provider("p2", &["m"]),
        ]));
        let route = Arc::new(auto_route("r1", &["m"]));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let fx = fx.clone();
            let route = route.clone();
            handles.push(tokio::spawn(async move {
                fx.selector
                    .select(&route, None, &HashSet::new())
                    .unwrap()
                    .provider_id
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_insert(0u32) += 1;
        }
        assert_eq!(counts.get("p1"), Some(&20));
        assert_eq!(counts.get("p2"), Some(&20));
    }
}

//! # Provider Registry
//!
//! The read view the selector and dispatcher work against: every configured
//! provider together with its live health attributes. Durable fields come
//! from the catalog snapshot; live fields are owned by the prober and
//! written through [`Registry::update_live`].
//!
//! Each provider's live state sits in its own lock so a probe result for one
//! provider never contends with reads of another, and all live fields for a
//! provider are read and written under the same critical section — a reader
//! can never observe a torn update (say, `last_status = online` with a
//! stale failure counter).
//!
//! [`Registry::refresh`] reconciles against a fresh catalog snapshot on
//! change notification. Live cells are keyed by provider id and survive
//! spec edits, so re-saving a provider does not erase its probe history.

use crate::catalog::{Catalog, ProviderSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Outcome class of the most recent probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Never probed
    Unknown,
    /// Probe answered 2xx
    Online,
    /// Probe answered a non-2xx status
    Degraded,
    /// Probe exceeded its timeout
    Timeout,
    /// Connection failed: DNS, refused, TLS
    Unreachable,
    /// Probe failed for a non-network reason
    Error,
}

/// Live health attributes of one provider, prober-owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_status: ProbeStatus,
    pub last_latency_ms: Option<u64>,
    pub last_probed_at: Option<DateTime<Utc>>,
}

impl Default for LiveHealth {
    fn default() -> Self {
        // A freshly configured provider is dispatchable before its first
        // probe; the first failed cycle will take it out.
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_status: ProbeStatus::Unknown,
            last_latency_ms: None,
            last_probed_at: None,
        }
    }
}

/// A provider as the selector sees it: durable spec plus a consistent
/// snapshot of its live health.
#[derive(Debug, Clone)]
pub struct Provider {
    pub spec: ProviderSpec,
    pub health: LiveHealth,
}

impl Provider {
    /// Eligible means selectable: admin-active and currently healthy.
    pub fn eligible(&self) -> bool {
        self.spec.active && self.health.healthy
    }
}

struct Entry {
    spec: ProviderSpec,
    live: Arc<RwLock<LiveHealth>>,
}

/// In-memory read view over the catalog's providers, order-preserving.
pub struct Registry {
    catalog: Arc<dyn Catalog>,
    entries: RwLock<Vec<Entry>>,
}

impl Registry {
    /// Build the view and take the initial snapshot.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        let registry = Self {
            catalog,
            entries: RwLock::new(Vec::new()),
        };
        registry.refresh();
        registry
    }

    /// Reconcile against the current catalog snapshot. Existing live cells
    /// are carried over by provider id; departed providers drop theirs.
    pub fn refresh(&self) {
        let specs = self.catalog.list_providers();

        let mut entries = self.entries.write().expect("registry lock poisoned");
        let mut cells: HashMap<String, Arc<RwLock<LiveHealth>>> = entries
            .drain(..)
            .map(|e| (e.spec.id.clone(), e.live))
            .collect();

        *entries = specs
            .into_iter()
            .map(|spec| {
                let live = cells
                    .remove(&spec.id)
                    .unwrap_or_else(|| Arc::new(RwLock::new(LiveHealth::default())));
                Entry { spec, live }
            })
            .collect();
    }

    /// Snapshot of every provider, active or not, in catalog order.
    pub fn list_all(&self) -> Vec<Provider> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|e| Provider {
                spec: e.spec.clone(),
                health: e.live.read().expect("live cell poisoned").clone(),
            })
            .collect()
    }

    /// Snapshot of every admin-active provider, in catalog order.
    pub fn list_active(&self) -> Vec<Provider> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|e| e.spec.active)
            .map(|e| Provider {
                spec: e.spec.clone(),
                health: e.live.read().expect("live cell poisoned").clone(),
            })
            .collect()
    }

    /// Snapshot of one provider, active or not.
    pub fn get(&self, id: &str) -> Option<Provider> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|e| e.spec.id == id)
            .map(|e| Provider {
                spec: e.spec.clone(),
                health: e.live.read().expect("live cell poisoned").clone(),
            })
    }

    /// Whether the provider is currently selectable.
    pub fn eligible(&self, id: &str) -> bool {
        self.get(id).map(|p| p.eligible()).unwrap_or(false)
    }

    /// Observer hook for the prober: mutate one provider's live fields
    /// under its critical section. Returns false for unknown ids.
    pub fn update_live(&self, id: &str, apply: impl FnOnce(&mut LiveHealth)) -> bool {
        let entries = self.entries.read().expect("registry lock poisoned");
        match entries.iter().find(|e| e.spec.id == id) {
            Some(entry) => {
                let mut live = entry.live.write().expect("live cell poisoned");
                apply(&mut live);
                true
            }
            None => false,
        }
    }

    /// Manual override: force the health flag and reset the failure
    /// counter. The next probe result is authoritative again.
    pub fn set_health(&self, id: &str, healthy: bool) -> bool {
        self.update_live(id, |live| {
            live.healthy = healthy;
            live.consecutive_failures = 0;
        })
    }
}

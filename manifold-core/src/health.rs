//! # Health Prober
//!
//! A long-lived background task that keeps the registry's live health
//! attributes current. Every interval it snapshots the active providers and
//! probes `<base_url>/models` on each with the decrypted credential, a
//! per-probe timeout, and redirect following. Outcomes are classified and
//! folded into the per-provider failure counter:
//!
//! - `online` (2xx) resets the counter and restores `healthy`
//! - any counted non-online outcome increments it; at the configured
//!   threshold `healthy` flips off and the selector stops picking the
//!   provider
//! - a credential that cannot be decrypted marks the probe `error` but is
//!   not counted — a broken key is not a network signal
//!
//! Probes for different providers run concurrently under a small bound and
//! never hold registry locks across I/O, so a slow upstream cannot stall
//! selection. The same probe logic backs the on-demand
//! [`HealthProber::test_provider`] used by the admin surface.

use crate::dialect::join_url;
use crate::registry::{ProbeStatus, Provider, Registry};
use crate::secrets::SecretCipher;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How many probes may be in flight at once within a cycle.
const PROBE_CONCURRENCY: usize = 8;

/// Prober tuning knobs.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Cycle interval *T*
    pub interval: Duration,
    /// Per-probe timeout *τ*
    pub timeout: Duration,
    /// Consecutive non-online probes before `healthy` flips off
    pub failure_threshold: u32,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Result of one probe, also the payload of the manual test endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub status: ProbeStatus,
    pub http_code: Option<u16>,
    pub latency_ms: u64,
    pub detail: String,
    /// Counted outcomes feed the failure threshold; a decrypt failure
    /// does not.
    #[serde(skip)]
    counted: bool,
}

pub struct HealthProber {
    registry: Arc<Registry>,
    cipher: Arc<dyn SecretCipher>,
    http: reqwest::Client,
    config: ProberConfig,
}

impl HealthProber {
    pub fn new(
        registry: Arc<Registry>,
        cipher: Arc<dyn SecretCipher>,
        http: reqwest::Client,
        config: ProberConfig,
    ) -> Self {
        Self {
            registry,
            cipher,
            http,
            config,
        }
    }

    /// Run probe cycles until the shutdown signal flips. Cancellation is
    /// prompt: an in-flight cycle is abandoned, and abandoned probes are
    /// bounded by the probe timeout.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.run_cycle() => {}
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("health prober stopped");
    }

    /// One probe pass over a snapshot of the active providers.
    pub async fn run_cycle(&self) {
        let providers = self.registry.list_active();
        if providers.is_empty() {
            return;
        }
        tracing::debug!(count = providers.len(), "starting health probe cycle");

        futures::stream::iter(providers)
            .for_each_concurrent(PROBE_CONCURRENCY, |provider| async move {
                let report = self.probe(&provider).await;
                self.apply(&provider.spec.id, &report);
            })
            .await;
    }

    /// On-demand probe of one provider. Identical logic to the periodic
    /// path, and live fields are updated the same way.
    pub async fn test_provider(&self, id: &str) -> Option<ProbeReport> {
        let provider = self.registry.get(id)?;
        let report = self.probe(&provider).await;
        self.apply(id, &report);
        Some(report)
    }

    async fn probe(&self, provider: &Provider) -> ProbeReport {
        let started = std::time::Instant::now();

        let credential = match self.cipher.decrypt(&provider.spec.credential) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(
                    provider = %provider.spec.name,
                    error = %e,
                    "skipping probe: credential decrypt failed"
                );
                return ProbeReport {
                    status: ProbeStatus::Error,
                    http_code: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                    detail: e.to_string(),
                    counted: false,
                };
            }
        };

        let url = join_url(&provider.spec.base_url, "models");
        let result = self
            .http
            .get(&url)
            .bearer_auth(credential)
            .timeout(self.config.timeout)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let code = response.status().as_u16();
                if response.status().is_success() {
                    ProbeReport {
                        status: ProbeStatus::Online,
                        http_code: Some(code),
                        latency_ms,
                        detail: format!("HTTP {code}"),
                        counted: true,
                    }
                } else {
                    ProbeReport {
                        status: ProbeStatus::Degraded,
                        http_code: Some(code),
                        latency_ms,
                        detail: format!("HTTP {code}"),
                        counted: true,
                    }
                }
            }
            Err(e) => {
                let status = if e.is_timeout() {
                    ProbeStatus::Timeout
                } else if e.is_connect() {
                    ProbeStatus::Unreachable
                } else {
                    ProbeStatus::Error
                };
                ProbeReport {
                    status,
                    http_code: None,
                    latency_ms,
                    detail: e.to_string(),
                    counted: true,
                }
            }
        }
    }

    /// Fold a probe outcome into the provider's live fields under its
    /// critical section.
    fn apply(&self, id: &str, report: &ProbeReport) {
        let threshold = self.config.failure_threshold;
        self.registry.update_live(id, |live| {
            live.last_status = report.status;
            live.last_latency_ms = Some(report.latency_ms);
            live.last_probed_at = Some(chrono::Utc::now());

            match report.status {
                ProbeStatus::Online => {
                    live.consecutive_failures = 0;
                    live.healthy = true;
                }
                _ if report.counted => {
                    live.consecutive_failures = live.consecutive_failures.saturating_add(1);
                    if live.consecutive_failures >= threshold && live.healthy {
                        live.healthy = false;
                        tracing::warn!(
                            provider = id,
                            failures = live.consecutive_failures,
                            status = ?report.status,
                            "provider marked unhealthy"
                        );
                    }
                }
                _ => {}
            }
        });
    }
}

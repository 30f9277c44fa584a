//! # Gateway Configuration
//!
//! The gateway is configured from one TOML file with environment-variable
//! overrides for deployment knobs (`MANIFOLD_HOST`, `MANIFOLD_PORT`,
//! `MANIFOLD_PROBE_INTERVAL`, ...). Providers and routes declared in the
//! file seed the in-process catalog at startup; their live health is owned
//! by the prober from then on.
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! timeout = "120s"
//!
//! [health]
//! enabled = true
//! interval = "60s"
//! timeout = "5s"
//! failure_threshold = 3
//!
//! [dispatch]
//! max_attempts = 3
//! request_timeout = "120s"
//!
//! [[providers]]
//! id = "openai-main"
//! name = "openai"
//! base_url = "https://api.openai.com/v1"
//! credential = "b64:c2stLi4u"
//! models = ["gpt-4o", "gpt-4o-mini"]
//!
//! [[routes]]
//! id = "default"
//! name = "default"
//! [routes.config]
//! mode = "auto"
//! provider_mode = "all"
//! selected_models = ["gpt-4o-mini"]
//! ```

use manifold_core::catalog::{MemoryCatalog, ProviderSpec, RouteSpec};
use manifold_core::dispatch::DispatchConfig;
use manifold_core::health::ProberConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Health prober settings
    #[serde(default)]
    pub health: HealthConfig,
    /// Dispatch pipeline settings
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Credential at-rest scheme: "base64" or "plaintext"
    #[serde(default)]
    pub credentials: CredentialScheme,
    /// Providers seeding the catalog
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
    /// Routes seeding the catalog
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Whole-request timeout
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Health prober settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether the background prober runs at all
    pub enabled: bool,
    /// Probe cycle interval
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Per-probe timeout
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Consecutive failed probes before a provider is taken out
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Dispatch pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Attempt budget across providers for one request
    pub max_attempts: u32,
    /// Timeout applied to each upstream call
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// How stored credentials are decrypted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialScheme {
    #[default]
    Base64,
    Plaintext,
}

impl Config {
    /// Load from a TOML file, apply environment overrides, and validate.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config file {path}: {e}"))?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("MANIFOLD_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = env::var("MANIFOLD_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid MANIFOLD_PORT: {port}"))?;
        }
        if let Ok(timeout) = env::var("MANIFOLD_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout)?;
        }

        if let Ok(enabled) = env::var("MANIFOLD_PROBE_ENABLED") {
            self.health.enabled = enabled
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid MANIFOLD_PROBE_ENABLED: {enabled}"))?;
        }
        if let Ok(interval) = env::var("MANIFOLD_PROBE_INTERVAL") {
            self.health.interval = parse_duration(&interval)?;
        }
        if let Ok(timeout) = env::var("MANIFOLD_PROBE_TIMEOUT") {
            self.health.timeout = parse_duration(&timeout)?;
        }
        if let Ok(threshold) = env::var("MANIFOLD_FAILURE_THRESHOLD") {
            self.health.failure_threshold = threshold
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid MANIFOLD_FAILURE_THRESHOLD: {threshold}"))?;
        }

        if let Ok(attempts) = env::var("MANIFOLD_MAX_ATTEMPTS") {
            self.dispatch.max_attempts = attempts
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid MANIFOLD_MAX_ATTEMPTS: {attempts}"))?;
        }
        if let Ok(timeout) = env::var("MANIFOLD_REQUEST_TIMEOUT") {
            self.dispatch.request_timeout = parse_duration(&timeout)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port cannot be 0"));
        }
        if self.health.failure_threshold == 0 {
            return Err(anyhow::anyhow!("failure_threshold must be at least 1"));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be at least 1"));
        }
        if self.health.interval < Duration::from_secs(1) {
            return Err(anyhow::anyhow!("probe interval must be at least 1s"));
        }

        let mut provider_ids = std::collections::HashSet::new();
        let mut provider_names = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.base_url.is_empty() {
                return Err(anyhow::anyhow!(
                    "provider {:?} has an empty base_url",
                    provider.name
                ));
            }
            if !provider_ids.insert(&provider.id) {
                return Err(anyhow::anyhow!("duplicate provider id {:?}", provider.id));
            }
            if !provider_names.insert(&provider.name) {
                return Err(anyhow::anyhow!(
                    "duplicate provider name {:?}",
                    provider.name
                ));
            }
        }

        let mut route_names = std::collections::HashSet::new();
        for route in &self.routes {
            route.validate().map_err(|e| anyhow::anyhow!(e))?;
            if !route_names.insert(&route.name) {
                return Err(anyhow::anyhow!("duplicate route name {:?}", route.name));
            }
            for node in &route.nodes {
                if !provider_ids.contains(&node.provider_id) {
                    return Err(anyhow::anyhow!(
                        "route {:?} node {:?} references unknown provider {:?}",
                        route.name,
                        node.id,
                        node.provider_id
                    ));
                }
            }
        }

        Ok(())
    }

    /// Seed an in-process catalog with the configured providers and routes.
    pub fn build_catalog(&self) -> anyhow::Result<MemoryCatalog> {
        let catalog = MemoryCatalog::new();
        for provider in &self.providers {
            catalog.upsert_provider(provider.clone());
        }
        for route in &self.routes {
            catalog
                .upsert_route(route.clone())
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(catalog)
    }

    pub fn prober_config(&self) -> ProberConfig {
        ProberConfig {
            interval: self.health.interval,
            timeout: self.health.timeout,
            failure_threshold: self.health.failure_threshold,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_attempts: self.dispatch.max_attempts,
            request_timeout: self.dispatch.request_timeout,
        }
    }
}

/// Parse durations written as `300`, `300s`, `5m` or `2h`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => s.split_at(split),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration: {s}"))?;
    match unit.trim() {
        "s" | "" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(anyhow::anyhow!("unknown duration unit {other:?} in {s:?}")),
    }
}

/// Serde bridge for the `"60s"` duration strings used in the TOML file.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}s", value.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_and_without_units() {
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert!(config.health.enabled);
        assert_eq!(config.credentials, CredentialScheme::Base64);
    }

    #[test]
    fn full_config_round_trips_from_toml() {
        let raw = r#"
            credentials = "plaintext"

            [server]
            host = "0.0.0.0"
            port = 8080
            timeout = "2m"

            [health]
            enabled = false
            interval = "30s"
            timeout = "2s"
            failure_threshold = 5

            [dispatch]
            max_attempts = 2
            request_timeout = "90s"

            [[providers]]
            id = "p1"
            name = "openai"
            base_url = "https://api.openai.com/v1"
            credential = "sk-test"
            models = ["gpt-4o-mini"]

            [[routes]]
            id = "r1"
            name = "default"
            [routes.config]
            mode = "auto"
            provider_mode = "all"
            selected_models = ["gpt-4o-mini"]
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.timeout, Duration::from_secs(120));
        assert_eq!(config.credentials, CredentialScheme::Plaintext);
        assert!(!config.health.enabled);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.routes[0].name, "default");

        let catalog = config.build_catalog().unwrap();
        use manifold_core::catalog::Catalog;
        assert_eq!(catalog.list_providers().len(), 1);
        assert_eq!(catalog.list_routes().len(), 1);
    }

    #[test]
    fn validation_rejects_dangling_node_references() {
        let raw = r#"
            [[providers]]
            id = "p1"
            name = "openai"
            base_url = "https://api.openai.com/v1"
            credential = "sk"

            [[routes]]
            id = "r1"
            name = "broken"
            [routes.config]
            mode = "multi"
            [[routes.nodes]]
            id = "n1"
            provider_id = "ghost"
            models = ["m"]
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown provider"));
    }

    #[test]
    fn validation_rejects_duplicate_route_names() {
        let mut config = Config::default();
        for id in ["r1", "r2"] {
            config.routes.push(RouteSpec {
                id: id.to_string(),
                name: "same".to_string(),
                active: true,
                config: manifold_core::catalog::RouteConfig::Auto {
                    provider_mode: Default::default(),
                    selected_models: vec![],
                },
                nodes: vec![],
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = Config::default();
        // Serialize access to process env: set, apply, then clean up
        env::set_var("MANIFOLD_PORT", "9999");
        env::set_var("MANIFOLD_PROBE_INTERVAL", "15s");
        env::set_var("MANIFOLD_MAX_ATTEMPTS", "5");

        let result = config.apply_env_overrides();

        env::remove_var("MANIFOLD_PORT");
        env::remove_var("MANIFOLD_PROBE_INTERVAL");
        env::remove_var("MANIFOLD_MAX_ATTEMPTS");

        result.unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.health.interval, Duration::from_secs(15));
        assert_eq!(config.dispatch.max_attempts, 5);
    }
}

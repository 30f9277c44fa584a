//! # Error Types
//!
//! Two layers of errors flow through the engine:
//!
//! - [`ProviderError`] describes the failure of a single upstream attempt
//!   (one provider, one HTTP exchange). The dispatch pipeline inspects it to
//!   decide whether the attempt is retriable against a different provider.
//! - [`DispatchError`] is the request-terminal taxonomy surfaced to the
//!   caller once routing or the retry budget is exhausted. The gateway maps
//!   each kind to an HTTP status.
//!
//! Probe failures inside the health subsystem never surface as either type;
//! they only adjust provider liveness.

use thiserror::Error;

/// Failure of a single upstream attempt against one provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure: DNS, refused, TLS
    #[error("connection failed: {message}")]
    Unreachable { message: String },

    /// Provider answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    /// Credential could not be decrypted for this provider
    #[error("credential decrypt failed: {0}")]
    Decrypt(#[from] crate::secrets::DecryptError),

    /// Upstream payload could not be translated to the canonical shape
    #[error("malformed upstream payload: {message}")]
    Adapter { message: String },

    /// JSON serialization and deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the dispatch pipeline may retry this attempt on another
    /// provider. Upstream 4xx is the caller's problem and is surfaced
    /// without further attempts.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout | Self::Unreachable { .. } | Self::Decrypt(_) => true,
            Self::Api { code, .. } => *code >= 500,
            Self::Adapter { .. } | Self::Serialization(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Unreachable {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Adapter {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Api {
                code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Unreachable {
                message: err.to_string(),
            }
        }
    }
}

/// Terminal outcome of a dispatch or selection, surfaced to the client.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Route id or name absent, or the route is disabled
    #[error("route not active: {route}")]
    RouteNotActive { route: String },

    /// The selector exhausted every candidate for the route
    #[error("no provider available for route {route}")]
    NoProviderAvailable { route: String },

    /// Network failure after all retries
    #[error("upstream timed out")]
    UpstreamTimeout,

    /// Connection failure after all retries
    #[error("upstream unreachable: {message}")]
    UpstreamUnreachable { message: String },

    /// Upstream 4xx, forwarded without retry
    #[error("upstream rejected the request: {code} - {message}")]
    UpstreamClientError { code: u16, message: String },

    /// Upstream 5xx after all retries
    #[error("upstream server error: {code} - {message}")]
    UpstreamServerError { code: u16, message: String },

    /// Retry budget exhausted, or no alternative provider remained
    #[error("no upstream could serve the request: {detail}")]
    UpstreamUnavailable { detail: String },

    /// Upstream payload could not be translated
    #[error("adapter error: {message}")]
    Adapter { message: String },
}

impl DispatchError {
    /// Stable machine-readable identifier for the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotActive { .. } => "route_not_active",
            Self::NoProviderAvailable { .. } => "no_provider_available",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamClientError { .. } => "upstream_client_error",
            Self::UpstreamServerError { .. } => "upstream_server_error",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Adapter { .. } => "adapter_error",
        }
    }

    /// HTTP status the gateway answers with for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RouteNotActive { .. } => 404,
            Self::NoProviderAvailable { .. } | Self::UpstreamUnavailable { .. } => 503,
            Self::UpstreamTimeout => 504,
            Self::UpstreamUnreachable { .. }
            | Self::UpstreamServerError { .. }
            | Self::Adapter { .. } => 502,
            Self::UpstreamClientError { code, .. } => {
                // Preserve the upstream status where it is meaningful
                if (400..500).contains(code) {
                    *code
                } else {
                    400
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_hundreds_are_retriable_four_hundreds_are_not() {
        let server = ProviderError::Api {
            code: 503,
            message: "overloaded".into(),
        };
        let client = ProviderError::Api {
            code: 422,
            message: "bad prompt".into(),
        };
        assert!(server.is_retriable());
        assert!(!client.is_retriable());
    }

    #[test]
    fn timeout_and_connect_failures_are_retriable() {
        assert!(ProviderError::Timeout.is_retriable());
        assert!(ProviderError::Unreachable {
            message: "refused".into()
        }
        .is_retriable());
    }

    #[test]
    fn client_error_status_is_preserved() {
        let err = DispatchError::UpstreamClientError {
            code: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.http_status(), 429);
        assert_eq!(
            DispatchError::UpstreamClientError {
                code: 302,
                message: "odd".into()
            }
            .http_status(),
            400
        );
    }
}

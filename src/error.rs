//! Error types for podmirror

use std::time::Duration;
use thiserror::Error;

/// Result type alias for podmirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the mirror
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed payload or argument. Nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream fetch failed and there was no local record to fall back on.
    #[error("Upstream unavailable for {external_id}: {reason}")]
    UpstreamUnavailable { external_id: String, reason: String },

    #[error("Upstream fetch for {external_id} timed out after {after:?}")]
    Timeout { external_id: String, after: Duration },

    #[error("Follow-up delivery failed: {0}")]
    FollowUp(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Local store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Could not determine cache directory")]
    NoHome,

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt {
            table: "payload",
            detail: err.to_string(),
        }
    }
}

/// Errors reported by upstream collaborators (catalog provider, notifier)
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("Resource not found upstream: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded. Retry after {0:?}")]
    RateLimit(Duration),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Upstream request timed out")]
    Timeout,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_connect() {
            UpstreamError::Network("Failed to connect to upstream".to_string())
        } else if err.is_decode() {
            UpstreamError::InvalidResponse(err.to_string())
        } else {
            UpstreamError::Network(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),

    #[error("Catalog provider not configured. Set provider.base_url or PODMIRROR_PROVIDER_URL.")]
    MissingProvider,
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = Error::Validation("title is required".to_string());
        assert!(err.to_string().contains("title is required"));
    }

    #[test]
    fn test_upstream_unavailable_names_entity() {
        let err = Error::UpstreamUnavailable {
            external_id: "show-42".to_string(),
            reason: "Server error: 502".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("show-42"));
        assert!(msg.contains("502"));
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            external_id: "ep-1".to_string(),
            after: Duration::from_secs(15),
        };
        assert!(err.to_string().contains("15"));
    }

    #[test]
    fn test_upstream_rate_limit() {
        let err = UpstreamError::RateLimit(Duration::from_secs(30));
        let msg = err.to_string();
        assert!(msg.contains("Rate limit"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_config_error_missing_provider() {
        let err = ConfigError::MissingProvider;
        assert!(err.to_string().contains("PODMIRROR_PROVIDER_URL"));
    }

    #[test]
    fn test_error_from_store_error() {
        let err: Error = StoreError::Poisoned.into();
        match err {
            Error::Store(StoreError::Poisoned) => (),
            _ => panic!("Expected Error::Store(StoreError::Poisoned)"),
        }
    }

    #[test]
    fn test_error_from_upstream_error() {
        let err: Error = UpstreamError::NotFound("ep-9".to_string()).into();
        match err {
            Error::Upstream(UpstreamError::NotFound(id)) => assert_eq!(id, "ep-9"),
            _ => panic!("Expected Error::Upstream(UpstreamError::NotFound)"),
        }
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("ttl: [oops").unwrap_err();
        let config_err: ConfigError = yaml_err.into();
        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }
}

//! Error types for the response cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the response cache
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure reaching the origin
    #[error("Network request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// Store rejected a write because it is full
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Tier backend failure
    #[error("Storage error in tier {tier}: {reason}")]
    Storage { tier: String, reason: String },

    /// Recognized control command with an invalid payload
    #[error("Malformed control command {command}: {reason}")]
    MalformedCommand { command: String, reason: String },

    /// A seed fetch failed while installing
    #[error("Installation failed while seeding {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a network error for `url`
    pub fn network(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a storage error for `tier`
    pub fn storage(tier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Storage {
            tier: tier.into(),
            reason: reason.to_string(),
        }
    }

    /// True for transport failures (recoverable by falling back to cache)
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::network("https://example.com/api/boats", "connection refused");
        assert_eq!(
            err.to_string(),
            "Network request to https://example.com/api/boats failed: connection refused"
        );
        assert!(err.is_network());

        let err = Error::InvalidTransition {
            from: "installing".into(),
            to: "active".into(),
        };
        assert!(!err.is_network());
        assert!(err.to_string().contains("installing"));
    }
}

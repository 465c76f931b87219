//! Vault Bootstrap Error Types

use thiserror::Error;

/// Result type alias for bootstrap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bootstrap error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{endpoint} returned HTTP {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    // Readiness and polling
    #[error("Member {member} not ready after {attempts} attempts")]
    NotReady { member: String, attempts: u32 },

    #[error("Gave up waiting for {what} after {attempts} attempts")]
    RetriesExhausted { what: String, attempts: u32 },

    // Precondition violations
    #[error("Member {0} is not initialized")]
    NotInitialized(String),

    #[error("Init call on {0} succeeded but the member still reports uninitialized")]
    InitNotConfirmed(String),

    #[error("Not enough key shares: {available} available, threshold is {threshold}")]
    InsufficientShares { available: usize, threshold: usize },

    #[error("Unseal of {member} failed after {attempts} attempts")]
    UnsealFailed { member: String, attempts: u32 },

    #[error("Cluster unhealthy: {0}")]
    ClusterUnhealthy(String),

    // Secret store errors
    #[error("Secret {0} not found")]
    SecretNotFound(String),

    #[error("Secret {0} already exists")]
    SecretAlreadyExists(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("Malformed secret {name}: {reason}")]
    MalformedSecret { name: String, reason: String },

    // Platform identity
    #[error("Identity material unavailable: {0}")]
    Identity(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Api { status, .. } => *status >= 500 || *status == 429,
            Error::Io(_) | Error::NotReady { .. } => true,
            _ => false,
        }
    }

    /// Build an API error from an endpoint and status
    pub fn api(endpoint: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }
}

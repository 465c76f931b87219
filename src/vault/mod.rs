//! Vault Control API
//!
//! The operations the bootstrap needs from a single member, behind the
//! [`ClusterApi`] trait so that the pipeline can be driven against any
//! transport.

mod client;

pub use client::VaultClient;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Health status codes that mean "the process answers": active, standby,
/// DR/performance secondary, not initialized and sealed.
pub const READY_STATUS_CODES: [u16; 6] = [200, 429, 472, 473, 501, 503];

/// Whether a health status code counts as reachable-and-running
pub fn is_ready_status(code: u16) -> bool {
    READY_STATUS_CODES.contains(&code)
}

/// Body of an init request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitRequest {
    pub secret_shares: usize,
    pub secret_threshold: usize,
}

/// Body of an init response
#[derive(Clone, Deserialize)]
pub struct InitResponse {
    pub root_token: String,
    /// Hex encoded shares
    #[serde(default)]
    pub keys: Vec<String>,
}

impl std::fmt::Debug for InitResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitResponse")
            .field("root_token", &"<redacted>")
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// Seal status of a member, as returned by seal-status and unseal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(default)]
    pub initialized: bool,
    /// Shares required
    #[serde(default, rename = "t")]
    pub threshold: usize,
    /// Shares generated
    #[serde(default, rename = "n")]
    pub shares: usize,
    /// Shares accepted so far in the current sequence
    #[serde(default)]
    pub progress: usize,
}

impl SealStatus {
    /// Shares needed to unseal. An initialized member reports its own
    /// threshold; a follower that has not joined yet reports nothing useful.
    pub fn required_shares(&self, fallback: usize) -> usize {
        if self.initialized && self.threshold > 0 {
            self.threshold
        } else {
            fallback
        }
    }
}

/// One entry of the enabled auth backends listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthMount {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// Enabled auth backends keyed by mount path (with trailing slash)
pub type AuthMounts = BTreeMap<String, AuthMount>;

/// Operations against a single member
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Member address, used in log lines
    fn address(&self) -> &str;

    /// Whether the member has been initialized
    async fn init_status(&self) -> Result<bool>;

    /// Generate the root token and key shares. Destructive when repeated.
    async fn init(&self, request: InitRequest) -> Result<InitResponse>;

    async fn seal_status(&self) -> Result<SealStatus>;

    /// Submit one key share
    async fn unseal(&self, key: &str) -> Result<SealStatus>;

    /// Discard shares submitted so far
    async fn unseal_reset(&self) -> Result<SealStatus>;

    /// Raw HTTP status code of the health endpoint
    async fn health(&self) -> Result<u16>;

    async fn list_auth_backends(&self, token: &str) -> Result<AuthMounts>;

    async fn enable_auth_backend(&self, token: &str, path: &str, kind: &str) -> Result<()>;

    async fn write_auth_config(&self, token: &str, path: &str, payload: &serde_json::Value) -> Result<()>;
}

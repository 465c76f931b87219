//! Root token and key shares produced by initialization

use crate::error::{Error, Result};
use crate::vault::{InitRequest, InitResponse};

/// Separator between key shares inside a persisted blob
pub const KEY_SEPARATOR: char = ';';

/// Join key shares into a single blob
pub fn join_keys(keys: &[String]) -> String {
    keys.join(&KEY_SEPARATOR.to_string())
}

/// Split a persisted blob back into ordered key shares
pub fn split_keys(blob: &str) -> Vec<String> {
    blob.split(KEY_SEPARATOR)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Output of a successful init. Exists once per cluster lifetime: the shares
/// cannot be regenerated without invalidating every member.
#[derive(Clone, PartialEq, Eq)]
pub struct InitializationResult {
    root_token: String,
    key_shares: Vec<String>,
    share_count: usize,
    threshold: usize,
}

impl InitializationResult {
    pub fn new(root_token: String, key_shares: Vec<String>, threshold: usize) -> Result<Self> {
        if root_token.is_empty() {
            return Err(Error::Internal("init returned an empty root token".into()));
        }
        if threshold == 0 || threshold > key_shares.len() {
            return Err(Error::InsufficientShares {
                available: key_shares.len(),
                threshold,
            });
        }
        let share_count = key_shares.len();
        Ok(Self {
            root_token,
            key_shares,
            share_count,
            threshold,
        })
    }

    /// Take ownership of an init response for the given request
    pub fn from_response(response: InitResponse, request: InitRequest) -> Result<Self> {
        if response.keys.len() != request.secret_shares {
            tracing::warn!(
                "Init returned {} key shares, {} were requested",
                response.keys.len(),
                request.secret_shares
            );
        }
        Self::new(response.root_token, response.keys, request.secret_threshold)
    }

    pub fn root_token(&self) -> &str {
        &self.root_token
    }

    pub fn key_shares(&self) -> &[String] {
        &self.key_shares
    }

    pub fn share_count(&self) -> usize {
        self.share_count
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Key shares as a persisted blob
    pub fn keys_blob(&self) -> String {
        join_keys(&self.key_shares)
    }
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("root_token", &"<redacted>")
            .field("key_shares", &format!("<{} redacted>", self.key_shares.len()))
            .field("share_count", &self.share_count)
            .field("threshold", &self.threshold)
            .finish()
    }
}

//! Secret Store Gateway
//!
//! Persists the root token and the key shares outside the cluster, and reads
//! them back for later unseal and configuration runs. Writes are always
//! preceded by an existence check: material already stored is never replaced.

mod kubernetes;
mod material;

pub use kubernetes::KubernetesSecretStore;
pub use material::{join_keys, split_keys, InitializationResult, KEY_SEPARATOR};

use crate::config::SecretsConfig;
use crate::error::{Error, Result};

/// Opaque blob storage keyed by name
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a blob, `None` when no secret has that name
    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Create a new secret
    async fn put(&self, name: &str, blob: &str) -> Result<()>;
}

/// Result of persisting freshly generated material
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Both secrets were created
    Created,
    /// Nothing was written because these secrets already exist
    AlreadyPresent(Vec<String>),
}

/// Store the root token and key shares, unless any of the target secrets exists
pub async fn persist_material(
    store: &dyn SecretStore,
    names: &SecretsConfig,
    material: &InitializationResult,
) -> Result<PersistOutcome> {
    let entries = [
        (names.root_token_name.as_str(), material.root_token().to_string()),
        (names.unseal_keys_name.as_str(), material.keys_blob()),
    ];

    let existing = existing_secrets(store, names).await?;
    if !existing.is_empty() {
        tracing::warn!("Secrets {:?} already exist, not overwriting", existing);
        return Ok(PersistOutcome::AlreadyPresent(existing));
    }

    for (name, blob) in &entries {
        store.put(name, blob).await?;
        tracing::info!("Created secret {}", name);
    }
    Ok(PersistOutcome::Created)
}

/// Names of the root token and key share secrets that already exist
pub async fn existing_secrets(store: &dyn SecretStore, names: &SecretsConfig) -> Result<Vec<String>> {
    let mut existing = Vec::new();
    for name in [&names.root_token_name, &names.unseal_keys_name] {
        if store.get(name).await?.is_some() {
            existing.push(name.clone());
        }
    }
    Ok(existing)
}

/// Read the key shares back, in their original order
pub async fn load_unseal_keys(store: &dyn SecretStore, name: &str) -> Result<Vec<String>> {
    let blob = store
        .get(name)
        .await?
        .ok_or_else(|| Error::SecretNotFound(name.to_string()))?;

    let keys = split_keys(&blob);
    if keys.is_empty() {
        return Err(Error::MalformedSecret {
            name: name.to_string(),
            reason: "no key shares".into(),
        });
    }
    tracing::debug!("Loaded {} key shares from {}", keys.len(), name);
    Ok(keys)
}

/// Read the root token back
pub async fn load_root_token(store: &dyn SecretStore, name: &str) -> Result<String> {
    let blob = store
        .get(name)
        .await?
        .ok_or_else(|| Error::SecretNotFound(name.to_string()))?;

    let token = blob.trim();
    if token.is_empty() {
        return Err(Error::MalformedSecret {
            name: name.to_string(),
            reason: "empty root token".into(),
        });
    }
    Ok(token.to_string())
}

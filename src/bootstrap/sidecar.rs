//! Self-healing unseal loop
//!
//! Runs next to a single member and re-unseals it whenever it comes back
//! sealed, e.g. after a pod restart. Errors inside an iteration are logged and
//! the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterMember, SealState};
use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::secrets::{self, SecretStore};

use super::unseal::{unseal_member, UnsealOptions};

pub struct Sidecar {
    member: ClusterMember,
    store: Arc<dyn SecretStore>,
    keys_name: String,
    threshold: usize,
    options: UnsealOptions,
    interval: Duration,
}

impl Sidecar {
    pub fn new(member: ClusterMember, store: Arc<dyn SecretStore>, config: &BootstrapConfig) -> Self {
        Self {
            member,
            store,
            keys_name: config.secrets.unseal_keys_name.clone(),
            threshold: config.shares.key_threshold,
            options: UnsealOptions::from_config(config),
            interval: config.unseal_interval(),
        }
    }

    /// One unseal check. Returns `true` when the member was unsealed by this call.
    pub async fn check_once(&self) -> Result<bool> {
        if self.member.seal_state().await? == SealState::Unsealed {
            tracing::debug!("{} is unsealed", self.member.name());
            return Ok(false);
        }

        tracing::info!("{} is sealed, unsealing", self.member.name());
        let keys = secrets::load_unseal_keys(self.store.as_ref(), &self.keys_name).await?;
        unseal_member(&self.member, &keys, self.threshold, self.options).await
    }

    /// Check, sleep, repeat. Never returns under normal operation.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            "Sidecar watching {} every {:?}",
            self.member.endpoint(),
            self.interval
        );
        loop {
            match self.check_once().await {
                Ok(true) => tracing::info!("{} unsealed", self.member.name()),
                Ok(false) => {}
                Err(e) => tracing::error!("Unseal check of {} failed: {}", self.member.name(), e),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

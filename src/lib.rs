//! Vault Bootstrap - Cluster Initialization and Unseal Orchestrator
//!
//! Brings a freshly deployed Vault cluster on Kubernetes to a serving state:
//! waits for every member to answer, initializes the leader exactly once,
//! stores the generated root token and key shares as Kubernetes secrets,
//! unseals the leader and then its followers, and enables the Kubernetes auth
//! backend.
//!
//! # Architecture
//!
//! Every stage is a standalone async function over a [`cluster::Cluster`]
//! whose members talk to the server through the [`vault::ClusterApi`] trait.
//! The [`bootstrap::Bootstrap`] orchestrator chains the enabled stages, and
//! [`bootstrap::Sidecar`] keeps a single member unsealed in a loop.
//!
//! # Features
//!
//! - Parallel readiness probe with bounded or unbounded patience
//! - Init guarded by an init-status check, never repeated
//! - Read-check-then-create persistence of the secret material
//! - Leader-first unseal with a settle interval for raft storage
//! - Idempotent Kubernetes auth backend setup

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod error;
pub mod platform;
pub mod retry;
pub mod secrets;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BootstrapConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bootstrap::{Bootstrap, BootstrapReport, Sidecar, StageOutcome};
    pub use crate::cluster::{Cluster, ClusterMember, HealthState, SealState};
    pub use crate::config::BootstrapConfig;
    pub use crate::error::{Error, Result};
    pub use crate::platform::{IdentitySource, ServiceAccountIdentity};
    pub use crate::retry::{poll_until, RetryPolicy};
    pub use crate::secrets::{KubernetesSecretStore, SecretStore};
    pub use crate::vault::{ClusterApi, VaultClient};
}

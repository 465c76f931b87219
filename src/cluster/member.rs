//! Cluster member handles and state snapshots

use std::sync::Arc;

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::vault::{is_ready_status, ClusterApi, SealStatus, VaultClient};

/// Health of a member as seen by the readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Network call failed
    Unreachable,
    /// Answered with a status outside the ready set
    Unhealthy,
    /// The server process is up (it may still be sealed or uninitialized)
    Ready,
}

impl HealthState {
    /// Classify the outcome of a health query
    pub fn from_probe(result: &Result<u16>) -> Self {
        match result {
            Ok(code) if is_ready_status(*code) => HealthState::Ready,
            Ok(_) => HealthState::Unhealthy,
            Err(_) => HealthState::Unreachable,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Unreachable => write!(f, "UNREACHABLE"),
            HealthState::Unhealthy => write!(f, "UNHEALTHY"),
            HealthState::Ready => write!(f, "READY"),
        }
    }
}

/// Seal state of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealState {
    Sealed,
    /// Sealed with some shares already accepted
    Unsealing(usize),
    Unsealed,
}

impl From<&SealStatus> for SealState {
    fn from(status: &SealStatus) -> Self {
        match (status.sealed, status.progress) {
            (false, _) => SealState::Unsealed,
            (true, 0) => SealState::Sealed,
            (true, progress) => SealState::Unsealing(progress),
        }
    }
}

impl std::fmt::Display for SealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealState::Sealed => write!(f, "SEALED"),
            SealState::Unsealing(progress) => write!(f, "UNSEALING({})", progress),
            SealState::Unsealed => write!(f, "UNSEALED"),
        }
    }
}

/// Short name of a member: first DNS label of its address
pub fn member_name(address: &str) -> String {
    let Ok(url) = reqwest::Url::parse(address) else {
        return address.to_string();
    };
    // IP hosts have no domain and are kept whole
    match (url.domain(), url.host_str()) {
        (Some(domain), _) => domain.split('.').next().unwrap_or(domain).to_string(),
        (None, Some(ip)) => ip.to_string(),
        (None, None) => address.to_string(),
    }
}

/// A client handle bound to one member
#[derive(Clone)]
pub struct ClusterMember {
    name: String,
    endpoint: String,
    client: Arc<dyn ClusterApi>,
}

impl ClusterMember {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, client: Arc<dyn ClusterApi>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        }
    }

    /// Build a member backed by an HTTP client
    pub fn connect(endpoint: &str, config: &BootstrapConfig) -> Result<Self> {
        let client = VaultClient::new(endpoint, config.cluster.tls_skip_verify, config.request_timeout())?;
        Ok(Self::new(member_name(endpoint), endpoint, Arc::new(client)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api(&self) -> &dyn ClusterApi {
        self.client.as_ref()
    }

    /// Poll the health endpoint once
    pub async fn health_state(&self) -> HealthState {
        HealthState::from_probe(&self.client.health().await)
    }

    /// Poll the seal status once
    pub async fn seal_state(&self) -> Result<SealState> {
        let status = self.client.seal_status().await?;
        Ok(SealState::from(&status))
    }
}

impl std::fmt::Debug for ClusterMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMember")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// The configured members, with the leader named explicitly
#[derive(Debug, Clone)]
pub struct Cluster {
    leader: ClusterMember,
    followers: Vec<ClusterMember>,
}

impl Cluster {
    pub fn new(leader: ClusterMember, followers: Vec<ClusterMember>) -> Self {
        Self { leader, followers }
    }

    /// Build HTTP-backed members from configuration
    pub fn from_config(config: &BootstrapConfig) -> Result<Self> {
        let leader_address = config.leader_address();
        let leader = ClusterMember::connect(leader_address, config)?;

        let followers = config
            .cluster
            .members
            .iter()
            .filter(|m| m.as_str() != leader_address)
            .map(|m| ClusterMember::connect(m, config))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Cluster has {} members, leader is {} ({})",
            followers.len() + 1,
            leader.name(),
            leader.endpoint()
        );
        Ok(Self::new(leader, followers))
    }

    /// Member initialized and unsealed first
    pub fn leader(&self) -> &ClusterMember {
        &self.leader
    }

    pub fn followers(&self) -> &[ClusterMember] {
        &self.followers
    }

    /// All members, leader first
    pub fn members(&self) -> impl Iterator<Item = &ClusterMember> {
        std::iter::once(&self.leader).chain(self.followers.iter())
    }

    pub fn len(&self) -> usize {
        self.followers.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

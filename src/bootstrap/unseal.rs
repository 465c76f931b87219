//! Unseal sequencing
//!
//! Shares are submitted one at a time, in stored order, up to the threshold.
//! A failed submission restarts the member's sequence from the first share:
//! the server discards progress on a wrong or duplicate key, so a partial
//! sequence cannot be resumed.
//!
//! With integrated (raft) storage the leader must be unsealed and given time
//! to take leadership before any follower is touched.

use std::time::Duration;

use futures::future::join_all;

use crate::cluster::{Cluster, ClusterMember, SealState};
use crate::error::{Error, Result};

/// Timing and retry budget for unsealing
#[derive(Debug, Clone, Copy)]
pub struct UnsealOptions {
    /// Pause between two share submissions
    pub share_delay: Duration,
    /// Full sequences tried per member
    pub max_attempts: u32,
    /// Wait after the leader was unsealed, before the followers
    pub leader_settle: Duration,
}

impl UnsealOptions {
    pub fn from_config(config: &crate::config::BootstrapConfig) -> Self {
        Self {
            share_delay: config.unseal_share_delay(),
            max_attempts: config.timing.unseal_max_attempts,
            leader_settle: config.leader_settle(),
        }
    }
}

/// Members that changed from sealed to unsealed during a cluster pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsealReport {
    pub unsealed: Vec<String>,
    pub already_unsealed: Vec<String>,
}

impl UnsealReport {
    fn record(&mut self, name: &str, changed: bool) {
        if changed {
            self.unsealed.push(name.to_string());
        } else {
            self.already_unsealed.push(name.to_string());
        }
    }
}

/// Unseal one member. Returns `false` when it was already unsealed.
pub async fn unseal_member(
    member: &ClusterMember,
    keys: &[String],
    threshold: usize,
    options: UnsealOptions,
) -> Result<bool> {
    let status = member.api().seal_status().await?;
    if !status.sealed {
        tracing::debug!("{}: already unsealed", member.name());
        return Ok(false);
    }

    let required = status.required_shares(threshold);
    if status.shares > 0 && status.shares != keys.len() {
        tracing::warn!(
            "{}: initialized with {} shares but {} are available",
            member.name(),
            status.shares,
            keys.len()
        );
    }
    if keys.len() < required {
        return Err(Error::InsufficientShares {
            available: keys.len(),
            threshold: required,
        });
    }
    let shares = &keys[..required];

    for attempt in 1..=options.max_attempts {
        match unseal_attempt(member, shares, options.share_delay).await {
            Ok(true) => {
                tracing::info!("{}: successfully unsealed using Shamir keys", member.name());
                return Ok(true);
            }
            Ok(false) => tracing::warn!(
                "{}: still sealed after {} shares (attempt {}/{})",
                member.name(),
                shares.len(),
                attempt,
                options.max_attempts
            ),
            Err(e) => tracing::warn!(
                "{}: unseal attempt {}/{} failed: {}. Restarting from the first share",
                member.name(),
                attempt,
                options.max_attempts,
                e
            ),
        }
        tokio::time::sleep(options.share_delay).await;
    }

    tracing::error!("{}: could not be unsealed", member.name());
    Err(Error::UnsealFailed {
        member: member.name().to_string(),
        attempts: options.max_attempts,
    })
}

/// Submit every share once, starting from a clean progress counter
async fn unseal_attempt(member: &ClusterMember, shares: &[String], share_delay: Duration) -> Result<bool> {
    let api = member.api();

    match member.seal_state().await? {
        SealState::Unsealed => return Ok(true),
        SealState::Unsealing(progress) => {
            tracing::debug!("{}: discarding partial progress {}", member.name(), progress);
            api.unseal_reset().await?;
        }
        SealState::Sealed => {}
    }

    for (i, share) in shares.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(share_delay).await;
        }
        let status = api.unseal(share).await?;
        tracing::debug!(
            "{}: unseal progress {}/{}",
            member.name(),
            if status.sealed { status.progress } else { shares.len() },
            shares.len()
        );
        if !status.sealed {
            return Ok(true);
        }
    }

    Ok(matches!(member.seal_state().await?, SealState::Unsealed))
}

/// Unseal the leader, let it settle, then unseal the followers concurrently
pub async fn unseal_cluster(
    cluster: &Cluster,
    keys: &[String],
    threshold: usize,
    options: UnsealOptions,
) -> Result<UnsealReport> {
    let mut report = UnsealReport::default();

    let leader = cluster.leader();
    let leader_changed = unseal_member(leader, keys, threshold, options).await?;
    report.record(leader.name(), leader_changed);

    if cluster.followers().is_empty() {
        return Ok(report);
    }

    if leader_changed {
        tracing::info!(
            "Waiting {:?} for {} to establish leadership",
            options.leader_settle,
            leader.name()
        );
        tokio::time::sleep(options.leader_settle).await;
    }

    let results = join_all(cluster.followers().iter().map(|member| async move {
        (member.name(), unseal_member(member, keys, threshold, options).await)
    }))
    .await;

    let mut failure = None;
    for (name, result) in results {
        match result {
            Ok(changed) => report.record(name, changed),
            Err(e) => {
                tracing::error!("{}: {}", name, e);
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

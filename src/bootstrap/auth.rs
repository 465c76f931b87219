//! Kubernetes auth backend configuration
//!
//! Enabling a backend twice is rejected by the server, so the current mounts
//! are always listed first. The step is safe to rerun from the top.

use crate::cluster::{Cluster, ClusterMember};
use crate::error::{Error, Result};
use crate::platform::IdentitySource;
use crate::retry::{poll_until, RetryPolicy};

/// Backend type mounted by the configurator
pub const AUTH_BACKEND_KIND: &str = "kubernetes";

/// What the configurator found or did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    AlreadyConfigured,
    Configured,
}

/// Wait until every member is initialized and unsealed.
///
/// Checked independently of earlier stages: configuration may run long after
/// the unseal, e.g. after a restart.
pub async fn verify_cluster_health(cluster: &Cluster, policy: RetryPolicy) -> Result<()> {
    poll_until(policy, "cluster health", || cluster_healthy(cluster))
        .await
        .map_err(|e| match e {
            Error::RetriesExhausted { attempts, .. } => Error::ClusterUnhealthy(format!(
                "not every member was initialized and unsealed after {} checks",
                attempts
            )),
            other => other,
        })?;

    tracing::info!("All {} members are initialized and unsealed", cluster.len());
    Ok(())
}

async fn cluster_healthy(cluster: &Cluster) -> Result<Option<()>> {
    for member in cluster.members() {
        if !member_healthy(member).await? {
            return Ok(None);
        }
    }
    Ok(Some(()))
}

async fn member_healthy(member: &ClusterMember) -> Result<bool> {
    let api = member.api();
    if !api.init_status().await? {
        tracing::info!("{} is not initialized yet", member.name());
        return Ok(false);
    }
    let status = api.seal_status().await?;
    if status.sealed {
        tracing::info!("{} is still sealed", member.name());
        return Ok(false);
    }
    Ok(true)
}

/// Enable and configure the auth backend at `path` on the leader
pub async fn configure(
    cluster: &Cluster,
    root_token: &str,
    identity: &dyn IdentitySource,
    path: &str,
    health: RetryPolicy,
) -> Result<AuthOutcome> {
    verify_cluster_health(cluster, health).await?;

    let leader = cluster.leader();
    let api = leader.api();

    let mounts = api.list_auth_backends(root_token).await?;
    let mount = format!("{}/", path);
    if let Some(existing) = mounts.get(&mount) {
        tracing::info!(
            "{}: auth backend {} ({}) already enabled",
            leader.name(),
            mount,
            existing.kind
        );
        return Ok(AuthOutcome::AlreadyConfigured);
    }

    // Gather identity before touching the server so a missing mount leaves nothing half done
    let auth_config = identity.load()?;
    let payload = auth_config.to_payload()?;

    api.enable_auth_backend(root_token, path, AUTH_BACKEND_KIND).await?;
    tracing::info!("{}: enabled {} auth backend at {}", leader.name(), AUTH_BACKEND_KIND, mount);

    api.write_auth_config(root_token, path, &payload).await?;
    tracing::info!(
        "{}: configured {} auth against {}",
        leader.name(),
        mount,
        auth_config.api_host
    );

    Ok(AuthOutcome::Configured)
}

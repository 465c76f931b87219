//! Readiness probe
//!
//! One task per member polls its health endpoint until the server process
//! answers with a ready status code. Completions are fanned in through a
//! channel sized to the member count; the probe returns once every member has
//! reported.

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::cluster::{Cluster, ClusterMember, HealthState};
use crate::error::{Error, Result};
use crate::retry::{poll_until, RetryPolicy};

/// Block until every member answers its health endpoint
pub async fn wait_until_ready(cluster: &Cluster, policy: RetryPolicy) -> Result<Vec<(String, HealthState)>> {
    let (tx, mut rx) = mpsc::channel(cluster.len());
    let mut tasks = JoinSet::new();

    for member in cluster.members().cloned() {
        let tx = tx.clone();
        tracing::debug!("Starting readiness check for {} ({})", member.name(), member.api().address());
        tasks.spawn(async move {
            let result = probe_member(&member, policy).await;
            let _ = tx.send((member.name().to_string(), result)).await;
        });
    }
    drop(tx);

    let mut ready = Vec::with_capacity(cluster.len());
    let mut failure = None;
    while let Some((name, result)) = rx.recv().await {
        match result {
            Ok(state) => {
                tracing::info!("{} is ready", name);
                ready.push((name, state));
            }
            Err(e) => {
                tracing::error!("{} never became ready: {}", name, e);
                failure.get_or_insert(e);
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            failure.get_or_insert(Error::Internal(format!("readiness task failed: {}", e)));
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(ready),
    }
}

/// Poll one member until it reports ready
async fn probe_member(member: &ClusterMember, policy: RetryPolicy) -> Result<HealthState> {
    let what = format!("{} health", member.name());
    poll_until(policy, &what, || async {
        match member.health_state().await {
            HealthState::Ready => Ok::<_, Error>(Some(HealthState::Ready)),
            state => {
                tracing::info!("{} NOT ready ({}). Waiting...", member.name(), state);
                Ok(None)
            }
        }
    })
    .await
    .map_err(|e| match e {
        Error::RetriesExhausted { attempts, .. } => Error::NotReady {
            member: member.name().to_string(),
            attempts,
        },
        other => other,
    })
}

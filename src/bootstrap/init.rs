//! Cluster initialization
//!
//! Init is destructive when repeated, so the member's init status is always
//! read first and the call is only issued against an uninitialized member.

use crate::cluster::ClusterMember;
use crate::config::SharesConfig;
use crate::error::{Error, Result};
use crate::retry::{poll_until, RetryPolicy};
use crate::secrets::InitializationResult;
use crate::vault::InitRequest;

/// What the initializer found or did
#[derive(Debug)]
pub enum InitOutcome {
    /// The member was initialized before this run; nothing was generated
    AlreadyInitialized,
    /// Fresh material, must be persisted before anything else happens
    Initialized(InitializationResult),
}

/// Initialize `member` unless it already is
pub async fn initialize(
    member: &ClusterMember,
    shares: SharesConfig,
    confirm: RetryPolicy,
) -> Result<InitOutcome> {
    let api = member.api();

    if api.init_status().await? {
        tracing::info!("{}: already initialized, skipping init", member.name());
        return Ok(InitOutcome::AlreadyInitialized);
    }

    let request = InitRequest {
        secret_shares: shares.key_shares,
        secret_threshold: shares.key_threshold,
    };
    tracing::warn!(
        "{}: not initialized, initializing with {} shares and threshold {}",
        member.name(),
        request.secret_shares,
        request.secret_threshold
    );
    let response = api.init(request).await?;
    let material = InitializationResult::from_response(response, request)?;

    let what = format!("{} init confirmation", member.name());
    poll_until(confirm, &what, || async { Ok::<_, Error>(api.init_status().await?.then_some(())) })
        .await
        .map_err(|e| match e {
            Error::RetriesExhausted { .. } => Error::InitNotConfirmed(member.name().to_string()),
            other => other,
        })?;

    tracing::info!("{}: successfully initialized", member.name());
    Ok(InitOutcome::Initialized(material))
}

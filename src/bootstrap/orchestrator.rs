//! Bootstrap pipeline
//!
//! `Probe -> [Init] -> [PersistSecrets] -> [Unseal] -> [ConfigureAuth]`
//!
//! Each bracketed stage can be disabled in configuration. Stages that need
//! secret material take it from the init stage of this run when it produced
//! any, otherwise from the secret store. A failed stage stops the run; reruns
//! are safe because every stage checks the cluster before acting.

use std::fmt;
use std::sync::Arc;

use crate::cluster::{Cluster, HealthState, SealState};
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::platform::IdentitySource;
use crate::secrets::{self, InitializationResult, PersistOutcome, SecretStore};

use super::auth::{self, AuthOutcome};
use super::init::{initialize, InitOutcome};
use super::preflight::wait_until_ready;
use super::unseal::{unseal_cluster, UnsealOptions, UnsealReport};

/// Outcome of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageOutcome {
    /// Disabled, or nothing to do in this run
    #[default]
    Skipped,
    /// The stage changed the cluster or the secret store
    Done,
    /// The cluster was already in the target state
    AlreadySatisfied,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Skipped => write!(f, "skipped"),
            StageOutcome::Done => write!(f, "done"),
            StageOutcome::AlreadySatisfied => write!(f, "already satisfied"),
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub ready: Vec<(String, HealthState)>,
    pub init: StageOutcome,
    pub persist: StageOutcome,
    pub unseal: StageOutcome,
    pub auth: StageOutcome,
    pub unsealed: UnsealReport,
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "members ready: {}, init: {}, persist: {}, unseal: {}",
            self.ready.len(),
            self.init,
            self.persist,
            self.unseal
        )?;
        if !self.unsealed.unsealed.is_empty() {
            write!(f, " ({})", self.unsealed.unsealed.join(", "))?;
        }
        write!(f, ", auth: {}", self.auth)
    }
}

/// Runs the bootstrap pipeline against one cluster
pub struct Bootstrap {
    config: BootstrapConfig,
    cluster: Cluster,
    store: Option<Arc<dyn SecretStore>>,
    identity: Arc<dyn IdentitySource>,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig, cluster: Cluster, identity: Arc<dyn IdentitySource>) -> Self {
        Self {
            config,
            cluster,
            store: None,
            identity,
        }
    }

    /// Attach the secret store used to persist and reload material
    pub fn with_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run every enabled stage in order
    pub async fn run(&self) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let stages = &self.config.stages;

        tracing::info!("Waiting for {} members to answer", self.cluster.len());
        report.ready = wait_until_ready(&self.cluster, self.config.probe_policy()).await?;

        let mut fresh = None;
        if stages.init {
            if stages.persist_secrets {
                self.ensure_secrets_absent().await?;
            }
            match initialize(
                self.cluster.leader(),
                self.config.shares,
                self.config.init_confirm_policy(),
            )
            .await?
            {
                InitOutcome::Initialized(material) => {
                    report.init = StageOutcome::Done;
                    fresh = Some(material);
                }
                InitOutcome::AlreadyInitialized => report.init = StageOutcome::AlreadySatisfied,
            }
        } else {
            tracing::info!("Init stage disabled");
        }

        if let Some(material) = &fresh {
            report.persist = self.persist(material).await?;
        }

        if stages.unseal {
            let (outcome, unsealed) = self.unseal(fresh.as_ref()).await?;
            report.unseal = outcome;
            report.unsealed = unsealed;
        } else {
            tracing::info!("Unseal stage disabled");
        }

        if stages.configure_auth {
            report.auth = self.configure_auth(fresh.as_ref()).await?;
        } else {
            tracing::info!("Auth stage disabled");
        }

        Ok(report)
    }

    /// Refuse to initialize when the material could not be stored afterwards.
    /// Only consulted while the leader is uninitialized.
    async fn ensure_secrets_absent(&self) -> Result<()> {
        let leader = self.cluster.leader();
        if leader.api().init_status().await? {
            return Ok(());
        }

        let existing = secrets::existing_secrets(self.secret_store()?, &self.config.secrets).await?;
        if !existing.is_empty() {
            tracing::error!(
                "{} is uninitialized but secrets {:?} already exist, refusing to initialize",
                leader.name(),
                existing
            );
            return Err(Error::SecretAlreadyExists(existing.join(", ")));
        }
        Ok(())
    }

    /// Persist freshly generated material. Losing it would make the cluster
    /// unrecoverable, so any problem here stops the run before unseal.
    async fn persist(&self, material: &InitializationResult) -> Result<StageOutcome> {
        if !self.config.stages.persist_secrets {
            tracing::warn!("Secret persistence disabled: root token and key shares are not stored anywhere");
            if self.config.secrets.log_secrets {
                tracing::warn!("Root token: {}", material.root_token());
                for (i, key) in material.key_shares().iter().enumerate() {
                    tracing::warn!("Unseal key {}: {}", i + 1, key);
                }
            }
            return Ok(StageOutcome::Skipped);
        }

        let store = self.secret_store()?;
        match secrets::persist_material(store, &self.config.secrets, material).await? {
            PersistOutcome::Created => Ok(StageOutcome::Done),
            // Material from an earlier init would be shadowed by keys that
            // were never stored
            PersistOutcome::AlreadyPresent(names) => Err(Error::SecretAlreadyExists(names.join(", "))),
        }
    }

    async fn unseal(&self, fresh: Option<&InitializationResult>) -> Result<(StageOutcome, UnsealReport)> {
        let leader = self.cluster.leader();
        if !leader.api().init_status().await? {
            return Err(Error::NotInitialized(leader.name().to_string()));
        }

        let mut sealed = Vec::new();
        for member in self.cluster.members() {
            if member.seal_state().await? != SealState::Unsealed {
                sealed.push(member.name());
            }
        }
        if sealed.is_empty() {
            tracing::info!("All members already unsealed");
            let already_unsealed = self.cluster.members().map(|m| m.name().to_string()).collect();
            return Ok((
                StageOutcome::AlreadySatisfied,
                UnsealReport {
                    unsealed: Vec::new(),
                    already_unsealed,
                },
            ));
        }
        tracing::info!("Sealed members: {}", sealed.join(", "));

        let (keys, threshold) = match fresh {
            Some(material) => (material.key_shares().to_vec(), material.threshold()),
            None => {
                let keys = secrets::load_unseal_keys(self.secret_store()?, &self.config.secrets.unseal_keys_name).await?;
                (keys, self.config.shares.key_threshold)
            }
        };

        let report = unseal_cluster(&self.cluster, &keys, threshold, UnsealOptions::from_config(&self.config)).await?;
        let outcome = if report.unsealed.is_empty() {
            StageOutcome::AlreadySatisfied
        } else {
            StageOutcome::Done
        };
        Ok((outcome, report))
    }

    async fn configure_auth(&self, fresh: Option<&InitializationResult>) -> Result<StageOutcome> {
        let root_token = match fresh {
            Some(material) => material.root_token().to_string(),
            None => secrets::load_root_token(self.secret_store()?, &self.config.secrets.root_token_name).await?,
        };

        let outcome = auth::configure(
            &self.cluster,
            &root_token,
            self.identity.as_ref(),
            &self.config.auth.path,
            self.config.health_check_policy(),
        )
        .await?;

        Ok(match outcome {
            AuthOutcome::Configured => StageOutcome::Done,
            AuthOutcome::AlreadyConfigured => StageOutcome::AlreadySatisfied,
        })
    }

    fn secret_store(&self) -> Result<&dyn SecretStore> {
        self.store
            .as_deref()
            .ok_or_else(|| Error::Config("no secret store configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_cluster, test_keys, CallLog, MemoryStore, MockVault, Op, StaticIdentity, ROOT_TOKEN};

    fn config(overrides: &[(&str, &str)]) -> BootstrapConfig {
        let mut env: Vec<(&str, &str)> = vec![("VAULT_KEY_SHARES", "3"), ("VAULT_KEY_THRESHOLD", "2")];
        env.extend_from_slice(overrides);
        BootstrapConfig::default().with_env(|key| {
            env.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    fn fresh_cluster(log: &Arc<CallLog>) -> Cluster {
        mock_cluster(vec![
            MockVault::fresh("vault-0", log),
            MockVault::sealed("vault-1", log, test_keys(3), 2, false),
            MockVault::sealed("vault-2", log, test_keys(3), 2, false),
        ])
    }

    fn bootstrapped_cluster(log: &Arc<CallLog>) -> Cluster {
        mock_cluster(vec![
            MockVault::unsealed("vault-0", log, test_keys(3), 2).with_auth_backend("kubernetes"),
            MockVault::unsealed("vault-1", log, test_keys(3), 2),
            MockVault::unsealed("vault-2", log, test_keys(3), 2),
        ])
    }

    fn stored_material() -> MemoryStore {
        MemoryStore::with_entries(&[("vault-root-token", ROOT_TOKEN), ("vault-unseal-keys", "k1;k2;k3")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cluster_end_to_end() {
        let log = Arc::new(CallLog::default());
        let store = Arc::new(MemoryStore::default());
        let bootstrap = Bootstrap::new(config(&[]), fresh_cluster(&log), Arc::new(StaticIdentity::valid()))
            .with_store(store.clone());

        let report = bootstrap.run().await.unwrap();
        assert_eq!(report.ready.len(), 3);
        assert_eq!(report.init, StageOutcome::Done);
        assert_eq!(report.persist, StageOutcome::Done);
        assert_eq!(report.unseal, StageOutcome::Done);
        assert_eq!(report.auth, StageOutcome::Done);
        assert_eq!(report.unsealed.unsealed, vec!["vault-0", "vault-1", "vault-2"]);

        // One init, against the leader only
        assert_eq!(log.count("vault-0", |op| matches!(op, Op::Init(_))), 1);
        assert_eq!(log.total(|op| matches!(op, Op::Init(_))), 1);

        assert_eq!(store.blob("vault-root-token").as_deref(), Some(ROOT_TOKEN));
        assert_eq!(store.blob("vault-unseal-keys").as_deref(), Some("k1;k2;k3"));

        // Two of three shares per member, leader finished first
        let leader = log.unseal_positions("vault-0");
        assert_eq!(leader.len(), 2);
        for follower in ["vault-1", "vault-2"] {
            let positions = log.unseal_positions(follower);
            assert_eq!(positions.len(), 2);
            assert!(positions[0] > leader[1]);
        }

        assert_eq!(log.total(|op| matches!(op, Op::EnableAuth(_))), 1);
        assert_eq!(log.total(|op| matches!(op, Op::WriteAuthConfig(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_changes_nothing() {
        let log = Arc::new(CallLog::default());
        let store = Arc::new(stored_material());
        let bootstrap = Bootstrap::new(config(&[]), bootstrapped_cluster(&log), Arc::new(StaticIdentity::valid()))
            .with_store(store.clone());

        let report = bootstrap.run().await.unwrap();
        assert_eq!(report.init, StageOutcome::AlreadySatisfied);
        assert_eq!(report.persist, StageOutcome::Skipped);
        assert_eq!(report.unseal, StageOutcome::AlreadySatisfied);
        assert_eq!(report.auth, StageOutcome::AlreadySatisfied);

        assert_eq!(log.total(|op| matches!(op, Op::Init(_))), 0);
        assert_eq!(log.total(|op| matches!(op, Op::Unseal(_))), 0);
        assert_eq!(log.total(|op| matches!(op, Op::EnableAuth(_) | Op::WriteAuthConfig(_))), 0);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_stops_before_unseal() {
        let log = Arc::new(CallLog::default());
        let bootstrap = Bootstrap::new(config(&[]), fresh_cluster(&log), Arc::new(StaticIdentity::valid()))
            .with_store(Arc::new(MemoryStore::failing()));

        let err = bootstrap.run().await.unwrap_err();
        assert!(matches!(err, Error::SecretStore(_)));
        assert_eq!(log.total(|op| matches!(op, Op::Unseal(_))), 0);
        assert_eq!(log.total(|op| matches!(op, Op::EnableAuth(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_secret_is_never_overwritten() {
        let log = Arc::new(CallLog::default());
        let store = Arc::new(MemoryStore::with_entries(&[("vault-root-token", "hvs.previous")]));
        let bootstrap = Bootstrap::new(config(&[]), fresh_cluster(&log), Arc::new(StaticIdentity::valid()))
            .with_store(store.clone());

        let err = bootstrap.run().await.unwrap_err();
        assert!(matches!(err, Error::SecretAlreadyExists(ref names) if names == "vault-root-token"));
        assert_eq!(log.total(|op| matches!(op, Op::Init(_))), 0);
        assert_eq!(store.put_count(), 0);
        assert_eq!(store.blob("vault-root-token").as_deref(), Some("hvs.previous"));
        assert_eq!(log.total(|op| matches!(op, Op::Unseal(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_secret_blocks_init() {
        let log = Arc::new(CallLog::default());
        let store = Arc::new(MemoryStore::with_entries(&[("vault-unseal-keys", "old1;old2;old3")]));
        let bootstrap = Bootstrap::new(config(&[]), fresh_cluster(&log), Arc::new(StaticIdentity::valid()))
            .with_store(store.clone());

        let err = bootstrap.run().await.unwrap_err();
        assert!(matches!(err, Error::SecretAlreadyExists(ref names) if names == "vault-unseal-keys"));

        // No shares are generated that could not be stored
        assert_eq!(log.total(|op| matches!(op, Op::Init(_))), 0);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_secrets_allowed_on_initialized_cluster() {
        let log = Arc::new(CallLog::default());
        let cluster = mock_cluster(vec![
            MockVault::sealed("vault-0", &log, test_keys(3), 2, true),
            MockVault::sealed("vault-1", &log, test_keys(3), 2, true),
        ]);
        let config = config(&[("VAULT_ENABLE_K8SAUTH", "false")]);
        let bootstrap =
            Bootstrap::new(config, cluster, Arc::new(StaticIdentity::valid())).with_store(Arc::new(stored_material()));

        let report = bootstrap.run().await.unwrap();
        assert_eq!(report.init, StageOutcome::AlreadySatisfied);
        assert_eq!(report.unseal, StageOutcome::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unseal_only_loads_stored_keys() {
        let log = Arc::new(CallLog::default());
        let cluster = mock_cluster(vec![
            MockVault::sealed("vault-0", &log, test_keys(3), 2, true),
            MockVault::sealed("vault-1", &log, test_keys(3), 2, true),
        ]);
        let config = config(&[
            ("VAULT_ENABLE_INIT", "false"),
            ("VAULT_ENABLE_K8SSECRET", "false"),
            ("VAULT_ENABLE_K8SAUTH", "false"),
        ]);
        let bootstrap =
            Bootstrap::new(config, cluster, Arc::new(StaticIdentity::valid())).with_store(Arc::new(stored_material()));

        let report = bootstrap.run().await.unwrap();
        assert_eq!(report.init, StageOutcome::Skipped);
        assert_eq!(report.unseal, StageOutcome::Done);
        assert_eq!(report.auth, StageOutcome::Skipped);
        assert_eq!(log.total(|op| matches!(op, Op::Init(_))), 0);
        assert_eq!(log.count("vault-1", |op| matches!(op, Op::Unseal(_))), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unseal_requires_initialized_leader() {
        let log = Arc::new(CallLog::default());
        let cluster = mock_cluster(vec![MockVault::fresh("vault-0", &log)]);
        let config = config(&[("VAULT_ENABLE_INIT", "false"), ("VAULT_ENABLE_K8SAUTH", "false")]);
        let bootstrap =
            Bootstrap::new(config, cluster, Arc::new(StaticIdentity::valid())).with_store(Arc::new(stored_material()));

        let err = bootstrap.run().await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(ref name) if name == "vault-0"));
        assert_eq!(log.total(|op| matches!(op, Op::Unseal(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_disabled_keeps_material_in_memory() {
        let log = Arc::new(CallLog::default());
        let config = config(&[("VAULT_ENABLE_K8SSECRET", "false")]);
        let bootstrap = Bootstrap::new(config, fresh_cluster(&log), Arc::new(StaticIdentity::valid()));

        let report = bootstrap.run().await.unwrap();
        assert_eq!(report.persist, StageOutcome::Skipped);
        assert_eq!(report.unseal, StageOutcome::Done);
        assert_eq!(report.auth, StageOutcome::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_store_is_a_config_error() {
        let log = Arc::new(CallLog::default());
        let bootstrap = Bootstrap::new(config(&[]), fresh_cluster(&log), Arc::new(StaticIdentity::valid()));

        let err = bootstrap.run().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(log.total(|op| matches!(op, Op::Init(_))), 0);
        assert_eq!(log.total(|op| matches!(op, Op::Unseal(_))), 0);
    }

    #[test]
    fn test_report_display() {
        let report = BootstrapReport {
            init: StageOutcome::Done,
            unseal: StageOutcome::Done,
            unsealed: UnsealReport {
                unsealed: vec!["vault-0".into()],
                already_unsealed: Vec::new(),
            },
            ..Default::default()
        };
        assert_eq!(
            report.to_string(),
            "members ready: 0, init: done, persist: skipped, unseal: done (vault-0), auth: skipped"
        );
    }
}

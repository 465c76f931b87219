//! Test doubles shared by the unit and scenario tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::cluster::{Cluster, ClusterMember};
use crate::error::{Error, Result};
use crate::platform::{AuthConfig, IdentitySource};
use crate::secrets::SecretStore;
use crate::vault::{AuthMount, AuthMounts, ClusterApi, InitRequest, InitResponse, SealStatus};

pub const ROOT_TOKEN: &str = "hvs.root";

/// Deterministic shares "k1".."kn"
pub fn test_keys(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("k{}", i)).collect()
}

/// One recorded control API call
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    InitStatus,
    Init(InitRequest),
    SealStatus,
    Unseal(String),
    UnsealReset,
    Health,
    ListAuth,
    EnableAuth(String),
    WriteAuthConfig(serde_json::Value),
}

/// Calls across every mock member, in global order
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<(String, Op)>>,
}

impl CallLog {
    fn record(&self, member: &str, op: Op) {
        self.calls.lock().unwrap().push((member.to_string(), op));
    }

    pub fn calls(&self) -> Vec<(String, Op)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, member: &str, pred: impl Fn(&Op) -> bool) -> usize {
        self.calls()
            .iter()
            .filter(|(m, op)| m == member && pred(op))
            .count()
    }

    /// Positions of unseal submissions for a member
    pub fn unseal_positions(&self, member: &str) -> Vec<usize> {
        self.calls()
            .iter()
            .enumerate()
            .filter(|(_, (m, op))| m == member && matches!(op, Op::Unseal(_)))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn total(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.calls().iter().filter(|(_, op)| pred(op)).count()
    }
}

#[derive(Debug)]
struct MockState {
    initialized: bool,
    sealed: bool,
    threshold: usize,
    valid_keys: Vec<String>,
    accepted: Vec<String>,
    unreachable_probes: usize,
    unhealthy_probes: usize,
    init_takes_effect: bool,
    failing_unseals: usize,
    auth_mounts: AuthMounts,
}

/// In-memory member emulating the seal/init state machine
pub struct MockVault {
    name: String,
    log: Arc<CallLog>,
    state: Mutex<MockState>,
}

impl MockVault {
    fn with_state(name: &str, log: &Arc<CallLog>, state: MockState) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            state: Mutex::new(state),
        }
    }

    fn base_state() -> MockState {
        let mut auth_mounts = BTreeMap::new();
        auth_mounts.insert(
            "token/".to_string(),
            AuthMount {
                kind: "token".into(),
                description: "token based credentials".into(),
            },
        );
        MockState {
            initialized: false,
            sealed: true,
            threshold: 0,
            valid_keys: Vec::new(),
            accepted: Vec::new(),
            unreachable_probes: 0,
            unhealthy_probes: 0,
            init_takes_effect: true,
            failing_unseals: 0,
            auth_mounts,
        }
    }

    /// Never initialized, will accept an init
    pub fn fresh(name: &str, log: &Arc<CallLog>) -> Self {
        Self::with_state(name, log, Self::base_state())
    }

    /// Sealed follower that accepts the given shares
    pub fn sealed(name: &str, log: &Arc<CallLog>, keys: Vec<String>, threshold: usize, initialized: bool) -> Self {
        let mut state = Self::base_state();
        state.initialized = initialized;
        state.valid_keys = keys;
        state.threshold = threshold;
        Self::with_state(name, log, state)
    }

    /// Initialized and unsealed
    pub fn unsealed(name: &str, log: &Arc<CallLog>, keys: Vec<String>, threshold: usize) -> Self {
        let mut state = Self::base_state();
        state.initialized = true;
        state.sealed = false;
        state.valid_keys = keys;
        state.threshold = threshold;
        Self::with_state(name, log, state)
    }

    pub fn unreachable_for(self, probes: usize) -> Self {
        self.state.lock().unwrap().unreachable_probes = probes;
        self
    }

    pub fn unhealthy_for(self, probes: usize) -> Self {
        self.state.lock().unwrap().unhealthy_probes = probes;
        self
    }

    /// Init call "succeeds" but the member keeps reporting uninitialized
    pub fn with_ineffective_init(self) -> Self {
        self.state.lock().unwrap().init_takes_effect = false;
        self
    }

    /// The next `n` share submissions fail and reset progress
    pub fn failing_unseals(self, n: usize) -> Self {
        self.state.lock().unwrap().failing_unseals = n;
        self
    }

    pub fn with_auth_backend(self, path: &str) -> Self {
        self.state.lock().unwrap().auth_mounts.insert(
            format!("{}/", path),
            AuthMount {
                kind: path.into(),
                description: String::new(),
            },
        );
        self
    }

    pub fn into_member(self) -> ClusterMember {
        let name = self.name.clone();
        let endpoint = format!("https://{}.vault-internal:8200", name);
        ClusterMember::new(name, endpoint, Arc::new(self))
    }

    fn status(state: &MockState) -> SealStatus {
        SealStatus {
            sealed: state.sealed,
            initialized: state.initialized,
            threshold: state.threshold,
            shares: state.valid_keys.len(),
            progress: state.accepted.len(),
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for MockVault {
    fn address(&self) -> &str {
        &self.name
    }

    async fn init_status(&self) -> Result<bool> {
        self.log.record(&self.name, Op::InitStatus);
        Ok(self.state.lock().unwrap().initialized)
    }

    async fn init(&self, request: InitRequest) -> Result<InitResponse> {
        self.log.record(&self.name, Op::Init(request));
        let mut state = self.state.lock().unwrap();
        if state.initialized {
            return Err(Error::api("/v1/sys/init", 400, "Vault is already initialized"));
        }
        let keys = test_keys(request.secret_shares);
        state.initialized = state.init_takes_effect;
        state.valid_keys = keys.clone();
        state.threshold = request.secret_threshold;
        state.sealed = true;
        Ok(InitResponse {
            root_token: ROOT_TOKEN.to_string(),
            keys,
        })
    }

    async fn seal_status(&self) -> Result<SealStatus> {
        self.log.record(&self.name, Op::SealStatus);
        Ok(Self::status(&self.state.lock().unwrap()))
    }

    async fn unseal(&self, key: &str) -> Result<SealStatus> {
        self.log.record(&self.name, Op::Unseal(key.to_string()));
        let mut state = self.state.lock().unwrap();
        if !state.sealed {
            return Ok(Self::status(&state));
        }
        if state.failing_unseals > 0 {
            state.failing_unseals -= 1;
            state.accepted.clear();
            return Err(Error::api("/v1/sys/unseal", 500, "internal error"));
        }
        if !state.valid_keys.iter().any(|k| k == key) || state.accepted.iter().any(|k| k == key) {
            state.accepted.clear();
            return Err(Error::api("/v1/sys/unseal", 400, "invalid key"));
        }
        state.accepted.push(key.to_string());
        if state.accepted.len() >= state.threshold {
            state.accepted.clear();
            state.sealed = false;
            state.initialized = true;
        }
        Ok(Self::status(&state))
    }

    async fn unseal_reset(&self) -> Result<SealStatus> {
        self.log.record(&self.name, Op::UnsealReset);
        let mut state = self.state.lock().unwrap();
        state.accepted.clear();
        Ok(Self::status(&state))
    }

    async fn health(&self) -> Result<u16> {
        self.log.record(&self.name, Op::Health);
        let mut state = self.state.lock().unwrap();
        if state.unreachable_probes > 0 {
            state.unreachable_probes -= 1;
            return Err(Error::Internal(format!("{}: connection refused", self.name)));
        }
        if state.unhealthy_probes > 0 {
            state.unhealthy_probes -= 1;
            return Ok(500);
        }
        Ok(match (state.initialized, state.sealed) {
            (false, _) => 501,
            (true, true) => 503,
            (true, false) => 200,
        })
    }

    async fn list_auth_backends(&self, token: &str) -> Result<AuthMounts> {
        self.log.record(&self.name, Op::ListAuth);
        if token != ROOT_TOKEN {
            return Err(Error::api("/v1/sys/auth", 403, "permission denied"));
        }
        Ok(self.state.lock().unwrap().auth_mounts.clone())
    }

    async fn enable_auth_backend(&self, _token: &str, path: &str, kind: &str) -> Result<()> {
        self.log.record(&self.name, Op::EnableAuth(path.to_string()));
        let mut state = self.state.lock().unwrap();
        let mount = format!("{}/", path);
        if state.auth_mounts.contains_key(&mount) {
            return Err(Error::api("/v1/sys/auth", 400, "path is already in use"));
        }
        state.auth_mounts.insert(
            mount,
            AuthMount {
                kind: kind.to_string(),
                description: String::new(),
            },
        );
        Ok(())
    }

    async fn write_auth_config(&self, _token: &str, _path: &str, payload: &serde_json::Value) -> Result<()> {
        self.log.record(&self.name, Op::WriteAuthConfig(payload.clone()));
        Ok(())
    }
}

/// Cluster of mock members, first entry is the leader
pub fn mock_cluster(mut members: Vec<MockVault>) -> Cluster {
    let leader = members.remove(0).into_member();
    let followers = members.into_iter().map(MockVault::into_member).collect();
    Cluster::new(leader, followers)
}

/// In-memory secret store counting writes
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    puts: AtomicUsize,
    fail_puts: bool,
}

impl MemoryStore {
    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut map = store.entries.lock().unwrap();
            for (k, v) in entries {
                map.insert(k.to_string(), v.to_string());
            }
        }
        store
    }

    pub fn failing() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    pub fn blob(&self, name: &str) -> Option<String> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.blob(name))
    }

    async fn put(&self, name: &str, blob: &str) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            return Err(Error::SecretStore("API server unavailable".into()));
        }
        let mut map = self.entries.lock().unwrap();
        if map.contains_key(name) {
            return Err(Error::SecretAlreadyExists(name.to_string()));
        }
        map.insert(name.to_string(), blob.to_string());
        Ok(())
    }
}

/// Identity material fixed at construction
pub struct StaticIdentity {
    pub config: Option<AuthConfig>,
}

impl StaticIdentity {
    pub fn valid() -> Self {
        Self {
            config: Some(AuthConfig {
                api_host: "https://10.96.0.1:443".into(),
                ca_certificate: "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".into(),
                reviewer_token: "eyJhbGciOi.reviewer".into(),
            }),
        }
    }

    pub fn missing() -> Self {
        Self { config: None }
    }
}

impl IdentitySource for StaticIdentity {
    fn load(&self) -> Result<AuthConfig> {
        self.config
            .clone()
            .ok_or_else(|| Error::Identity("service account token not mounted".into()))
    }
}

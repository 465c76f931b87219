//! Vault Bootstrap Configuration
//!
//! The configuration is assembled once at startup from built-in defaults, an
//! optional TOML file and the process environment (highest precedence), then
//! handed to every component by reference. Environment values that fail to
//! parse are logged and ignored so that a typo never blocks a bootstrap.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cluster::member_name;
use crate::error::Error;
use crate::platform::{api_host_from_env, SERVICE_ACCOUNT_CA, SERVICE_ACCOUNT_NAMESPACE, SERVICE_ACCOUNT_TOKEN};
use crate::retry::RetryPolicy;

/// Main bootstrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Cluster member addresses and client settings
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Shamir share parameters
    #[serde(default)]
    pub shares: SharesConfig,

    /// Per-stage enable flags
    #[serde(default)]
    pub stages: StageConfig,

    /// Secret store settings
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Polling intervals and retry budgets
    #[serde(default)]
    pub timing: TimingConfig,

    /// Kubernetes auth backend settings
    #[serde(default)]
    pub auth: AuthSettings,

    /// Sidecar mode settings
    #[serde(default)]
    pub sidecar: SidecarConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Member API addresses (scheme://host:port)
    #[serde(default = "default_members")]
    pub members: Vec<String>,

    /// Member that is initialized and unsealed first (address or name).
    /// Defaults to the first entry of `members`.
    #[serde(default)]
    pub leader: Option<String>,

    /// Skip TLS certificate verification towards the members
    #[serde(default = "default_true")]
    pub tls_skip_verify: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Shamir share parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharesConfig {
    /// Number of key shares generated at init
    #[serde(default = "default_key_shares")]
    pub key_shares: usize,

    /// Number of shares required to unseal
    #[serde(default = "default_key_threshold")]
    pub key_threshold: usize,
}

/// Pipeline stage toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default = "default_true")]
    pub init: bool,

    #[serde(default = "default_true")]
    pub persist_secrets: bool,

    #[serde(default = "default_true")]
    pub unseal: bool,

    #[serde(default = "default_true")]
    pub configure_auth: bool,
}

/// Secret store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Namespace holding the secrets (falls back to the pod namespace)
    #[serde(default)]
    pub namespace: Option<String>,

    /// Kubernetes API server holding the secrets (discovered from the pod environment)
    #[serde(default)]
    pub api_server: Option<String>,

    /// Secret name for the root token
    #[serde(default = "default_secret_root")]
    pub root_token_name: String,

    /// Secret name for the key shares
    #[serde(default = "default_secret_unseal")]
    pub unseal_keys_name: String,

    /// Log freshly generated material when persistence is disabled
    #[serde(default)]
    pub log_secrets: bool,
}

/// Timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between readiness probes in seconds
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Probe attempts per member (0 = wait forever)
    #[serde(default)]
    pub probe_max_attempts: u32,

    /// Interval between init confirmation checks in seconds
    #[serde(default = "default_init_confirm_interval_secs")]
    pub init_confirm_interval_secs: u64,

    /// Init confirmation checks before giving up
    #[serde(default = "default_init_confirm_attempts")]
    pub init_confirm_attempts: u32,

    /// Delay between two share submissions in milliseconds
    #[serde(default = "default_unseal_share_delay_ms")]
    pub unseal_share_delay_ms: u64,

    /// Full share sequences tried per member before giving up
    #[serde(default = "default_unseal_max_attempts")]
    pub unseal_max_attempts: u32,

    /// Time granted to the leader after unsealing, in seconds
    #[serde(default = "default_leader_settle_secs")]
    pub leader_settle_secs: u64,

    /// Interval between cluster health checks in seconds
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Cluster health checks before auth configuration gives up
    #[serde(default = "default_health_check_attempts")]
    pub health_check_attempts: u32,
}

/// Kubernetes auth backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Mount path of the auth backend
    #[serde(default = "default_auth_path")]
    pub path: String,

    /// Kubernetes API address written into the backend config
    #[serde(default)]
    pub api_host: Option<String>,

    /// Reviewer JWT location
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// Cluster CA certificate location
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,
}

/// Sidecar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Address of the co-located member
    #[serde(default = "default_sidecar_address")]
    pub address: String,

    /// Seconds between unseal checks
    #[serde(default = "default_unseal_interval_secs")]
    pub unseal_interval_secs: u64,
}

/// Logging configuration, resolved from the environment before anything else
/// so that configuration fallbacks are visible
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_members() -> Vec<String> {
    vec!["https://vault:8200".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_key_shares() -> usize {
    1
}

fn default_key_threshold() -> usize {
    1
}

fn default_secret_root() -> String {
    "vault-root-token".to_string()
}

fn default_secret_unseal() -> String {
    "vault-unseal-keys".to_string()
}

fn default_probe_interval_secs() -> u64 {
    3
}

fn default_init_confirm_interval_secs() -> u64 {
    5
}

fn default_init_confirm_attempts() -> u32 {
    3
}

fn default_unseal_share_delay_ms() -> u64 {
    500
}

fn default_unseal_max_attempts() -> u32 {
    5
}

fn default_leader_settle_secs() -> u64 {
    10
}

fn default_health_check_interval_secs() -> u64 {
    3
}

fn default_health_check_attempts() -> u32 {
    5
}

fn default_auth_path() -> String {
    "kubernetes".to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from(SERVICE_ACCOUNT_TOKEN)
}

fn default_ca_cert_path() -> PathBuf {
    PathBuf::from(SERVICE_ACCOUNT_CA)
}

fn default_sidecar_address() -> String {
    "https://localhost:8200".to_string()
}

fn default_unseal_interval_secs() -> u64 {
    180
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            members: default_members(),
            leader: None,
            tls_skip_verify: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SharesConfig {
    fn default() -> Self {
        Self {
            key_shares: default_key_shares(),
            key_threshold: default_key_threshold(),
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            init: true,
            persist_secrets: true,
            unseal: true,
            configure_auth: true,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            api_server: None,
            root_token_name: default_secret_root(),
            unseal_keys_name: default_secret_unseal(),
            log_secrets: false,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_max_attempts: 0,
            init_confirm_interval_secs: default_init_confirm_interval_secs(),
            init_confirm_attempts: default_init_confirm_attempts(),
            unseal_share_delay_ms: default_unseal_share_delay_ms(),
            unseal_max_attempts: default_unseal_max_attempts(),
            leader_settle_secs: default_leader_settle_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_attempts: default_health_check_attempts(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            path: default_auth_path(),
            api_host: None,
            token_path: default_token_path(),
            ca_cert_path: default_ca_cert_path(),
        }
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            address: default_sidecar_address(),
            unseal_interval_secs: default_unseal_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        env_string(&lookup, "LOG_LEVEL", &mut config.level);
        env_string(&lookup, "LOG_FORMAT", &mut config.format);
        config
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl BootstrapConfig {
    /// Load configuration from an optional TOML file, then the process environment
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration from an optional TOML file, then the values found through `lookup`
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        Ok(config.with_env(lookup))
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: BootstrapConfig = toml::from_str(content)?;
        Ok(config.normalized())
    }

    /// Overlay environment values obtained through `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(members) = lookup("VAULT_CLUSTER_MEMBERS") {
            self.cluster.members = split_members(&members);
        }
        if let Some(leader) = lookup("VAULT_LEADER") {
            let leader = leader.trim();
            if !leader.is_empty() {
                self.cluster.leader = Some(leader.to_string());
            }
        }
        env_bool(&lookup, "VAULT_SKIP_VERIFY", &mut self.cluster.tls_skip_verify);
        env_parse(&lookup, "VAULT_REQUEST_TIMEOUT", &mut self.cluster.request_timeout_secs);

        env_parse(&lookup, "VAULT_KEY_SHARES", &mut self.shares.key_shares);
        env_parse(&lookup, "VAULT_KEY_THRESHOLD", &mut self.shares.key_threshold);

        env_bool(&lookup, "VAULT_ENABLE_INIT", &mut self.stages.init);
        env_bool(&lookup, "VAULT_ENABLE_K8SSECRET", &mut self.stages.persist_secrets);
        env_bool(&lookup, "VAULT_ENABLE_UNSEAL", &mut self.stages.unseal);
        env_bool(&lookup, "VAULT_ENABLE_K8SAUTH", &mut self.stages.configure_auth);

        if let Some(namespace) = lookup("NAMESPACE") {
            self.secrets.namespace = Some(namespace.trim().to_string());
        }
        env_string(&lookup, "VAULT_SECRET_ROOT", &mut self.secrets.root_token_name);
        env_string(&lookup, "VAULT_SECRET_UNSEAL", &mut self.secrets.unseal_keys_name);
        env_bool(&lookup, "VAULT_LOG_SECRETS", &mut self.secrets.log_secrets);

        env_parse(&lookup, "VAULT_PROBE_INTERVAL", &mut self.timing.probe_interval_secs);
        env_parse(&lookup, "VAULT_PROBE_MAX_ATTEMPTS", &mut self.timing.probe_max_attempts);
        env_parse(&lookup, "VAULT_UNSEAL_ATTEMPTS", &mut self.timing.unseal_max_attempts);
        env_parse(&lookup, "VAULT_LEADER_SETTLE", &mut self.timing.leader_settle_secs);

        env_string(&lookup, "VAULT_AUTH_PATH", &mut self.auth.path);
        if let Some(host) = lookup("KUBERNETES_HOST") {
            self.auth.api_host = Some(host.trim().to_string());
        }

        // Pods get the API server address injected; explicit settings win
        let discovered = api_host_from_env(&lookup).ok();
        if self.auth.api_host.is_none() {
            self.auth.api_host = discovered.clone();
        }
        if self.secrets.api_server.is_none() {
            self.secrets.api_server = discovered;
        }

        env_string(&lookup, "VAULT_SIDECAR_ADDR", &mut self.sidecar.address);
        env_parse(&lookup, "UNSEAL_INTERVAL", &mut self.sidecar.unseal_interval_secs);

        self.normalized()
    }

    /// Replace invalid combinations with defaults, logging each fallback
    fn normalized(mut self) -> Self {
        if self.cluster.members.is_empty() {
            tracing::warn!("No cluster members configured. Defaulting to {:?}", default_members());
            self.cluster.members = default_members();
        }

        let mut unique: Vec<String> = Vec::with_capacity(self.cluster.members.len());
        for member in &self.cluster.members {
            let member = member.trim().trim_end_matches('/');
            if unique.iter().any(|m| m == member) {
                tracing::warn!("Duplicate cluster member {}. Ignoring the repeat", member);
            } else {
                unique.push(member.to_string());
            }
        }
        self.cluster.members = unique;

        let shares = self.shares;
        if shares.key_shares == 0
            || shares.key_threshold == 0
            || shares.key_threshold > shares.key_shares
        {
            tracing::warn!(
                "Invalid share parameters (shares={}, threshold={}). Defaulting to shares={}, threshold={}",
                shares.key_shares,
                shares.key_threshold,
                default_key_shares(),
                default_key_threshold()
            );
            self.shares = SharesConfig::default();
        }

        if self.timing.unseal_max_attempts == 0 {
            tracing::warn!(
                "Unseal attempts must be at least 1. Defaulting to {}",
                default_unseal_max_attempts()
            );
            self.timing.unseal_max_attempts = default_unseal_max_attempts();
        }

        if self.timing.probe_interval_secs == 0 {
            tracing::warn!(
                "Probe interval must be at least 1s. Defaulting to {}s",
                default_probe_interval_secs()
            );
            self.timing.probe_interval_secs = default_probe_interval_secs();
        }
        if self.timing.init_confirm_interval_secs == 0 {
            tracing::warn!(
                "Init confirmation interval must be at least 1s. Defaulting to {}s",
                default_init_confirm_interval_secs()
            );
            self.timing.init_confirm_interval_secs = default_init_confirm_interval_secs();
        }
        if self.timing.health_check_interval_secs == 0 {
            tracing::warn!(
                "Health check interval must be at least 1s. Defaulting to {}s",
                default_health_check_interval_secs()
            );
            self.timing.health_check_interval_secs = default_health_check_interval_secs();
        }
        if self.sidecar.unseal_interval_secs == 0 {
            tracing::warn!(
                "Unseal interval must be at least 1s. Defaulting to {}s",
                default_unseal_interval_secs()
            );
            self.sidecar.unseal_interval_secs = default_unseal_interval_secs();
        }

        if self.auth.path.trim_matches('/').is_empty() {
            tracing::warn!("Empty auth path. Defaulting to {}", default_auth_path());
            self.auth.path = default_auth_path();
        }
        self.auth.path = self.auth.path.trim_matches('/').to_string();

        self
    }

    /// Address of the member that is initialized and unsealed first
    pub fn leader_address(&self) -> &str {
        // normalized() keeps at least one member
        let first = self.cluster.members[0].as_str();
        let Some(leader) = self.cluster.leader.as_deref() else {
            return first;
        };

        match self
            .cluster
            .members
            .iter()
            .find(|m| m.as_str() == leader || member_name(m) == leader)
        {
            Some(member) => member,
            None => {
                tracing::warn!(
                    "Configured leader {} is not a cluster member. Defaulting to {}",
                    leader,
                    first
                );
                first
            }
        }
    }

    /// Namespace for the secret store: explicit, pod namespace, or `default`
    pub fn namespace(&self) -> String {
        if let Some(ns) = self.secrets.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            return ns.to_string();
        }
        match std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE) {
            Ok(ns) if !ns.trim().is_empty() => ns.trim().to_string(),
            _ => "default".to_string(),
        }
    }

    /// API server address for the secret store
    pub fn kubernetes_api(&self) -> crate::Result<&str> {
        self.secrets
            .api_server
            .as_deref()
            .filter(|api| !api.is_empty())
            .ok_or_else(|| Error::Config("Kubernetes API server address not configured".into()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster.request_timeout_secs)
    }

    /// Readiness probe policy (unbounded when no attempt budget is set)
    pub fn probe_policy(&self) -> RetryPolicy {
        let interval = Duration::from_secs(self.timing.probe_interval_secs);
        match self.timing.probe_max_attempts {
            0 => RetryPolicy::forever(interval),
            n => RetryPolicy::bounded(interval, n),
        }
    }

    pub fn init_confirm_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            Duration::from_secs(self.timing.init_confirm_interval_secs),
            self.timing.init_confirm_attempts.max(1),
        )
    }

    pub fn health_check_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            Duration::from_secs(self.timing.health_check_interval_secs),
            self.timing.health_check_attempts.max(1),
        )
    }

    pub fn unseal_share_delay(&self) -> Duration {
        Duration::from_millis(self.timing.unseal_share_delay_ms)
    }

    pub fn leader_settle(&self) -> Duration {
        Duration::from_secs(self.timing.leader_settle_secs)
    }

    pub fn unseal_interval(&self) -> Duration {
        Duration::from_secs(self.sidecar.unseal_interval_secs)
    }
}

/// Split a comma separated member list, dropping blanks
fn split_members(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().trim_end_matches('/').to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

fn env_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => *target = value.trim().to_string(),
        Some(_) => tracing::warn!("{} is empty. Keeping {}", key, target),
        None => tracing::debug!("{} not set. Using {}", key, target),
    }
}

fn env_parse<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        tracing::debug!("{} not set. Using {}", key, target);
        return;
    };
    match value.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => tracing::warn!("Invalid value {:?} for {}. Keeping {}", value, key, target),
    }
}

fn env_bool<F>(lookup: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        tracing::debug!("{} not set. Using {}", key, target);
        return;
    };
    match parse_bool(&value) {
        Some(parsed) => *target = parsed,
        None => tracing::warn!("Invalid value {:?} for {}. Keeping {}", value, key, target),
    }
}

/// Accepts the usual spellings: 1/0, t/f, true/false, yes/no in any case
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

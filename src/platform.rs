//! Kubernetes identity material
//!
//! The auth backend needs three things from the surrounding platform: the API
//! server address, its CA certificate and a JWT allowed to call the
//! TokenReview API. The token and certificate come from the service-account
//! mount, the address is resolved with the rest of the configuration.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::AuthSettings;
use crate::error::{Error, Result};

pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
pub const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Trust configuration written to the Kubernetes auth backend
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthConfig {
    #[serde(rename = "kubernetes_host")]
    pub api_host: String,
    #[serde(rename = "kubernetes_ca_cert")]
    pub ca_certificate: String,
    #[serde(rename = "token_reviewer_jwt")]
    pub reviewer_token: String,
}

impl AuthConfig {
    /// Payload for the backend config write
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_host", &self.api_host)
            .field("ca_certificate", &format!("{} bytes", self.ca_certificate.len()))
            .field("reviewer_token", &"<redacted>")
            .finish()
    }
}

/// Source of the platform identity material
pub trait IdentitySource: Send + Sync {
    fn load(&self) -> Result<AuthConfig>;
}

/// Reads identity material from the pod's service-account mount
#[derive(Debug, Clone)]
pub struct ServiceAccountIdentity {
    token_path: PathBuf,
    ca_cert_path: PathBuf,
    api_host: Option<String>,
}

impl ServiceAccountIdentity {
    pub fn new(token_path: PathBuf, ca_cert_path: PathBuf, api_host: Option<String>) -> Self {
        Self {
            token_path,
            ca_cert_path,
            api_host,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(
            settings.token_path.clone(),
            settings.ca_cert_path.clone(),
            settings.api_host.clone(),
        )
    }

    fn api_host(&self) -> Result<String> {
        self.api_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Identity("Kubernetes API address not configured".into()))
    }
}

impl IdentitySource for ServiceAccountIdentity {
    fn load(&self) -> Result<AuthConfig> {
        let reviewer_token = std::fs::read_to_string(&self.token_path).map_err(|e| {
            Error::Identity(format!("cannot read {}: {}", self.token_path.display(), e))
        })?;
        let ca_certificate = std::fs::read_to_string(&self.ca_cert_path).map_err(|e| {
            Error::Identity(format!("cannot read {}: {}", self.ca_cert_path.display(), e))
        })?;

        Ok(AuthConfig {
            api_host: self.api_host()?,
            ca_certificate,
            reviewer_token: reviewer_token.trim().to_string(),
        })
    }
}

/// Derive the API server URL from the variables Kubernetes injects into pods
pub fn api_host_from_env<F>(lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("KUBERNETES_PORT_443_TCP_ADDR") {
        return Ok(format!("https://{}:443", addr.trim()));
    }
    match (lookup("KUBERNETES_SERVICE_HOST"), lookup("KUBERNETES_SERVICE_PORT")) {
        (Some(host), Some(port)) => Ok(format!("https://{}:{}", host.trim(), port.trim())),
        (Some(host), None) => Ok(format!("https://{}:443", host.trim())),
        _ => Err(Error::Identity("Kubernetes API address not found in environment".into())),
    }
}

//! Kubernetes Secret backend
//!
//! Each blob is stored under a single data key of an Opaque secret in the
//! configured namespace.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;

use super::SecretStore;
use crate::error::{Error, Result};
use crate::platform::{SERVICE_ACCOUNT_CA, SERVICE_ACCOUNT_TOKEN};

/// Data key holding the blob
pub const DATA_KEY: &str = "vaultData";

#[derive(Debug, Deserialize)]
struct SecretBody {
    #[serde(default)]
    data: HashMap<String, String>,
}

/// Secret store backed by the Kubernetes API server
pub struct KubernetesSecretStore {
    api: String,
    namespace: String,
    token: String,
    http: reqwest::Client,
}

impl KubernetesSecretStore {
    pub fn new(api: &str, namespace: &str, token: &str, http: reqwest::Client) -> Self {
        Self {
            api: api.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token: token.to_string(),
            http,
        }
    }

    /// Connect to the API server at `api` with the pod's service account
    pub fn in_cluster(api: &str, namespace: &str, timeout: Duration) -> Result<Self> {
        let token = read_trimmed(Path::new(SERVICE_ACCOUNT_TOKEN))?;
        let ca = std::fs::read(SERVICE_ACCOUNT_CA)?;

        let http = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .timeout(timeout)
            .build()?;

        tracing::debug!("Using Kubernetes API {} namespace {}", api, namespace);
        Ok(Self::new(api, namespace, &token, http))
    }

    fn secrets_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/secrets", self.api, self.namespace)
    }

    async fn error_for(&self, endpoint: String, response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Error::SecretStore(format!("{} returned HTTP {}: {}", endpoint, status, message.trim()))
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

#[async_trait::async_trait]
impl SecretStore for KubernetesSecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/{}", self.secrets_url(), name);
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => return Err(self.error_for(url, response).await),
            _ => {}
        }

        let body: SecretBody = response.json().await?;
        let encoded = body.data.get(DATA_KEY).ok_or_else(|| Error::MalformedSecret {
            name: name.to_string(),
            reason: format!("missing data key {}", DATA_KEY),
        })?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::MalformedSecret {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let blob = String::from_utf8(decoded).map_err(|e| Error::MalformedSecret {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(blob))
    }

    async fn put(&self, name: &str, blob: &str) -> Result<()> {
        let url = self.secrets_url();
        let secret = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": name },
            "type": "Opaque",
            "stringData": { DATA_KEY: blob },
        });

        let response = self.http.post(&url).bearer_auth(&self.token).json(&secret).send().await?;
        match response.status() {
            StatusCode::CONFLICT => Err(Error::SecretAlreadyExists(name.to_string())),
            status if status.is_success() => Ok(()),
            _ => Err(self.error_for(url, response).await),
        }
    }
}

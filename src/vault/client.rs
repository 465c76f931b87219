//! Vault HTTP Client
//!
//! reqwest-backed implementation of [`ClusterApi`] for one member.

use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;

use super::{AuthMount, AuthMounts, ClusterApi, InitRequest, InitResponse, SealStatus};
use crate::error::{Error, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault error body
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InitStatusBody {
    initialized: bool,
}

/// HTTP client bound to a single member address
pub struct VaultClient {
    address: String,
    http: reqwest::Client,
}

impl VaultClient {
    /// Create a client for `address` (scheme://host:port)
    pub fn new(address: &str, tls_skip_verify: bool, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(tls_skip_verify)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path)
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    /// Turn a non-success response into [`Error::Api`]
    async fn expect_success(&self, path: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
            _ => text,
        };
        Err(Error::api(format!("{}/v1/{}", self.address, path), status.as_u16(), message))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T> {
        let response = self.request(Method::GET, path, token).send().await?;
        let response = self.expect_success(path, response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl ClusterApi for VaultClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn init_status(&self) -> Result<bool> {
        let body: InitStatusBody = self.get_json("sys/init", None).await?;
        Ok(body.initialized)
    }

    async fn init(&self, request: InitRequest) -> Result<InitResponse> {
        let path = "sys/init";
        let response = self.request(Method::PUT, path, None).json(&request).send().await?;
        let response = self.expect_success(path, response).await?;
        Ok(response.json().await?)
    }

    async fn seal_status(&self) -> Result<SealStatus> {
        self.get_json("sys/seal-status", None).await
    }

    async fn unseal(&self, key: &str) -> Result<SealStatus> {
        let path = "sys/unseal";
        let response = self
            .request(Method::PUT, path, None)
            .json(&serde_json::json!({ "key": key }))
            .send()
            .await?;
        let response = self.expect_success(path, response).await?;
        Ok(response.json().await?)
    }

    async fn unseal_reset(&self) -> Result<SealStatus> {
        let path = "sys/unseal";
        let response = self
            .request(Method::PUT, path, None)
            .json(&serde_json::json!({ "reset": true }))
            .send()
            .await?;
        let response = self.expect_success(path, response).await?;
        Ok(response.json().await?)
    }

    async fn health(&self) -> Result<u16> {
        let response = self.request(Method::GET, "sys/health", None).send().await?;
        Ok(response.status().as_u16())
    }

    async fn list_auth_backends(&self, token: &str) -> Result<AuthMounts> {
        let body: serde_json::Value = self.get_json("sys/auth", Some(token)).await?;

        // Newer servers nest the mounts under "data" and repeat them at the top level
        let mounts = body
            .get("data")
            .and_then(|d| d.as_object())
            .or_else(|| body.as_object())
            .cloned()
            .unwrap_or_default();

        Ok(mounts
            .into_iter()
            .filter(|(path, _)| path.ends_with('/'))
            .filter_map(|(path, value)| {
                serde_json::from_value::<AuthMount>(value)
                    .ok()
                    .map(|mount| (path, mount))
            })
            .collect())
    }

    async fn enable_auth_backend(&self, token: &str, path: &str, kind: &str) -> Result<()> {
        let api_path = format!("sys/auth/{}", path);
        let response = self
            .request(Method::POST, &api_path, Some(token))
            .json(&serde_json::json!({ "type": kind }))
            .send()
            .await?;
        self.expect_success(&api_path, response).await?;
        Ok(())
    }

    async fn write_auth_config(&self, token: &str, path: &str, payload: &serde_json::Value) -> Result<()> {
        let api_path = format!("auth/{}/config", path);
        let response = self
            .request(Method::POST, &api_path, Some(token))
            .json(payload)
            .send()
            .await?;
        let response = self.expect_success(&api_path, response).await?;
        if response.status() != StatusCode::NO_CONTENT {
            tracing::debug!("{}: auth config write returned {}", self.address, response.status());
        }
        Ok(())
    }
}

//! Secret-store collaborator: fetches one key/value bundle at process start.
//!
//! Speaks the Vault KV v2 read endpoint. Secrets are never refreshed after
//! startup; rotation is out of scope.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("secret store returned status {status}")]
    Status { status: u16 },
}

pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: String,
    mount: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvReadData,
}

#[derive(Debug, Deserialize)]
struct KvReadData {
    data: HashMap<String, String>,
}

impl VaultClient {
    pub fn new(addr: &str, token: &str, mount: &str, path: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            mount: mount.to_string(),
            path: path.to_string(),
        }
    }

    /// Fetch the configured bundle once. Values are merged into settings by
    /// the assembly loaders; this client holds no state beyond the session.
    pub async fn fetch(&self) -> Result<HashMap<String, String>, SecretStoreError> {
        let url = format!("{}/v1/{}/data/{}", self.addr, self.mount, self.path);
        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SecretStoreError::Status {
                status: status.as_u16(),
            });
        }

        let body: KvReadResponse = response.json().await?;
        debug!(
            target: "keel::secrets",
            keys = body.data.data.len(),
            "secret bundle fetched",
        );
        Ok(body.data.data)
    }
}

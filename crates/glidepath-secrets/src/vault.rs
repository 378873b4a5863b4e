//! Vault HTTP client.
//!
//! Authenticates with the kubernetes auth method (service-account JWT
//! read from a file, `POST /v1/auth/<mount>/login`) and reads secrets
//! with `GET /v1/<path>` carrying `X-Vault-Token`. The client token is
//! cached and renewed by logging in again when vault answers 403.
//! Both `http://` and `https://` addresses work; TLS is rustls, trusting
//! the webpki roots plus an optional `[vault].ca_cert` bundle.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use glide_core::config::VaultConfig;

use crate::error::{SecretError, SecretResult};
use crate::source::{SecretData, SecretSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VaultClient {
    http: Client,
    address: String,
    auth_mount: String,
    role: Option<String>,
    token_path: PathBuf,
    token: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: Option<serde_json::Value>,
}

impl VaultClient {
    /// Build a client from `[vault]` config. `role` overrides the
    /// configured role, as the pod's `vault.hashicorp.com/role` does.
    pub fn from_config(config: &VaultConfig, role: Option<&str>) -> SecretResult<Self> {
        let mut builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("glidepath-secrets/0.1")
            .no_proxy()
            .use_rustls_tls();
        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                SecretError::Http(format!("reading CA bundle {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                SecretError::Http(format!("parsing CA bundle {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| SecretError::Http(format!("building vault client: {e}")))?;

        Ok(Self {
            http,
            address: config.address().trim_end_matches('/').to_string(),
            auth_mount: config.auth_mount().trim_matches('/').to_string(),
            role: role.map(str::to_string).or_else(|| config.role.clone()),
            token_path: config.token_path(),
            token: Mutex::new(None),
        })
    }

    /// Use a pre-issued client token instead of logging in.
    pub fn with_token(self, token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            ..self
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Log in with the service-account JWT and cache the client token.
    pub async fn login(&self) -> SecretResult<String> {
        let role = self
            .role
            .as_deref()
            .ok_or_else(|| SecretError::Auth("no vault role configured".to_string()))?;
        let jwt = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| {
                SecretError::Auth(format!(
                    "reading service account token {}: {e}",
                    self.token_path.display()
                ))
            })?;

        let body = serde_json::json!({ "role": role, "jwt": jwt.trim() });
        let url = self.url(&format!("auth/{}/login", self.auth_mount));
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SecretError::Auth(format!("{url} returned {status}")));
        }

        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Decode(format!("login response: {e}")))?;
        let token = parsed
            .auth
            .map(|a| a.client_token)
            .ok_or_else(|| SecretError::Auth("login response has no auth block".to_string()))?;

        info!(mount = %self.auth_mount, %role, "vault login succeeded");
        *self.token.lock().await = Some(token.clone());
        Ok(token)
    }

    async fn token(&self) -> SecretResult<String> {
        if let Some(token) = self.token.lock().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn read(&self, path: &str, token: &str) -> SecretResult<Response> {
        let url = self.url(path);
        self.http
            .get(&url)
            .header("x-vault-token", token)
            .send()
            .await
            .map_err(|e| request_error(&url, e))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }
}

fn request_error(url: &str, e: reqwest::Error) -> SecretError {
    if e.is_timeout() {
        SecretError::Http(format!("{url}: timed out"))
    } else {
        SecretError::Http(format!("{url}: {e}"))
    }
}

#[async_trait]
impl SecretSource for VaultClient {
    async fn fetch(&self, path: &str) -> SecretResult<SecretData> {
        let token = self.token().await?;
        let mut response = self.read(path, &token).await?;

        if response.status() == StatusCode::FORBIDDEN && self.role.is_some() {
            debug!(%path, "vault token rejected, logging in again");
            *self.token.lock().await = None;
            let token = self.login().await?;
            response = self.read(path, &token).await?;
        }
        let status = response.status();
        if !status.is_success() {
            return Err(SecretError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let parsed: ReadResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Decode(format!("{path}: {e}")))?;
        let data = parsed
            .data
            .ok_or_else(|| SecretError::Decode(format!("{path}: response has no data")))?;
        let secret = SecretData::new(path, data);
        debug!(%path, version = ?secret.version(), "fetched secret");
        Ok(secret)
    }
}

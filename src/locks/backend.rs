//! Remote advisory lock backends.
//!
//! The coordinator only ever asks two questions: "may I take this key?" and
//! "please drop this key". Both return a plain boolean from the backend.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::key::LockKey;
use crate::config::LockSettings;

pub const TRY_LOCK_FUNCTION: &str = "try_advisory_lock";
pub const RELEASE_LOCK_FUNCTION: &str = "release_advisory_lock";

#[derive(Debug, Error)]
pub enum LockBackendError {
    #[error("invalid lock backend url: {0}")]
    InvalidUrl(String),

    #[error("lock backend unreachable: {0}")]
    Transport(String),

    #[error("lock backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected lock backend response: {0}")]
    Decode(String),
}

/// Non-blocking try-acquire / release of session-scoped advisory locks.
#[async_trait]
pub trait LockBackend: Send + Sync + std::fmt::Debug {
    /// `Ok(true)` when the key was granted, `Ok(false)` when another holder has it.
    async fn try_acquire(&self, key: LockKey) -> Result<bool, LockBackendError>;

    /// `Ok(true)` when the key was held by this session and is now free.
    async fn release(&self, key: LockKey) -> Result<bool, LockBackendError>;
}

/// In-process backend: a key can be held once until released.
///
/// Used in offline mode and tests.
#[derive(Debug, Default)]
pub struct LocalLockBackend {
    held: Mutex<HashSet<LockKey>>,
}

impl LocalLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: LockKey) -> bool {
        self.held
            .lock()
            .expect("local lock backend mutex poisoned")
            .contains(&key)
    }

    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .expect("local lock backend mutex poisoned")
            .len()
    }
}

#[async_trait]
impl LockBackend for LocalLockBackend {
    async fn try_acquire(&self, key: LockKey) -> Result<bool, LockBackendError> {
        Ok(self
            .held
            .lock()
            .expect("local lock backend mutex poisoned")
            .insert(key))
    }

    async fn release(&self, key: LockKey) -> Result<bool, LockBackendError> {
        Ok(self
            .held
            .lock()
            .expect("local lock backend mutex poisoned")
            .remove(&key))
    }
}

/// Backend calling `try_advisory_lock` / `release_advisory_lock` as HTTP RPCs.
///
/// Requests are `POST {base}/rest/v1/rpc/{function}` with body
/// `{"p_lock_key": <i64>}`; the response body is a JSON boolean.
#[derive(Debug, Clone)]
pub struct RpcLockBackend {
    client: reqwest::Client,
    rpc_base: Url,
    api_key: Option<String>,
}

impl RpcLockBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LockBackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LockBackendError::Transport(e.to_string()))?;
        Self::with_client(base_url, api_key, client)
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, pooling).
    pub fn with_client(
        base_url: &str,
        api_key: Option<&str>,
        client: reqwest::Client,
    ) -> Result<Self, LockBackendError> {
        let mut base =
            Url::parse(base_url).map_err(|e| LockBackendError::InvalidUrl(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rpc_base = base
            .join("rest/v1/rpc/")
            .map_err(|e| LockBackendError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client,
            rpc_base,
            api_key: api_key.map(str::to_string),
        })
    }

    /// Build from settings; `None` when no RPC url is configured.
    pub fn from_settings(settings: &LockSettings) -> Result<Option<Self>, LockBackendError> {
        match &settings.rpc_url {
            Some(url) => Self::new(
                url,
                settings.api_key.as_deref(),
                Duration::from_millis(settings.rpc_timeout_ms),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    async fn call(&self, function: &str, key: LockKey) -> Result<bool, LockBackendError> {
        let url = self
            .rpc_base
            .join(function)
            .map_err(|e| LockBackendError::InvalidUrl(e.to_string()))?;

        let mut request = self
            .client
            .post(url)
            .json(&json!({ "p_lock_key": key.value() }));
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key).bearer_auth(api_key);
        }

        let res = request
            .send()
            .await
            .map_err(|e| LockBackendError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(LockBackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        res.json::<bool>()
            .await
            .map_err(|e| LockBackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LockBackend for RpcLockBackend {
    async fn try_acquire(&self, key: LockKey) -> Result<bool, LockBackendError> {
        self.call(TRY_LOCK_FUNCTION, key).await
    }

    async fn release(&self, key: LockKey) -> Result<bool, LockBackendError> {
        self.call(RELEASE_LOCK_FUNCTION, key).await
    }
}

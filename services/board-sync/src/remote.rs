//! Remote key-value API.
//!
//! The server exposes two logical operations:
//!
//! - `GET  {base}/kv/{key}?{params}` returns the stored JSON (404 or `null`
//!   when absent).
//! - `POST {base}/kv/{key}?{params}` stores the JSON body and answers
//!   `{"ok": bool, "error"?: string}`.
//!
//! Delivery is at-least-once with no transactions or locking.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::cache_key;
use crate::config::Config;
use crate::error::SyncError;

/// Request parameters (date, shift, appendHistory, ...).
pub type Params = BTreeMap<String, String>;

/// Server acknowledgement of a save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveAck {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }
}

/// Remote key-value API interface.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the value stored under `key`. `Ok(None)` when nothing is stored.
    async fn load(&self, key: &str, params: &Params) -> Result<Option<Value>, SyncError>;

    /// Store `payload` under `key`.
    async fn save(&self, key: &str, payload: &Value, params: &Params)
        -> Result<SaveAck, SyncError>;
}

/// HTTP implementation of [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRemote {
    /// Create a client from configuration.
    pub fn new(config: &Config) -> Result<Self, SyncError> {
        Self::with_options(
            &config.api_url,
            config.api_token.as_deref(),
            config.request_timeout,
        )
    }

    pub fn with_options(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let raw = token.trim();
            let bearer = if raw.starts_with("Bearer ") || raw.starts_with("bearer ") {
                raw.to_string()
            } else {
                format!("Bearer {raw}")
            };
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer)
                    .map_err(|_| SyncError::InvalidUrl("invalid API token format".to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .user_agent("edsb-sync/0.1.0")
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| SyncError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, key: &str, params: &Params) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("kv")
            .push(key);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn load(&self, key: &str, params: &Params) -> Result<Option<Value>, SyncError> {
        let url = self.url(key, params)?;
        debug!(url = %url, "loading remote key");

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        let value: Value = response.json().await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn save(
        &self,
        key: &str,
        payload: &Value,
        params: &Params,
    ) -> Result<SaveAck, SyncError> {
        let url = self.url(key, params)?;
        debug!(url = %url, "saving remote key");

        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = serde_json::from_str::<SaveAck>(&body)
                .ok()
                .and_then(|ack| ack.error)
                .unwrap_or(body);
            return Err(SyncError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        // Some deployments answer 204 with no body.
        if body.trim().is_empty() {
            return Ok(SaveAck::accepted());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// A save observed by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSave {
    pub key: String,
    pub params: Params,
    pub payload: Value,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct MockState {
    values: BTreeMap<String, Value>,
    offline: bool,
    load_script: VecDeque<bool>,
    save_script: VecDeque<bool>,
    loads: usize,
    saves: Vec<RecordedSave>,
}

/// Scriptable in-memory remote for tests and offline development.
///
/// Scripted outcomes (`true` = succeed) are consumed one per call before
/// falling back to the offline flag.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a stored value.
    pub fn insert(&self, key: &str, params: &Params, value: Value) {
        self.state().values.insert(cache_key(key, params), value);
    }

    pub fn stored(&self, key: &str, params: &Params) -> Option<Value> {
        self.state().values.get(&cache_key(key, params)).cloned()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn script_loads(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state().load_script.extend(outcomes);
    }

    pub fn script_saves(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state().save_script.extend(outcomes);
    }

    /// Every save attempt, including failed ones.
    pub fn saves(&self) -> Vec<RecordedSave> {
        self.state().saves.clone()
    }

    pub fn load_count(&self) -> usize {
        self.state().loads
    }

    fn unavailable(key: &str) -> SyncError {
        SyncError::Rejected {
            key: key.to_string(),
            status: 503,
            message: "mock remote unavailable".to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn load(&self, key: &str, params: &Params) -> Result<Option<Value>, SyncError> {
        let mut state = self.state();
        state.loads += 1;
        let succeed = match state.load_script.pop_front() {
            Some(outcome) => outcome,
            None => !state.offline,
        };
        if !succeed {
            return Err(Self::unavailable(key));
        }
        Ok(state.values.get(&cache_key(key, params)).cloned())
    }

    async fn save(
        &self,
        key: &str,
        payload: &Value,
        params: &Params,
    ) -> Result<SaveAck, SyncError> {
        let mut state = self.state();
        let succeed = match state.save_script.pop_front() {
            Some(outcome) => outcome,
            None => !state.offline,
        };
        state.saves.push(RecordedSave {
            key: key.to_string(),
            params: params.clone(),
            payload: payload.clone(),
            succeeded: succeed,
        });
        if !succeed {
            return Err(Self::unavailable(key));
        }
        state.values.insert(cache_key(key, params), payload.clone());
        Ok(SaveAck::accepted())
    }
}

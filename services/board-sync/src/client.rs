//! Remote sync client.
//!
//! Wraps the remote key-value API with the local-first policy:
//!
//! - **Reads** go to the server and refresh the local cache. When the server
//!   is unreachable the cached copy is served; with nothing cached the fetch
//!   is retried once before failing with [`SyncError::NoCachedCopy`].
//! - **Writes** update the local cache first, always. Debounced keys
//!   (`"active"` by default) are then scheduled on a per-board debouncer;
//!   other keys are committed immediately. A failed commit lands in the
//!   offline queue, and while the queue is non-empty new commits go behind
//!   it so an older snapshot never overwrites a newer one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::cache::{cache_key, LocalCache};
use crate::config::Config;
use crate::debounce::Debouncer;
use crate::error::{CacheError, SyncError};
use crate::queue::{FlushReport, OfflineQueue};
use crate::remote::{Params, RemoteStore};

const NOTICE_CAPACITY: usize = 64;

/// Request parameter asking the server to archive the value it overwrites.
pub const APPEND_HISTORY: &str = "appendHistory";

/// Consecutive failures logged at `warn` before escalating to `error`.
const WARN_FAILURES: u32 = 3;

/// User-visible conditions raised by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// An assignment moved the nurse out of an earlier slot.
    PriorAssignmentCleared { nurse_id: String },
    /// Writes keep failing; data is held locally.
    ServerUnreachable { queued: usize },
    /// A write succeeded after the server was reported unreachable.
    ServerRecovered,
    /// Nothing to show: the fetch failed and there is no cached copy.
    NoCachedCopy { key: String },
}

/// How a save was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Acknowledged by the server.
    Saved,
    /// Held in the offline queue for retry.
    Queued,
    /// Waiting on the debounce timer.
    Scheduled,
}

/// Client tuning.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub debounce_delay: Duration,
    /// Keys saved through a debouncer instead of immediately.
    pub debounced_keys: HashSet<String>,
    /// Consecutive failed writes before [`SyncNotice::ServerUnreachable`].
    pub degraded_after: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(300),
            debounced_keys: HashSet::from(["active".to_string()]),
            degraded_after: 3,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce_delay: config.save_debounce,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct PendingSave {
    key: String,
    params: Params,
    payload: Value,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingSave>>>;

struct ClientInner {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
    queue: OfflineQueue,
    options: SyncOptions,
    debouncers: Mutex<HashMap<String, Arc<Debouncer>>>,
    pending: PendingMap,
    notices: broadcast::Sender<SyncNotice>,
    failures: AtomicU32,
    degraded: AtomicBool,
}

/// Offline-first client for the remote key-value API. Cheap to clone.
///
/// Call [`SyncClient::flush_pending`] before dropping the last handle;
/// debounced saves still pending at that point stay in the local cache only.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("queued", &self.inner.queue.len())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncClient {
    /// Create a client. The offline queue is persisted into `cache`.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cache: Arc<dyn LocalCache>,
        options: SyncOptions,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                remote,
                queue: OfflineQueue::with_cache(cache.clone()),
                cache,
                options,
                debouncers: Mutex::new(HashMap::new()),
                pending: Arc::default(),
                notices,
                failures: AtomicU32::new(0),
                degraded: AtomicBool::new(false),
            }),
        }
    }

    /// Reload writes queued by a previous run.
    pub fn restore_queue(&self) -> Result<usize, CacheError> {
        self.inner.queue.restore()
    }

    pub fn cache(&self) -> &Arc<dyn LocalCache> {
        &self.inner.cache
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notices.subscribe()
    }

    pub(crate) fn notify(&self, notice: SyncNotice) {
        self.inner.notify(notice);
    }

    /// Fetch `key`, falling back to the local cache.
    pub async fn load(&self, key: &str, params: &Params) -> Result<Option<Value>, SyncError> {
        let inner = &self.inner;
        let ck = cache_key(key, params);

        let err = match inner.remote.load(key, params).await {
            Ok(value) => return Ok(inner.remember(&ck, value)),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        match inner.cache.get(&ck) {
            Ok(Some(cached)) => {
                warn!(key, error = %err, "server unreachable; serving cached copy");
                return Ok(Some(cached));
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "failed to read cached copy"),
        }

        warn!(key, error = %err, "no cached copy; retrying fetch");
        match inner.remote.load(key, params).await {
            Ok(value) => Ok(inner.remember(&ck, value)),
            Err(retry_err) => {
                error!(key, error = %retry_err, "load failed with no cached copy");
                inner.notify(SyncNotice::NoCachedCopy {
                    key: key.to_string(),
                });
                Err(SyncError::NoCachedCopy {
                    key: key.to_string(),
                    source: Box::new(retry_err),
                })
            }
        }
    }

    /// Save `payload` under `key`: local cache first, then debounced or
    /// immediate delivery depending on the key.
    pub async fn save(
        &self,
        key: &str,
        payload: &Value,
        params: &Params,
    ) -> Result<SaveOutcome, SyncError> {
        if self.inner.options.debounced_keys.contains(key) {
            return Ok(self.schedule(key, payload, params));
        }
        self.save_now(key, payload, params).await
    }

    /// Write the local cache and (re)start the debounce timer for this
    /// `(key, params)`. The payload delivered is the latest one scheduled.
    pub fn schedule(&self, key: &str, payload: &Value, params: &Params) -> SaveOutcome {
        let ck = cache_key(key, params);
        self.inner.cache_locally(&ck, payload);

        lock(&self.inner.pending).insert(
            ck.clone(),
            PendingSave {
                key: key.to_string(),
                params: params.clone(),
                payload: payload.clone(),
            },
        );
        self.debouncer(&ck).trigger();
        SaveOutcome::Scheduled
    }

    /// Write the local cache and commit without debouncing.
    pub async fn save_now(
        &self,
        key: &str,
        payload: &Value,
        params: &Params,
    ) -> Result<SaveOutcome, SyncError> {
        self.inner.cache_locally(&cache_key(key, params), payload);
        self.inner.commit(key, params, payload.clone()).await
    }

    /// Save immediately with `appendHistory=true` so the server archives the
    /// previous value. The local cache entry stays keyed by `params` alone.
    pub async fn save_archiving(
        &self,
        key: &str,
        payload: &Value,
        params: &Params,
    ) -> Result<SaveOutcome, SyncError> {
        self.inner.cache_locally(&cache_key(key, params), payload);
        let mut remote_params = params.clone();
        remote_params.insert(APPEND_HISTORY.to_string(), "true".to_string());
        self.inner.commit(key, &remote_params, payload.clone()).await
    }

    /// Drop a scheduled save for `(key, params)` without sending it.
    ///
    /// Returns after a debounced save already being sent has finished.
    pub async fn cancel_pending(&self, key: &str, params: &Params) {
        let ck = cache_key(key, params);
        if lock(&self.inner.pending).remove(&ck).is_some() {
            debug!(key, "discarded pending save");
        }
        let debouncer = lock(&self.inner.debouncers).get(&ck).cloned();
        if let Some(debouncer) = debouncer {
            debouncer.cancel().await;
        }
    }

    /// Deliver every scheduled save now.
    pub async fn flush_pending(&self) {
        let debouncers: Vec<Arc<Debouncer>> =
            lock(&self.inner.debouncers).values().cloned().collect();
        for debouncer in debouncers {
            debouncer.flush().await;
        }
    }

    /// Retry queued writes, oldest first.
    pub async fn flush_queue(&self) -> FlushReport {
        self.inner.flush_queue().await
    }

    fn debouncer(&self, ck: &str) -> Arc<Debouncer> {
        let mut debouncers = lock(&self.inner.debouncers);
        if let Some(existing) = debouncers.get(ck) {
            return existing.clone();
        }

        let pending = self.inner.pending.clone();
        let pending_key = ck.to_string();
        let get_payload = move || lock(&pending).remove(&pending_key);

        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let commit = move |save: Option<PendingSave>| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(save) = save else {
                    return;
                };
                let Some(inner) = weak.upgrade() else {
                    warn!(key = %save.key, "client dropped before debounced save; kept in local cache only");
                    return;
                };
                if let Err(e) = inner.commit(&save.key, &save.params, save.payload).await {
                    error!(key = %save.key, error = %e, "debounced save failed");
                }
            })
        };

        let debouncer = Arc::new(Debouncer::new(
            get_payload,
            commit,
            self.inner.options.debounce_delay,
        ));
        debouncers.insert(ck.to_string(), debouncer.clone());
        debouncer
    }
}

impl ClientInner {
    fn notify(&self, notice: SyncNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn remember(&self, ck: &str, value: Option<Value>) -> Option<Value> {
        if let Some(v) = &value {
            self.cache_locally(ck, v);
        }
        value
    }

    fn cache_locally(&self, ck: &str, payload: &Value) {
        if let Err(e) = self.cache.set(ck, payload) {
            warn!(key = %ck, error = %e, "failed to write local cache");
        }
    }

    async fn commit(
        &self,
        key: &str,
        params: &Params,
        payload: Value,
    ) -> Result<SaveOutcome, SyncError> {
        if !self.queue.is_empty() {
            let seq = self.queue.enqueue(key, params, payload);
            self.flush_queue().await;
            let still_queued = self.queue.snapshot().iter().any(|w| w.seq == seq);
            return Ok(if still_queued {
                SaveOutcome::Queued
            } else {
                SaveOutcome::Saved
            });
        }

        let failure = match self.remote.save(key, &payload, params).await {
            Ok(ack) if ack.ok => {
                debug!(key, "saved");
                self.record_success();
                return Ok(SaveOutcome::Saved);
            }
            Ok(ack) => SyncError::Rejected {
                key: key.to_string(),
                status: 200,
                message: ack.error.unwrap_or_else(|| "save not acknowledged".to_string()),
            },
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        self.queue.enqueue(key, params, payload);
        self.record_failure(key, &failure);
        Ok(SaveOutcome::Queued)
    }

    async fn flush_queue(&self) -> FlushReport {
        if self.queue.is_empty() {
            return FlushReport::default();
        }

        let report = self.queue.flush(self.remote.as_ref()).await;
        if report.skipped {
            return report;
        }
        match &report.error {
            Some(e) => self.record_failure("queue", e),
            None => {
                if report.flushed > 0 {
                    info!(flushed = report.flushed, "offline queue drained");
                }
                self.record_success();
            }
        }
        report
    }

    fn record_failure(&self, key: &str, error: &dyn std::fmt::Display) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = self.queue.len();
        if failures <= WARN_FAILURES {
            warn!(key, failures, queued, error = %error, "write failed; holding locally");
        } else {
            error!(key, failures, queued, error = %error, "server still unreachable");
        }

        if failures >= self.options.degraded_after && !self.degraded.swap(true, Ordering::SeqCst) {
            self.notify(SyncNotice::ServerUnreachable { queued });
        }
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("server reachable again");
            self.notify(SyncNotice::ServerRecovered);
        }
    }
}

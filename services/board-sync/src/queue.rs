//! Offline write queue.
//!
//! A FIFO of full payload snapshots awaiting a successful remote save. Only
//! the head is ever retried: on success it is popped and the next entry is
//! attempted, on failure the flush stops so writes are never reordered.
//! At most one flush runs at a time.
//!
//! When a cache is attached the queue mirrors itself under
//! [`QUEUE_CACHE_KEY`] after every change and can be restored on start-up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::error::{CacheError, SyncError};
use crate::remote::{Params, RemoteStore};

/// Cache key holding the persisted queue.
pub const QUEUE_CACHE_KEY: &str = "queue:pending";

/// A save waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWrite {
    pub seq: u64,
    pub key: String,
    #[serde(default)]
    pub params: Params,
    pub payload: Value,
    pub queued_at: DateTime<Utc>,
}

impl QueuedWrite {
    fn same_target(&self, key: &str, params: &Params) -> bool {
        self.key == key && &self.params == params
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries delivered and popped.
    pub flushed: usize,
    /// Entries still queued.
    pub remaining: usize,
    /// Why the flush stopped early.
    pub error: Option<String>,
    /// Another flush was already in flight.
    pub skipped: bool,
    /// Failed flush attempts in a row, including this one.
    pub consecutive_failures: u32,
}

impl FlushReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedWrite>,
    consecutive_failures: u32,
}

/// FIFO of pending remote writes.
pub struct OfflineQueue {
    state: Mutex<QueueState>,
    next_seq: AtomicU64,
    flush_guard: tokio::sync::Mutex<()>,
    cache: Option<Arc<dyn LocalCache>>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("len", &self.len())
            .field("persistent", &self.cache.is_some())
            .finish()
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineQueue {
    /// In-memory queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            next_seq: AtomicU64::new(1),
            flush_guard: tokio::sync::Mutex::new(()),
            cache: None,
        }
    }

    /// Queue mirrored into `cache`.
    pub fn with_cache(cache: Arc<dyn LocalCache>) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new()
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load persisted entries. Returns how many were restored.
    pub fn restore(&self) -> Result<usize, CacheError> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        let stored: Vec<QueuedWrite> = cache.get_as(QUEUE_CACHE_KEY)?.unwrap_or_default();
        if stored.is_empty() {
            return Ok(0);
        }

        let restored = stored.len();
        let mut state = self.state();
        let max_seq = stored.iter().map(|w| w.seq).max().unwrap_or(0);
        self.next_seq.fetch_max(max_seq + 1, Ordering::SeqCst);

        // Restored writes are older than anything queued in this process.
        for write in stored.into_iter().rev() {
            if !state.entries.iter().any(|w| w.seq == write.seq) {
                state.entries.push_front(write);
            }
        }
        drop(state);

        info!(restored, "restored offline queue");
        Ok(restored)
    }

    /// Append a snapshot. An entry equal to the tail for the same key is not
    /// queued twice (object key order does not matter); its sequence number is returned instead.
    pub fn enqueue(&self, key: &str, params: &Params, payload: Value) -> u64 {
        let mut state = self.state();

        if let Some(tail) = state.entries.back() {
            if tail.same_target(key, params)
                && tail.payload == payload
            {
                debug!(key, seq = tail.seq, "identical snapshot already queued");
                return tail.seq;
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        state.entries.push_back(QueuedWrite {
            seq,
            key: key.to_string(),
            params: params.clone(),
            payload,
            queued_at: Utc::now(),
        });
        let queued = state.entries.len();
        self.persist(&state);
        drop(state);

        info!(key, seq, queued, "queued write for retry");
        seq
    }

    /// Deliver queued writes in order until one fails.
    pub async fn flush(&self, remote: &dyn RemoteStore) -> FlushReport {
        let Ok(_guard) = self.flush_guard.try_lock() else {
            debug!("flush already in progress");
            return FlushReport {
                skipped: true,
                remaining: self.len(),
                ..FlushReport::default()
            };
        };

        let mut report = FlushReport::default();

        loop {
            let Some(head) = self.state().entries.front().cloned() else {
                break;
            };

            let outcome = match remote.save(&head.key, &head.payload, &head.params).await {
                Ok(ack) if ack.ok => Ok(()),
                Ok(ack) => Err(SyncError::Rejected {
                    key: head.key.clone(),
                    status: 200,
                    message: ack.error.unwrap_or_else(|| "save not acknowledged".to_string()),
                }),
                Err(e) => Err(e),
            };

            let mut state = self.state();
            match outcome {
                Ok(()) => {
                    if state.entries.front().map(|w| w.seq) == Some(head.seq) {
                        state.entries.pop_front();
                    }
                    state.consecutive_failures = 0;
                    self.persist(&state);
                    report.flushed += 1;
                    debug!(key = %head.key, seq = head.seq, remaining = state.entries.len(), "flushed queued write");
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    report.consecutive_failures = state.consecutive_failures;
                    report.error = Some(e.to_string());
                    debug!(key = %head.key, seq = head.seq, error = %e, "flush stopped at queue head");
                    break;
                }
            }
        }

        report.remaining = self.len();
        report
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Copy of the queued entries, head first.
    pub fn snapshot(&self) -> Vec<QueuedWrite> {
        self.state().entries.iter().cloned().collect()
    }

    /// Failed flush attempts since the last delivered write.
    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    fn persist(&self, state: &QueueState) {
        let Some(cache) = &self.cache else {
            return;
        };
        let entries: Vec<&QueuedWrite> = state.entries.iter().collect();
        let result = if entries.is_empty() {
            cache.del(QUEUE_CACHE_KEY)
        } else {
            cache.set_as(QUEUE_CACHE_KEY, &entries)
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist offline queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::remote::MockRemote;
    use serde_json::json;

    fn params() -> Params {
        Params::from([("shift".to_string(), "day".to_string())])
    }

    #[tokio::test]
    async fn test_fifo_stop_on_failure() {
        let remote = MockRemote::new();
        let queue = OfflineQueue::new();
        queue.enqueue("active", &params(), json!({"n": 1}));
        queue.enqueue("active", &params(), json!({"n": 2}));
        queue.enqueue("active", &params(), json!({"n": 3}));

        remote.script_saves([false]);
        let report = queue.flush(&remote).await;
        assert_eq!(report.flushed, 0);
        assert_eq!(report.remaining, 3);
        assert_eq!(report.consecutive_failures, 1);
        assert_eq!(remote.saves().len(), 1);
        assert_eq!(queue.snapshot()[0].payload, json!({"n": 1}));

        let report = queue.flush(&remote).await;
        assert_eq!(report.flushed, 3);
        assert!(queue.is_empty());
        assert_eq!(queue.consecutive_failures(), 0);

        let payloads: Vec<_> = remote.saves().into_iter().map(|s| s.payload).collect();
        assert_eq!(
            payloads,
            vec![json!({"n": 1}), json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
        );
    }

    #[tokio::test]
    async fn test_negative_ack_keeps_head() {
        struct Nack;

        #[async_trait::async_trait]
        impl RemoteStore for Nack {
            async fn load(&self, _: &str, _: &Params) -> Result<Option<Value>, SyncError> {
                Ok(None)
            }

            async fn save(
                &self,
                _: &str,
                _: &Value,
                _: &Params,
            ) -> Result<crate::remote::SaveAck, SyncError> {
                Ok(crate::remote::SaveAck {
                    ok: false,
                    error: Some("locked".to_string()),
                })
            }
        }

        let queue = OfflineQueue::new();
        queue.enqueue("active", &params(), json!(1));

        let report = queue.flush(&Nack).await;
        assert!(report.failed());
        assert!(report.error.unwrap().contains("locked"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_identical_tail_not_queued_twice() {
        let queue = OfflineQueue::new();
        let first = queue.enqueue("active", &params(), json!({"a": 1, "b": 2}));
        let again = queue.enqueue("active", &params(), json!({"b": 2, "a": 1}));
        assert_eq!(first, again);
        assert_eq!(queue.len(), 1);

        // Same payload for a different board is a separate write.
        queue.enqueue("active", &Params::new(), json!({"a": 1, "b": 2}));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_persisted_queue_survives_restart() {
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());

        let queue = OfflineQueue::with_cache(cache.clone());
        queue.enqueue("active", &params(), json!(1));
        queue.enqueue("roster", &Params::new(), json!([]));
        drop(queue);

        let reloaded = OfflineQueue::with_cache(cache.clone());
        assert_eq!(reloaded.restore().unwrap(), 2);
        let next = reloaded.enqueue("active", &params(), json!(2));
        assert_eq!(next, 3);

        let remote = MockRemote::new();
        reloaded.flush(&remote).await;
        assert!(reloaded.is_empty());
        assert_eq!(cache.get(QUEUE_CACHE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_skipped() {
        let remote = MockRemote::new();
        let queue = OfflineQueue::new();
        queue.enqueue("active", &params(), json!(1));

        let _held = queue.flush_guard.lock().await;
        let report = queue.flush(&remote).await;
        assert!(report.skipped);
        assert_eq!(report.remaining, 1);
        assert!(remote.saves().is_empty());
    }
}

//! Cross-tab change notification.
//!
//! A best-effort signal that some key changed. Receivers re-read the local
//! cache; the notification never carries data. Two mechanisms:
//!
//! - [`BroadcastNotifier`]: an in-process broadcast channel shared by every
//!   handle joined to it.
//! - [`StampNotifier`]: writes a stamp under `notify:<key>` in the shared
//!   local cache and polls for stamps written by others. Works wherever the
//!   cache is shared, at the cost of polling latency.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::LocalCache;

const CHANNEL_CAPACITY: usize = 64;
const STAMP_PREFIX: &str = "notify:";

/// Default polling interval of [`StampNotifier`].
pub const DEFAULT_STAMP_POLL: Duration = Duration::from_millis(500);

/// "`key` changed", sent by the handle identified by `origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
    pub origin: Uuid,
}

/// Change notification capability.
pub trait ChangeNotifier: Send + Sync {
    /// Identity of this handle; events it sends carry this origin.
    fn origin(&self) -> Uuid;

    /// Tell other handles that `key` changed.
    fn notify_update(&self, key: &str);

    /// Receive change events, including this handle's own.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Which notifier to build at start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotifierKind {
    #[default]
    Broadcast,
    Stamp,
}

#[derive(Debug, Error)]
#[error("unknown notifier '{0}' (expected broadcast or stamp)")]
pub struct UnknownNotifier(String);

impl FromStr for NotifierKind {
    type Err = UnknownNotifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "stamp" | "storage" => Ok(Self::Stamp),
            other => Err(UnknownNotifier(other.to_string())),
        }
    }
}

impl fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Stamp => write!(f, "stamp"),
        }
    }
}

/// Build the configured notifier.
pub fn notifier_from_config(
    kind: NotifierKind,
    cache: Arc<dyn LocalCache>,
) -> Arc<dyn ChangeNotifier> {
    match kind {
        NotifierKind::Broadcast => Arc::new(BroadcastNotifier::new()),
        NotifierKind::Stamp => Arc::new(StampNotifier::new(cache, DEFAULT_STAMP_POLL)),
    }
}

/// In-process broadcast notifier.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ChangeEvent>,
    origin: Uuid,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            origin: Uuid::new_v4(),
        }
    }

    /// Another handle on the same channel with its own origin.
    pub fn join(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            origin: Uuid::new_v4(),
        }
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn origin(&self) -> Uuid {
        self.origin
    }

    fn notify_update(&self, key: &str) {
        // No receivers is fine.
        let _ = self.tx.send(ChangeEvent {
            key: key.to_string(),
            origin: self.origin,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Stamp {
    stamp: i64,
    origin: Uuid,
}

/// Cache-stamp notifier.
///
/// The poll task stops when the notifier is dropped.
pub struct StampNotifier {
    cache: Arc<dyn LocalCache>,
    tx: broadcast::Sender<ChangeEvent>,
    origin: Uuid,
    poller: JoinHandle<()>,
}

impl fmt::Debug for StampNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampNotifier")
            .field("origin", &self.origin)
            .finish()
    }
}

impl StampNotifier {
    /// Start polling `cache` every `poll`. Must be called inside a runtime.
    pub fn new(cache: Arc<dyn LocalCache>, poll: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let origin = Uuid::new_v4();
        let seen = read_stamps(cache.as_ref());
        let poller = tokio::spawn(poll_stamps(cache.clone(), tx.clone(), origin, seen, poll));
        Self {
            cache,
            tx,
            origin,
            poller,
        }
    }
}

impl Drop for StampNotifier {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl ChangeNotifier for StampNotifier {
    fn origin(&self) -> Uuid {
        self.origin
    }

    fn notify_update(&self, key: &str) {
        let cache_key = format!("{STAMP_PREFIX}{key}");
        let previous = self
            .cache
            .get_as::<Stamp>(&cache_key)
            .ok()
            .flatten()
            .map(|s| s.stamp)
            .unwrap_or(0);
        let stamp = Stamp {
            stamp: Utc::now().timestamp_millis().max(previous + 1),
            origin: self.origin,
        };
        if let Err(e) = self.cache.set_as(&cache_key, &stamp) {
            warn!(key, error = %e, "failed to write change stamp");
            return;
        }
        let _ = self.tx.send(ChangeEvent {
            key: key.to_string(),
            origin: self.origin,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

fn read_stamps(cache: &dyn LocalCache) -> HashMap<String, Stamp> {
    let keys = match cache.keys(STAMP_PREFIX) {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "failed to list change stamps");
            return HashMap::new();
        }
    };
    keys.into_iter()
        .filter_map(|k| {
            let stamp = cache.get_as::<Stamp>(&k).ok().flatten()?;
            Some((k[STAMP_PREFIX.len()..].to_string(), stamp))
        })
        .collect()
}

async fn poll_stamps(
    cache: Arc<dyn LocalCache>,
    tx: broadcast::Sender<ChangeEvent>,
    origin: Uuid,
    mut seen: HashMap<String, Stamp>,
    poll: Duration,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        for (key, stamp) in read_stamps(cache.as_ref()) {
            if seen.get(&key) == Some(&stamp) {
                continue;
            }
            if stamp.origin != origin {
                debug!(key = %key, stamp = stamp.stamp, "observed change stamp");
                let _ = tx.send(ChangeEvent {
                    key: key.clone(),
                    origin: stamp.origin,
                });
            }
            seen.insert(key, stamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn test_broadcast_reaches_joined_handles() {
        let a = BroadcastNotifier::new();
        let b = a.join();
        let mut rx = b.subscribe();

        a.notify_update("active");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "active");
        assert_eq!(event.origin, a.origin());
        assert_ne!(a.origin(), b.origin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stamp_notifier_sees_other_writers() {
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
        let a = StampNotifier::new(cache.clone(), Duration::from_millis(100));
        let b = StampNotifier::new(cache.clone(), Duration::from_millis(100));
        let mut rx_b = b.subscribe();

        a.notify_update("active");
        a.notify_update("active");

        tokio::time::sleep(Duration::from_millis(150)).await;
        let event = rx_b.recv().await.unwrap();
        assert_eq!(event.key, "active");
        assert_eq!(event.origin, a.origin());
        // Two writes between polls collapse into one observation.
        assert!(rx_b.try_recv().is_err());

        let stored = cache.get_as::<Stamp>("notify:active").unwrap().unwrap();
        assert_eq!(stored.origin, a.origin());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stamp_notifier_ignores_old_stamps() {
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
        let old = StampNotifier::new(cache.clone(), Duration::from_millis(100));
        old.notify_update("roster");
        drop(old);

        let fresh = StampNotifier::new(cache.clone(), Duration::from_millis(100));
        let mut rx = fresh.subscribe();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Broadcast".parse::<NotifierKind>().unwrap(), NotifierKind::Broadcast);
        assert_eq!("stamp".parse::<NotifierKind>().unwrap(), NotifierKind::Stamp);
        assert!("pager".parse::<NotifierKind>().is_err());
    }
}

//! Offline-first sync for the staffing board.
//!
//! The board lives in a remote key-value API that may be slow or
//! unreachable. This crate keeps the board usable regardless:
//!
//! - [`cache`]: durable local key-value store, written on every edit
//! - [`remote`]: the remote API (HTTP) and a scriptable mock
//! - [`client`]: local-first reads and writes with cache fallback
//! - [`queue`]: FIFO of writes awaiting delivery
//! - [`debounce`]: per-key debounced commits
//! - [`notify`]: cross-handle change notification
//! - [`session`]: one loaded board and its edit operations
//! - [`flush`]: background queue draining

pub mod cache;
pub mod client;
pub mod config;
pub mod debounce;
pub mod error;
pub mod flush;
pub mod notify;
pub mod queue;
pub mod remote;
pub mod session;

pub use cache::{cache_key, FileCache, LocalCache, MemoryCache};
pub use client::{SaveOutcome, SyncClient, SyncNotice, SyncOptions};
pub use config::Config;
pub use error::{CacheError, SyncError};
pub use notify::{notifier_from_config, BroadcastNotifier, ChangeNotifier, StampNotifier};
pub use queue::{FlushReport, OfflineQueue};
pub use remote::{HttpRemote, MockRemote, Params, RemoteStore, SaveAck};
pub use session::{board_params, BoardMemo, BoardSession};

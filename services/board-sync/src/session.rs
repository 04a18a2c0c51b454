//! Board session: the owner of one (date, shift) board in this process.
//!
//! A session loads the board by merging the server copy with the local
//! cache, repairs it, and then applies edits. Every edit is written to the
//! local cache synchronously, scheduled for a debounced remote save, and
//! announced to other handles through the change notifier.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{NaiveDate, Utc};
use edsb_board::{
    add_incoming, dedupe_assignments, end_break, ensure_zone_keys, mark_arrived, merge_boards,
    migrate_board, move_slot, remove_incoming, remove_slot, send_offgoing, slot_at_mut,
    start_break, upsert_slot, Board, BoardConfig, ConfigProvider, IncomingEntry, Nurse, Roster,
    Shift, Slot, SlotTarget,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::cache_key;
use crate::client::{SaveOutcome, SyncClient, SyncNotice};
use crate::error::SyncError;
use crate::notify::ChangeNotifier;
use crate::remote::Params;

/// Key of the published board for a (date, shift).
pub const ACTIVE_KEY: &str = "active";
/// Key of the board being prepared for a future shift.
pub const DRAFT_KEY: &str = "draft";
/// Key of the staff roster.
pub const ROSTER_KEY: &str = "roster";

/// Request parameters identifying a board.
pub fn board_params(date: NaiveDate, shift: Shift) -> Params {
    Params::from([
        ("date".to_string(), date.format("%Y-%m-%d").to_string()),
        ("shift".to_string(), shift.to_string()),
    ])
}

/// In-process cache of loaded boards, keyed like the local cache.
///
/// Owned by the caller and passed to sessions so separate tests and
/// sessions never share hidden state.
#[derive(Debug, Clone, Default)]
pub struct BoardMemo {
    boards: Arc<RwLock<HashMap<String, Board>>>,
}

impl BoardMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Board> {
        let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
        boards.get(key).cloned()
    }

    pub fn put(&self, key: &str, board: &Board) {
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        boards.insert(key.to_string(), board.clone());
    }

    pub fn invalidate(&self, key: &str) {
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        boards.remove(key);
    }

    pub fn clear(&self) {
        let mut boards = self.boards.write().unwrap_or_else(PoisonError::into_inner);
        boards.clear();
    }
}

/// The board for one (date, shift) plus the collaborators it syncs through.
pub struct BoardSession {
    client: SyncClient,
    notifier: Arc<dyn ChangeNotifier>,
    config: Arc<dyn ConfigProvider>,
    memo: BoardMemo,
    params: Params,
    cache_key: String,
    board: Board,
    roster: Roster,
}

impl std::fmt::Debug for BoardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSession")
            .field("date", &self.board.date_iso)
            .field("shift", &self.board.shift)
            .field("roster", &self.roster.len())
            .finish()
    }
}

impl BoardSession {
    /// Load the board for `(date, shift)`.
    ///
    /// The server copy is merged with the locally cached one (which may hold
    /// edits not yet saved), zone keys are reconciled with configuration and
    /// duplicate assignments are repaired. When the result differs from the
    /// server copy it is scheduled for saving.
    pub async fn load(
        client: SyncClient,
        notifier: Arc<dyn ChangeNotifier>,
        config: Arc<dyn ConfigProvider>,
        memo: BoardMemo,
        date: NaiveDate,
        shift: Shift,
    ) -> Result<Self, SyncError> {
        let params = board_params(date, shift);
        let cache_key = cache_key(ACTIVE_KEY, &params);

        let mut session = Self {
            client,
            notifier,
            config,
            memo,
            params,
            cache_key,
            board: Board::empty(date, shift),
            roster: Roster::default(),
        };
        session.reload().await?;
        session.reload_roster().await;

        info!(
            date = %date,
            shift = %shift,
            zones = session.board.zones.len(),
            assigned = edsb_board::assigned_nurse_ids(&session.board).len(),
            roster = session.roster.len(),
            "board loaded"
        );
        Ok(session)
    }

    /// Fetch and merge the board again.
    pub async fn reload(&mut self) -> Result<(), SyncError> {
        let date = self.board.date_iso;
        let shift = self.board.shift;

        // Read the local copies before fetching: a successful fetch overwrites
        // the cache entry. Another handle may have cached edits this memo lacks.
        let memo = self.memo.get(&self.cache_key);
        let cached = self
            .read_cached()
            .map(|value| migrate_board(&value, date, shift));
        let local = match (memo, cached) {
            (Some(memo), Some(cached)) => Some(merge_boards(&memo, &cached)),
            (memo, cached) => memo.or(cached),
        };

        let remote = match self.client.load(ACTIVE_KEY, &self.params).await {
            Ok(value) => value.map(|v| migrate_board(&v, date, shift)),
            Err(e) => match &local {
                Some(_) => {
                    warn!(error = %e, "using in-memory board; server and cache unavailable");
                    None
                }
                None => return Err(e),
            },
        };

        let mut board = match (&remote, local) {
            (Some(remote), Some(local)) => merge_boards(remote, &local),
            (Some(remote), None) => remote.clone(),
            (None, Some(local)) => local,
            (None, None) => Board::empty(date, shift),
        };
        ensure_zone_keys(&mut board, &self.config.board_config());
        let repaired = dedupe_assignments(&mut board);
        if !repaired.is_empty() {
            debug!(count = repaired.len(), "repaired merged board");
        }

        self.board = board;
        self.memo.put(&self.cache_key, &self.board);

        if remote.as_ref() != Some(&self.board) {
            self.persist();
        } else if let Some(value) = self.board_value() {
            self.cache_only(&value);
        }
        Ok(())
    }

    /// Reload the roster. Failures leave an empty roster; unknown ids then
    /// render as placeholders.
    pub async fn reload_roster(&mut self) {
        self.roster = match self.client.load(ROSTER_KEY, &Params::new()).await {
            Ok(Some(value)) => Roster::from_json(&value),
            Ok(None) => Roster::default(),
            Err(e) => {
                warn!(error = %e, "roster unavailable");
                Roster::default()
            }
        };

        let unknown = self.roster.unknown_ids(&self.board);
        if !unknown.is_empty() && !self.roster.is_empty() {
            warn!(nurse_ids = ?unknown, "board references nurses missing from the roster");
        }
    }

    /// Merge in a newer copy written to the local cache by another handle.
    ///
    /// The cached copy is treated as the most recent edit; this session's
    /// board is the base so none of its zone assignments are dropped.
    /// Returns whether the board changed.
    pub fn refresh_from_cache(&mut self) -> bool {
        let Some(value) = self.read_cached() else {
            return false;
        };
        let cached = migrate_board(&value, self.board.date_iso, self.board.shift);

        let mut board = merge_boards(&self.board, &cached);
        ensure_zone_keys(&mut board, &self.config.board_config());
        dedupe_assignments(&mut board);

        if board == self.board {
            return false;
        }
        self.board = board;
        self.memo.put(&self.cache_key, &self.board);
        if let Some(value) = self.board_value() {
            self.cache_only(&value);
        }
        debug!(key = %self.cache_key, "board refreshed from cache");
        true
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }

    /// Roster record for `nurse_id`, or a placeholder.
    pub fn nurse(&self, nurse_id: &str) -> Cow<'_, Nurse> {
        self.roster.resolve(nurse_id)
    }

    /// Place a slot. Returns whether the nurse was moved out of another slot.
    pub fn assign(&mut self, target: &SlotTarget, slot: Slot) -> bool {
        let nurse_id = slot.nurse_id.clone();
        let moved = upsert_slot(&mut self.board, target, slot);
        if moved {
            self.client.notify(SyncNotice::PriorAssignmentCleared { nurse_id });
        }
        self.persist();
        moved
    }

    /// Move the slot at `from` to `to`.
    pub fn move_slot(&mut self, from: &SlotTarget, to: &SlotTarget) -> bool {
        let nurse_id = edsb_board::slot_at(&self.board, from).map(|s| s.nurse_id.clone());
        let moved = move_slot(&mut self.board, from, to);
        if let (true, Some(nurse_id)) = (moved, nurse_id) {
            self.client.notify(SyncNotice::PriorAssignmentCleared { nurse_id });
        }
        self.persist();
        moved
    }

    pub fn remove(&mut self, target: &SlotTarget) -> bool {
        let removed = remove_slot(&mut self.board, target);
        if removed {
            self.persist();
        }
        removed
    }

    /// Edit the slot at `target` in place.
    pub fn update_slot(&mut self, target: &SlotTarget, edit: impl FnOnce(&mut Slot)) -> bool {
        let Some(slot) = slot_at_mut(&mut self.board, target) else {
            return false;
        };
        edit(slot);
        self.persist();
        true
    }

    pub fn start_break(
        &mut self,
        target: &SlotTarget,
        relieved_by: Option<String>,
        planned_end_hhmm: Option<String>,
    ) -> bool {
        self.update_slot(target, |slot| {
            start_break(slot, relieved_by, planned_end_hhmm, None)
        })
    }

    pub fn end_break(&mut self, target: &SlotTarget) -> bool {
        let Some(slot) = slot_at_mut(&mut self.board, target) else {
            return false;
        };
        let ended = end_break(slot);
        if ended {
            self.persist();
        }
        ended
    }

    pub fn set_comments(&mut self, comments: impl Into<String>) {
        self.board.comments = comments.into();
        self.persist();
    }

    pub fn set_huddle(&mut self, huddle: Value) {
        self.board.huddle = huddle;
        self.persist();
    }

    pub fn set_handoff(&mut self, handoff: Value) {
        self.board.handoff = handoff;
        self.persist();
    }

    pub fn add_incoming(&mut self, entry: IncomingEntry) -> bool {
        let added = add_incoming(&mut self.board, entry);
        if added {
            self.persist();
        }
        added
    }

    pub fn mark_arrived(&mut self, nurse_id: &str) -> bool {
        let changed = mark_arrived(&mut self.board, nurse_id);
        if changed {
            self.persist();
        }
        changed
    }

    pub fn remove_incoming(&mut self, nurse_id: &str, eta: Option<&str>) -> bool {
        let removed = remove_incoming(&mut self.board, nurse_id, eta);
        if removed {
            self.persist();
        }
        removed
    }

    /// Take the nurse at `target` off the floor now.
    pub fn send_offgoing(&mut self, target: &SlotTarget) -> Option<String> {
        let nurse_id = send_offgoing(&mut self.board, target, Utc::now().timestamp_millis())?;
        self.persist();
        Some(nurse_id)
    }

    /// Reconcile zone keys with the provider's current configuration.
    pub fn reconcile_zones(&mut self) -> bool {
        let config = self.config.board_config();
        self.apply_config(&config)
    }

    /// Reconcile zone keys with `config`. Returns whether zones changed.
    pub fn apply_config(&mut self, config: &BoardConfig) -> bool {
        let changed = ensure_zone_keys(&mut self.board, config);
        if changed {
            self.persist();
        }
        changed
    }

    /// Deliver the debounced save for this board now.
    pub async fn flush(&self) {
        self.client.flush_pending().await;
    }

    /// Load the draft for `(date, shift)`. `Ok(None)` when no draft exists.
    pub async fn load_draft(
        &self,
        date: NaiveDate,
        shift: Shift,
    ) -> Result<Option<Board>, SyncError> {
        let draft = self
            .client
            .load(DRAFT_KEY, &board_params(date, shift))
            .await?;
        Ok(draft.map(|value| migrate_board(&value, date, shift)))
    }

    pub async fn save_draft(&self, draft: &Board) -> Result<SaveOutcome, SyncError> {
        let value = serde_json::to_value(draft)?;
        let params = board_params(draft.date_iso, draft.shift);
        self.client.save_now(DRAFT_KEY, &value, &params).await
    }

    /// Publish `draft` as the active board for its (date, shift).
    ///
    /// A pending debounced save of that board is discarded so it cannot
    /// overwrite the published copy. When the draft targets this session's
    /// board it also replaces the in-memory board.
    pub async fn publish_draft(
        &mut self,
        draft: Board,
        append_history: bool,
    ) -> Result<SaveOutcome, SyncError> {
        let mut board = draft;
        ensure_zone_keys(&mut board, &self.config.board_config());
        dedupe_assignments(&mut board);

        let params = board_params(board.date_iso, board.shift);
        self.client.cancel_pending(ACTIVE_KEY, &params).await;

        let value = serde_json::to_value(&board)?;
        let outcome = if append_history {
            self.client.save_archiving(ACTIVE_KEY, &value, &params).await?
        } else {
            self.client.save_now(ACTIVE_KEY, &value, &params).await?
        };

        if params == self.params {
            self.board = board;
            self.memo.put(&self.cache_key, &self.board);
        } else {
            self.memo.invalidate(&cache_key(ACTIVE_KEY, &params));
        }
        self.notifier.notify_update(ACTIVE_KEY);

        info!(date = %params["date"], shift = %params["shift"], ?outcome, append_history, "draft published");
        Ok(outcome)
    }

    fn read_cached(&self) -> Option<Value> {
        match self.client.cache().get(&self.cache_key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.cache_key, error = %e, "ignoring unreadable cached board");
                None
            }
        }
    }

    fn board_value(&self) -> Option<Value> {
        match serde_json::to_value(&self.board) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "failed to serialize board");
                None
            }
        }
    }

    fn cache_only(&self, value: &Value) {
        if let Err(e) = self.client.cache().set(&self.cache_key, value) {
            warn!(key = %self.cache_key, error = %e, "failed to write local cache");
        }
    }

    fn persist(&self) {
        let Some(value) = self.board_value() else {
            return;
        };
        self.memo.put(&self.cache_key, &self.board);
        self.client.schedule(ACTIVE_KEY, &value, &self.params);
        self.notifier.notify_update(ACTIVE_KEY);
    }
}

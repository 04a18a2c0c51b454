//! Staffing board core.
//!
//! The emergency-department staffing board assigns personnel to three lead
//! positions (charge, triage, admin) and to configured zones for one
//! (date, shift) pair. This crate holds the parts with real invariants:
//!
//! - **Single occupancy**: a nurse id appears in at most one slot. Every
//!   placement goes through [`upsert_slot`], which clears prior slots first.
//! - **Zone key consistency**: board zone keys match the configured zones
//!   ([`ensure_zone_keys`]).
//! - **Merge without loss**: [`merge_boards`] reconciles a fetched board
//!   with a locally edited copy and never drops a zone assignment.
//!
//! All functions here are synchronous and never fail on malformed input;
//! stored data goes through [`migrate_board`] before use.

mod arrivals;
mod error;
mod merge;
mod migrate;
mod model;
mod roster;
mod slots;
mod zones;

pub use arrivals::{add_incoming, mark_arrived, remove_incoming, send_offgoing};
pub use error::BoardError;
pub use merge::merge_boards;
pub use migrate::migrate_board;
pub use model::{
    is_blank, Board, BreakRecord, IncomingEntry, Lead, OffgoingEntry, Shift, Slot, SlotTarget,
    BOARD_VERSION,
};
pub use roster::{Nurse, Roster};
pub use slots::{
    assigned_nurse_ids, dedupe_assignments, end_break, ensure_unique_assignment, find_nurse,
    move_slot, remove_slot, slot_at, slot_at_mut, start_break, upsert_slot,
};
pub use zones::{ensure_zone_keys, BoardConfig, ConfigProvider, StaticConfig, ZoneDef};

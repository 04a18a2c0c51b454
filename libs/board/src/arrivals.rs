//! Incoming and offgoing staff lists.

use tracing::debug;

use crate::model::{Board, IncomingEntry, OffgoingEntry, SlotTarget};
use crate::slots::take_slot;

/// Add an expected arrival. Returns false if the `(nurseId, eta)` pair is already listed.
pub fn add_incoming(board: &mut Board, entry: IncomingEntry) -> bool {
    if board.incoming.iter().any(|e| e.key() == entry.key()) {
        return false;
    }
    board.incoming.push(entry);
    true
}

/// Mark every pending incoming entry for `nurse_id` as arrived.
pub fn mark_arrived(board: &mut Board, nurse_id: &str) -> bool {
    let mut changed = false;
    for entry in board
        .incoming
        .iter_mut()
        .filter(|e| e.nurse_id == nurse_id && !e.arrived)
    {
        entry.arrived = true;
        changed = true;
    }
    changed
}

/// Remove incoming entries for `nurse_id`. With `eta`, only that entry.
pub fn remove_incoming(board: &mut Board, nurse_id: &str, eta: Option<&str>) -> bool {
    let before = board.incoming.len();
    board
        .incoming
        .retain(|e| !(e.nurse_id == nurse_id && eta.is_none_or(|eta| e.eta == eta)));
    board.incoming.len() != before
}

/// Take the nurse at `target` off the board and record them as offgoing at `ts` (epoch ms).
///
/// Returns the nurse id, or `None` if the position was empty.
pub fn send_offgoing(board: &mut Board, target: &SlotTarget, ts: i64) -> Option<String> {
    let slot = take_slot(board, target)?;
    debug!(nurse_id = %slot.nurse_id, from = %target, "nurse sent offgoing");
    board.offgoing.push(OffgoingEntry {
        nurse_id: slot.nurse_id.clone(),
        ts,
    });
    Some(slot.nurse_id)
}

//! Board merge engine.
//!
//! Combines a freshly fetched remote board with a locally cached copy that
//! may carry unsynced edits. The merge is field-by-field and asymmetric:
//!
//! - Free-text and record fields, and the charge/triage/admin slots, take
//!   the local value when it is non-empty and fall back to remote.
//! - Zones keep every remote slot and append local slots whose nurse is not
//!   already in remote's version of that zone. An empty local zone never
//!   clears remote assignments; a deletion only wins once it is saved.
//! - Incoming entries are unioned by `(nurseId, eta)`.
//! - `dateISO`, `shift`, `offgoing` and `version` come from remote.
//!
//! Two tabs editing the same zone can therefore produce a superset instead
//! of a clean resolution. The merged board is not de-duplicated here.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{is_blank, Board, IncomingEntry, Slot};

/// Merge `remote` and `local` into one board without dropping either side's additions.
pub fn merge_boards(remote: &Board, local: &Board) -> Board {
    Board {
        date_iso: remote.date_iso,
        shift: remote.shift,
        charge: local.charge.clone().or_else(|| remote.charge.clone()),
        triage: local.triage.clone().or_else(|| remote.triage.clone()),
        admin: local.admin.clone().or_else(|| remote.admin.clone()),
        zones: merge_zones(&remote.zones, &local.zones),
        incoming: merge_incoming(&remote.incoming, &local.incoming),
        offgoing: remote.offgoing.clone(),
        comments: if local.comments.trim().is_empty() {
            remote.comments.clone()
        } else {
            local.comments.clone()
        },
        huddle: prefer_local(&remote.huddle, &local.huddle),
        handoff: prefer_local(&remote.handoff, &local.handoff),
        version: remote.version,
    }
}

fn prefer_local(remote: &serde_json::Value, local: &serde_json::Value) -> serde_json::Value {
    if is_blank(local) {
        remote.clone()
    } else {
        local.clone()
    }
}

fn merge_zones(
    remote: &BTreeMap<String, Vec<Slot>>,
    local: &BTreeMap<String, Vec<Slot>>,
) -> BTreeMap<String, Vec<Slot>> {
    let mut merged = BTreeMap::new();

    for name in remote.keys().chain(local.keys()) {
        if merged.contains_key(name) {
            continue;
        }
        let remote_slots = remote.get(name).map(Vec::as_slice).unwrap_or_default();
        let local_slots = local.get(name).map(Vec::as_slice).unwrap_or_default();
        merged.insert(name.clone(), merge_zone(remote_slots, local_slots));
    }

    merged
}

/// Merge one zone. Remote order is the base.
///
/// When local holds at least as many slots as remote, local's record for a
/// shared nurse replaces remote's so slot edits (breaks, comments) made in
/// this tab survive.
fn merge_zone(remote: &[Slot], local: &[Slot]) -> Vec<Slot> {
    let local_wins_metadata = !local.is_empty() && local.len() >= remote.len();
    let local_by_id: HashMap<&str, &Slot> =
        local.iter().map(|s| (s.nurse_id.as_str(), s)).collect();

    let mut merged: Vec<Slot> = remote
        .iter()
        .map(|slot| match local_by_id.get(slot.nurse_id.as_str()) {
            Some(local_slot) if local_wins_metadata => (*local_slot).clone(),
            _ => slot.clone(),
        })
        .collect();

    let mut present: HashSet<String> = remote.iter().map(|s| s.nurse_id.clone()).collect();
    for slot in local {
        if present.insert(slot.nurse_id.clone()) {
            merged.push(slot.clone());
        }
    }

    merged
}

/// Union by `(nurseId, eta)`, remote entries first. An arrival recorded on
/// either side is kept.
fn merge_incoming(remote: &[IncomingEntry], local: &[IncomingEntry]) -> Vec<IncomingEntry> {
    let mut merged: Vec<IncomingEntry> = Vec::with_capacity(remote.len() + local.len());

    for entry in remote.iter().chain(local) {
        match merged.iter_mut().find(|e| e.key() == entry.key()) {
            Some(existing) => existing.arrived |= entry.arrived,
            None => merged.push(entry.clone()),
        }
    }

    merged
}

//! Slot assignment primitives.
//!
//! Every operation that places a nurse goes through [`upsert_slot`], which
//! first clears the nurse from every other slot on the board. That keeps the
//! single-occupancy invariant: a nurse id appears in at most one of charge,
//! triage, admin and the zone lists.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::model::{Board, BreakRecord, Lead, Slot, SlotTarget};

/// Remove every slot held by `nurse_id`. Returns whether anything was removed.
///
/// Scans the whole board rather than stopping at the first hit so boards
/// that already hold duplicates are fully repaired.
pub fn ensure_unique_assignment(board: &mut Board, nurse_id: &str) -> bool {
    let mut changed = false;

    for lead in Lead::ALL {
        let slot = board.lead_mut(lead);
        if slot.as_ref().is_some_and(|s| s.nurse_id == nurse_id) {
            *slot = None;
            changed = true;
        }
    }

    for slots in board.zones.values_mut() {
        let before = slots.len();
        slots.retain(|s| s.nurse_id != nurse_id);
        changed |= slots.len() != before;
    }

    changed
}

/// Place `slot` at `target`, clearing the nurse's previous assignment first.
///
/// Returns true when a prior assignment was cleared so the caller can surface
/// a notice. Zone inserts honour an in-bounds index and append otherwise.
pub fn upsert_slot(board: &mut Board, target: &SlotTarget, slot: Slot) -> bool {
    if slot.nurse_id.trim().is_empty() {
        warn!(slot_target = %target, "ignoring slot without a nurse id");
        return false;
    }

    let moved = ensure_unique_assignment(board, &slot.nurse_id);

    match target {
        SlotTarget::Lead(lead) => {
            let current = board.lead_mut(*lead);
            if let Some(displaced) = current.as_ref() {
                debug!(
                    position = lead.as_str(),
                    displaced = %displaced.nurse_id,
                    "replacing lead assignment"
                );
            }
            *current = Some(slot);
        }
        SlotTarget::Zone { zone, index } => {
            let slots = board.zones.entry(zone.clone()).or_default();
            match index {
                Some(i) if *i < slots.len() => slots.insert(*i, slot),
                _ => slots.push(slot),
            }
        }
    }

    moved
}

/// Clear the slot at `target`. Returns whether something was removed.
pub fn remove_slot(board: &mut Board, target: &SlotTarget) -> bool {
    take_slot(board, target).is_some()
}

/// Move the slot at `from` to `to`.
///
/// Composes removal and [`upsert_slot`], so moving a nurse onto the position
/// they already hold leaves the assignment set unchanged and returns false.
pub fn move_slot(board: &mut Board, from: &SlotTarget, to: &SlotTarget) -> bool {
    let Some(slot) = take_slot(board, from) else {
        debug!(from = %from, to = %to, "nothing to move");
        return false;
    };
    upsert_slot(board, to, slot)
}

/// Borrow the slot at `target`, if any.
pub fn slot_at<'a>(board: &'a Board, target: &SlotTarget) -> Option<&'a Slot> {
    match target {
        SlotTarget::Lead(lead) => board.lead(*lead),
        SlotTarget::Zone {
            zone,
            index: Some(i),
        } => board.zones.get(zone).and_then(|slots| slots.get(*i)),
        SlotTarget::Zone { index: None, .. } => None,
    }
}

/// Mutably borrow the slot at `target`, if any.
pub fn slot_at_mut<'a>(board: &'a mut Board, target: &SlotTarget) -> Option<&'a mut Slot> {
    match target {
        SlotTarget::Lead(lead) => board.lead_mut(*lead).as_mut(),
        SlotTarget::Zone {
            zone,
            index: Some(i),
        } => board.zones.get_mut(zone).and_then(|slots| slots.get_mut(*i)),
        SlotTarget::Zone { index: None, .. } => None,
    }
}

pub(crate) fn take_slot(board: &mut Board, target: &SlotTarget) -> Option<Slot> {
    match target {
        SlotTarget::Lead(lead) => board.lead_mut(*lead).take(),
        SlotTarget::Zone {
            zone,
            index: Some(i),
        } => {
            let slots = board.zones.get_mut(zone)?;
            (*i < slots.len()).then(|| slots.remove(*i))
        }
        SlotTarget::Zone { index: None, .. } => None,
    }
}

/// Every position currently held by `nurse_id`, in scan order.
pub fn find_nurse(board: &Board, nurse_id: &str) -> Vec<SlotTarget> {
    let mut found = Vec::new();

    for lead in Lead::ALL {
        if board.lead(lead).is_some_and(|s| s.nurse_id == nurse_id) {
            found.push(SlotTarget::Lead(lead));
        }
    }

    for (zone, slots) in &board.zones {
        for (i, slot) in slots.iter().enumerate() {
            if slot.nurse_id == nurse_id {
                found.push(SlotTarget::zone_at(zone.clone(), i));
            }
        }
    }

    found
}

/// All assigned nurse ids in scan order (charge, triage, admin, zones by name).
pub fn assigned_nurse_ids(board: &Board) -> Vec<&str> {
    Lead::ALL
        .iter()
        .filter_map(|lead| board.lead(*lead))
        .chain(board.zones.values().flatten())
        .map(|s| s.nurse_id.as_str())
        .collect()
}

/// Drop later occurrences of nurses that appear more than once.
///
/// The first occurrence in scan order is kept. Returns the ids that had
/// duplicates removed.
pub fn dedupe_assignments(board: &mut Board) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut repaired = BTreeSet::new();

    for lead in Lead::ALL {
        let slot = board.lead_mut(lead);
        if let Some(s) = slot.as_ref() {
            if !seen.insert(s.nurse_id.clone()) {
                repaired.insert(s.nurse_id.clone());
                *slot = None;
            }
        }
    }

    for slots in board.zones.values_mut() {
        slots.retain(|s| {
            if seen.insert(s.nurse_id.clone()) {
                true
            } else {
                repaired.insert(s.nurse_id.clone());
                false
            }
        });
    }

    if !repaired.is_empty() {
        warn!(nurse_ids = ?repaired, "removed duplicate assignments");
    }

    repaired.into_iter().collect()
}

/// Put the slot's nurse on break.
///
/// `now` defaults to the current time; the start is stored as an RFC 3339
/// timestamp with millisecond precision.
pub fn start_break(
    slot: &mut Slot,
    relieved_by: Option<String>,
    planned_end_hhmm: Option<String>,
    now: Option<DateTime<Utc>>,
) {
    let start = now.unwrap_or_else(Utc::now);
    slot.break_info = Some(BreakRecord {
        active: true,
        start_iso: Some(start.to_rfc3339_opts(SecondsFormat::Millis, true)),
        planned_end_hhmm,
        relieved_by,
    });
}

/// End the slot's break. The record stays so "who covered" stays answerable.
///
/// Returns whether an active break was ended.
pub fn end_break(slot: &mut Slot) -> bool {
    match slot.break_info.as_mut() {
        Some(record) if record.active => {
            record.active = false;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Shift;
    use chrono::{NaiveDate, TimeZone};

    fn board() -> Board {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Board::with_zones(date, Shift::Day, ["A", "B"])
    }

    #[test]
    fn test_upsert_clears_prior_lead() {
        let mut b = board();
        assert!(!upsert_slot(&mut b, &SlotTarget::CHARGE, Slot::new("n1")));

        let moved = upsert_slot(&mut b, &SlotTarget::zone("A"), Slot::new("n1"));

        assert!(moved);
        assert!(b.charge.is_none());
        assert_eq!(b.zones["A"], vec![Slot::new("n1")]);
        assert_eq!(find_nurse(&b, "n1"), vec![SlotTarget::zone_at("A", 0)]);
    }

    #[test]
    fn test_upsert_zone_index_inserts_or_appends() {
        let mut b = board();
        upsert_slot(&mut b, &SlotTarget::zone("A"), Slot::new("n1"));
        upsert_slot(&mut b, &SlotTarget::zone("A"), Slot::new("n2"));
        upsert_slot(&mut b, &SlotTarget::zone_at("A", 0), Slot::new("n3"));
        upsert_slot(&mut b, &SlotTarget::zone_at("A", 99), Slot::new("n4"));

        let ids: Vec<_> = b.zones["A"].iter().map(|s| s.nurse_id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "n1", "n2", "n4"]);
    }

    #[test]
    fn test_ensure_unique_clears_every_duplicate() {
        let mut b = board();
        b.charge = Some(Slot::new("n1"));
        b.zones.get_mut("A").unwrap().push(Slot::new("n1"));
        b.zones.get_mut("B").unwrap().push(Slot::new("n1"));
        b.zones.get_mut("B").unwrap().push(Slot::new("n1"));

        assert!(ensure_unique_assignment(&mut b, "n1"));
        assert!(find_nurse(&b, "n1").is_empty());
        assert!(!ensure_unique_assignment(&mut b, "n1"));
    }

    #[test]
    fn test_remove_slot_reports_noop() {
        let mut b = board();
        upsert_slot(&mut b, &SlotTarget::TRIAGE, Slot::new("n1"));
        upsert_slot(&mut b, &SlotTarget::zone("A"), Slot::new("n2"));

        assert!(remove_slot(&mut b, &SlotTarget::TRIAGE));
        assert!(!remove_slot(&mut b, &SlotTarget::TRIAGE));
        assert!(!remove_slot(&mut b, &SlotTarget::zone_at("A", 5)));
        assert!(!remove_slot(&mut b, &SlotTarget::zone("A")));
        assert!(remove_slot(&mut b, &SlotTarget::zone_at("A", 0)));
        assert!(!remove_slot(&mut b, &SlotTarget::zone_at("Missing", 0)));
    }

    #[test]
    fn test_move_slot_to_self_is_idempotent() {
        let mut b = board();
        upsert_slot(&mut b, &SlotTarget::zone("A"), Slot::new("n1"));
        upsert_slot(&mut b, &SlotTarget::ADMIN, Slot::new("n2"));

        assert!(!move_slot(&mut b, &SlotTarget::zone_at("A", 0), &SlotTarget::zone_at("A", 0)));
        assert!(!move_slot(&mut b, &SlotTarget::ADMIN, &SlotTarget::ADMIN));

        assert_eq!(b.zones["A"], vec![Slot::new("n1")]);
        assert_eq!(b.admin, Some(Slot::new("n2")));
    }

    #[test]
    fn test_move_slot_keeps_metadata() {
        let mut b = board();
        let mut slot = Slot::new("n1");
        slot.comment = Some("float".to_string());
        upsert_slot(&mut b, &SlotTarget::zone("A"), slot.clone());

        assert!(!move_slot(&mut b, &SlotTarget::zone_at("A", 0), &SlotTarget::CHARGE));
        assert!(b.zones["A"].is_empty());
        assert_eq!(b.charge, Some(slot));
    }

    #[test]
    fn test_move_from_empty_position() {
        let mut b = board();
        assert!(!move_slot(&mut b, &SlotTarget::CHARGE, &SlotTarget::zone("A")));
        assert!(b.zones["A"].is_empty());
    }

    #[test]
    fn test_upsert_rejects_blank_nurse_id() {
        let mut b = board();
        upsert_slot(&mut b, &SlotTarget::zone("A"), Slot::new(""));
        assert!(b.zones["A"].is_empty());
    }

    #[test]
    fn test_dedupe_keeps_first_in_scan_order() {
        let mut b = board();
        b.triage = Some(Slot::new("n1"));
        b.zones.get_mut("A").unwrap().push(Slot::new("n1"));
        b.zones.get_mut("A").unwrap().push(Slot::new("n2"));
        b.zones.get_mut("B").unwrap().push(Slot::new("n2"));

        let repaired = dedupe_assignments(&mut b);

        assert_eq!(repaired, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(b.triage, Some(Slot::new("n1")));
        assert_eq!(b.zones["A"], vec![Slot::new("n2")]);
        assert!(b.zones["B"].is_empty());
        assert_eq!(assigned_nurse_ids(&b), vec!["n1", "n2"]);
    }

    #[test]
    fn test_break_lifecycle_keeps_history() {
        let mut slot = Slot::new("n1");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();

        start_break(&mut slot, Some("n7".to_string()), Some("1100".to_string()), Some(now));
        assert!(slot.is_on_break());
        assert_eq!(
            slot.break_info.as_ref().unwrap().start_iso.as_deref(),
            Some("2024-01-01T10:30:00.000Z")
        );

        assert!(end_break(&mut slot));
        assert!(!end_break(&mut slot));

        let record = slot.break_info.as_ref().unwrap();
        assert!(!record.active);
        assert_eq!(record.relieved_by.as_deref(), Some("n7"));
        assert_eq!(record.planned_end_hhmm.as_deref(), Some("1100"));
    }
}

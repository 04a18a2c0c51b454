//! Property tests for the single-occupancy invariant and merge guarantees.

use std::collections::HashMap;

use chrono::NaiveDate;
use edsb_board::{
    assigned_nurse_ids, merge_boards, move_slot, upsert_slot, Board, Shift, Slot, SlotTarget,
};
use proptest::prelude::*;

const ZONES: [&str; 3] = ["A", "B", "C"];

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn empty_board() -> Board {
    Board::with_zones(date(), Shift::Day, ZONES)
}

fn assert_single_occupancy(board: &Board) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in assigned_nurse_ids(board) {
        *counts.entry(id).or_default() += 1;
    }
    for (id, count) in counts {
        assert_eq!(count, 1, "nurse {id} occupies {count} slots");
    }
}

fn target_strategy() -> impl Strategy<Value = SlotTarget> {
    prop_oneof![
        Just(SlotTarget::CHARGE),
        Just(SlotTarget::TRIAGE),
        Just(SlotTarget::ADMIN),
        (0..ZONES.len(), proptest::option::of(0usize..4))
            .prop_map(|(z, index)| SlotTarget::Zone {
                zone: ZONES[z].to_string(),
                index,
            }),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Upsert(SlotTarget, u8),
    Move(SlotTarget, SlotTarget),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (target_strategy(), 0u8..6).prop_map(|(t, n)| Op::Upsert(t, n)),
        (target_strategy(), target_strategy()).prop_map(|(a, b)| Op::Move(a, b)),
    ]
}

fn zone_strategy() -> impl Strategy<Value = Vec<Slot>> {
    proptest::collection::vec(0u8..8, 0..5).prop_map(|ids| {
        let mut seen = Vec::new();
        for id in ids {
            let id = format!("n{id}");
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen.into_iter().map(Slot::new).collect()
    })
}

proptest! {
    #[test]
    fn single_occupancy_holds_after_every_op(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut board = empty_board();
        for op in ops {
            match op {
                Op::Upsert(target, n) => {
                    upsert_slot(&mut board, &target, Slot::new(format!("n{n}")));
                }
                Op::Move(from, to) => {
                    move_slot(&mut board, &from, &to);
                }
            }
            assert_single_occupancy(&board);
        }
    }

    #[test]
    fn merge_never_drops_remote_zone_slots(remote_a in zone_strategy(), local_a in zone_strategy(), absent in any::<bool>()) {
        let mut remote = empty_board();
        remote.zones.insert("A".to_string(), remote_a.clone());
        let mut local = empty_board();
        if absent {
            local.zones.remove("A");
        } else {
            local.zones.insert("A".to_string(), local_a.clone());
        }

        let merged = merge_boards(&remote, &local);
        let merged_ids: Vec<&str> = merged.zones["A"].iter().map(|s| s.nurse_id.as_str()).collect();

        let local_slots: &[Slot] = if absent { &[] } else { &local_a };
        for slot in remote_a.iter().chain(local_slots) {
            prop_assert!(merged_ids.contains(&slot.nurse_id.as_str()));
        }
        let mut dedup = merged_ids.clone();
        dedup.sort_unstable();
        dedup.dedup();
        prop_assert_eq!(dedup.len(), merged_ids.len());
    }
}

#[test]
fn assigning_charge_nurse_to_zone_clears_charge() {
    let mut board = Board::with_zones(date(), Shift::Day, ["A", "B"]);
    upsert_slot(&mut board, &SlotTarget::CHARGE, Slot::new("n1"));

    let moved = upsert_slot(&mut board, &SlotTarget::zone("A"), Slot::new("n1"));

    assert!(moved);
    assert!(board.charge.is_none());
    assert_eq!(board.zones["A"], vec![Slot::new("n1")]);
    assert!(board.zones["B"].is_empty());
    assert_single_occupancy(&board);
}

#[test]
fn merge_keeps_local_comments_and_both_nurses() {
    let mut remote = Board::with_zones(date(), Shift::Day, ["A"]);
    remote.zones.insert("A".to_string(), vec![Slot::new("n1")]);
    remote.comments = String::new();

    let mut local = Board::with_zones(date(), Shift::Day, ["A"]);
    local
        .zones
        .insert("A".to_string(), vec![Slot::new("n1"), Slot::new("n2")]);
    local.comments = "status ok".to_string();

    let merged = merge_boards(&remote, &local);

    assert_eq!(merged.comments, "status ok");
    let ids: Vec<_> = merged.zones["A"].iter().map(|s| s.nurse_id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "n2"]);
}

#[test]
fn move_onto_own_slot_keeps_assignment_set() {
    let mut board = empty_board();
    upsert_slot(&mut board, &SlotTarget::zone("B"), Slot::new("n1"));
    upsert_slot(&mut board, &SlotTarget::zone("B"), Slot::new("n2"));
    let before = assigned_nurse_ids(&board)
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let moved = move_slot(&mut board, &SlotTarget::zone_at("B", 1), &SlotTarget::zone_at("B", 1));

    assert!(!moved);
    let after: Vec<_> = assigned_nurse_ids(&board)
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(before, after);
}

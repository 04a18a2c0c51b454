//! Versioned migration of persisted boards.
//!
//! Every load path runs stored JSON through [`migrate_board`], which accepts
//! anything (older schemas, partial writes, garbage) and returns a fully
//! populated current-schema [`Board`]. Business logic can then rely on every
//! field being present.
//!
//! Schema history:
//! - v1: singletons and zone entries may be bare nurse-id strings.
//! - v2: breaks stored as a boolean `onBreak` on the slot.
//! - v3: current shape (see [`crate::model`]).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{Board, BreakRecord, IncomingEntry, OffgoingEntry, Shift, Slot, BOARD_VERSION};

/// Normalise a stored board into the current schema.
///
/// `date_iso` and `shift` are used when the stored values are missing or
/// invalid. Never fails.
pub fn migrate_board(value: &Value, date_iso: NaiveDate, shift: Shift) -> Board {
    let mut repairs: Vec<&'static str> = Vec::new();

    let Some(obj) = value.as_object() else {
        if !value.is_null() {
            warn!(kind = json_kind(value), "stored board is not an object; starting empty");
        }
        return Board::empty(date_iso, shift);
    };

    let stored_version = obj.get("version").and_then(Value::as_u64).unwrap_or(1);

    let board_date = match obj.get("dateISO").and_then(Value::as_str) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap_or_else(|_| {
            repairs.push("dateISO");
            date_iso
        }),
        None => {
            repairs.push("dateISO");
            date_iso
        }
    };

    let board_shift = match obj.get("shift").and_then(Value::as_str) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            repairs.push("shift");
            shift
        }),
        None => {
            repairs.push("shift");
            shift
        }
    };

    let zones = match obj.get("zones") {
        Some(Value::Object(map)) => read_zones(map, &mut repairs),
        Some(_) => {
            repairs.push("zones");
            BTreeMap::new()
        }
        None => {
            repairs.push("zones");
            BTreeMap::new()
        }
    };

    let board = Board {
        date_iso: board_date,
        shift: board_shift,
        charge: obj.get("charge").and_then(read_slot),
        triage: obj.get("triage").and_then(read_slot),
        admin: obj.get("admin").and_then(read_slot),
        zones,
        incoming: read_list(obj.get("incoming"), read_incoming, "incoming", &mut repairs),
        offgoing: read_list(obj.get("offgoing"), read_offgoing, "offgoing", &mut repairs),
        comments: obj
            .get("comments")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        huddle: obj.get("huddle").cloned().unwrap_or(Value::Null),
        handoff: obj.get("handoff").cloned().unwrap_or(Value::Null),
        version: BOARD_VERSION,
    };

    if !repairs.is_empty() {
        warn!(
            stored_version,
            date = %board.date_iso,
            shift = %board.shift,
            repaired = ?repairs,
            "normalised malformed board"
        );
    }

    board
}

fn read_zones(
    map: &Map<String, Value>,
    repairs: &mut Vec<&'static str>,
) -> BTreeMap<String, Vec<Slot>> {
    map.iter()
        .map(|(name, entries)| {
            let slots = match entries.as_array() {
                Some(items) => {
                    let slots: Vec<Slot> = items.iter().filter_map(read_slot).collect();
                    if slots.len() != items.len() {
                        repairs.push("zone slots");
                    }
                    slots
                }
                None => {
                    repairs.push("zone list");
                    Vec::new()
                }
            };
            (name.clone(), slots)
        })
        .collect()
}

fn read_list<T>(
    value: Option<&Value>,
    read: fn(&Value) -> Option<T>,
    field: &'static str,
    repairs: &mut Vec<&'static str>,
) -> Vec<T> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let out: Vec<T> = items.iter().filter_map(read).collect();
            if out.len() != items.len() {
                repairs.push(field);
            }
            out
        }
        Some(_) => {
            repairs.push(field);
            Vec::new()
        }
    }
}

fn read_slot(value: &Value) -> Option<Slot> {
    match value {
        Value::String(id) => non_empty(id).map(Slot::new),
        Value::Object(obj) => {
            let nurse_id = obj.get("nurseId").and_then(Value::as_str).and_then(non_empty)?;
            Some(Slot {
                nurse_id,
                student: match obj.get("student") {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::String(s)) => !s.trim().is_empty(),
                    _ => false,
                },
                comment: string_field(obj, "comment"),
                break_info: read_break(obj),
                end_time_override_hhmm: string_field(obj, "endTimeOverrideHHMM"),
                dto: obj.get("dto").and_then(Value::as_bool).unwrap_or(false),
                start_hhmm: string_field(obj, "startHHMM"),
                high_acuity_until: epoch_field(obj, "highAcuityUntil"),
                assigned_ts: epoch_field(obj, "assignedTs"),
            })
        }
        _ => None,
    }
}

fn read_break(slot: &Map<String, Value>) -> Option<BreakRecord> {
    if let Some(Value::Object(b)) = slot.get("break") {
        return Some(BreakRecord {
            active: b.get("active").and_then(Value::as_bool).unwrap_or(false),
            start_iso: string_field(b, "startISO"),
            planned_end_hhmm: string_field(b, "plannedEndHHMM"),
            relieved_by: string_field(b, "relievedBy"),
        });
    }

    // v2 stored only a flag.
    match slot.get("onBreak").and_then(Value::as_bool) {
        Some(true) => Some(BreakRecord {
            active: true,
            ..BreakRecord::default()
        }),
        _ => None,
    }
}

fn read_incoming(value: &Value) -> Option<IncomingEntry> {
    match value {
        Value::String(id) => non_empty(id).map(|id| IncomingEntry::new(id, "")),
        Value::Object(obj) => {
            let nurse_id = obj.get("nurseId").and_then(Value::as_str).and_then(non_empty)?;
            Some(IncomingEntry {
                nurse_id,
                eta: string_field(obj, "eta").unwrap_or_default(),
                arrived: obj.get("arrived").and_then(Value::as_bool).unwrap_or(false),
            })
        }
        _ => None,
    }
}

fn read_offgoing(value: &Value) -> Option<OffgoingEntry> {
    let obj = value.as_object()?;
    let nurse_id = obj.get("nurseId").and_then(Value::as_str).and_then(non_empty)?;
    Some(OffgoingEntry {
        nurse_id,
        ts: epoch_field(obj, "ts").unwrap_or(0),
    })
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).and_then(non_empty)
}

fn epoch_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    let v = obj.get(key)?;
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

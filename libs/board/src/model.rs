//! Board data model.
//!
//! The JSON shape matches what the key-value API and the local cache store,
//! so field names are camelCase with a few legacy spellings (`dateISO`,
//! `startHHMM`, ...) kept verbatim.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::BoardError;

/// Current board schema version written by [`crate::migrate_board`].
pub const BOARD_VERSION: u32 = 3;

/// Shift half of a (date, shift) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shift {
    #[default]
    Day,
    Night,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Night => "night",
        }
    }

    /// Shift that is on the floor at the given local hour (day is 07:00-18:59).
    pub fn for_hour(hour: u32) -> Self {
        if (7..19).contains(&hour) {
            Self::Day
        } else {
            Self::Night
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shift {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "night" => Ok(Self::Night),
            other => Err(BoardError::InvalidShift(other.to_string())),
        }
    }
}

/// Break state for a slot. Ending a break only deactivates the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRecord {
    pub active: bool,

    #[serde(rename = "startISO", default, skip_serializing_if = "Option::is_none")]
    pub start_iso: Option<String>,

    #[serde(
        rename = "plannedEndHHMM",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub planned_end_hhmm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relieved_by: Option<String>,
}

/// One person's assignment on the board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub nurse_id: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub student: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(rename = "break", default, skip_serializing_if = "Option::is_none")]
    pub break_info: Option<BreakRecord>,

    #[serde(
        rename = "endTimeOverrideHHMM",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time_override_hhmm: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dto: bool,

    #[serde(rename = "startHHMM", default, skip_serializing_if = "Option::is_none")]
    pub start_hhmm: Option<String>,

    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_acuity_until: Option<i64>,

    /// Epoch milliseconds; only drives "recently assigned" highlighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_ts: Option<i64>,
}

impl Slot {
    pub fn new(nurse_id: impl Into<String>) -> Self {
        Self {
            nurse_id: nurse_id.into(),
            ..Self::default()
        }
    }

    pub fn is_on_break(&self) -> bool {
        self.break_info.as_ref().is_some_and(|b| b.active)
    }
}

/// Someone expected to arrive during the shift.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEntry {
    pub nurse_id: String,
    #[serde(default)]
    pub eta: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub arrived: bool,
}

impl IncomingEntry {
    pub fn new(nurse_id: impl Into<String>, eta: impl Into<String>) -> Self {
        Self {
            nurse_id: nurse_id.into(),
            eta: eta.into(),
            arrived: false,
        }
    }

    /// Composite identity used for de-duplication.
    pub fn key(&self) -> (&str, &str) {
        (&self.nurse_id, &self.eta)
    }
}

/// Someone who left the floor, with the epoch-ms time they left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffgoingEntry {
    pub nurse_id: String,
    pub ts: i64,
}

/// Active shift state for one (date, shift) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    #[serde(rename = "dateISO")]
    pub date_iso: NaiveDate,
    pub shift: Shift,
    #[serde(default)]
    pub charge: Option<Slot>,
    #[serde(default)]
    pub triage: Option<Slot>,
    #[serde(default)]
    pub admin: Option<Slot>,
    #[serde(default)]
    pub zones: BTreeMap<String, Vec<Slot>>,
    #[serde(default)]
    pub incoming: Vec<IncomingEntry>,
    #[serde(default)]
    pub offgoing: Vec<OffgoingEntry>,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub huddle: serde_json::Value,
    #[serde(default)]
    pub handoff: serde_json::Value,
    #[serde(default)]
    pub version: u32,
}

impl Board {
    /// An empty board with no zones.
    pub fn empty(date_iso: NaiveDate, shift: Shift) -> Self {
        Self {
            date_iso,
            shift,
            charge: None,
            triage: None,
            admin: None,
            zones: BTreeMap::new(),
            incoming: Vec::new(),
            offgoing: Vec::new(),
            comments: String::new(),
            huddle: serde_json::Value::Null,
            handoff: serde_json::Value::Null,
            version: BOARD_VERSION,
        }
    }

    /// An empty board with the given zones initialised to empty sequences.
    pub fn with_zones<I, S>(date_iso: NaiveDate, shift: Shift, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut board = Self::empty(date_iso, shift);
        board.zones = zones.into_iter().map(|z| (z.into(), Vec::new())).collect();
        board
    }

    pub fn lead(&self, lead: Lead) -> Option<&Slot> {
        match lead {
            Lead::Charge => self.charge.as_ref(),
            Lead::Triage => self.triage.as_ref(),
            Lead::Admin => self.admin.as_ref(),
        }
    }

    pub(crate) fn lead_mut(&mut self, lead: Lead) -> &mut Option<Slot> {
        match lead {
            Lead::Charge => &mut self.charge,
            Lead::Triage => &mut self.triage,
            Lead::Admin => &mut self.admin,
        }
    }
}

/// The three singleton positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lead {
    Charge,
    Triage,
    Admin,
}

impl Lead {
    pub const ALL: [Lead; 3] = [Lead::Charge, Lead::Triage, Lead::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Triage => "triage",
            Self::Admin => "admin",
        }
    }
}

/// Where a slot lives on the board.
///
/// Zone targets without an index append on insert and address nothing on
/// read or removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotTarget {
    Lead(Lead),
    Zone { zone: String, index: Option<usize> },
}

impl SlotTarget {
    pub const CHARGE: SlotTarget = SlotTarget::Lead(Lead::Charge);
    pub const TRIAGE: SlotTarget = SlotTarget::Lead(Lead::Triage);
    pub const ADMIN: SlotTarget = SlotTarget::Lead(Lead::Admin);

    pub fn zone(zone: impl Into<String>) -> Self {
        Self::Zone {
            zone: zone.into(),
            index: None,
        }
    }

    pub fn zone_at(zone: impl Into<String>, index: usize) -> Self {
        Self::Zone {
            zone: zone.into(),
            index: Some(index),
        }
    }
}

impl fmt::Display for SlotTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lead(lead) => f.write_str(lead.as_str()),
            Self::Zone { zone, index: None } => write!(f, "zone:{zone}"),
            Self::Zone {
                zone,
                index: Some(i),
            } => write!(f, "zone:{zone}:{i}"),
        }
    }
}

impl FromStr for SlotTarget {
    type Err = BoardError;

    /// Accepts `charge`, `triage`, `admin`, `zone:<name>` and `zone:<name>:<index>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "charge" => return Ok(Self::CHARGE),
            "triage" => return Ok(Self::TRIAGE),
            "admin" => return Ok(Self::ADMIN),
            _ => {}
        }

        let Some(rest) = s.strip_prefix("zone:") else {
            return Err(BoardError::InvalidTarget(s.to_string()));
        };

        // Zone names may contain ':' so only a trailing numeric segment is an index.
        if let Some((name, idx)) = rest.rsplit_once(':') {
            if let Ok(index) = idx.parse::<usize>() {
                if name.is_empty() {
                    return Err(BoardError::InvalidTarget(s.to_string()));
                }
                return Ok(Self::zone_at(name, index));
            }
        }

        if rest.is_empty() {
            return Err(BoardError::InvalidTarget(s.to_string()));
        }
        Ok(Self::zone(rest))
    }
}

/// True for values that carry no user content (null, blank text, empty collections).
pub fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

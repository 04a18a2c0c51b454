//! Roster lookup.
//!
//! Slots reference nurses by id only. A slot can outlive its roster entry
//! (roster edited in another tab, stale cache), so lookups never fail: an
//! unknown id resolves to a placeholder record and is logged.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Board;
use crate::slots::assigned_nurse_ids;

/// A person on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nurse {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Set on records synthesised for unknown ids.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

impl Nurse {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: None,
            placeholder: false,
        }
    }

    fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            role: None,
            placeholder: true,
        }
    }
}

/// Roster indexed by nurse id.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    nurses: HashMap<String, Nurse>,
}

impl Roster {
    pub fn new(nurses: impl IntoIterator<Item = Nurse>) -> Self {
        Self {
            nurses: nurses.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    /// Parse the stored roster (a JSON array of nurses). Malformed entries are skipped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(items) = value.as_array() else {
            if !value.is_null() {
                warn!("stored roster is not an array; using empty roster");
            }
            return Self::default();
        };

        let nurses: Vec<Nurse> = items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect();
        if nurses.len() != items.len() {
            warn!(
                skipped = items.len() - nurses.len(),
                "skipped malformed roster entries"
            );
        }
        Self::new(nurses)
    }

    pub fn get(&self, id: &str) -> Option<&Nurse> {
        self.nurses.get(id)
    }

    pub fn len(&self) -> usize {
        self.nurses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nurses.is_empty()
    }

    /// Look up a nurse, falling back to a placeholder for unknown ids.
    pub fn resolve(&self, id: &str) -> Cow<'_, Nurse> {
        match self.nurses.get(id) {
            Some(nurse) => Cow::Borrowed(nurse),
            None => {
                warn!(nurse_id = %id, "slot references a nurse missing from the roster");
                Cow::Owned(Nurse::placeholder(id))
            }
        }
    }

    /// Assigned ids on `board` that the roster does not know.
    pub fn unknown_ids<'b>(&self, board: &'b Board) -> Vec<&'b str> {
        assigned_nurse_ids(board)
            .into_iter()
            .filter(|id| !self.nurses.contains_key(*id))
            .collect()
    }
}

//! Zone configuration and zone-key reconciliation.
//!
//! The board does not own its zone list; it is reconciled against the
//! configured zones whenever configuration changes or a board is loaded.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::Board;

/// One configured zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ZoneDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }
}

/// Board-related configuration published by the configuration provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    #[serde(default)]
    pub zones: Vec<ZoneDef>,
}

impl BoardConfig {
    pub fn from_zone_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            zones: names.into_iter().map(ZoneDef::new).collect(),
        }
    }

    pub fn zone_names(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(|z| z.name.as_str())
    }
}

/// Read-only source of the current configuration.
pub trait ConfigProvider: Send + Sync {
    fn board_config(&self) -> BoardConfig;
}

/// A fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig(pub BoardConfig);

impl ConfigProvider for StaticConfig {
    fn board_config(&self) -> BoardConfig {
        self.0.clone()
    }
}

/// Make the board's zone keys exactly match the configured zone names.
///
/// Missing zones are added empty; stale zones are dropped along with their
/// slots. Returns whether the key set changed.
pub fn ensure_zone_keys(board: &mut Board, config: &BoardConfig) -> bool {
    let wanted: BTreeSet<&str> = config.zone_names().collect();
    let mut changed = false;

    let stale: Vec<String> = board
        .zones
        .keys()
        .filter(|name| !wanted.contains(name.as_str()))
        .cloned()
        .collect();

    for name in stale {
        if let Some(slots) = board.zones.remove(&name) {
            if slots.is_empty() {
                info!(zone = %name, "dropped unconfigured zone");
            } else {
                let nurse_ids: Vec<&str> = slots.iter().map(|s| s.nurse_id.as_str()).collect();
                warn!(
                    zone = %name,
                    nurse_ids = ?nurse_ids,
                    "dropped unconfigured zone with assignments"
                );
            }
            changed = true;
        }
    }

    for name in wanted {
        if !board.zones.contains_key(name) {
            board.zones.insert(name.to_string(), Vec::new());
            changed = true;
        }
    }

    changed
}

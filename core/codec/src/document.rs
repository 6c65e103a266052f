//! The structured save document handed to editors.

use serde::{Deserialize, Serialize};

use atosave_common::{Error, Result};

/// One save file as the editor sees it.
///
/// The team roster is an independently encoded JSON document kept as an
/// opaque string. Serialized field names match the game's own property
/// names so exported JSON reads like the original save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDocument {
    #[serde(rename = "GameDate", default)]
    pub game_date: Option<String>,
    #[serde(rename = "CurrentMapNode", default)]
    pub current_map_node: Option<String>,
    /// Embedded roster JSON.
    #[serde(rename = "TeamAtO", default)]
    pub team_payload: String,
    #[serde(rename = "GameMode", default)]
    pub game_mode: i32,
}

impl SaveDocument {
    /// Export as indented JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Import from JSON written by `to_json` or by hand.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

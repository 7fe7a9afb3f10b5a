//! The typed state record and its in-memory mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DEFAULT_SOURCE;

/// Language used when the state file names none.
pub const DEFAULT_LANGUAGE: &str = "it_it";

/// An overlay applied for one target entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    /// Pack that provided the substituted asset.
    pub pack: String,
    /// Set when this system created the overlay.
    #[serde(default = "default_managed")]
    pub managed: bool,
    /// The Unix epoch when the record predates timestamps.
    #[serde(default)]
    pub applied_at: DateTime<Utc>,
}

fn default_managed() -> bool {
    true
}

/// Persisted state. Unknown fields are ignored and missing fields default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalState {
    /// Pack name to installed content identifier.
    #[serde(rename = "installed_shas")]
    pub installed: BTreeMap<String, String>,
    /// Stored as `""` when unset.
    #[serde(rename = "selected_pack", with = "empty_as_none")]
    pub active_pack: Option<String>,
    /// Registry sources; empty means the built-in default.
    pub sources: Vec<String>,
    pub language: String,
    /// Target entity name to the overlay applied for it.
    pub overlays: BTreeMap<String, OverlayEntry>,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            installed: BTreeMap::new(),
            active_pack: None,
            sources: Vec::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            overlays: BTreeMap::new(),
        }
    }
}

impl LocalState {
    pub fn installed_content_id(&self, pack: &str) -> Option<&str> {
        self.installed.get(pack).map(String::as_str)
    }

    pub fn mark_installed(&mut self, pack: &str, content_id: &str) {
        self.installed
            .insert(pack.to_string(), content_id.to_string());
    }

    /// Drops a pack's installed record; clears the active pack if it was this one.
    pub fn forget_pack(&mut self, pack: &str) {
        self.installed.remove(pack);
        if self.active_pack.as_deref() == Some(pack) {
            self.active_pack = None;
        }
    }

    pub fn set_active(&mut self, pack: &str) {
        self.active_pack = Some(pack.to_string());
    }

    pub fn record_overlay(&mut self, target: &str, pack: &str) {
        self.overlays.insert(
            target.to_string(),
            OverlayEntry {
                pack: pack.to_string(),
                managed: true,
                applied_at: Utc::now(),
            },
        );
    }

    /// Returns whether a record existed.
    pub fn clear_overlay(&mut self, target: &str) -> bool {
        self.overlays.remove(target).is_some()
    }

    pub fn clear_overlays(&mut self) {
        self.overlays.clear();
    }

    /// Resets installed packs and the active pack. Overlay records and
    /// settings are kept.
    pub fn clear_cache(&mut self) {
        self.installed.clear();
        self.active_pack = None;
    }

    /// Sources to list, falling back to the built-in default.
    pub fn effective_sources(&self) -> Vec<String> {
        if self.sources.is_empty() {
            vec![DEFAULT_SOURCE.to_string()]
        } else {
            self.sources.clone()
        }
    }

    /// Adds a source if not already present. Returns whether it was added.
    pub fn add_source(&mut self, source: &str) -> bool {
        if self.sources.is_empty() {
            self.sources.push(DEFAULT_SOURCE.to_string());
        }
        if self.sources.iter().any(|s| s == source) {
            return false;
        }
        self.sources.push(source.to_string());
        true
    }

    /// Removes a source. Returns whether it was present.
    pub fn remove_source(&mut self, source: &str) -> bool {
        if self.sources.is_empty() {
            self.sources.push(DEFAULT_SOURCE.to_string());
        }
        let before = self.sources.len();
        self.sources.retain(|s| s != source);
        self.sources.len() != before
    }
}

/// `Option<String>` stored as a plain string where `""` means none.
mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(d)?;
        Ok(value.filter(|s| !s.is_empty()))
    }
}

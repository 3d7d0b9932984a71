// crates/scale-vision-core/src/mapping.rs
//
// Class-id → point-of-sale product code. Holds an immutable config snapshot
// plus a reverse alias index; the whole mapper is replaced on config reload.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::MappingConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MapReason {
    MappingOk,
    MappingMissing,
    MappingDisabled,
}

impl MapReason {
    pub fn as_str(self) -> &'static str {
        match self {
            MapReason::MappingOk       => "MAPPING_OK",
            MapReason::MappingMissing  => "MAPPING_MISSING",
            MapReason::MappingDisabled => "MAPPING_DISABLED",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapResult {
    pub code:   Option<String>,
    pub reason: MapReason,
}

pub struct Mapper {
    config:      MappingConfig,
    checksum:    String,
    alias_index: BTreeMap<String, String>,
}

impl Mapper {
    pub fn new(config: MappingConfig) -> Self {
        let checksum = compute_checksum(&config);
        let alias_index = build_alias_index(&config);
        Self { config, checksum, alias_index }
    }

    /// Hex SHA-256 over the stable serialization of the mapping config.
    /// Classes live in a BTreeMap, so the serialization is key-sorted and
    /// the checksum only moves when the mapping itself does.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Resolve a class id (or one of its aliases) to a product code.
    pub fn map_class(&self, class_id: &str) -> MapResult {
        let canonical = self.alias_index.get(class_id).map(String::as_str).unwrap_or(class_id);
        match self.config.classes.get(canonical) {
            None => MapResult { code: None, reason: MapReason::MappingMissing },
            Some(entry) if entry.disabled => {
                MapResult { code: None, reason: MapReason::MappingDisabled }
            }
            Some(entry) => {
                MapResult { code: Some(entry.code.clone()), reason: MapReason::MappingOk }
            }
        }
    }
}

fn compute_checksum(config: &MappingConfig) -> String {
    let payload = serde_json::to_string(config).unwrap_or_default();
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

/// Alias → canonical class. The schema does not enforce alias uniqueness;
/// when two entries claim the same alias, the first owning class in
/// ascending class-id order wins.
fn build_alias_index(config: &MappingConfig) -> BTreeMap<String, String> {
    let mut index = BTreeMap::new();
    for (class_id, entry) in &config.classes {
        for alias in &entry.aliases {
            index.entry(alias.clone()).or_insert_with(|| class_id.clone());
        }
    }
    index
}

//! JSON merge patch (RFC 7396) helpers for document metadata.
//!
//! A metadata update is a map from key to [`MetadataPatch`]. Keys that should
//! stay untouched are simply absent from the map; `Remove` serializes to an
//! explicit `null`, which deletes the key on the receiving side.

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataPatch {
    Set(JsonValue),
    Remove,
}

impl MetadataPatch {
    /// `set(null)` is a removal; merge patch has no way to store a JSON null.
    pub fn set(value: JsonValue) -> Self {
        if value.is_null() {
            MetadataPatch::Remove
        } else {
            MetadataPatch::Set(value)
        }
    }
}

impl Serialize for MetadataPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetadataPatch::Set(value) => value.serialize(serializer),
            MetadataPatch::Remove => serializer.serialize_unit(),
        }
    }
}

/// Apply `patch` to `target` following RFC 7396.
pub fn apply_merge_patch(target: &mut JsonValue, patch: &JsonValue) {
    let JsonValue::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map.entry(key.clone()).or_insert(JsonValue::Null);
                apply_merge_patch(entry, value);
            }
        }
    }
}

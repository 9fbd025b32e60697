//! Presence state: per-topic map of participants, updated by SYNC/diff

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Local mirror of the server's presence map: key → list of per-connection
/// metadata ("metas")
pub type PresenceMap = HashMap<String, Vec<JsonValue>>;

#[derive(Debug, Deserialize)]
struct PresenceDiffPayload {
    #[serde(default)]
    joins: HashMap<String, PresenceEntry>,
    #[serde(default)]
    leaves: HashMap<String, PresenceEntry>,
}

#[derive(Debug, Deserialize)]
struct PresenceEntry {
    #[serde(default)]
    metas: Vec<JsonValue>,
}

/// Keys that joined or left as a result of applying a diff, so callers can
/// invoke JOIN/LEAVE handlers per key
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PresenceDiffResult {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

/// Replace the local map wholesale from a `presence_state` payload
pub fn apply_state(map: &mut PresenceMap, payload: &JsonValue) {
    map.clear();
    if let Some(object) = payload.as_object() {
        for (key, value) in object {
            let metas = value
                .get("metas")
                .and_then(|m| m.as_array())
                .cloned()
                .unwrap_or_default();
            map.insert(key.clone(), metas);
        }
    }
}

/// Apply a `presence_diff` payload in place, returning the keys that
/// joined/left for dispatch
pub fn apply_diff(map: &mut PresenceMap, payload: &JsonValue) -> PresenceDiffResult {
    let diff: PresenceDiffPayload = match serde_json::from_value(payload.clone()) {
        Ok(diff) => diff,
        Err(_) => return PresenceDiffResult::default(),
    };

    let mut result = PresenceDiffResult::default();
    for (key, entry) in &diff.leaves {
        if let Some(existing) = map.get_mut(key) {
            existing.retain(|meta| !entry.metas.contains(meta));
            if existing.is_empty() {
                map.remove(key);
            }
        }
        result.left.push(key.clone());
    }
    for (key, entry) in diff.joins {
        map.entry(key.clone()).or_default().extend(entry.metas);
        result.joined.push(key);
    }
    result
}

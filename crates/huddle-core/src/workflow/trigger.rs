//! Trigger condition matching.
//!
//! `trigger_conditions` is a flat map of `key → expected value`. An event
//! payload matches iff every condition key is present in the payload and
//! deep-equal to the expected value. An empty map matches every payload of
//! the trigger event.

use serde_json::{Map, Value};

/// Whether a payload satisfies a workflow's trigger conditions.
pub fn conditions_match(conditions: &Map<String, Value>, payload: &Value) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let Some(object) = payload.as_object() else {
        return false;
    };
    conditions
        .iter()
        .all(|(key, expected)| object.get(key) == Some(expected))
}

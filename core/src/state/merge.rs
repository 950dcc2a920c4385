//! Merge strategies for mod variables
//!
//! Merging never mutates `previous`; a fresh object is returned.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::BusinessError;
use crate::types::{JsonObject, JsonValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// The patch becomes the state
    Replace,
    /// Top-level keys of the patch win
    #[default]
    Shallow,
    /// Nested objects merge key by key; arrays and scalars from the patch win
    Deep,
}

impl FromStr for MergeStrategy {
    type Err = BusinessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(MergeStrategy::Replace),
            "shallow" => Ok(MergeStrategy::Shallow),
            "deep" => Ok(MergeStrategy::Deep),
            other => Err(BusinessError::InvalidMergeStrategy(other.to_string())),
        }
    }
}

pub fn merge_state(previous: &JsonObject, patch: &JsonObject, strategy: MergeStrategy) -> JsonObject {
    match strategy {
        MergeStrategy::Replace => patch.clone(),
        MergeStrategy::Shallow => {
            let mut next = previous.clone();
            for (key, value) in patch {
                next.insert(key.clone(), value.clone());
            }
            next
        }
        MergeStrategy::Deep => {
            let mut next = previous.clone();
            deep_merge(&mut next, patch);
            next
        }
    }
}

fn deep_merge(target: &mut JsonObject, patch: &JsonObject) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: JsonValue) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_replace_returns_patch() {
        let prev = obj(json!({"a": 1, "b": 2}));
        let patch = obj(json!({"c": 3}));
        assert_eq!(merge_state(&prev, &patch, MergeStrategy::Replace), patch);
    }

    #[test]
    fn test_shallow_with_empty_patch_is_identity() {
        let prev = obj(json!({"a": {"x": 1}, "b": [1, 2]}));
        assert_eq!(merge_state(&prev, &JsonObject::new(), MergeStrategy::Shallow), prev);
    }

    #[test]
    fn test_shallow_replaces_nested_objects() {
        let prev = obj(json!({"user": {"name": "a", "age": 3}}));
        let patch = obj(json!({"user": {"name": "b"}}));
        assert_eq!(
            merge_state(&prev, &patch, MergeStrategy::Shallow),
            obj(json!({"user": {"name": "b"}}))
        );
    }

    #[test]
    fn test_deep_merges_objects_and_replaces_arrays() {
        let prev = obj(json!({"user": {"name": "a", "tags": [1, 2, 3]}, "n": 1}));
        let patch = obj(json!({"user": {"tags": [9], "age": 4}}));
        assert_eq!(
            merge_state(&prev, &patch, MergeStrategy::Deep),
            obj(json!({"user": {"name": "a", "tags": [9], "age": 4}, "n": 1}))
        );
    }

    #[test]
    fn test_deep_merge_of_disjoint_patches_composes() {
        let prev = obj(json!({"z": 0}));
        let stepwise = merge_state(
            &merge_state(&prev, &obj(json!({"a": 1})), MergeStrategy::Deep),
            &obj(json!({"b": 2})),
            MergeStrategy::Deep,
        );
        let once = merge_state(&prev, &obj(json!({"a": 1, "b": 2})), MergeStrategy::Deep);
        assert_eq!(stepwise, once);
    }

    #[test]
    fn test_merge_does_not_mutate_previous() {
        let prev = obj(json!({"a": {"b": 1}}));
        let snapshot = prev.clone();
        let _ = merge_state(&prev, &obj(json!({"a": {"c": 2}})), MergeStrategy::Deep);
        assert_eq!(prev, snapshot);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("deep".parse::<MergeStrategy>(), Ok(MergeStrategy::Deep));
        assert!("merge".parse::<MergeStrategy>().is_err());
    }
}

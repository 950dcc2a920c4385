//! Per-mod variable sync policy
//!
//! Each variable name maps to exactly one scope, so the in-memory map and the
//! durable stores never hold the same name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::JsonObject;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncScope {
    /// Durable, shared by every tab of the session
    Session,
    /// Durable, keyed by the current tab
    Tab,
    /// In-memory in the current frame only
    #[default]
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariablePolicy {
    #[serde(default)]
    pub variables: HashMap<String, SyncScope>,
}

/// A mod state split by where each variable lives
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionedState {
    pub session: JsonObject,
    pub tab: JsonObject,
    pub local: JsonObject,
}

impl VariablePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, scope: SyncScope) -> Self {
        self.variables.insert(name.into(), scope);
        self
    }

    pub fn scope_of(&self, name: &str) -> SyncScope {
        self.variables.get(name).copied().unwrap_or_default()
    }

    pub fn has_synced(&self) -> bool {
        self.variables.values().any(|s| *s != SyncScope::Local)
    }

    pub fn partition(&self, state: &JsonObject) -> PartitionedState {
        let mut parts = PartitionedState::default();
        for (key, value) in state {
            let bucket = match self.scope_of(key) {
                SyncScope::Session => &mut parts.session,
                SyncScope::Tab => &mut parts.tab,
                SyncScope::Local => &mut parts.local,
            };
            bucket.insert(key.clone(), value.clone());
        }
        parts
    }

    /// Only the entries whose names are synced to durable storage
    pub fn restrict_to_synced(&self, state: &JsonObject) -> JsonObject {
        state
            .iter()
            .filter(|(key, _)| self.scope_of(key) != SyncScope::Local)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Keep only entries that belong in `scope`
    pub fn filter_scope(&self, state: &JsonObject, scope: SyncScope) -> JsonObject {
        state
            .iter()
            .filter(|(key, _)| self.scope_of(key) == scope)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

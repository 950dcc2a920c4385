//! Mod variable store
//!
//! Three namespaces of shared state:
//! - `public`: page-wide, any mod component may read and write
//! - `mod`: one per mod id, shared by that mod's components
//! - `private`: one per mod component id
//!
//! `mod` variables named in the mod's [`VariablePolicy`] as `session` or `tab`
//! live in [`DurableStorage`] instead of memory. Durable storage is always read
//! live, so synced values are never served stale.
//!
//! Writes to the same store are serialized: the merge and the persist happen
//! under one lock, so callers never observe a partial merge.

pub mod merge;
pub mod policy;
pub mod storage;


use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{BusinessError, StateError, StorageError};
use crate::types::{JsonObject, JsonValue};

pub use merge::{merge_state, MergeStrategy};
pub use policy::{PartitionedState, SyncScope, VariablePolicy};
pub use storage::{DurableStorage, MemoryStorage, StorageChange};

pub const DEFAULT_KEY_PREFIX: &str = "modVariables";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Public,
    Mod,
    Private,
}

impl FromStr for Namespace {
    type Err = BusinessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Namespace::Public),
            "mod" | "blueprint" => Ok(Namespace::Mod),
            "private" | "extension" => Ok(Namespace::Private),
            other => Err(BusinessError::InvalidNamespace(other.to_string())),
        }
    }
}

/// Who is asking: the mod and mod component a brick runs on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateScope {
    pub mod_id: Option<String>,
    pub component_id: Option<String>,
}

impl StateScope {
    pub fn new(mod_id: Option<String>, component_id: Option<String>) -> Self {
        Self { mod_id, component_id }
    }

    pub fn for_mod(mod_id: impl Into<String>) -> Self {
        Self {
            mod_id: Some(mod_id.into()),
            component_id: None,
        }
    }

    pub fn for_component(mod_id: impl Into<String>, component_id: impl Into<String>) -> Self {
        Self {
            mod_id: Some(mod_id.into()),
            component_id: Some(component_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub namespace: Namespace,
    pub mod_id: Option<String>,
    pub component_id: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    public: JsonObject,
    mods: HashMap<String, JsonObject>,
    private: HashMap<String, JsonObject>,
}

pub struct ModVariableStore {
    memory: Mutex<MemoryState>,
    policies: RwLock<HashMap<String, VariablePolicy>>,
    storage: Arc<dyn DurableStorage>,
    key_prefix: String,
    tab_id: Option<u64>,
    events: broadcast::Sender<StateChangeEvent>,
}

impl fmt::Debug for ModVariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModVariableStore")
            .field("key_prefix", &self.key_prefix)
            .field("tab_id", &self.tab_id)
            .finish_non_exhaustive()
    }
}

impl ModVariableStore {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            memory: Mutex::new(MemoryState::default()),
            policies: RwLock::new(HashMap::new()),
            storage,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            tab_id: None,
            events,
        }
    }

    /// Store backed by process-local storage
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn with_tab_id(mut self, tab_id: u64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn tab_id(&self) -> Option<u64> {
        self.tab_id
    }

    pub async fn register_policy(&self, mod_id: impl Into<String>, policy: VariablePolicy) {
        self.policies.write().await.insert(mod_id.into(), policy);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.events.subscribe()
    }

    /// Durable key for a mod's session variables, or its tab variables when
    /// `tab_id` is given.
    pub fn storage_key(&self, mod_id: &str, tab_id: Option<u64>) -> String {
        match tab_id {
            Some(tab) => format!("{}::{}::{}", self.key_prefix, mod_id, tab),
            None => format!("{}::{}", self.key_prefix, mod_id),
        }
    }

    /* ===================== Read ===================== */

    pub async fn get_state(
        &self,
        namespace: Namespace,
        scope: &StateScope,
    ) -> Result<JsonObject, StateError> {
        let memory = self.memory.lock().await;
        self.read_locked(&memory, namespace, scope).await
    }

    async fn read_locked(
        &self,
        memory: &MemoryState,
        namespace: Namespace,
        scope: &StateScope,
    ) -> Result<JsonObject, StateError> {
        match namespace {
            Namespace::Public => Ok(memory.public.clone()),
            Namespace::Private => {
                let component_id = require_component(scope)?;
                Ok(memory.private.get(component_id).cloned().unwrap_or_default())
            }
            Namespace::Mod => {
                let mod_id = require_mod(scope)?;
                let policy = self.policy(mod_id).await;
                let mut state = memory.mods.get(mod_id).cloned().unwrap_or_default();
                state.extend(self.read_synced(mod_id, &policy).await?);
                Ok(state)
            }
        }
    }

    async fn read_synced(
        &self,
        mod_id: &str,
        policy: &VariablePolicy,
    ) -> Result<JsonObject, StateError> {
        if !policy.has_synced() {
            return Ok(JsonObject::new());
        }

        let session_key = self.storage_key(mod_id, None);
        let tab_key = self.tab_id.map(|tab| self.storage_key(mod_id, Some(tab)));
        let mut keys = vec![session_key.clone()];
        keys.extend(tab_key.clone());

        let stored = self.storage.get(&keys).await?;
        let mut synced = JsonObject::new();
        if let Some(value) = stored.get(&session_key) {
            synced.extend(policy.filter_scope(stored_object(&session_key, value)?, SyncScope::Session));
        }
        if let Some(key) = tab_key {
            if let Some(value) = stored.get(&key) {
                synced.extend(policy.filter_scope(stored_object(&key, value)?, SyncScope::Tab));
            }
        }
        Ok(synced)
    }

    /* ===================== Write ===================== */

    /// Merge `patch` into the namespace state and return the new state
    pub async fn set_state(
        &self,
        namespace: Namespace,
        scope: &StateScope,
        patch: JsonObject,
        strategy: MergeStrategy,
    ) -> Result<JsonObject, StateError> {
        let mut memory = self.memory.lock().await;
        let previous = self.read_locked(&memory, namespace, scope).await?;
        let next = merge_state(&previous, &patch, strategy);

        match namespace {
            Namespace::Public => {
                memory.public = next.clone();
                self.notify_if_changed(namespace, scope, &previous, &next);
            }
            Namespace::Private => {
                let component_id = require_component(scope)?.to_string();
                memory.private.insert(component_id, next.clone());
                self.notify_if_changed(namespace, scope, &previous, &next);
            }
            Namespace::Mod => {
                let mod_id = require_mod(scope)?.to_string();
                let policy = self.policy(&mod_id).await;
                let parts = policy.partition(&next);

                if self.tab_id.is_none() {
                    if let Some(name) = parts.tab.keys().next() {
                        return Err(BusinessError::MissingTabId(name.clone()).into());
                    }
                }

                if policy.has_synced() {
                    let mut entries = JsonObject::new();
                    entries.insert(self.storage_key(&mod_id, None), JsonValue::Object(parts.session));
                    if let Some(tab) = self.tab_id {
                        entries.insert(self.storage_key(&mod_id, Some(tab)), JsonValue::Object(parts.tab));
                    }
                    self.storage.set(entries).await?;
                }
                memory.mods.insert(mod_id, parts.local);

                // Synced changes are announced by the storage listener once
                // storage has actually updated
                if policy.restrict_to_synced(&previous) != policy.restrict_to_synced(&next) {
                    debug!(namespace = ?namespace, "synced variables changed; deferring to storage event");
                } else {
                    self.notify_if_changed(namespace, scope, &previous, &next);
                }
            }
        }

        Ok(next)
    }

    /// Clear all three namespaces and durable storage
    pub async fn reset(&self) -> Result<(), StateError> {
        let mut memory = self.memory.lock().await;
        *memory = MemoryState::default();
        self.storage.clear().await?;
        Ok(())
    }

    /* ===================== Events ===================== */

    fn notify_if_changed(
        &self,
        namespace: Namespace,
        scope: &StateScope,
        previous: &JsonObject,
        next: &JsonObject,
    ) {
        if previous == next {
            return;
        }
        self.emit(StateChangeEvent {
            namespace,
            mod_id: scope.mod_id.clone(),
            component_id: match namespace {
                Namespace::Private => scope.component_id.clone(),
                _ => None,
            },
        });
    }

    fn emit(&self, event: StateChangeEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Forward durable storage changes for this frame's keys as `mod`
    /// namespace change events. The task ends when the store is dropped.
    pub fn spawn_storage_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let mut changes = self.storage.subscribe();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let Some(store) = store.upgrade() else { break };
                        if let Some(mod_id) = store.mod_for_storage_key(&change.key) {
                            store.emit(StateChangeEvent {
                                namespace: Namespace::Mod,
                                mod_id: Some(mod_id),
                                component_id: None,
                            });
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "storage listener lagged; some change events were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn mod_for_storage_key(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(&self.key_prefix)?.strip_prefix("::")?;
        match rest.split_once("::") {
            None => Some(rest.to_string()),
            Some((mod_id, tab)) => {
                let tab: u64 = tab.parse().ok()?;
                (Some(tab) == self.tab_id).then(|| mod_id.to_string())
            }
        }
    }

    async fn policy(&self, mod_id: &str) -> VariablePolicy {
        self.policies.read().await.get(mod_id).cloned().unwrap_or_default()
    }
}

fn require_mod(scope: &StateScope) -> Result<&str, BusinessError> {
    scope.mod_id.as_deref().ok_or(BusinessError::MissingModScope)
}

fn require_component(scope: &StateScope) -> Result<&str, BusinessError> {
    scope
        .component_id
        .as_deref()
        .ok_or(BusinessError::MissingComponentScope)
}

fn stored_object<'a>(key: &str, value: &'a JsonValue) -> Result<&'a JsonObject, StorageError> {
    value
        .as_object()
        .ok_or_else(|| StorageError::Corrupt { key: key.to_string() })
}

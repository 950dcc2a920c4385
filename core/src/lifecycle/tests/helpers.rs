//! Test doubles for the page host and the reporting collaborators

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::bricks::{BrickKind, FnBrick, MemoryBrickRegistry};
use crate::errors::{BrickError, ComponentError, HeadlessInterrupt, LifecycleError};
use crate::lifecycle::{
    ListenerHandle, ListenerTarget, ModComponent, PageHost, PanelController, RunNotifier,
};
use crate::pipeline::PipelineExecutor;
use crate::state::ModVariableStore;
use crate::types::JsonValue;

/// Page host that records every attach and detach
#[derive(Default)]
pub struct RecordingHost {
    pub url: String,
    next_id: AtomicU64,
    pub attached: Mutex<Vec<ListenerHandle>>,
    pub detached: Mutex<Vec<ListenerHandle>>,
    /// Detaching listeners of this component fails
    pub fail_detach_for: Mutex<Option<String>>,
    /// Attaching listeners of this component fails
    pub fail_attach_for: Mutex<Option<String>>,
}

impl RecordingHost {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            ..Self::default()
        })
    }

    /// Listeners attached and not yet detached
    pub fn live(&self) -> Vec<ListenerHandle> {
        let detached = self.detached.lock().unwrap();
        self.attached
            .lock()
            .unwrap()
            .iter()
            .filter(|h| !detached.contains(h))
            .cloned()
            .collect()
    }

    pub fn live_for(&self, component_id: &str) -> Vec<ListenerHandle> {
        self.live()
            .into_iter()
            .filter(|h| h.target.component_id() == Some(component_id))
            .collect()
    }

    pub fn live_for_page(&self) -> Vec<ListenerHandle> {
        self.live()
            .into_iter()
            .filter(|h| h.target.component_id().is_none())
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.attached.lock().unwrap().len()
    }
}

#[async_trait]
impl PageHost for RecordingHost {
    fn url(&self) -> String {
        self.url.clone()
    }

    async fn attach(&self, target: ListenerTarget) -> Result<ListenerHandle, LifecycleError> {
        let failing = self.fail_attach_for.lock().unwrap().clone();
        if failing.is_some() && target.component_id() == failing.as_deref() {
            return Err(LifecycleError::Listener("container not found".to_string()));
        }
        let handle = ListenerHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            target,
        };
        self.attached.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn detach(&self, handle: &ListenerHandle) -> Result<(), LifecycleError> {
        let failing = self.fail_detach_for.lock().unwrap().clone();
        if failing.is_some() && handle.target.component_id() == failing.as_deref() {
            return Err(LifecycleError::Listener("observer already gone".to_string()));
        }
        self.detached.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPanel {
    pub shown: Mutex<Vec<(String, HeadlessInterrupt)>>,
}

#[async_trait]
impl PanelController for RecordingPanel {
    async fn show(&self, component_id: &str, interrupt: &HeadlessInterrupt) -> Result<(), LifecycleError> {
        self.shown
            .lock()
            .unwrap()
            .push((component_id.to_string(), interrupt.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub failures: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl RunNotifier for RecordingNotifier {
    async fn failure(&self, component: &ModComponent, error: &ComponentError) {
        self.failures
            .lock()
            .unwrap()
            .push((component.id.clone(), error.to_string()));
    }
}

/// Bricks for lifecycle scenarios:
/// - `page/title` (reader): a fixed page record
/// - `text/upper` (transformer): upper-cases its `text` argument
/// - `test/fail` (transformer): always fails
/// - `test/render` (renderer): returns its arguments
pub fn registry() -> MemoryBrickRegistry {
    MemoryBrickRegistry::new()
        .with(FnBrick::new("page/title", BrickKind::Reader, |_, _| async move {
            Ok(json!({"title": "Release notes", "lang": "en"}))
        }))
        .with(FnBrick::new("text/upper", BrickKind::Transformer, |args, _| async move {
            let text = args.get("text").and_then(JsonValue::as_str).unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }))
        .with(FnBrick::new("test/fail", BrickKind::Transformer, |_, _| async move {
            Err(BrickError::message("boom"))
        }))
        .with(FnBrick::new("test/render", BrickKind::Renderer, |args, _| async move {
            Ok(JsonValue::Object(args))
        }))
}

pub fn executor(registry: MemoryBrickRegistry) -> Arc<PipelineExecutor> {
    Arc::new(PipelineExecutor::new(
        Arc::new(registry),
        Arc::new(ModVariableStore::in_memory()),
    ))
}

pub fn var(path: &str) -> JsonValue {
    json!({"__type__": "var", "__value__": path})
}

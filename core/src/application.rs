//! The assembled runtime: configuration plus the shared services every
//! starter brick on a page runs against.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bricks::BrickRegistry;
use crate::config::RuntimeConfig;
use crate::lifecycle::behaviors::StarterBrickBehavior;
use crate::lifecycle::host::PageHost;
use crate::lifecycle::{LifecycleManager, StarterBrickDefinition};
use crate::pipeline::{PipelineExecutor, RunOptions, TraceSink};
use crate::state::{DurableStorage, ModVariableStore};

pub struct Application {
    pub config: RuntimeConfig,
    pub registry: Arc<dyn BrickRegistry>,
    pub storage: Arc<dyn DurableStorage>,
    pub state: Arc<ModVariableStore>,
    pub trace: Arc<dyn TraceSink>,
    pub executor: Arc<PipelineExecutor>,
    storage_listener: JoinHandle<()>,
}

impl Application {
    /// Wire the services together. Spawns the durable storage listener, so
    /// this must be called inside a tokio runtime.
    pub fn new(
        config: RuntimeConfig,
        registry: Arc<dyn BrickRegistry>,
        storage: Arc<dyn DurableStorage>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        let mut state = ModVariableStore::new(storage.clone()).with_key_prefix(config.storage_key_prefix.clone());
        if let Some(tab_id) = config.tab_id {
            state = state.with_tab_id(tab_id);
        }
        let state = Arc::new(state);
        let storage_listener = state.spawn_storage_listener();

        let executor = Arc::new(
            PipelineExecutor::new(registry.clone(), state.clone())
                .with_trace_sink(trace.clone())
                .with_tracing(config.trace_enabled),
        );

        Self {
            config,
            registry,
            storage,
            state,
            trace,
            executor,
            storage_listener,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run options carrying the configured defaults
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new().with_headless(self.config.headless)
    }

    /// A lifecycle manager for one starter brick, sharing this runtime's executor
    pub fn lifecycle_manager(
        &self,
        definition: StarterBrickDefinition,
        behavior: Arc<dyn StarterBrickBehavior>,
        host: Arc<dyn PageHost>,
    ) -> LifecycleManager {
        LifecycleManager::new(definition, behavior, host, self.executor.clone()).with_headless(self.config.headless)
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.storage_listener.abort();
    }
}

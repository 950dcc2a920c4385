//! Initialization for the mod runtime
//!
//! Builds an [`Application`] from configuration and whichever collaborators
//! the embedder supplies; anything left unset falls back to the in-process
//! defaults (built-in bricks, memory storage, no-op tracing).
//!
//! # Example
//!
//! ```rust,ignore
//! use mod_runtime::init::InitBuilder;
//!
//! let app = InitBuilder::new()
//!     .config_path("modrt.toml")
//!     .tab_id(7)
//!     .init()
//!     .await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::application::Application;
use crate::bricks::builtin::builtin_registry;
use crate::bricks::BrickRegistry;
use crate::config::RuntimeConfig;
use crate::pipeline::{NoopTraceSink, TraceSink};
use crate::state::{DurableStorage, MemoryStorage};

/// Options for initializing the runtime
#[derive(Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides `MODRT_CONFIG_PATH`)
    pub config_path: Option<String>,

    /// Log filter (overrides config file and env vars)
    pub log_filter: Option<String>,

    pub tab_id: Option<u64>,

    pub headless: Option<bool>,

    /// Defaults to the built-in bricks
    pub registry: Option<Arc<dyn BrickRegistry>>,

    /// Defaults to process-local memory storage
    pub storage: Option<Arc<dyn DurableStorage>>,

    /// Defaults to discarding trace records
    pub trace_sink: Option<Arc<dyn TraceSink>>,
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.options.log_filter = Some(filter.into());
        self
    }

    pub fn tab_id(mut self, tab_id: u64) -> Self {
        self.options.tab_id = Some(tab_id);
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.options.headless = Some(headless);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn BrickRegistry>) -> Self {
        self.options.registry = Some(registry);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn DurableStorage>) -> Self {
        self.options.storage = Some(storage);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.options.trace_sink = Some(sink);
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration and assemble an [`Application`]
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = RuntimeConfig::builder()
        .config_path(options.config_path.map(PathBuf::from))
        .log_filter(options.log_filter)
        .tab_id(options.tab_id)
        .headless(options.headless)
        .build()
        .context("Failed to load configuration")?;

    let registry = options
        .registry
        .unwrap_or_else(|| Arc::new(builtin_registry()) as Arc<dyn BrickRegistry>);
    let storage = options
        .storage
        .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn DurableStorage>);
    let trace = options
        .trace_sink
        .unwrap_or_else(|| Arc::new(NoopTraceSink) as Arc<dyn TraceSink>);

    Ok(Application::new(config, registry, storage, trace))
}

/// Install the global `tracing` subscriber, writing to stderr.
/// `RUST_LOG` wins over the configured filter.
pub fn init_logging(config: &RuntimeConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("Invalid log filter `{}`", config.log_filter))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bricks::builtin::SET_STATE_ID;
    use crate::pipeline::{BrickInvocation, MemoryTraceSink, RenderContext};
    use crate::state::{Namespace, StateScope};

    #[tokio::test]
    async fn test_init_with_defaults() {
        let app = InitBuilder::new().tab_id(4).headless(false).init().await.unwrap();

        assert_eq!(app.config.tab_id, Some(4));
        assert!(!app.run_options().headless);
        assert!(app.registry.lookup(SET_STATE_ID).is_some());
    }

    #[tokio::test]
    async fn test_init_wires_trace_sink_and_state() {
        let trace = Arc::new(MemoryTraceSink::new());
        let app = InitBuilder::new().trace_sink(trace.clone()).init().await.unwrap();

        let pipeline = vec![BrickInvocation::new(SET_STATE_ID).with_config(json!({"data": {"seen": true}}))];
        let options = app.run_options().with_mod("mod-a");
        app.executor.run(&pipeline, RenderContext::new(), &options).await.unwrap();

        assert_eq!(trace.exits().await.len(), 1);
        let state = app.state.get_state(Namespace::Mod, &StateScope::for_mod("mod-a")).await.unwrap();
        assert_eq!(state.get("seen"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_init_missing_config_file() {
        let result = InitBuilder::new().config_path("/nonexistent/modrt.toml").init().await;
        assert!(result.is_err());
    }
}

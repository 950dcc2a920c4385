//! # Mod Runtime
//!
//! Executes mod components once they are attached to a page: template and
//! variable resolution, brick pipelines with control flow, the shared mod
//! variable store, and the lifecycle of starter bricks.
//!
//! ```text
//! LifecycleManager ──run(trigger)──▶ PipelineExecutor ──▶ Brick::run
//!        │                               │   ▲
//!        │                               ▼   │
//!        │                         expressions::resolver
//!        └──────────────▶ ModVariableStore ◀─┘ (bricks read/write state)
//! ```

pub mod application;
pub mod bricks;
pub mod cli;
pub mod config;
pub mod errors;
pub mod expressions;
pub mod init;
pub mod lifecycle;
pub mod pipeline;
pub mod state;
pub mod types;

pub use application::Application;
pub use errors::{
    BrickError, BrickExecutionError, BusinessError, ComponentError, ConfigurationError, ExecutionError,
    HeadlessInterrupt, LifecycleError, StateError, StorageError, TraceError,
};
pub use init::{initialize, InitBuilder, InitOptions};
pub use pipeline::{BrickInvocation, Pipeline, PipelineExecutor, PipelineOutput, RenderContext, RunOptions};
pub use types::{JsonObject, JsonValue};

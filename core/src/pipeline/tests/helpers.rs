//! Test helpers for pipeline tests
//!
//! A registry of small closure bricks, and shorthands for writing pipelines
//! the way they appear on the wire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::bricks::{BrickKind, FnBrick, MemoryBrickRegistry};
use crate::errors::{BrickError, ExecutionError};
use crate::pipeline::{
    pipeline_expression, BrickInvocation, MemoryTraceSink, Pipeline, PipelineExecutor,
    PipelineOutput, RenderContext, RunOptions,
};
use crate::state::ModVariableStore;
use crate::types::JsonValue;

/// Registry with the bricks most tests need:
/// - `test/echo` (transformer): returns its `value` argument
/// - `test/reader` (reader): returns a fixed record
/// - `test/fail` (transformer): always fails with "boom"
/// - `test/render` (renderer): returns its arguments
/// - `test/effect` (effect): returns a value that must be discarded
pub fn registry() -> MemoryBrickRegistry {
    MemoryBrickRegistry::new()
        .with(FnBrick::new("test/echo", BrickKind::Transformer, |args, _| async move {
            Ok(args.get("value").cloned().unwrap_or(JsonValue::Null))
        }))
        .with(FnBrick::new("test/reader", BrickKind::Reader, |_, _| async move {
            Ok(json!({"name": "Ada", "items": [1, 2, 3]}))
        }))
        .with(FnBrick::new("test/fail", BrickKind::Transformer, |_, _| async move {
            Err(BrickError::message("boom"))
        }))
        .with(FnBrick::new("test/render", BrickKind::Renderer, |args, _| async move {
            Ok(JsonValue::Object(args))
        }))
        .with(FnBrick::new("test/effect", BrickKind::Effect, |_, _| async move {
            Ok(json!("discarded"))
        }))
}

/// Transformer that counts its invocations and echoes `value`
pub fn counting_brick(id: &str, calls: Arc<AtomicUsize>) -> FnBrick {
    FnBrick::new(id, BrickKind::Transformer, move |args, _| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(args.get("value").cloned().unwrap_or(JsonValue::Null))
        }
    })
}

pub fn executor(registry: MemoryBrickRegistry) -> PipelineExecutor {
    PipelineExecutor::new(Arc::new(registry), Arc::new(ModVariableStore::in_memory()))
}

pub fn traced_executor(registry: MemoryBrickRegistry) -> (PipelineExecutor, Arc<MemoryTraceSink>) {
    let sink = Arc::new(MemoryTraceSink::new());
    (executor(registry).with_trace_sink(sink.clone()), sink)
}

pub fn var(path: &str) -> JsonValue {
    json!({"__type__": "var", "__value__": path})
}

pub fn mustache(source: &str) -> JsonValue {
    json!({"__type__": "mustache", "__value__": source})
}

pub fn echo(value: JsonValue) -> BrickInvocation {
    BrickInvocation::new("test/echo").with_config(json!({ "value": value }))
}

pub fn sub(steps: Pipeline) -> JsonValue {
    pipeline_expression(steps)
}

pub async fn run(executor: &PipelineExecutor, pipeline: Pipeline) -> Result<PipelineOutput, ExecutionError> {
    executor
        .run(&pipeline, RenderContext::new(), &RunOptions::default())
        .await
}

pub async fn output(executor: &PipelineExecutor, pipeline: Pipeline) -> Option<JsonValue> {
    run(executor, pipeline).await.unwrap().output
}

//! Tests for step sequencing, dispatch by brick kind, and tracing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use maplit::hashmap;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use super::helpers::*;
use crate::bricks::{BrickKind, FnBrick};
use crate::errors::{BrickError, BusinessError, ConfigurationError, ExecutionError, TraceError};
use crate::pipeline::{BrickInvocation, RenderContext, RunOptions, TraceRecord, TraceSink};
use crate::state::{MergeStrategy, Namespace, StateScope};
use crate::types::JsonValue;

#[tokio::test]
async fn test_output_key_feeds_later_steps() {
    let executor = executor(registry());
    let pipeline = vec![
        BrickInvocation::new("test/reader").with_output_key("data"),
        echo(var("@data.name")),
    ];

    assert_eq!(output(&executor, pipeline).await, Some(json!("Ada")));
}

#[tokio::test]
async fn test_reordered_reference_resolves_to_null() {
    let executor = executor(registry());
    let pipeline = vec![
        echo(var("@data.name")).with_output_key("seen"),
        BrickInvocation::new("test/reader").with_output_key("data"),
    ];

    let result = assert_ok!(run(&executor, pipeline).await);
    assert_eq!(result.context.get("@seen"), Some(&JsonValue::Null));
    assert_eq!(result.context.get("@data").map(|d| d["name"].clone()), Some(json!("Ada")));
}

#[tokio::test]
async fn test_outputs_do_not_leak_between_runs() {
    let executor = executor(registry());
    let produce = vec![echo(json!(1)).with_output_key("x")];
    assert_ok!(run(&executor, produce).await);

    let consume = vec![echo(var("@x"))];
    assert_eq!(output(&executor, consume).await, Some(JsonValue::Null));
}

#[tokio::test]
async fn test_templates_render_against_context() {
    let executor = executor(registry());
    let pipeline = vec![
        BrickInvocation::new("test/reader").with_output_key("person"),
        echo(mustache("Hello {{ @person.name }} ({{ @input.source }})")),
    ];
    let context = RenderContext::new().with_input(json!(hashmap! {"source" => "click"}));

    let result = assert_ok!(executor.run(&pipeline, context, &RunOptions::default()).await);
    assert_eq!(result.output, Some(json!("Hello Ada (click)")));
}

#[tokio::test]
async fn test_template_failure_is_business_error() {
    let executor = executor(registry());
    let pipeline = vec![echo(mustache("{{#items}}x"))];

    let err = assert_err!(run(&executor, pipeline).await);
    assert!(matches!(
        err,
        ExecutionError::Business(BusinessError::Template { ref field, .. }) if field == "value"
    ));
}

#[tokio::test]
async fn test_falsy_condition_skips_step() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor(registry().with(counting_brick("test/count", calls.clone())));
    let pipeline = vec![
        echo(json!(1)).with_output_key("x"),
        BrickInvocation::new("test/count")
            .with_config(json!({"value": 2}))
            .with_output_key("x")
            .with_condition(json!("no")),
        echo(var("@x")),
    ];

    assert_eq!(output(&executor, pipeline).await, Some(json!(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_truthy_condition_runs_step() {
    let executor = executor(registry());
    let pipeline = vec![echo(json!("ran")).with_condition(json!("yes"))];

    assert_eq!(output(&executor, pipeline).await, Some(json!("ran")));
}

#[tokio::test]
async fn test_effect_output_is_discarded() {
    let executor = executor(registry());
    let pipeline = vec![
        BrickInvocation::new("test/effect").with_output_key("ignored"),
    ];

    let result = assert_ok!(run(&executor, pipeline).await);
    assert_eq!(result.output, None);
    assert_eq!(result.context.get("@ignored"), None);
}

#[tokio::test]
async fn test_renderer_interrupts_headless_run() {
    let executor = executor(registry());
    let pipeline = vec![
        echo(json!("before")).with_output_key("x"),
        BrickInvocation::new("test/render")
            .with_instance_id("render-1")
            .with_config(json!({"body": var("@x")})),
        echo(json!("never")),
    ];

    let err = assert_err!(run(&executor, pipeline).await);
    assert!(!err.is_failure());
    match err {
        ExecutionError::Headless(interrupt) => {
            assert_eq!(interrupt.brick_id, "test/render");
            assert_eq!(interrupt.instance_id, "render-1");
            assert_eq!(interrupt.args["body"], json!("before"));
            assert_eq!(interrupt.context["@x"], json!("before"));
        }
        other => panic!("expected headless interrupt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_renderer_runs_when_not_headless() {
    let executor = executor(registry());
    let pipeline = vec![BrickInvocation::new("test/render").with_config(json!({"body": 1}))];
    let options = RunOptions::default().with_headless(false);

    let result = assert_ok!(executor.run(&pipeline, RenderContext::new(), &options).await);
    assert_eq!(result.output, Some(json!({"body": 1})));
}

#[tokio::test]
async fn test_failure_aborts_remaining_steps() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor(registry().with(counting_brick("test/count", calls.clone())));
    let pipeline = vec![
        BrickInvocation::new("test/fail").with_instance_id("failing-step"),
        BrickInvocation::new("test/count"),
    ];

    let err = assert_err!(run(&executor, pipeline).await);
    assert_eq!(err.instance_id(), Some("failing-step"));
    assert!(matches!(err, ExecutionError::Brick(ref e) if e.brick_id == "test/fail"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ignored_failure_continues() {
    let executor = executor(registry());
    let pipeline = vec![
        BrickInvocation::new("test/fail").with_output_key("x").ignoring_errors(),
        echo(var("@x")),
    ];

    assert_eq!(output(&executor, pipeline).await, Some(JsonValue::Null));
}

#[tokio::test]
async fn test_scope_errors_are_never_ignored() {
    let registry = registry().with(FnBrick::new(
        "test/private-write",
        BrickKind::Effect,
        |_, options| async move {
            options
                .state
                .set_state(
                    Namespace::Private,
                    &options.scope,
                    Default::default(),
                    MergeStrategy::Shallow,
                )
                .await?;
            Ok(JsonValue::Null)
        },
    ));
    let executor = executor(registry);
    let pipeline = vec![BrickInvocation::new("test/private-write").ignoring_errors()];

    // No component id in the run options
    let err = assert_err!(run(&executor, pipeline).await);
    assert!(err.is_failure());
}

#[tokio::test]
async fn test_configuration_error_before_side_effects() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor(registry().with(counting_brick("test/count", calls.clone())));
    let pipeline = vec![
        BrickInvocation::new("test/count"),
        echo(json!({"__type__": "handlebars", "__value__": "{{x}}"})),
    ];

    let err = assert_err!(run(&executor, pipeline).await);
    assert!(matches!(
        err,
        ExecutionError::Configuration(ConfigurationError::UnknownExpressionType(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_brick_fails_before_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = executor(registry().with(counting_brick("test/count", calls.clone())));
    let pipeline = vec![BrickInvocation::new("test/count"), BrickInvocation::new("acme/missing")];

    let err = assert_err!(run(&executor, pipeline).await);
    assert!(matches!(
        err,
        ExecutionError::Configuration(ConfigurationError::UnknownBrick(ref id)) if id == "acme/missing"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_run_stops_advancing() {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry()
        .with(FnBrick::new("test/cancel", BrickKind::Effect, move |_, _| {
            let token = token.clone();
            async move {
                token.cancel();
                Ok(JsonValue::Null)
            }
        }))
        .with(counting_brick("test/count", calls.clone()));
    let executor = executor(registry);
    let pipeline = vec![BrickInvocation::new("test/cancel"), BrickInvocation::new("test/count")];
    let options = RunOptions::default().with_cancel(cancel);

    let err = assert_err!(executor.run(&pipeline, RenderContext::new(), &options).await);
    assert!(matches!(err, ExecutionError::Aborted));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_brick_observing_cancellation_aborts() {
    let registry = registry().with(FnBrick::new(
        "test/wait",
        BrickKind::Effect,
        |_, options| async move {
            options.cancel.cancelled().await;
            Err(BrickError::Aborted)
        },
    ));
    let executor = executor(registry);
    let cancel = CancellationToken::new();
    let options = RunOptions::default().with_cancel(cancel.clone());
    let pipeline = vec![BrickInvocation::new("test/wait")];

    let (result, _) = tokio::join!(
        executor.run(&pipeline, RenderContext::new(), &options),
        async { cancel.cancel() }
    );
    assert!(matches!(result, Err(ExecutionError::Aborted)));
}

#[tokio::test]
async fn test_mod_state_is_visible_to_each_step() {
    let registry = registry().with(FnBrick::new(
        "test/bump",
        BrickKind::Effect,
        |_, options| async move {
            let patch = json!({"count": 1}).as_object().cloned().unwrap_or_default();
            options
                .state
                .set_state(Namespace::Mod, &options.scope, patch, MergeStrategy::Shallow)
                .await?;
            Ok(JsonValue::Null)
        },
    ));
    let executor = executor(registry);
    let pipeline = vec![BrickInvocation::new("test/bump"), echo(var("@mod.count"))];
    let options = RunOptions::default().with_mod("mod-a");

    let result = assert_ok!(executor.run(&pipeline, RenderContext::new(), &options).await);
    assert_eq!(result.output, Some(json!(1)));

    let state = assert_ok!(
        executor
            .state()
            .get_state(Namespace::Mod, &StateScope::for_mod("mod-a"))
            .await
    );
    assert_eq!(state["count"], json!(1));
}

#[tokio::test]
async fn test_root_passed_only_to_root_aware_steps() {
    let registry = registry().with(
        FnBrick::new("test/root", BrickKind::Reader, |_, options| async move {
            Ok(options.root.unwrap_or(JsonValue::Null))
        })
        .root_aware(),
    );
    let executor = executor(registry);
    let options = RunOptions::default().with_root(json!({"selector": "#main"}));

    let mut aware = BrickInvocation::new("test/root");
    aware.root_aware = true;
    let result = assert_ok!(executor.run(&vec![aware], RenderContext::new(), &options).await);
    assert_eq!(result.output, Some(json!({"selector": "#main"})));

    let unaware = BrickInvocation::new("test/root");
    let result = assert_ok!(executor.run(&vec![unaware], RenderContext::new(), &options).await);
    assert_eq!(result.output, Some(JsonValue::Null));
}

#[tokio::test]
async fn test_trace_records_enter_and_exit() {
    let (executor, sink) = traced_executor(registry());
    let pipeline = vec![
        echo(json!(1)).with_instance_id("a"),
        echo(json!(2)).with_instance_id("b").with_condition(json!(false)),
    ];

    assert_ok!(run(&executor, pipeline).await);

    let records = sink.records().await;
    let summary: Vec<(&str, bool, bool)> = records
        .iter()
        .map(|r| (r.instance_id.as_str(), r.is_exit(), r.skipped))
        .collect();
    assert_eq!(summary, vec![("a", false, false), ("a", true, false), ("b", true, true)]);
    assert_eq!(records[1].result, Some(json!(1)));
    assert_eq!(records[1].rendered_args.as_ref().map(|a| a["value"].clone()), Some(json!(1)));
}

#[tokio::test]
async fn test_failed_step_is_traced_with_error() {
    let (executor, sink) = traced_executor(registry());
    let pipeline = vec![BrickInvocation::new("test/fail").with_instance_id("f")];

    assert_err!(run(&executor, pipeline).await);

    let exits = sink.exits().await;
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].error.as_ref().map(|e| e["cause"].clone()), Some(json!("boom")));
}

struct FailingSink;

#[async_trait]
impl TraceSink for FailingSink {
    async fn record(&self, _record: TraceRecord) -> Result<(), TraceError> {
        Err(TraceError("disk full".to_string()))
    }
}

#[tokio::test]
async fn test_trace_sink_failure_does_not_fail_run() {
    let executor = executor(registry()).with_trace_sink(Arc::new(FailingSink));
    let pipeline = vec![echo(json!("ok"))];

    assert_eq!(output(&executor, pipeline).await, Some(json!("ok")));
}

#[tokio::test]
async fn test_disabled_tracing_records_nothing() {
    let (executor, sink) = traced_executor(registry());
    let executor = executor.with_tracing(false);

    assert_ok!(run(&executor, vec![echo(json!(1))]).await);
    assert!(sink.records().await.is_empty());
}

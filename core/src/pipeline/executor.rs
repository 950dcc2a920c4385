//! Pipeline executor
//!
//! Runs steps strictly in authored order. Each step sees a snapshot of the
//! render context built from the steps before it; outputs bound with
//! `outputKey` only become visible to later steps.
//!
//! Control-flow bricks recurse into [`PipelineExecutor::run_steps`], which is
//! boxed so nested sub-pipelines can await it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::control_flow::ControlFlowBrick;
use super::trace::{NoopTraceSink, TraceRecord, TraceSink};
use super::{compile_pipeline, BrickInvocation, Pipeline, RenderContext};
use crate::bricks::{BrickKind, BrickOptions, BrickRegistry};
use crate::errors::{
    BrickError, BrickExecutionError, BusinessError, ConfigurationError, ExecutionError,
    HeadlessInterrupt, StateError,
};
use crate::expressions::{resolve_condition, resolve_config};
use crate::state::{ModVariableStore, Namespace, StateScope};
use crate::types::{JsonObject, JsonValue};

/// Per-run settings shared by every step, nested ones included
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: Uuid,
    pub mod_id: Option<String>,
    pub component_id: Option<String>,
    /// Root element reference handed to root-aware bricks
    pub root: Option<JsonValue>,
    /// Renderers interrupt the run instead of executing
    pub headless: bool,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mod_id: None,
            component_id: None,
            root: None,
            headless: true,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mod(mut self, mod_id: impl Into<String>) -> Self {
        self.mod_id = Some(mod_id.into());
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    pub fn with_root(mut self, root: JsonValue) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn scope(&self) -> StateScope {
        StateScope::new(self.mod_id.clone(), self.component_id.clone())
    }
}

/// Terminal output of a pipeline and the context after its last step
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// `None` when the last step was an effect, was skipped, or the pipeline
    /// was empty
    pub output: Option<JsonValue>,
    pub context: RenderContext,
}

enum StepOutcome {
    Skipped,
    Completed(Option<JsonValue>),
}

type StepsFuture<'a> = Pin<Box<dyn Future<Output = Result<PipelineOutput, ExecutionError>> + Send + 'a>>;

pub struct PipelineExecutor {
    registry: Arc<dyn BrickRegistry>,
    state: Arc<ModVariableStore>,
    trace: Arc<dyn TraceSink>,
    trace_enabled: bool,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<dyn BrickRegistry>, state: Arc<ModVariableStore>) -> Self {
        Self {
            registry,
            state,
            trace: Arc::new(NoopTraceSink),
            trace_enabled: true,
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = sink;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<dyn BrickRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<ModVariableStore> {
        &self.state
    }

    /* ===================== Entry points ===================== */

    /// Compile and run a pipeline.
    ///
    /// Shape errors and unknown bricks are reported before any step runs.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        context: RenderContext,
        options: &RunOptions,
    ) -> Result<PipelineOutput, ExecutionError> {
        let mut compiled = pipeline.clone();
        compile_pipeline(&mut compiled)?;
        self.check_registered(&compiled)?;

        debug!(
            run_id = %options.run_id,
            mod_id = ?options.mod_id,
            component_id = ?options.component_id,
            steps = compiled.len(),
            "running pipeline"
        );
        self.run_steps(&compiled, context, options).await
    }

    /// Run a single reader outside of a pipeline, e.g. to build `@input`
    pub async fn run_reader(
        &self,
        brick_id: &str,
        context: &JsonValue,
        options: &RunOptions,
    ) -> Result<JsonValue, ExecutionError> {
        let brick = self
            .registry
            .lookup(brick_id)
            .ok_or_else(|| ConfigurationError::UnknownBrick(brick_id.to_string()))?;

        let brick_options = self.brick_options(context, brick_id, None, options);
        brick
            .run(JsonObject::new(), brick_options)
            .await
            .map_err(|cause| brick_failure(brick_id, brick_id, cause))
    }

    fn check_registered(&self, pipeline: &[BrickInvocation]) -> Result<(), ConfigurationError> {
        for step in pipeline {
            match ControlFlowBrick::from_brick_id(&step.brick_id) {
                Some(flow) => {
                    for field in flow.pipeline_fields() {
                        if let Some(body) = flow.sub_pipeline(step, field.name)? {
                            self.check_registered(&body)?;
                        }
                    }
                }
                None if self.registry.lookup(&step.brick_id).is_none() => {
                    return Err(ConfigurationError::UnknownBrick(step.brick_id.clone()));
                }
                None => {}
            }
        }
        Ok(())
    }

    /* ===================== Step loop ===================== */

    /// Run already-compiled steps against `context`
    pub(crate) fn run_steps<'a>(
        &'a self,
        steps: &'a [BrickInvocation],
        context: RenderContext,
        options: &'a RunOptions,
    ) -> StepsFuture<'a> {
        Box::pin(async move {
            let mut context = context;
            let mut output = None;

            for step in steps {
                if options.cancel.is_cancelled() {
                    debug!(instance_id = step.instance(), "run aborted before step");
                    return Err(ExecutionError::Aborted);
                }
                context = self.refresh_mod_state(context, options).await;

                match self.run_traced(step, &context, options).await? {
                    StepOutcome::Skipped => output = None,
                    StepOutcome::Completed(value) => {
                        if let (Some(key), Some(value)) = (&step.output_key, &value) {
                            context = context.bind(key, value.clone());
                        }
                        output = value;
                    }
                }
            }

            Ok(PipelineOutput { output, context })
        })
    }

    async fn refresh_mod_state(&self, context: RenderContext, options: &RunOptions) -> RenderContext {
        if options.mod_id.is_none() {
            return context;
        }
        match self.state.get_state(Namespace::Mod, &options.scope()).await {
            Ok(state) => context.with_mod_state(state),
            Err(err) => {
                warn!(mod_id = ?options.mod_id, error = %err, "could not refresh @mod state");
                context
            }
        }
    }

    async fn run_traced(
        &self,
        step: &BrickInvocation,
        context: &RenderContext,
        options: &RunOptions,
    ) -> Result<StepOutcome, ExecutionError> {
        let snapshot = context.snapshot();
        let started = Utc::now();
        let record = TraceRecord {
            run_id: options.run_id,
            instance_id: step.instance().to_string(),
            brick_id: step.brick_id.clone(),
            template_context: snapshot.clone(),
            rendered_args: None,
            result: None,
            error: None,
            skipped: false,
            timestamp_start: started,
            timestamp_end: None,
        };

        if let Some(condition) = &step.condition {
            let proceed = match resolve_condition(condition, &snapshot, &step.brick_id, "if") {
                Ok(proceed) => proceed,
                Err(err) => {
                    self.emit_trace(TraceRecord {
                        error: Some(err.to_error_info()),
                        timestamp_end: Some(Utc::now()),
                        ..record
                    })
                    .await;
                    return Err(err);
                }
            };
            if !proceed {
                debug!(brick_id = %step.brick_id, instance_id = step.instance(), "condition falsy, skipping step");
                self.emit_trace(TraceRecord {
                    skipped: true,
                    timestamp_end: Some(Utc::now()),
                    ..record
                })
                .await;
                return Ok(StepOutcome::Skipped);
            }
        }

        self.emit_trace(record.clone()).await;

        let (rendered_args, result) = match ControlFlowBrick::from_brick_id(&step.brick_id) {
            Some(flow) => (None, self.run_control_flow(flow, step, context, options).await),
            None => match resolve_config(&step.config, &snapshot, &step.brick_id) {
                Ok(args) => {
                    let result = self.run_brick(step, args.clone(), &snapshot, options).await;
                    (Some(args), result)
                }
                Err(err) => (None, Err(err)),
            },
        };

        let exit = TraceRecord {
            rendered_args,
            timestamp_end: Some(Utc::now()),
            ..record
        };
        match result {
            Ok(value) => {
                self.emit_trace(TraceRecord { result: value.clone(), ..exit }).await;
                Ok(StepOutcome::Completed(value))
            }
            Err(err) => {
                self.emit_trace(TraceRecord {
                    error: Some(err.to_error_info()),
                    ..exit
                })
                .await;

                if step.ignore_errors && is_ignorable(&err) {
                    warn!(
                        brick_id = %step.brick_id,
                        instance_id = step.instance(),
                        error = %err,
                        "ignoring step failure"
                    );
                    return Ok(StepOutcome::Completed(None));
                }
                Err(err)
            }
        }
    }

    /* ===================== Brick dispatch ===================== */

    async fn run_brick(
        &self,
        step: &BrickInvocation,
        args: JsonObject,
        snapshot: &JsonValue,
        options: &RunOptions,
    ) -> Result<Option<JsonValue>, ExecutionError> {
        let brick = self
            .registry
            .lookup(&step.brick_id)
            .ok_or_else(|| ConfigurationError::UnknownBrick(step.brick_id.clone()))?;
        let kind = brick.kind();

        if kind == BrickKind::Renderer && options.headless {
            debug!(brick_id = %step.brick_id, instance_id = step.instance(), "renderer in headless mode");
            return Err(ExecutionError::Headless(HeadlessInterrupt {
                brick_id: step.brick_id.clone(),
                instance_id: step.instance().to_string(),
                args,
                context: snapshot.clone(),
            }));
        }

        let root = if step.root_aware && brick.is_root_aware() {
            options.root.clone()
        } else {
            None
        };
        let brick_options = self.brick_options(snapshot, step.instance(), root, options);

        let value = brick
            .run(args, brick_options)
            .await
            .map_err(|cause| brick_failure(&step.brick_id, step.instance(), cause))?;

        match kind {
            BrickKind::Effect => {
                if let Some(key) = &step.output_key {
                    warn!(
                        brick_id = %step.brick_id,
                        instance_id = step.instance(),
                        output_key = %key,
                        "effect bricks produce no output; ignoring outputKey"
                    );
                }
                Ok(None)
            }
            BrickKind::Reader | BrickKind::Transformer | BrickKind::Renderer => Ok(Some(value)),
        }
    }

    fn brick_options(
        &self,
        context: &JsonValue,
        instance_id: &str,
        root: Option<JsonValue>,
        options: &RunOptions,
    ) -> BrickOptions {
        BrickOptions {
            context: context.clone(),
            root,
            state: Arc::clone(&self.state),
            scope: options.scope(),
            cancel: options.cancel.clone(),
            run_id: options.run_id,
            instance_id: instance_id.to_string(),
        }
    }

    async fn emit_trace(&self, record: TraceRecord) {
        if !self.trace_enabled {
            return;
        }
        if let Err(err) = self.trace.record(record).await {
            warn!(error = %err, "trace sink failed; continuing");
        }
    }
}

fn brick_failure(brick_id: &str, instance_id: &str, cause: BrickError) -> ExecutionError {
    match cause {
        BrickError::Aborted => ExecutionError::Aborted,
        cause => BrickExecutionError {
            brick_id: brick_id.to_string(),
            instance_id: instance_id.to_string(),
            cause,
        }
        .into(),
    }
}

/// Only brick failures may be ignored. Namespace misuse in the state store is
/// an authoring bug and always fails the step.
fn is_ignorable(err: &ExecutionError) -> bool {
    match err {
        ExecutionError::Brick(e) => !matches!(
            e.cause,
            BrickError::Business(BusinessError::InvalidNamespace(_))
                | BrickError::Business(BusinessError::MissingModScope)
                | BrickError::Business(BusinessError::MissingComponentScope)
                | BrickError::State(StateError::Business(_))
        ),
        _ => false,
    }
}

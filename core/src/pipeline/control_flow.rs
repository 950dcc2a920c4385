//! Control-flow bricks
//!
//! These are not looked up in the brick registry. The executor interprets
//! their pipeline fields directly and recurses into itself for each body.
//!
//! | brick                 | pipeline fields            | other fields                     |
//! |-----------------------|----------------------------|----------------------------------|
//! | `builtin/for-each`    | `body`                     | `elements`, `elementKey`         |
//! | `builtin/if-else`     | `if`, `else`               | `condition`                      |
//! | `builtin/try-except`  | `try`, `except`, `finally` | `errorKey`                       |
//! | `builtin/retry`       | `body`                     | `maxRetries`, `intervalMillis`   |

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::executor::{PipelineExecutor, RunOptions};
use super::{BrickInvocation, Pipeline, RenderContext};
use crate::errors::{BusinessError, ConfigurationError, ExecutionError};
use crate::expressions::{resolve_condition, resolve_field, Expression};
use crate::types::JsonValue;

pub const DEFAULT_ELEMENT_KEY: &str = "element";
pub const DEFAULT_ERROR_KEY: &str = "error";
pub const DEFAULT_MAX_RETRIES: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlFlowBrick {
    ForEach,
    IfElse,
    TryExcept,
    Retry,
}

/// A configuration field that holds a sub-pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineField {
    pub name: &'static str,
    pub required: bool,
}

const fn field(name: &'static str, required: bool) -> PipelineField {
    PipelineField { name, required }
}

const FOR_EACH_FIELDS: &[PipelineField] = &[field("body", true)];
const IF_ELSE_FIELDS: &[PipelineField] = &[field("if", true), field("else", false)];
const TRY_EXCEPT_FIELDS: &[PipelineField] = &[
    field("try", true),
    field("except", false),
    field("finally", false),
];
const RETRY_FIELDS: &[PipelineField] = &[field("body", true)];

impl ControlFlowBrick {
    pub fn from_brick_id(brick_id: &str) -> Option<Self> {
        match brick_id {
            "builtin/for-each" => Some(ControlFlowBrick::ForEach),
            "builtin/if-else" => Some(ControlFlowBrick::IfElse),
            "builtin/try-except" => Some(ControlFlowBrick::TryExcept),
            "builtin/retry" => Some(ControlFlowBrick::Retry),
            _ => None,
        }
    }

    pub fn brick_id(&self) -> &'static str {
        match self {
            ControlFlowBrick::ForEach => "builtin/for-each",
            ControlFlowBrick::IfElse => "builtin/if-else",
            ControlFlowBrick::TryExcept => "builtin/try-except",
            ControlFlowBrick::Retry => "builtin/retry",
        }
    }

    pub fn pipeline_fields(&self) -> &'static [PipelineField] {
        match self {
            ControlFlowBrick::ForEach => FOR_EACH_FIELDS,
            ControlFlowBrick::IfElse => IF_ELSE_FIELDS,
            ControlFlowBrick::TryExcept => TRY_EXCEPT_FIELDS,
            ControlFlowBrick::Retry => RETRY_FIELDS,
        }
    }

    pub fn pipeline_field(&self, name: &str) -> Option<&'static PipelineField> {
        self.pipeline_fields().iter().find(|f| f.name == name)
    }

    /// The sub-pipeline stored in `field`, or `None` when it is absent
    pub fn sub_pipeline(
        &self,
        step: &BrickInvocation,
        field: &str,
    ) -> Result<Option<Pipeline>, ConfigurationError> {
        match step.config.get(field) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => match Expression::parse(value)? {
                Expression::SubPipeline(body) => Ok(Some(body)),
                _ => Err(ConfigurationError::ExpectedPipeline {
                    brick_id: step.brick_id.clone(),
                    field: field.to_string(),
                }),
            },
        }
    }

    fn required_pipeline(
        &self,
        step: &BrickInvocation,
        field: &str,
    ) -> Result<Pipeline, ConfigurationError> {
        self.sub_pipeline(step, field)?
            .ok_or_else(|| ConfigurationError::ExpectedPipeline {
                brick_id: step.brick_id.clone(),
                field: field.to_string(),
            })
    }
}

impl PipelineExecutor {
    pub(crate) async fn run_control_flow(
        &self,
        flow: ControlFlowBrick,
        step: &BrickInvocation,
        context: &RenderContext,
        options: &RunOptions,
    ) -> Result<Option<JsonValue>, ExecutionError> {
        match flow {
            ControlFlowBrick::ForEach => self.run_for_each(flow, step, context, options).await,
            ControlFlowBrick::IfElse => self.run_if_else(flow, step, context, options).await,
            ControlFlowBrick::TryExcept => self.run_try_except(flow, step, context, options).await,
            ControlFlowBrick::Retry => self.run_retry(flow, step, context, options).await,
        }
    }

    /* ===================== ForEach ===================== */

    async fn run_for_each(
        &self,
        flow: ControlFlowBrick,
        step: &BrickInvocation,
        context: &RenderContext,
        options: &RunOptions,
    ) -> Result<Option<JsonValue>, ExecutionError> {
        let body = flow.required_pipeline(step, "body")?;
        let snapshot = context.snapshot();
        let element_key = binding_name(step, "elementKey", DEFAULT_ELEMENT_KEY, &snapshot)?;

        let elements = match resolve_field(&step.config, "elements", &snapshot, &step.brick_id)? {
            JsonValue::Array(items) => items,
            other => {
                return Err(BusinessError::Invalid(format!(
                    "`elements` of {} must be an array, got {}",
                    step.brick_id,
                    type_name(&other)
                ))
                .into())
            }
        };

        let index_key = format!("{element_key}Index");
        let mut outputs = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            // Every iteration starts from the pre-loop context
            let scoped = context
                .bind(&element_key, element)
                .bind(&index_key, json!(index));
            let result = self.run_steps(&body, scoped, options).await?;
            outputs.push(result.output.unwrap_or(JsonValue::Null));
        }

        Ok(Some(JsonValue::Array(outputs)))
    }

    /* ===================== IfElse ===================== */

    async fn run_if_else(
        &self,
        flow: ControlFlowBrick,
        step: &BrickInvocation,
        context: &RenderContext,
        options: &RunOptions,
    ) -> Result<Option<JsonValue>, ExecutionError> {
        let snapshot = context.snapshot();
        let condition = match step.config.get("condition") {
            Some(value) => resolve_condition(value, &snapshot, &step.brick_id, "condition")?,
            None => false,
        };

        let branch = if condition {
            Some(flow.required_pipeline(step, "if")?)
        } else {
            flow.sub_pipeline(step, "else")?
        };

        match branch {
            Some(branch) => Ok(self.run_steps(&branch, context.clone(), options).await?.output),
            None => Ok(None),
        }
    }

    /* ===================== TryExcept ===================== */

    /// Without an `except` branch a failure in `try` is swallowed and the step
    /// produces no output. Headless interrupts and aborts are never caught.
    async fn run_try_except(
        &self,
        flow: ControlFlowBrick,
        step: &BrickInvocation,
        context: &RenderContext,
        options: &RunOptions,
    ) -> Result<Option<JsonValue>, ExecutionError> {
        let try_body = flow.required_pipeline(step, "try")?;
        let except_body = flow.sub_pipeline(step, "except")?;
        let finally_body = flow.sub_pipeline(step, "finally")?;
        let error_key = binding_name(step, "errorKey", DEFAULT_ERROR_KEY, &context.snapshot())?;

        let outcome = match self.run_steps(&try_body, context.clone(), options).await {
            Ok(result) => Ok(result.output),
            Err(err) if err.is_failure() => match &except_body {
                Some(except) => {
                    debug!(instance_id = step.instance(), error = %err, "running except branch");
                    let scoped = context.bind(&error_key, err.to_error_info());
                    self.run_steps(except, scoped, options)
                        .await
                        .map(|result| result.output)
                }
                None => {
                    debug!(instance_id = step.instance(), error = %err, "no except branch; error swallowed");
                    Ok(None)
                }
            },
            Err(signal) => Err(signal),
        };

        if let Some(finally) = finally_body {
            // Cleanup still runs when the outer run was aborted
            let cleanup = RunOptions {
                cancel: CancellationToken::new(),
                ..options.clone()
            };
            if let Err(err) = self.run_steps(&finally, context.clone(), &cleanup).await {
                if outcome.is_ok() {
                    return Err(err);
                }
                warn!(instance_id = step.instance(), error = %err, "finally branch failed after an earlier error");
            }
        }

        outcome
    }

    /* ===================== Retry ===================== */

    async fn run_retry(
        &self,
        flow: ControlFlowBrick,
        step: &BrickInvocation,
        context: &RenderContext,
        options: &RunOptions,
    ) -> Result<Option<JsonValue>, ExecutionError> {
        let body = flow.required_pipeline(step, "body")?;
        let snapshot = context.snapshot();
        let max_retries = integer_field(step, "maxRetries", DEFAULT_MAX_RETRIES, &snapshot)?;
        let interval = Duration::from_millis(integer_field(step, "intervalMillis", 0, &snapshot)?);

        let mut retries = 0;
        loop {
            match self.run_steps(&body, context.clone(), options).await {
                Ok(result) => return Ok(result.output),
                Err(err) if err.is_failure() && retries < max_retries => {
                    retries += 1;
                    warn!(
                        instance_id = step.instance(),
                        retries,
                        max_retries,
                        error = %err,
                        "retrying failed body"
                    );
                    if !interval.is_zero() {
                        tokio::select! {
                            _ = options.cancel.cancelled() => return Err(ExecutionError::Aborted),
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A binding name such as `elementKey`; the `@` sigil is optional
fn binding_name(
    step: &BrickInvocation,
    field: &str,
    default: &str,
    snapshot: &JsonValue,
) -> Result<String, ExecutionError> {
    match resolve_field(&step.config, field, snapshot, &step.brick_id)? {
        JsonValue::Null => Ok(default.to_string()),
        JsonValue::String(name) if !name.trim_start_matches('@').is_empty() => {
            Ok(name.trim_start_matches('@').to_string())
        }
        other => Err(BusinessError::Invalid(format!(
            "`{field}` of {} must be a non-empty string, got {}",
            step.brick_id,
            type_name(&other)
        ))
        .into()),
    }
}

fn integer_field(
    step: &BrickInvocation,
    field: &str,
    default: u64,
    snapshot: &JsonValue,
) -> Result<u64, ExecutionError> {
    match resolve_field(&step.config, field, snapshot, &step.brick_id)? {
        JsonValue::Null => Ok(default),
        value => value.as_u64().ok_or_else(|| {
            BusinessError::Invalid(format!(
                "`{field}` of {} must be a non-negative integer",
                step.brick_id
            ))
            .into()
        }),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

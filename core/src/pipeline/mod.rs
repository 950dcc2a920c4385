//! Brick pipelines
//!
//! A pipeline is an ordered list of [`BrickInvocation`]s. Before a pipeline
//! runs it is compiled: every step (nested ones included) gets a stable
//! instance id, and the shape is validated so configuration errors surface
//! before any brick has side effects.

pub mod context;
pub mod control_flow;
pub mod executor;
pub mod trace;

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ConfigurationError;
use crate::expressions::{contains_pipeline, validate_expressions, Expression};
use crate::types::{JsonObject, JsonValue};

pub use context::RenderContext;
pub use control_flow::ControlFlowBrick;
pub use executor::{PipelineExecutor, PipelineOutput, RunOptions};
pub use trace::{MemoryTraceSink, NoopTraceSink, TraceRecord, TraceSink};

/// One step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickInvocation {
    #[serde(rename = "id", alias = "brickId")]
    pub brick_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(default)]
    pub config: JsonObject,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,

    /// Step is skipped when this resolves falsy
    #[serde(default, rename = "if", alias = "condition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub root_aware: bool,

    /// Failures are logged and traced, and the pipeline carries on
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_errors: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

pub type Pipeline = Vec<BrickInvocation>;

impl BrickInvocation {
    pub fn new(brick_id: impl Into<String>) -> Self {
        Self {
            brick_id: brick_id.into(),
            instance_id: None,
            config: JsonObject::new(),
            output_key: None,
            condition: None,
            root_aware: false,
            ignore_errors: false,
        }
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        if let JsonValue::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_condition(mut self, condition: JsonValue) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn ignoring_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    /// Instance id, or an empty string for steps that were never compiled
    pub fn instance(&self) -> &str {
        self.instance_id.as_deref().unwrap_or_default()
    }
}

/// Wrap steps as a `pipeline` expression for a control-flow field
pub fn pipeline_expression(steps: Pipeline) -> JsonValue {
    Expression::SubPipeline(steps).to_json()
}

/* ===================== Compile ===================== */

/// Assign instance ids to steps that lack one, then validate the pipeline.
pub fn compile_pipeline(pipeline: &mut Pipeline) -> Result<(), ConfigurationError> {
    assign_instance_ids(pipeline)?;
    validate_pipeline(pipeline)
}

fn assign_instance_ids(pipeline: &mut Pipeline) -> Result<(), ConfigurationError> {
    for step in pipeline.iter_mut() {
        if step.instance_id.is_none() {
            step.instance_id = Some(Uuid::new_v4().to_string());
        }

        let Some(flow) = ControlFlowBrick::from_brick_id(&step.brick_id) else {
            continue;
        };
        for field in flow.pipeline_fields() {
            let Some(value) = step.config.get(field.name) else {
                continue;
            };
            if let Expression::SubPipeline(mut body) = Expression::parse(value)? {
                assign_instance_ids(&mut body)?;
                step.config.insert(field.name.to_string(), pipeline_expression(body));
            }
        }
    }
    Ok(())
}

/// Check pipeline shape without running anything:
/// - instance ids are unique across the whole tree
/// - output keys are identifiers
/// - control-flow pipeline fields hold pipelines; nothing else does
pub fn validate_pipeline(pipeline: &Pipeline) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::new();
    validate_steps(pipeline, &mut seen)
}

fn validate_steps(
    pipeline: &[BrickInvocation],
    seen: &mut HashSet<String>,
) -> Result<(), ConfigurationError> {
    for step in pipeline {
        if let Some(id) = &step.instance_id {
            if !seen.insert(id.clone()) {
                return Err(ConfigurationError::DuplicateInstanceId(id.clone()));
            }
        }

        if let Some(key) = &step.output_key {
            if !is_valid_output_key(key) {
                return Err(ConfigurationError::InvalidOutputKey(key.clone()));
            }
        }

        if let Some(condition) = &step.condition {
            if contains_pipeline(condition) {
                return Err(ConfigurationError::UnexpectedPipeline {
                    brick_id: step.brick_id.clone(),
                    field: "if".to_string(),
                });
            }
            validate_expressions(condition)?;
        }

        let flow = ControlFlowBrick::from_brick_id(&step.brick_id);
        for (field, value) in &step.config {
            let accepts_pipeline = flow.is_some_and(|f| f.pipeline_field(field).is_some());
            if accepts_pipeline {
                continue;
            }
            if contains_pipeline(value) {
                return Err(ConfigurationError::UnexpectedPipeline {
                    brick_id: step.brick_id.clone(),
                    field: field.clone(),
                });
            }
            validate_expressions(value)?;
        }

        if let Some(flow) = flow {
            for field in flow.pipeline_fields() {
                match step.config.get(field.name) {
                    None | Some(JsonValue::Null) if !field.required => {}
                    None | Some(JsonValue::Null) => {
                        return Err(expected_pipeline(step, field.name));
                    }
                    Some(value) => match Expression::parse(value)? {
                        Expression::SubPipeline(body) => validate_steps(&body, seen)?,
                        _ => return Err(expected_pipeline(step, field.name)),
                    },
                }
            }
        }
    }
    Ok(())
}

fn expected_pipeline(step: &BrickInvocation, field: &str) -> ConfigurationError {
    ConfigurationError::ExpectedPipeline {
        brick_id: step.brick_id.clone(),
        field: field.to_string(),
    }
}

fn is_valid_output_key(key: &str) -> bool {
    let key = key.strip_prefix('@').unwrap_or(key);
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! Resolve expressions against a render context
//!
//! - literals are returned verbatim (objects/arrays resolved element-wise)
//! - variable references use null-safe lookup; missing data resolves to `null`
//! - templates render to strings; failures become [`BusinessError::Template`]
//! - sub-pipelines are handed back unevaluated as [`Resolved::Pipeline`]

use super::{Expression, TemplateEngine};
use crate::errors::{BusinessError, ConfigurationError, ExecutionError};
use crate::pipeline::Pipeline;
use crate::types::{is_truthy, JsonObject, JsonValue};

/// Result of resolving a single expression
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(JsonValue),
    /// Opaque handle; only the executor runs it, and only for control-flow bricks
    Pipeline(Pipeline),
}

/// Resolve one expression. `brick_id` and `field` attribute template failures.
pub fn resolve(
    expression: &Expression,
    context: &JsonValue,
    brick_id: &str,
    field: &str,
) -> Result<Resolved, ExecutionError> {
    match expression {
        Expression::Literal(value) => {
            resolve_literal(value, context, brick_id, field).map(Resolved::Value)
        }
        Expression::VarRef(path) => Ok(Resolved::Value(
            path.lookup(context).cloned().unwrap_or(JsonValue::Null),
        )),
        Expression::Template { engine, source } => render_template(*engine, source, context)
            .map(Resolved::Value)
            .map_err(|message| {
                BusinessError::Template {
                    brick_id: brick_id.to_string(),
                    field: field.to_string(),
                    engine: engine.tag().to_string(),
                    message,
                }
                .into()
            }),
        Expression::SubPipeline(steps) => Ok(Resolved::Pipeline(steps.clone())),
    }
}

/// Resolve a whole brick configuration into the concrete argument object.
///
/// A pipeline anywhere inside the configuration is a contract violation here:
/// only control-flow bricks accept pipelines, and they read them directly.
pub fn resolve_config(
    config: &JsonObject,
    context: &JsonValue,
    brick_id: &str,
) -> Result<JsonObject, ExecutionError> {
    let mut args = JsonObject::new();
    for (field, value) in config {
        args.insert(field.clone(), resolve_field_value(value, context, brick_id, field)?);
    }
    Ok(args)
}

/// Resolve one configuration field to a plain value (`null` when absent)
pub fn resolve_field(
    config: &JsonObject,
    field: &str,
    context: &JsonValue,
    brick_id: &str,
) -> Result<JsonValue, ExecutionError> {
    match config.get(field) {
        Some(value) => resolve_field_value(value, context, brick_id, field),
        None => Ok(JsonValue::Null),
    }
}

/// Resolve a condition and coerce it to a boolean
pub fn resolve_condition(
    value: &JsonValue,
    context: &JsonValue,
    brick_id: &str,
    field: &str,
) -> Result<bool, ExecutionError> {
    resolve_field_value(value, context, brick_id, field).map(|v| is_truthy(&v))
}

fn resolve_field_value(
    value: &JsonValue,
    context: &JsonValue,
    brick_id: &str,
    field: &str,
) -> Result<JsonValue, ExecutionError> {
    let expression = Expression::parse(value)?;
    match resolve(&expression, context, brick_id, field)? {
        Resolved::Value(v) => Ok(v),
        Resolved::Pipeline(_) => Err(ConfigurationError::UnexpectedPipeline {
            brick_id: brick_id.to_string(),
            field: field.to_string(),
        }
        .into()),
    }
}

fn resolve_literal(
    value: &JsonValue,
    context: &JsonValue,
    brick_id: &str,
    field: &str,
) -> Result<JsonValue, ExecutionError> {
    match value {
        JsonValue::Object(map) => {
            let mut resolved = JsonObject::new();
            for (k, v) in map {
                let nested_field = format!("{field}.{k}");
                resolved.insert(k.clone(), resolve_field_value(v, context, brick_id, &nested_field)?);
            }
            Ok(JsonValue::Object(resolved))
        }
        JsonValue::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let nested_field = format!("{field}[{idx}]");
                resolved.push(resolve_field_value(item, context, brick_id, &nested_field)?);
            }
            Ok(JsonValue::Array(resolved))
        }
        _ => Ok(value.clone()),
    }
}

fn render_template(
    engine: TemplateEngine,
    source: &str,
    context: &JsonValue,
) -> Result<JsonValue, String> {
    super::templates::render(engine, source, context).map(JsonValue::String)
}

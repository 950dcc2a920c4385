//! Expressions embedded in brick configuration
//!
//! On the wire an expression is a tagged object:
//!
//! ```json
//! {"__type__": "var", "__value__": "@input.title"}
//! {"__type__": "mustache", "__value__": "Hello {{ @input.name }}"}
//! {"__type__": "pipeline", "__value__": [ ...brick invocations... ]}
//! ```
//!
//! Any other JSON value is a literal. Literal objects and arrays may contain
//! expressions at any depth; [`resolver`] walks them.

pub mod path;
pub mod resolver;
pub mod templates;

use serde_json::json;

use crate::errors::ConfigurationError;
use crate::pipeline::Pipeline;
use crate::types::JsonValue;

pub use path::{PathSegment, VarPath};
pub use resolver::{resolve, resolve_condition, resolve_config, resolve_field, Resolved};
pub use templates::TemplateEngine;

pub const TYPE_KEY: &str = "__type__";
pub const VALUE_KEY: &str = "__value__";

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(JsonValue),
    VarRef(VarPath),
    Template { engine: TemplateEngine, source: String },
    SubPipeline(Pipeline),
}

impl Expression {
    /// Interpret a configuration value. Only the top level is inspected; a
    /// literal object may still contain nested expressions.
    pub fn parse(value: &JsonValue) -> Result<Expression, ConfigurationError> {
        let Some(tag) = expression_tag(value) else {
            return Ok(Expression::Literal(value.clone()));
        };
        let payload = value.get(VALUE_KEY).unwrap_or(&JsonValue::Null);

        match tag {
            "var" => {
                let raw = payload.as_str().ok_or(ConfigurationError::InvalidExpressionValue {
                    kind: tag.to_string(),
                    expected: "string",
                })?;
                Ok(Expression::VarRef(VarPath::parse(raw)?))
            }
            "pipeline" => {
                if !payload.is_array() {
                    return Err(ConfigurationError::InvalidExpressionValue {
                        kind: tag.to_string(),
                        expected: "array",
                    });
                }
                let steps: Pipeline = serde_json::from_value(payload.clone())
                    .map_err(|e| ConfigurationError::InvalidPipeline(e.to_string()))?;
                Ok(Expression::SubPipeline(steps))
            }
            other => {
                let engine = TemplateEngine::from_tag(other)
                    .ok_or_else(|| ConfigurationError::UnknownExpressionType(other.to_string()))?;
                let source = payload.as_str().ok_or(ConfigurationError::InvalidExpressionValue {
                    kind: tag.to_string(),
                    expected: "string",
                })?;
                Ok(Expression::Template {
                    engine,
                    source: source.to_string(),
                })
            }
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Expression::Literal(value) => value.clone(),
            Expression::VarRef(path) => json!({TYPE_KEY: "var", VALUE_KEY: path.as_str()}),
            Expression::Template { engine, source } => {
                json!({TYPE_KEY: engine.tag(), VALUE_KEY: source})
            }
            Expression::SubPipeline(steps) => json!({TYPE_KEY: "pipeline", VALUE_KEY: steps}),
        }
    }
}

/// The `__type__` tag if `value` is an expression object
pub fn expression_tag(value: &JsonValue) -> Option<&str> {
    value.as_object()?.get(TYPE_KEY)?.as_str()
}

/// Whether a pipeline expression appears anywhere inside `value`
pub fn contains_pipeline(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => {
            expression_tag(value) == Some("pipeline") || map.values().any(contains_pipeline)
        }
        JsonValue::Array(items) => items.iter().any(contains_pipeline),
        _ => false,
    }
}

/// Parse every expression inside `value` so malformed tags and paths are
/// reported before anything runs. Sub-pipeline bodies are left to the
/// pipeline validator.
pub fn validate_expressions(value: &JsonValue) -> Result<(), ConfigurationError> {
    if expression_tag(value).is_some() {
        return Expression::parse(value).map(|_| ());
    }
    match value {
        JsonValue::Object(map) => map.values().try_for_each(validate_expressions),
        JsonValue::Array(items) => items.iter().try_for_each(validate_expressions),
        _ => Ok(()),
    }
}

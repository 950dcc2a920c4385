//! Error taxonomy for the runtime
//!
//! - [`ConfigurationError`]: malformed expression or pipeline shape, raised
//!   before anything runs
//! - [`BusinessError`]: expected runtime failures surfaced to the mod author
//! - [`BrickExecutionError`]: a brick's `run` failed
//! - [`HeadlessInterrupt`]: not an error, a renderer asking to be displayed
//!
//! [`ExecutionError`] is what the pipeline executor returns and carries all of
//! the above plus cancellation.

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::types::{JsonObject, JsonValue};

/* ===================== Configuration ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("invalid variable path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("unknown expression type `{0}`")]
    UnknownExpressionType(String),

    #[error("`{kind}` expression expects a {expected} value")]
    InvalidExpressionValue { kind: String, expected: &'static str },

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("duplicate instance id `{0}`")]
    DuplicateInstanceId(String),

    #[error("invalid output key `{0}`")]
    InvalidOutputKey(String),

    #[error("field `{field}` of {brick_id} requires a pipeline")]
    ExpectedPipeline { brick_id: String, field: String },

    #[error("field `{field}` of {brick_id} does not accept a pipeline")]
    UnexpectedPipeline { brick_id: String, field: String },

    #[error("brick `{0}` is not registered")]
    UnknownBrick(String),
}

/* ===================== Business ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusinessError {
    #[error("error rendering {engine} template in `{field}` of {brick_id}: {message}")]
    Template {
        brick_id: String,
        field: String,
        engine: String,
        message: String,
    },

    #[error("unknown state namespace `{0}`")]
    InvalidNamespace(String),

    #[error("unknown merge strategy `{0}`")]
    InvalidMergeStrategy(String),

    #[error("mod state requires a mod id")]
    MissingModScope,

    #[error("private state requires a mod component id")]
    MissingComponentScope,

    #[error("tab-scoped variable `{0}` requires a tab id")]
    MissingTabId(String),

    #[error("{0}")]
    Invalid(String),
}

/* ===================== Storage / State ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored value for `{key}` is not an object")]
    Corrupt { key: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/* ===================== Bricks ===================== */

/// Failure reported by a brick implementation
#[derive(Debug, Error)]
pub enum BrickError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The brick observed cancellation and stopped early
    #[error("aborted")]
    Aborted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BrickError {
    pub fn message(message: impl Into<String>) -> Self {
        BrickError::Message(message.into())
    }
}

#[derive(Debug, Error)]
#[error("{brick_id} ({instance_id}) failed: {cause}")]
pub struct BrickExecutionError {
    pub brick_id: String,
    pub instance_id: String,
    #[source]
    pub cause: BrickError,
}

/// A renderer brick ran in headless mode and must be shown in a panel or modal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadlessInterrupt {
    pub brick_id: String,
    pub instance_id: String,
    pub args: JsonObject,
    pub context: JsonValue,
}

/* ===================== Execution ===================== */

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Brick(#[from] BrickExecutionError),

    #[error("headless render requested by {}", .0.brick_id)]
    Headless(HeadlessInterrupt),

    #[error("pipeline aborted")]
    Aborted,
}

impl From<StateError> for ExecutionError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Business(e) => ExecutionError::Business(e),
            StateError::Storage(e) => ExecutionError::Storage(e),
        }
    }
}

impl ExecutionError {
    /// Whether this is a genuine failure rather than a control signal
    /// (headless render or cancellation).
    pub fn is_failure(&self) -> bool {
        !matches!(self, ExecutionError::Headless(_) | ExecutionError::Aborted)
    }

    /// Instance id of the step the error is attributed to, if any
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            ExecutionError::Brick(e) => Some(&e.instance_id),
            ExecutionError::Headless(h) => Some(&h.instance_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionError::Configuration(_) => "ConfigurationError",
            ExecutionError::Business(_) => "BusinessError",
            ExecutionError::Storage(_) => "StorageError",
            ExecutionError::Brick(_) => "BrickExecutionError",
            ExecutionError::Headless(_) => "HeadlessInterrupt",
            ExecutionError::Aborted => "AbortError",
        }
    }

    /// Serializable form bound into the context of `except` branches
    pub fn to_error_info(&self) -> JsonValue {
        let mut info = json!({
            "name": self.name(),
            "message": self.to_string(),
        });
        if let ExecutionError::Brick(e) = self {
            info["brickId"] = json!(e.brick_id);
            info["instanceId"] = json!(e.instance_id);
            info["cause"] = json!(e.cause.to_string());
        }
        info
    }
}

/* ===================== Lifecycle / Trace ===================== */

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("failed to attach listener: {0}")]
    Listener(String),

    #[error("availability check failed: {0}")]
    Availability(String),

    #[error("reader `{brick_id}` failed: {message}")]
    Reader { brick_id: String, message: String },

    #[error("integration context unavailable: {0}")]
    Integration(String),

    #[error("panel controller failed: {0}")]
    Panel(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Why a mod component's run failed, as reported by the lifecycle manager
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("trace sink failed: {0}")]
pub struct TraceError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_signals_are_not_failures() {
        let interrupt = HeadlessInterrupt {
            brick_id: "r".to_string(),
            instance_id: "i".to_string(),
            args: JsonObject::new(),
            context: JsonValue::Null,
        };
        assert!(!ExecutionError::Headless(interrupt).is_failure());
        assert!(!ExecutionError::Aborted.is_failure());
        assert!(ExecutionError::Business(BusinessError::MissingModScope).is_failure());
    }

    #[test]
    fn test_error_info_attributes_instance() {
        let err = ExecutionError::Brick(BrickExecutionError {
            brick_id: "acme/fetch".to_string(),
            instance_id: "step-1".to_string(),
            cause: BrickError::message("boom"),
        });

        let info = err.to_error_info();
        assert_eq!(info["name"], "BrickExecutionError");
        assert_eq!(info["instanceId"], "step-1");
        assert_eq!(info["cause"], "boom");
        assert_eq!(err.instance_id(), Some("step-1"));
    }
}

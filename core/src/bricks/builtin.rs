//! Bricks that ship with the runtime
//!
//! Enough to exercise pipelines from the CLI: echo arguments, read and write
//! mod variables, log.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{Brick, BrickKind, BrickOptions, MemoryBrickRegistry};
use crate::errors::{BrickError, BusinessError};
use crate::state::{MergeStrategy, Namespace};
use crate::types::{JsonObject, JsonValue};

pub const IDENTITY_ID: &str = "builtin/identity";
pub const SET_STATE_ID: &str = "builtin/state/set";
pub const GET_STATE_ID: &str = "builtin/state/get";
pub const LOG_ID: &str = "builtin/log";

/// Registry holding every built-in brick
pub fn builtin_registry() -> MemoryBrickRegistry {
    MemoryBrickRegistry::new()
        .with(IdentityBrick)
        .with(SetStateBrick)
        .with(GetStateBrick)
        .with(LogBrick)
}

/// Returns its arguments unchanged
#[derive(Debug, Default)]
pub struct IdentityBrick;

#[async_trait]
impl Brick for IdentityBrick {
    fn id(&self) -> &str {
        IDENTITY_ID
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Transformer
    }

    async fn run(&self, args: JsonObject, _options: BrickOptions) -> Result<JsonValue, BrickError> {
        Ok(JsonValue::Object(args))
    }
}

/// Merge `data` into a state namespace and return the new state
#[derive(Debug, Default)]
pub struct SetStateBrick;

#[async_trait]
impl Brick for SetStateBrick {
    fn id(&self) -> &str {
        SET_STATE_ID
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Transformer
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "namespace": {"type": "string", "enum": ["public", "mod", "private"], "default": "mod"},
                "data": {"type": "object"},
                "mergeStrategy": {"type": "string", "enum": ["replace", "shallow", "deep"], "default": "shallow"}
            },
            "required": ["data"]
        })
    }

    async fn run(&self, args: JsonObject, options: BrickOptions) -> Result<JsonValue, BrickError> {
        let namespace = namespace_arg(&args)?;
        let strategy = match args.get("mergeStrategy") {
            None | Some(JsonValue::Null) => MergeStrategy::default(),
            Some(JsonValue::String(s)) => MergeStrategy::from_str(s)?,
            Some(_) => return Err(BusinessError::Invalid("`mergeStrategy` must be a string".to_string()).into()),
        };
        let data = match args.get("data") {
            Some(JsonValue::Object(data)) => data.clone(),
            _ => return Err(BusinessError::Invalid("`data` must be an object".to_string()).into()),
        };

        let next = options
            .state
            .set_state(namespace, &options.scope, data, strategy)
            .await?;
        Ok(JsonValue::Object(next))
    }
}

/// Read a state namespace
#[derive(Debug, Default)]
pub struct GetStateBrick;

#[async_trait]
impl Brick for GetStateBrick {
    fn id(&self) -> &str {
        GET_STATE_ID
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Reader
    }

    async fn run(&self, args: JsonObject, options: BrickOptions) -> Result<JsonValue, BrickError> {
        let namespace = namespace_arg(&args)?;
        let state = options.state.get_state(namespace, &options.scope).await?;
        Ok(JsonValue::Object(state))
    }
}

/// Write `message` to the runtime log
#[derive(Debug, Default)]
pub struct LogBrick;

#[async_trait]
impl Brick for LogBrick {
    fn id(&self) -> &str {
        LOG_ID
    }

    fn kind(&self) -> BrickKind {
        BrickKind::Effect
    }

    async fn run(&self, args: JsonObject, options: BrickOptions) -> Result<JsonValue, BrickError> {
        let message = match args.get("message") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let data = args.get("data").cloned().unwrap_or(JsonValue::Null);
        let instance_id = options.instance_id.as_str();

        match args.get("level").and_then(JsonValue::as_str).unwrap_or("info") {
            "debug" => debug!(instance_id, %data, "{message}"),
            "warn" => warn!(instance_id, %data, "{message}"),
            "error" => error!(instance_id, %data, "{message}"),
            _ => info!(instance_id, %data, "{message}"),
        }
        Ok(JsonValue::Null)
    }
}

fn namespace_arg(args: &JsonObject) -> Result<Namespace, BusinessError> {
    match args.get("namespace") {
        None | Some(JsonValue::Null) => Ok(Namespace::Mod),
        Some(JsonValue::String(s)) => Namespace::from_str(s),
        Some(other) => Err(BusinessError::InvalidNamespace(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::errors::ExecutionError;
    use crate::pipeline::{BrickInvocation, PipelineExecutor, RenderContext, RunOptions};
    use crate::state::ModVariableStore;

    fn executor() -> PipelineExecutor {
        PipelineExecutor::new(Arc::new(builtin_registry()), Arc::new(ModVariableStore::in_memory()))
    }

    #[tokio::test]
    async fn test_set_then_get_mod_state() {
        let executor = executor();
        let pipeline = vec![
            BrickInvocation::new(SET_STATE_ID).with_config(json!({"data": {"count": 1}})),
            BrickInvocation::new(SET_STATE_ID)
                .with_config(json!({"data": {"other": true}}))
                .with_output_key("written"),
            BrickInvocation::new(GET_STATE_ID),
        ];
        let options = RunOptions::default().with_mod("mod-a");

        let result = assert_ok!(executor.run(&pipeline, RenderContext::new(), &options).await);
        assert_eq!(result.output, Some(json!({"count": 1, "other": true})));
        assert_eq!(result.context.get("@written"), result.output.as_ref());
    }

    #[tokio::test]
    async fn test_invalid_namespace_fails_step() {
        let executor = executor();
        let pipeline = vec![BrickInvocation::new(SET_STATE_ID)
            .with_config(json!({"namespace": "global", "data": {}}))
            .ignoring_errors()];

        let err = assert_err!(executor.run(&pipeline, RenderContext::new(), &RunOptions::default()).await);
        assert!(matches!(err, ExecutionError::Brick(_)));
    }

    #[tokio::test]
    async fn test_identity_and_log() {
        let executor = executor();
        let pipeline = vec![
            BrickInvocation::new(LOG_ID).with_config(json!({"message": "hello", "level": "debug"})),
            BrickInvocation::new(IDENTITY_ID).with_config(json!({"a": [1, 2]})),
        ];

        let result = assert_ok!(executor.run(&pipeline, RenderContext::new(), &RunOptions::default()).await);
        assert_eq!(result.output, Some(json!({"a": [1, 2]})));
    }
}

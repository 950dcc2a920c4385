//! Bricks and the registry the executor looks them up in
//!
//! The runtime does not define or validate bricks; it dispatches on
//! [`BrickKind`] and calls [`Brick::run`] with the resolved arguments.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::BrickError;
use crate::state::{ModVariableStore, StateScope};
use crate::types::{JsonObject, JsonValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrickKind {
    /// Reads page/event state; must not mutate
    Reader,
    /// Side effects only; output is discarded
    Effect,
    Transformer,
    /// Terminal; interrupts headless runs so a panel can display it
    Renderer,
}

/// Everything a brick may use besides its arguments
#[derive(Clone)]
pub struct BrickOptions {
    /// Snapshot of the render context the arguments were resolved against
    pub context: JsonValue,
    /// Root element reference for root-aware bricks
    pub root: Option<JsonValue>,
    pub state: Arc<ModVariableStore>,
    pub scope: StateScope,
    /// Bricks that wait (timers, DOM waits) must observe this
    pub cancel: CancellationToken,
    pub run_id: Uuid,
    pub instance_id: String,
}

impl fmt::Debug for BrickOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrickOptions")
            .field("scope", &self.scope)
            .field("run_id", &self.run_id)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Brick: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> BrickKind;

    fn input_schema(&self) -> JsonValue {
        json!({"type": "object"})
    }

    fn is_root_aware(&self) -> bool {
        false
    }

    async fn run(&self, args: JsonObject, options: BrickOptions) -> Result<JsonValue, BrickError>;
}

pub trait BrickRegistry: Send + Sync {
    fn lookup(&self, brick_id: &str) -> Option<Arc<dyn Brick>>;
}

/* ===================== In-memory registry ===================== */

#[derive(Default, Clone)]
pub struct MemoryBrickRegistry {
    bricks: HashMap<String, Arc<dyn Brick>>,
}

impl MemoryBrickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, brick: Arc<dyn Brick>) {
        self.bricks.insert(brick.id().to_string(), brick);
    }

    pub fn with(mut self, brick: impl Brick + 'static) -> Self {
        self.register(Arc::new(brick));
        self
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }
}

impl fmt::Debug for MemoryBrickRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.bricks.keys().collect();
        ids.sort();
        f.debug_struct("MemoryBrickRegistry").field("bricks", &ids).finish()
    }
}

impl BrickRegistry for MemoryBrickRegistry {
    fn lookup(&self, brick_id: &str) -> Option<Arc<dyn Brick>> {
        self.bricks.get(brick_id).cloned()
    }
}

/* ===================== Closure bricks ===================== */

type BrickFuture = Pin<Box<dyn Future<Output = Result<JsonValue, BrickError>> + Send>>;
type BrickFn = dyn Fn(JsonObject, BrickOptions) -> BrickFuture + Send + Sync;

/// A brick backed by an async closure, for embedding hosts and tests
pub struct FnBrick {
    id: String,
    kind: BrickKind,
    root_aware: bool,
    func: Box<BrickFn>,
}

impl FnBrick {
    pub fn new<F, Fut>(id: impl Into<String>, kind: BrickKind, func: F) -> Self
    where
        F: Fn(JsonObject, BrickOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, BrickError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            kind,
            root_aware: false,
            func: Box::new(move |args, options| Box::pin(func(args, options))),
        }
    }

    pub fn root_aware(mut self) -> Self {
        self.root_aware = true;
        self
    }
}

impl fmt::Debug for FnBrick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBrick")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Brick for FnBrick {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> BrickKind {
        self.kind
    }

    fn is_root_aware(&self) -> bool {
        self.root_aware
    }

    async fn run(&self, args: JsonObject, options: BrickOptions) -> Result<JsonValue, BrickError> {
        (self.func)(args, options).await
    }
}

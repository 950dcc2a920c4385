//! Step tracing
//!
//! The executor emits an entry record before each step and an exit record
//! after it. Sinks are advisory: a failing sink is logged and ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::TraceError;
use crate::types::{JsonObject, JsonValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub run_id: Uuid,
    pub instance_id: String,
    pub brick_id: String,
    pub template_context: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_args: Option<JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonValue>,
    pub skipped: bool,
    pub timestamp_start: DateTime<Utc>,
    /// `None` on the entry record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<DateTime<Utc>>,
}

impl TraceRecord {
    pub fn is_exit(&self) -> bool {
        self.timestamp_end.is_some()
    }
}

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, record: TraceRecord) -> Result<(), TraceError>;
}

#[derive(Debug, Default)]
pub struct NoopTraceSink;

#[async_trait]
impl TraceSink for NoopTraceSink {
    async fn record(&self, _record: TraceRecord) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().await.clone()
    }

    /// Exit records only, in completion order
    pub async fn exits(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.is_exit())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn record(&self, record: TraceRecord) -> Result<(), TraceError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

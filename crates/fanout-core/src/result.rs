use crate::{CoreError, Result, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of processing one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskResult {
    /// Opaque serialized domain object produced by the processor
    Success { locator: String, payload: Vec<u8> },

    /// Processing failed; `reason` is never empty
    Failure { locator: String, reason: String },
}

impl TaskResult {
    pub fn success(locator: impl Into<String>, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CoreError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }
        Ok(TaskResult::Success {
            locator: locator.into(),
            payload,
        })
    }

    pub fn failure(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "unknown error".to_string()
        } else {
            reason
        };
        TaskResult::Failure {
            locator: locator.into(),
            reason,
        }
    }

    pub fn locator(&self) -> &str {
        match self {
            TaskResult::Success { locator, .. } | TaskResult::Failure { locator, .. } => locator,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }
}

/// Completion token published by the producer ahead of a batch, so the
/// aggregator can stop on an exact count instead of on queue silence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_id: Uuid,
    pub total_tasks: u64,
    pub created_at: DateTime<Utc>,
}

impl BatchManifest {
    pub fn new(total_tasks: u64) -> Self {
        BatchManifest {
            batch_id: Uuid::new_v4(),
            total_tasks,
            created_at: Utc::now(),
        }
    }
}

/// Anything that travels on the results queue (bincode encoded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultMessage {
    Manifest(BatchManifest),
    Result(TaskResult),
}

impl ResultMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CoreError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CoreError::from)
    }
}

impl From<TaskResult> for ResultMessage {
    fn from(result: TaskResult) -> Self {
        ResultMessage::Result(result)
    }
}

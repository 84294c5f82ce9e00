use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// One unit of input: where to read it from and how much of it to process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Input locator, usually a file path visible to every worker
    #[serde(alias = "file")]
    pub locator: String,

    /// Portion of the input to process, in (0, 1]
    #[serde(default = "full_fraction")]
    pub fraction: f64,
}

fn full_fraction() -> f64 {
    1.0
}

impl Task {
    pub fn new(locator: impl Into<String>, fraction: f64) -> Result<Self> {
        let task = Task {
            locator: locator.into(),
            fraction,
        };
        task.validate()?;
        Ok(task)
    }

    /// Task covering the whole input
    pub fn whole(locator: impl Into<String>) -> Result<Self> {
        Self::new(locator, 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.locator.is_empty() {
            return Err(CoreError::EmptyLocator);
        }
        // NaN fails both comparisons
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(CoreError::InvalidFraction(self.fraction));
        }
        Ok(())
    }
}

/// In-band termination signal for exactly one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownSentinel {
    pub shutdown: bool,
}

impl Default for ShutdownSentinel {
    fn default() -> Self {
        ShutdownSentinel { shutdown: true }
    }
}

/// Anything that travels on the work queue.
///
/// Encoded as JSON text: `{"locator": "...", "fraction": 1.0}` for tasks and
/// `{"shutdown": true}` for sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkMessage {
    Shutdown(ShutdownSentinel),
    Task(Task),
}

impl WorkMessage {
    pub fn shutdown() -> Self {
        WorkMessage::Shutdown(ShutdownSentinel::default())
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, WorkMessage::Shutdown(_))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(CoreError::from)
    }

    /// Decode and validate a work queue body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let message: WorkMessage = serde_json::from_slice(bytes)?;
        match &message {
            WorkMessage::Shutdown(sentinel) if !sentinel.shutdown => {
                return Err(CoreError::MalformedWorkMessage(
                    "sentinel with shutdown=false".to_string(),
                ));
            }
            WorkMessage::Task(task) => task.validate()?,
            WorkMessage::Shutdown(_) => {}
        }
        Ok(message)
    }
}

impl From<Task> for WorkMessage {
    fn from(task: Task) -> Self {
        WorkMessage::Task(task)
    }
}

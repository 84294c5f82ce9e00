use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Task fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("Task locator must not be empty")]
    EmptyLocator,

    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Malformed work message: {0}")]
    MalformedWorkMessage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

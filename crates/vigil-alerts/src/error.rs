//! Alert error types.

use thiserror::Error;
use vigil_models::AlertId;

pub type AlertResult<T> = Result<T, AlertError>;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(AlertId),

    #[error("Invalid status change: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlertError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AlertError::Storage(_) | AlertError::Io(_))
    }
}

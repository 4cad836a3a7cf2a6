//! Engine error types.

use thiserror::Error;
use vigil_alerts::AlertError;
use vigil_capture::CaptureError;
use vigil_models::CameraId;
use vigil_recognition::RecognitionError;
use vigil_tracker::TrackerError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Camera not found: {0}")]
    CameraNotFound(CameraId),

    #[error("Engine is not running")]
    NotRunning,

    #[error("Failed to load detection models: {0}")]
    ModelLoad(String),

    #[error("Capture could not be started for camera {0}")]
    CaptureStart(CameraId),

    #[error("Invalid value for setting {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Coordination channel closed")]
    ChannelClosed,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    pub fn invalid_setting(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the failed operation may succeed if tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Capture(e) => e.is_retryable(),
            EngineError::Recognition(e) => e.is_retryable(),
            EngineError::Alert(e) => e.is_retryable(),
            EngineError::CaptureStart(_) | EngineError::Spawn(_) => true,
            _ => false,
        }
    }
}

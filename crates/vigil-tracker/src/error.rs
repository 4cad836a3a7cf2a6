//! Tracker error types.

use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Body detection failed: {0}")]
    BodyDetection(String),

    #[error("Face detection failed: {0}")]
    FaceDetection(String),

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),
}

impl TrackerError {
    pub fn body_detection(message: impl Into<String>) -> Self {
        Self::BodyDetection(message.into())
    }

    pub fn face_detection(message: impl Into<String>) -> Self {
        Self::FaceDetection(message.into())
    }
}

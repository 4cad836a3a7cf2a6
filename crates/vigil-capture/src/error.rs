//! Capture error types.

use thiserror::Error;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Failed to open stream: {0}")]
    OpenFailed(String),

    #[error("Failed to read frame: {0}")]
    ReadFailed(String),

    #[error("Stream inspection failed: {message}")]
    InspectFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Stream ended")]
    EndOfStream,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl CaptureError {
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::OpenFailed(message.into())
    }

    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed(message.into())
    }

    /// Missing binaries will not fix themselves; everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CaptureError::FfmpegNotFound | CaptureError::FfprobeNotFound
        )
    }
}

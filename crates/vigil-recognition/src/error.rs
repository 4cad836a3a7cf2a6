//! Recognition error types.

use thiserror::Error;

pub type RecognitionResult<T> = Result<T, RecognitionError>;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Recognition service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl RecognitionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecognitionError::ServiceUnavailable(_)
                | RecognitionError::Timeout(_)
                | RecognitionError::Network(_)
        )
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => RecognitionError::Unauthorized(body),
            404 => RecognitionError::NotFound(body),
            429 | 502 | 503 | 504 => {
                RecognitionError::ServiceUnavailable(format!("HTTP {}: {}", status, body))
            }
            _ => RecognitionError::RequestFailed(format!("HTTP {}: {}", status, body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        assert!(matches!(
            RecognitionError::from_http_status(401, "bad key".into()),
            RecognitionError::Unauthorized(_)
        ));
        assert!(matches!(
            RecognitionError::from_http_status(404, String::new()),
            RecognitionError::NotFound(_)
        ));
        assert!(RecognitionError::from_http_status(503, String::new()).is_retryable());
        assert!(!RecognitionError::from_http_status(400, String::new()).is_retryable());
    }
}

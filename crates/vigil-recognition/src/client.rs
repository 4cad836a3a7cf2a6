//! Recognition backend HTTP client.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use tracing::{debug, info, warn};

use crate::error::{RecognitionError, RecognitionResult};
use crate::types::{AddFaceResponse, DeleteSubjectResponse, RecognizeResponse, SubjectMatch};

const RECOGNIZE_PATH: &str = "/api/v1/recognition/recognize";
const FACES_PATH: &str = "/api/v1/recognition/faces";
const HEALTH_PATH: &str = "/healthcheck";

/// Configuration for the recognition client.
#[derive(Debug, Clone)]
pub struct RecognitionClientConfig {
    /// Base URL of the recognition service
    pub base_url: String,
    /// Sent as `x-api-key`
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
}

impl Default for RecognitionClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
            max_retries: 1,
        }
    }
}

impl RecognitionClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("RECOGNITION_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            api_key: std::env::var("RECOGNITION_API_KEY").unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("RECOGNITION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            max_retries: std::env::var("RECOGNITION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}

/// Client for a CompreFace-style recognition service.
pub struct RecognitionClient {
    http: Client,
    config: RecognitionClientConfig,
}

impl RecognitionClient {
    pub fn new(config: RecognitionClientConfig) -> RecognitionResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RecognitionError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> RecognitionResult<Self> {
        Self::new(RecognitionClientConfig::from_env())
    }

    pub fn config(&self) -> &RecognitionClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Check if the recognition service answers.
    pub async fn health_check(&self) -> RecognitionResult<bool> {
        let url = self.url(HEALTH_PATH);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("Recognition service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Recognition service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Recognise the face in a JPEG, returning the best subject if any.
    pub async fn recognize(&self, jpeg: &[u8]) -> RecognitionResult<Option<SubjectMatch>> {
        let url = self.url(RECOGNIZE_PATH);
        let (http, api_key, url) = (&self.http, self.config.api_key.as_str(), url.as_str());

        debug!(bytes = jpeg.len(), "Sending recognition request");

        let response = self
            .with_retry(|| async move {
                let form = Form::new().part("file", jpeg_part(jpeg)?);
                let response = http
                    .post(url)
                    .header("x-api-key", api_key)
                    .multipart(form)
                    .send()
                    .await?;
                check_status(response).await
            })
            .await?;

        let body: RecognizeResponse = response.json().await?;
        Ok(body.best_subject().cloned())
    }

    /// Enrol a face image under `subject`. Returns the backend image id.
    pub async fn add_subject(&self, jpeg: &[u8], subject: &str) -> RecognitionResult<String> {
        let url = self.url(FACES_PATH);
        let (http, api_key, url) = (&self.http, self.config.api_key.as_str(), url.as_str());

        let response = self
            .with_retry(|| async move {
                let form = Form::new()
                    .part("file", jpeg_part(jpeg)?)
                    .text("subject", subject.to_string());
                let response = http
                    .post(url)
                    .header("x-api-key", api_key)
                    .multipart(form)
                    .send()
                    .await?;
                check_status(response).await
            })
            .await?;

        let added: AddFaceResponse = response.json().await?;
        info!(subject = %added.subject, image_id = %added.image_id, "Face enrolled");
        Ok(added.image_id)
    }

    /// Delete every image of `subject`. Returns the number deleted.
    pub async fn delete_subject(&self, subject: &str) -> RecognitionResult<u32> {
        let url = self.url(FACES_PATH);
        let (http, api_key, url) = (&self.http, self.config.api_key.as_str(), url.as_str());

        let response = self
            .with_retry(|| async move {
                let response = http
                    .delete(url)
                    .header("x-api-key", api_key)
                    .query(&[("subject", subject)])
                    .send()
                    .await?;
                check_status(response).await
            })
            .await?;

        let deleted: DeleteSubjectResponse = response.json().await?;
        Ok(deleted.deleted)
    }

    /// Delete one enrolled image.
    pub async fn delete_image(&self, image_id: &str) -> RecognitionResult<()> {
        let url = self.url(&format!("{}/{}", FACES_PATH, image_id));
        let (http, api_key, url) = (&self.http, self.config.api_key.as_str(), url.as_str());

        self.with_retry(|| async move {
            let response = http.delete(url).header("x-api-key", api_key).send().await?;
            check_status(response).await
        })
        .await?;
        Ok(())
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> RecognitionResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = RecognitionResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Recognition request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(RecognitionError::RequestFailed("Unknown error".to_string())))
    }
}

fn jpeg_part(jpeg: &[u8]) -> RecognitionResult<Part> {
    Ok(Part::bytes(jpeg.to_vec())
        .file_name("face.jpg")
        .mime_str("image/jpeg")?)
}

async fn check_status(response: Response) -> RecognitionResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RecognitionError::from_http_status(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RecognitionClient {
        RecognitionClient::new(RecognitionClientConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            timeout: Duration::from_secs(2),
            max_retries: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = RecognitionClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 1);
    }

    #[tokio::test]
    async fn test_recognize_returns_best_subject() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RECOGNIZE_PATH))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{"subjects": [{"subject": "alice", "similarity": 0.93}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let best = client(&server).recognize(b"jpeg").await.unwrap().unwrap();
        assert_eq!(best.subject, "alice");
        assert!((best.similarity - 0.93).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recognize_retries_once_on_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RECOGNIZE_PATH))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server).recognize(b"jpeg").await.unwrap_err();
        assert!(matches!(err, RecognitionError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RECOGNIZE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("No face is found"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).recognize(b"jpeg").await.unwrap_err();
        assert!(matches!(err, RecognitionError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn test_subject_maintenance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(FACES_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "image_id": "img-1", "subject": "alice"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(FACES_PATH))
            .and(query_param("subject", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"deleted": 3})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/img-1", FACES_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.add_subject(b"jpeg", "alice").await.unwrap(), "img-1");
        assert_eq!(client.delete_subject("alice").await.unwrap(), 3);
        client.delete_image("img-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(client(&server).health_check().await.unwrap());

        let down = RecognitionClient::new(RecognitionClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        assert!(!down.health_check().await.unwrap());
    }
}

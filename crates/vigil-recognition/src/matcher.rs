//! Face matching capability.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use tracing::debug;
use vigil_models::MatchResult;

use crate::client::RecognitionClient;
use crate::database::{DatabaseStats, FaceDatabase};
use crate::error::{RecognitionError, RecognitionResult};

/// Turns a face crop into an embedding. Opaque model capability.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &RgbImage) -> RecognitionResult<Vec<f32>>;

    fn name(&self) -> &'static str;
}

/// Matches a face crop against the known-person registry.
#[async_trait]
pub trait FaceMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn match_face(&self, face: &RgbImage) -> RecognitionResult<MatchResult>;

    fn similarity_threshold(&self) -> f32;

    fn set_similarity_threshold(&self, threshold: f32);

    /// Registry size, when the matcher holds the registry itself.
    fn registry_stats(&self) -> Option<DatabaseStats> {
        None
    }
}

/// Embeds locally and matches against an in-process [`FaceDatabase`].
pub struct LocalMatcher {
    embedder: Arc<dyn FaceEmbedder>,
    database: Arc<FaceDatabase>,
}

impl LocalMatcher {
    pub fn new(embedder: Arc<dyn FaceEmbedder>, database: Arc<FaceDatabase>) -> Self {
        Self { embedder, database }
    }

    pub fn database(&self) -> &Arc<FaceDatabase> {
        &self.database
    }
}

#[async_trait]
impl FaceMatcher for LocalMatcher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn match_face(&self, face: &RgbImage) -> RecognitionResult<MatchResult> {
        let embedder = Arc::clone(&self.embedder);
        let database = Arc::clone(&self.database);
        let face = face.clone();

        tokio::task::spawn_blocking(move || {
            let embedding = embedder.embed(&face)?;
            Ok(database.recognize(&embedding))
        })
        .await
        .map_err(|e| RecognitionError::Embedding(format!("embedding task failed: {}", e)))?
    }

    fn similarity_threshold(&self) -> f32 {
        self.database.similarity_threshold()
    }

    fn set_similarity_threshold(&self, threshold: f32) {
        self.database.set_similarity_threshold(threshold);
    }

    fn registry_stats(&self) -> Option<DatabaseStats> {
        Some(self.database.stats())
    }
}

/// Registry details for a subject enrolled on the remote backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectIdentity {
    pub person_id: i64,
    pub group_id: Option<i64>,
    pub group_name: Option<String>,
}

/// Sends face crops to a remote recognition backend.
///
/// The backend only knows subject names; a local directory maps them back
/// to person and group ids.
pub struct RemoteMatcher {
    client: Arc<RecognitionClient>,
    directory: RwLock<HashMap<String, SubjectIdentity>>,
    threshold_bits: AtomicU32,
    jpeg_quality: u8,
}

impl RemoteMatcher {
    pub fn new(client: Arc<RecognitionClient>, similarity_threshold: f32) -> Self {
        Self {
            client,
            directory: RwLock::new(HashMap::new()),
            threshold_bits: AtomicU32::new(similarity_threshold.to_bits()),
            jpeg_quality: 90,
        }
    }

    pub fn client(&self) -> &Arc<RecognitionClient> {
        &self.client
    }

    pub fn register_subject(&self, subject: impl Into<String>, identity: SubjectIdentity) {
        self.directory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subject.into(), identity);
    }

    pub fn unregister_subject(&self, subject: &str) -> bool {
        self.directory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(subject)
            .is_some()
    }

    fn identity(&self, subject: &str) -> Option<SubjectIdentity> {
        self.directory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject)
            .cloned()
    }
}

#[async_trait]
impl FaceMatcher for RemoteMatcher {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn match_face(&self, face: &RgbImage) -> RecognitionResult<MatchResult> {
        let jpeg = encode_jpeg(face, self.jpeg_quality)?;
        let Some(best) = self.client.recognize(&jpeg).await? else {
            return Ok(MatchResult::stranger(0.0));
        };

        let threshold = self.similarity_threshold();
        if best.similarity < threshold {
            debug!(subject = %best.subject, similarity = best.similarity, "Best subject below threshold");
            return Ok(MatchResult::stranger(best.similarity));
        }

        let identity = self.identity(&best.subject);
        Ok(MatchResult::known(
            identity.as_ref().map(|i| i.person_id),
            best.subject,
            identity.as_ref().and_then(|i| i.group_id),
            identity.and_then(|i| i.group_name),
            best.similarity,
        ))
    }

    fn similarity_threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::SeqCst))
    }

    fn set_similarity_threshold(&self, threshold: f32) {
        self.threshold_bits.store(threshold.to_bits(), Ordering::SeqCst);
    }
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> RecognitionResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(buffer.into_inner())
}

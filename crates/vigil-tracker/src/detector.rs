//! Detection capability traits.

use image::RgbImage;
use vigil_models::BoundingBox;

use crate::error::TrackerResult;

/// One detector hit in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1]
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// Person (body) detector. Loaded once and shared by every camera.
pub trait BodyDetector: Send + Sync {
    /// Detect persons in a frame.
    fn detect_persons(&self, frame: &RgbImage) -> TrackerResult<Vec<Detection>>;

    /// Model name for logging.
    fn name(&self) -> &'static str;
}

/// Face detector. Loaded once and shared by every camera.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a frame.
    fn detect_faces(&self, frame: &RgbImage) -> TrackerResult<Vec<Detection>>;

    /// Model name for logging.
    fn name(&self) -> &'static str;
}

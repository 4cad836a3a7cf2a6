//! Captured frames.

use chrono::{DateTime, Utc};
use image::RgbImage;

/// Camera identifier as assigned by the management layer.
pub type CameraId = i64;

/// Tracker-assigned person identifier, scoped to one camera.
pub type TrackId = u32;

/// A decoded frame delivered by a frame source.
///
/// Once dequeued the consumer owns it outright.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel buffer
    pub image: RgbImage,
    /// Originating camera
    pub camera_id: CameraId,
    /// Monotonic sequence number within one capture session
    pub sequence: u64,
    /// Wall-clock capture time
    pub timestamp: DateTime<Utc>,
    /// (width, height) of the stream as reported on connect
    pub resolution: (u32, u32),
}

impl Frame {
    pub fn new(image: RgbImage, camera_id: CameraId, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        let resolution = image.dimensions();
        Self {
            image,
            camera_id,
            sequence,
            timestamp,
            resolution,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

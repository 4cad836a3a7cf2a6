//! Observations emitted by a camera's object tracker.

use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::alert::AlertLevel;
use crate::frame::TrackId;
use crate::geometry::BoundingBox;

/// Discriminant of [`TrackerEvent`], handy for logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerEventKind {
    FaceDetected,
    BodyDetected,
}

impl TrackerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEventKind::FaceDetected => "face_detected",
            TrackerEventKind::BodyDetected => "body_detected",
        }
    }
}

/// A new best face for a track cleared the emission gates.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub track_id: TrackId,
    pub timestamp: DateTime<Utc>,
    pub face_image: RgbImage,
    pub body_image: Option<RgbImage>,
    pub full_image: RgbImage,
    pub face_score: f64,
    pub body_score: f64,
    pub face_box: BoundingBox,
    pub body_box: Option<BoundingBox>,
}

/// A faceless track lingered long enough to be reported once.
#[derive(Debug, Clone)]
pub struct BodyObservation {
    pub track_id: TrackId,
    pub timestamp: DateTime<Utc>,
    pub body_image: RgbImage,
    pub full_image: RgbImage,
    pub body_score: f64,
    pub body_box: BoundingBox,
}

/// Transient tracker output, consumed right away by recognition and the alert lifecycle.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    FaceDetected(FaceObservation),
    BodyDetected(BodyObservation),
}

impl TrackerEvent {
    pub fn kind(&self) -> TrackerEventKind {
        match self {
            TrackerEvent::FaceDetected(_) => TrackerEventKind::FaceDetected,
            TrackerEvent::BodyDetected(_) => TrackerEventKind::BodyDetected,
        }
    }

    pub fn track_id(&self) -> TrackId {
        match self {
            TrackerEvent::FaceDetected(face) => face.track_id,
            TrackerEvent::BodyDetected(body) => body.track_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TrackerEvent::FaceDetected(face) => face.timestamp,
            TrackerEvent::BodyDetected(body) => body.timestamp,
        }
    }

    /// Score carried into the alert record: face quality for face events, body quality otherwise.
    pub fn score(&self) -> f64 {
        match self {
            TrackerEvent::FaceDetected(face) => face.face_score,
            TrackerEvent::BodyDetected(body) => body.body_score,
        }
    }

    /// Severity before recognition has had a say.
    pub fn initial_level(&self) -> AlertLevel {
        match self {
            TrackerEvent::FaceDetected(_) => AlertLevel::Critical,
            TrackerEvent::BodyDetected(_) => AlertLevel::Warning,
        }
    }

    pub fn face_image(&self) -> Option<&RgbImage> {
        match self {
            TrackerEvent::FaceDetected(face) => Some(&face.face_image),
            TrackerEvent::BodyDetected(_) => None,
        }
    }

    pub fn body_image(&self) -> Option<&RgbImage> {
        match self {
            TrackerEvent::FaceDetected(face) => face.body_image.as_ref(),
            TrackerEvent::BodyDetected(body) => Some(&body.body_image),
        }
    }

    pub fn full_image(&self) -> &RgbImage {
        match self {
            TrackerEvent::FaceDetected(face) => &face.full_image,
            TrackerEvent::BodyDetected(body) => &body.full_image,
        }
    }
}

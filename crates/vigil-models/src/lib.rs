//! Shared data models for the Vigil video analytics engine.
//!
//! This crate provides the value types passed between pipeline stages:
//! - Frames and capture/engine status enums
//! - Pixel and fractional geometry (bounding boxes, ROI)
//! - Tracker events and recognition match results
//! - Alert records and their lifecycle enums
//! - Subscriber event messages

pub mod alert;
pub mod event;
pub mod frame;
pub mod geometry;
pub mod hub;
pub mod matching;
pub mod status;

pub use alert::{AlertId, AlertLevel, AlertRecord, AlertStatus, AlertType, ImageHistoryEntry};
pub use event::{BodyObservation, FaceObservation, TrackerEvent, TrackerEventKind};
pub use frame::{CameraId, Frame, TrackId};
pub use geometry::{BoundingBox, Roi, RoiParseError};
pub use hub::{
    AlertEvent, CameraStatusEvent, EngineStatusEvent, HubEnvelope, HubMessage, NotificationEvent,
};
pub use matching::MatchResult;
pub use status::{CaptureStatus, EngineStatus};

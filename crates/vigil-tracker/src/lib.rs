//! Per-camera person tracking.
//!
//! [`ObjectTracker`] turns raw frames into discrete [`TrackerEvent`]s:
//! a face event when a track's best face improves enough to be worth
//! recognising, and a one-off body event when a faceless person lingers.
//!
//! Detection models are opaque capabilities behind [`BodyDetector`] and
//! [`FaceDetector`]; they are shared read-only across cameras while every
//! tracker keeps its own identity and best-shot state.
//!
//! [`TrackerEvent`]: vigil_models::TrackerEvent

pub mod annotate;
pub mod config;
pub mod crop;
pub mod detector;
pub mod error;
pub mod iou;
mod metrics;
pub mod person;
pub mod tracker;

pub use config::TrackerConfig;
pub use detector::{BodyDetector, Detection, FaceDetector};
pub use error::{TrackerError, TrackerResult};
pub use iou::IoUTracker;
pub use person::{BestShot, TrackedPerson};
pub use tracker::ObjectTracker;

//! Tracker metrics.

use metrics::{counter, gauge};
use vigil_models::{CameraId, TrackerEventKind};

pub mod names {
    pub const TRACKER_EVENTS_TOTAL: &str = "vigil_tracker_events_total";
    pub const ACTIVE_TRACKS: &str = "vigil_tracker_active_tracks";
}

pub fn record_event(camera_id: CameraId, kind: TrackerEventKind) {
    let labels = [
        ("camera_id", camera_id.to_string()),
        ("kind", kind.as_str().to_string()),
    ];
    counter!(names::TRACKER_EVENTS_TOTAL, &labels).increment(1);
}

pub fn set_active_tracks(camera_id: CameraId, count: usize) {
    gauge!(names::ACTIVE_TRACKS, "camera_id" => camera_id.to_string()).set(count as f64);
}

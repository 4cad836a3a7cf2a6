//! Capture metrics.

use metrics::{counter, gauge};
use vigil_models::CameraId;

pub mod names {
    pub const FRAMES_CAPTURED_TOTAL: &str = "vigil_frames_captured_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "vigil_frames_dropped_total";
    pub const RECONNECTS_TOTAL: &str = "vigil_capture_reconnects_total";
    pub const CAPTURE_FPS: &str = "vigil_capture_fps";
}

pub fn record_frame_captured(camera_id: CameraId) {
    counter!(names::FRAMES_CAPTURED_TOTAL, "camera_id" => camera_id.to_string()).increment(1);
}

pub fn record_frame_dropped(camera_id: CameraId) {
    counter!(names::FRAMES_DROPPED_TOTAL, "camera_id" => camera_id.to_string()).increment(1);
}

pub fn record_reconnect(camera_id: CameraId) {
    counter!(names::RECONNECTS_TOTAL, "camera_id" => camera_id.to_string()).increment(1);
}

pub fn set_fps(camera_id: CameraId, fps: f64) {
    gauge!(names::CAPTURE_FPS, "camera_id" => camera_id.to_string()).set(fps);
}

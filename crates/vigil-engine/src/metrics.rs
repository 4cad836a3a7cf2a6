//! Engine metrics.

use metrics::{counter, gauge, histogram};
use vigil_models::{CameraId, TrackerEventKind};

pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "vigil_engine_frames_processed_total";
    pub const FRAME_PROCESSING_SECONDS: &str = "vigil_engine_frame_processing_seconds";
    pub const WORKER_ERRORS_TOTAL: &str = "vigil_engine_worker_errors_total";
    pub const EVENTS_HANDLED_TOTAL: &str = "vigil_engine_events_handled_total";
    pub const ALERT_PUSHES_TOTAL: &str = "vigil_engine_alert_pushes_total";
    pub const WORK_ITEMS_DROPPED_TOTAL: &str = "vigil_engine_work_items_dropped_total";
    pub const BROADCAST_DROPPED_TOTAL: &str = "vigil_engine_broadcast_dropped_total";
    pub const STREAM_SUBSCRIBERS: &str = "vigil_engine_stream_subscribers";
    pub const ACTIVE_CAMERAS: &str = "vigil_engine_active_cameras";
    pub const SETTING_UPDATES_TOTAL: &str = "vigil_engine_setting_updates_total";
}

pub fn record_frame(camera_id: CameraId, duration_secs: f64) {
    let camera = camera_id.to_string();
    counter!(names::FRAMES_PROCESSED_TOTAL, "camera_id" => camera.clone()).increment(1);
    histogram!(names::FRAME_PROCESSING_SECONDS, "camera_id" => camera).record(duration_secs);
}

pub fn record_worker_error(camera_id: CameraId) {
    counter!(names::WORKER_ERRORS_TOTAL, "camera_id" => camera_id.to_string()).increment(1);
}

pub fn record_event(kind: TrackerEventKind) {
    counter!(names::EVENTS_HANDLED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_alert_push(transition: &'static str) {
    counter!(names::ALERT_PUSHES_TOTAL, "transition" => transition).increment(1);
}

pub fn record_work_item_dropped(item: &'static str) {
    counter!(names::WORK_ITEMS_DROPPED_TOTAL, "item" => item).increment(1);
}

pub fn record_broadcast_dropped(camera_id: CameraId, dropped: usize) {
    counter!(names::BROADCAST_DROPPED_TOTAL, "camera_id" => camera_id.to_string())
        .increment(dropped as u64);
}

pub fn set_stream_subscribers(camera_id: CameraId, count: usize) {
    gauge!(names::STREAM_SUBSCRIBERS, "camera_id" => camera_id.to_string()).set(count as f64);
}

pub fn set_active_cameras(count: usize) {
    gauge!(names::ACTIVE_CAMERAS).set(count as f64);
}

pub fn record_setting_update(key: &'static str) {
    counter!(names::SETTING_UPDATES_TOTAL, "key" => key).increment(1);
}

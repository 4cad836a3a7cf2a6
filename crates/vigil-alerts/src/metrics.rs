//! Alert metrics.

use metrics::counter;
use vigil_models::{AlertType, CameraId};

pub mod names {
    pub const ALERTS_CREATED_TOTAL: &str = "vigil_alerts_created_total";
    pub const ALERTS_UPDATED_TOTAL: &str = "vigil_alerts_updated_total";
    pub const HUB_MESSAGES_TOTAL: &str = "vigil_hub_messages_total";
    pub const CAPTURE_FILES_WRITTEN_TOTAL: &str = "vigil_capture_files_written_total";
}

pub fn record_created(camera_id: CameraId, alert_type: AlertType) {
    let labels = [
        ("camera_id", camera_id.to_string()),
        ("alert_type", alert_type.as_str().to_string()),
    ];
    counter!(names::ALERTS_CREATED_TOTAL, &labels).increment(1);
}

pub fn record_updated(transition: &'static str) {
    counter!(names::ALERTS_UPDATED_TOTAL, "transition" => transition).increment(1);
}

pub fn record_hub_message(kind: &'static str) {
    counter!(names::HUB_MESSAGES_TOTAL, "type" => kind).increment(1);
}

pub fn record_capture_file(kind: &'static str) {
    counter!(names::CAPTURE_FILES_WRITTEN_TOTAL, "kind" => kind).increment(1);
}

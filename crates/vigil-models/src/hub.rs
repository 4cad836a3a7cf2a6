//! JSON messages pushed to live subscribers.
//!
//! On the wire every message is `{"type": ..., "data": {...}, "timestamp": ...}`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::alert::{AlertId, AlertLevel, AlertStatus, AlertType};
use crate::frame::{CameraId, TrackId};
use crate::status::{CaptureStatus, EngineStatus};

/// Subscriber message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubMessage {
    Alert(AlertEvent),
    CameraStatus(CameraStatusEvent),
    EngineStatus(EngineStatusEvent),
    Notification(NotificationEvent),
}

impl HubMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            HubMessage::Alert(_) => "alert",
            HubMessage::CameraStatus(_) => "camera_status",
            HubMessage::EngineStatus(_) => "engine_status",
            HubMessage::Notification(_) => "notification",
        }
    }

    /// Camera the message is scoped to, if any.
    pub fn camera_id(&self) -> Option<CameraId> {
        match self {
            HubMessage::Alert(alert) => Some(alert.camera_id),
            HubMessage::CameraStatus(status) => Some(status.camera_id),
            _ => None,
        }
    }
}

/// A message stamped with its send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HubEnvelope {
    #[serde(flatten)]
    pub message: HubMessage,
    pub timestamp: DateTime<Utc>,
}

impl HubEnvelope {
    pub fn now(message: HubMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Alert created, or an existing alert materially changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlertEvent {
    /// `None` when persistence failed and the push is best-effort
    pub id: Option<AlertId>,
    pub camera_id: CameraId,
    pub track_id: TrackId,
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub status: AlertStatus,
    pub person_id: Option<i64>,
    pub person_name: Option<String>,
    pub similarity: Option<f32>,
    pub score: f64,
    pub face_image: Option<String>,
    pub body_image: Option<String>,
    pub full_image: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// True when this push describes a merge into an existing record
    #[serde(default)]
    pub is_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_alert_id: Option<AlertId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CameraStatusEvent {
    pub camera_id: CameraId,
    pub status: CaptureStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    pub camera_count: usize,
    pub running_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationEvent {
    pub message: String,
    /// info / success / warning / error
    pub level: String,
    pub title: Option<String>,
    /// Display duration in milliseconds
    pub duration: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = HubEnvelope::now(HubMessage::CameraStatus(CameraStatusEvent {
            camera_id: 3,
            status: CaptureStatus::Reconnecting,
        }));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "camera_status");
        assert_eq!(value["data"]["camera_id"], 3);
        assert_eq!(value["data"]["status"], "reconnecting");
        assert!(value.get("timestamp").is_some());

        let back: HubEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.message.camera_id(), Some(3));
        assert_eq!(back.message.type_name(), "camera_status");
    }
}

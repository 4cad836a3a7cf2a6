//! Subscriber event fan-out.

use tokio::sync::broadcast;
use tracing::debug;
use vigil_models::{
    AlertEvent, CameraId, CameraStatusEvent, CaptureStatus, EngineStatus, EngineStatusEvent,
    HubEnvelope, HubMessage, NotificationEvent,
};

use crate::metrics;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcasts JSON-serialisable events to every connected subscriber.
///
/// Slow subscribers lag and miss messages instead of slowing the engine.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<HubEnvelope>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stamp and send. Returns how many subscribers received it.
    pub fn publish(&self, message: HubMessage) -> usize {
        let kind = message.type_name();
        metrics::record_hub_message(kind);
        match self.sender.send(HubEnvelope::now(message)) {
            Ok(delivered) => delivered,
            Err(_) => {
                debug!(kind, "No subscribers for hub message");
                0
            }
        }
    }

    pub fn push_alert(&self, alert: AlertEvent) -> usize {
        self.publish(HubMessage::Alert(alert))
    }

    pub fn push_camera_status(&self, camera_id: CameraId, status: CaptureStatus) -> usize {
        self.publish(HubMessage::CameraStatus(CameraStatusEvent { camera_id, status }))
    }

    pub fn push_engine_status(&self, status: EngineStatus, camera_count: usize, running_count: usize) -> usize {
        self.publish(HubMessage::EngineStatus(EngineStatusEvent {
            status,
            camera_count,
            running_count,
        }))
    }

    pub fn notify(&self, level: &str, title: Option<&str>, message: impl Into<String>) -> usize {
        self.publish(HubMessage::Notification(NotificationEvent {
            message: message.into(),
            level: level.to_string(),
            title: title.map(str::to_string),
            duration: 5000,
        }))
    }
}

/// Serialise an envelope for a text transport.
pub fn to_json(envelope: &HubEnvelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = EventHub::new(8);
        assert_eq!(hub.push_camera_status(1, CaptureStatus::Running), 0);

        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.push_engine_status(EngineStatus::Running, 2, 1), 2);

        let received = a.recv().await.unwrap();
        assert_eq!(received.message.type_name(), "engine_status");
        assert_eq!(b.recv().await.unwrap(), received);

        let json = to_json(&received).unwrap();
        assert!(json.contains("\"type\":\"engine_status\""));
    }

    #[tokio::test]
    async fn test_notification_shape() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        hub.notify("warning", Some("Camera"), "Camera 3 offline");

        let HubMessage::Notification(note) = rx.recv().await.unwrap().message else {
            panic!("expected notification");
        };
        assert_eq!(note.level, "warning");
        assert_eq!(note.title.as_deref(), Some("Camera"));
    }
}

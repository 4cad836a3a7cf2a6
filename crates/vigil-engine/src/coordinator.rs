//! The coordination loop.
//!
//! Camera workers never touch shared I/O themselves. They submit
//! [`WorkItem`]s over one channel, and this loop performs image saving,
//! recognition, alert persistence and subscriber pushes. A worker that
//! attaches a reply channel to its events waits for them to be fully handled
//! before it moves on, which keeps one camera's alert merges in frame order.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use vigil_alerts::{AlertObservation, ImageRefs, Transition};
use vigil_models::{AlertType, CameraId, CaptureStatus, TrackerEvent};

use crate::broadcaster::JpegFrame;
use crate::context::EngineContext;
use crate::metrics;

/// Work handed from a camera worker to the coordination loop.
#[derive(Debug)]
pub enum WorkItem {
    /// Events from one frame. `reply` receives the number of alerts pushed.
    Events {
        camera_id: CameraId,
        events: Vec<TrackerEvent>,
        reply: Option<oneshot::Sender<usize>>,
    },
    /// Annotated live-view frame
    Frame { camera_id: CameraId, frame: JpegFrame },
    CameraStatus {
        camera_id: CameraId,
        status: CaptureStatus,
    },
}

impl WorkItem {
    pub fn name(&self) -> &'static str {
        match self {
            WorkItem::Events { .. } => "events",
            WorkItem::Frame { .. } => "frame",
            WorkItem::CameraStatus { .. } => "camera_status",
        }
    }
}

/// Runs every cross-camera side effect.
#[derive(Clone)]
pub struct Coordinator {
    context: Arc<EngineContext>,
}

impl Coordinator {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Consume work items until `shutdown` flips to true or every sender is gone.
    pub async fn run(self, mut items: mpsc::Receiver<WorkItem>, mut shutdown: watch::Receiver<bool>) {
        info!("Coordination loop started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping coordination loop");
                        break;
                    }
                }
                item = items.recv() => match item {
                    Some(item) => self.dispatch(item),
                    None => break,
                }
            }
        }
        info!("Coordination loop stopped");
    }

    fn dispatch(&self, item: WorkItem) {
        match item {
            WorkItem::Frame { camera_id, frame } => {
                self.context.broadcaster().broadcast(camera_id, frame);
            }
            WorkItem::CameraStatus { camera_id, status } => {
                info!(camera_id, status = %status, "Camera status changed");
                self.context.hub().push_camera_status(camera_id, status);
            }
            WorkItem::Events {
                camera_id,
                events,
                reply,
            } => {
                let coordinator = self.clone();
                tokio::spawn(async move {
                    let pushed = coordinator.handle_events(camera_id, events).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(pushed);
                    }
                });
            }
        }
    }

    /// Handle one frame's events in order. Returns how many alerts were pushed.
    pub async fn handle_events(&self, camera_id: CameraId, events: Vec<TrackerEvent>) -> usize {
        let mut pushed = 0;
        for event in events {
            if self.handle_event(camera_id, event).await {
                pushed += 1;
            }
        }
        pushed
    }

    /// Save crops, recognise, merge into the track's alert and push if it matters.
    ///
    /// Returns whether an alert was pushed to subscribers.
    pub async fn handle_event(&self, camera_id: CameraId, event: TrackerEvent) -> bool {
        metrics::record_event(event.kind());
        let event = Arc::new(event);
        let images = self.save_images(camera_id, &event).await;

        let (observation, recognition) = match event.as_ref() {
            TrackerEvent::FaceDetected(face) => {
                let recognition = self
                    .context
                    .gateway()
                    .recognize(camera_id, &face.face_image)
                    .await;
                let observation = AlertObservation::face(
                    camera_id,
                    face.track_id,
                    &recognition.matched,
                    recognition.decision.alert_type,
                    face.face_score,
                    images,
                    face.timestamp,
                );
                (observation, Some(recognition))
            }
            TrackerEvent::BodyDetected(body) => (
                AlertObservation::body(camera_id, body.track_id, body.body_score, images, body.timestamp),
                None,
            ),
        };
        // Known persons are pushed as informational entries. Strangers and
        // blacklist hits need the alert policy and cooldown to agree.
        let quiet = recognition.as_ref().is_some_and(|r| {
            !r.decision.should_alert && r.decision.alert_type != AlertType::Known
        });

        match self.context.lifecycle().apply(&observation).await {
            Ok(outcome) => {
                let push = match outcome.transition {
                    Transition::Created | Transition::Escalated => !quiet,
                    transition => transition.should_notify(),
                };
                if !push {
                    debug!(
                        alert_id = outcome.record.id,
                        camera_id,
                        track_id = observation.track_id,
                        transition = outcome.transition.as_str(),
                        "Alert updated without push"
                    );
                    return false;
                }

                info!(
                    alert_id = outcome.record.id,
                    camera_id,
                    track_id = observation.track_id,
                    alert_type = %outcome.record.alert_type,
                    level = %outcome.record.alert_level,
                    transition = outcome.transition.as_str(),
                    "Alert pushed"
                );
                self.context.hub().push_alert(outcome.to_event(&observation));
                metrics::record_alert_push(outcome.transition.as_str());
            }
            Err(e) => {
                warn!(
                    camera_id,
                    track_id = observation.track_id,
                    "Alert persistence failed: {}", e
                );
                if quiet {
                    return false;
                }
                self.context.hub().push_alert(observation.to_event());
                metrics::record_alert_push("unpersisted");
            }
        }

        // The cooldown window starts only once an alert has been delivered
        if let Some(recognition) = recognition.filter(|r| r.decision.should_alert) {
            self.context
                .gateway()
                .record_alert(camera_id, &recognition.matched);
        }
        true
    }

    async fn save_images(&self, camera_id: CameraId, event: &Arc<TrackerEvent>) -> ImageRefs {
        let store = Arc::clone(self.context.images());
        let event = Arc::clone(event);
        let track_id = event.track_id();

        match tokio::task::spawn_blocking(move || store.save_event(camera_id, &event)).await {
            Ok(Ok(refs)) => refs,
            Ok(Err(e)) => {
                warn!(camera_id, track_id, "Failed to save event images: {}", e);
                ImageRefs::default()
            }
            Err(e) => {
                warn!(camera_id, track_id, "Image save task failed: {}", e);
                ImageRefs::default()
            }
        }
    }
}

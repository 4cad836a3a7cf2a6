//! Per-camera tracking pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, trace};
use vigil_models::{
    BodyObservation, BoundingBox, CameraId, FaceObservation, TrackId, TrackerEvent,
};

use crate::annotate::{draw_box, draw_roi, BODY_COLOR, FACE_COLOR};
use crate::config::TrackerConfig;
use crate::crop::crop_best;
use crate::detector::{BodyDetector, FaceDetector};
use crate::error::TrackerResult;
use crate::iou::IoUTracker;
use crate::metrics;
use crate::person::TrackedPerson;

/// Turns frames into tracker events for one camera.
///
/// Not shared: the camera's analysis worker owns it and is the only caller.
pub struct ObjectTracker {
    camera_id: CameraId,
    body: Arc<dyn BodyDetector>,
    face: Arc<dyn FaceDetector>,
    ids: IoUTracker,
    persons: HashMap<TrackId, TrackedPerson>,
    config: TrackerConfig,
}

impl ObjectTracker {
    pub fn new(
        camera_id: CameraId,
        body: Arc<dyn BodyDetector>,
        face: Arc<dyn FaceDetector>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            camera_id,
            body,
            face,
            ids: IoUTracker::new(config.iou_threshold, config.effective_id_gap()),
            persons: HashMap::new(),
            config,
        }
    }

    /// Continue track numbering from an earlier tracker of the same camera.
    pub fn with_first_track_id(mut self, first_id: TrackId) -> Self {
        self.ids = IoUTracker::starting_at(self.config.iou_threshold, self.config.effective_id_gap(), first_id);
        self
    }

    /// Id the next newly seen person will receive.
    pub fn next_track_id(&self) -> TrackId {
        self.ids.next_id()
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Swap thresholds. Track identities and best shots are kept.
    pub fn set_config(&mut self, config: TrackerConfig) {
        self.ids.set_max_gap(config.effective_id_gap());
        self.config = config;
    }

    /// Forget every track, e.g. after the stream reconnects. Ids are not reused.
    pub fn reset(&mut self) {
        self.ids.reset();
        self.persons.clear();
        metrics::set_active_tracks(self.camera_id, 0);
    }

    pub fn active_tracks(&self) -> usize {
        self.persons.len()
    }

    pub fn person(&self, track_id: TrackId) -> Option<&TrackedPerson> {
        self.persons.get(&track_id)
    }

    /// Run one frame through detection, best-shot bookkeeping and event emission.
    ///
    /// Returns the frame with overlays drawn, plus any events produced.
    pub fn process(
        &mut self,
        image: &RgbImage,
        timestamp: DateTime<Utc>,
    ) -> TrackerResult<(RgbImage, Vec<TrackerEvent>)> {
        let (width, height) = image.dimensions();
        let shared = Arc::new(image.clone());
        let mut annotated = image.clone();
        let mut events = Vec::new();

        // Bodies
        let min_height = height as f64 * self.config.min_body_height_ratio;
        let bodies: Vec<(BoundingBox, f32)> = self
            .body
            .detect_persons(image)?
            .into_iter()
            .filter(|d| d.confidence >= self.config.body_confidence && d.bbox.height >= min_height)
            .map(|d| (d.bbox, d.confidence))
            .collect();
        let visible = self.ids.update(&bodies);

        for &(track_id, bbox, _) in &visible {
            let person = self
                .persons
                .entry(track_id)
                .or_insert_with(|| TrackedPerson::new(track_id, timestamp));
            person.last_seen = timestamp;
            person.disappeared = 0;
            person.update_body(&shared, bbox);
            draw_box(&mut annotated, &bbox, BODY_COLOR);
        }

        // ROI gate
        let qualifying: Vec<TrackId> = match &self.config.roi {
            Some(roi) => {
                draw_roi(&mut annotated, roi);
                visible
                    .iter()
                    .filter(|(_, bbox, _)| roi.contains(bbox.cx(), bbox.cy(), width, height))
                    .map(|(id, _, _)| *id)
                    .collect()
            }
            None => visible.iter().map(|(id, _, _)| *id).collect(),
        };

        // Faces
        if !qualifying.is_empty() {
            let faces = self.face.detect_faces(image)?;
            for face in faces
                .into_iter()
                .filter(|f| f.confidence >= self.config.face_confidence)
            {
                draw_box(&mut annotated, &face.bbox, FACE_COLOR);

                let Some(track_id) = self.match_face_to_body(&face.bbox, &visible) else {
                    continue;
                };
                if !qualifying.contains(&track_id) {
                    continue;
                }
                let Some(person) = self.persons.get_mut(&track_id) else {
                    continue;
                };
                if !person.update_face(&shared, face.bbox, face.confidence) {
                    continue;
                }

                let score = person.best_face_score();
                if person.should_emit_face(score, timestamp, &self.config) {
                    if let Some(event) = face_event(person, &shared, timestamp, &self.config) {
                        debug!(
                            camera_id = self.camera_id,
                            track_id,
                            score,
                            "Face best shot emitted"
                        );
                        events.push(event);
                    }
                }
            }
        }

        // Loitering
        for &(track_id, _, _) in &visible {
            let Some(person) = self.persons.get_mut(&track_id) else {
                continue;
            };
            if !person.is_loitering(timestamp, &self.config) {
                continue;
            }
            if let Some(event) = body_event(person, &shared, timestamp, &self.config) {
                debug!(camera_id = self.camera_id, track_id, "Faceless person lingering");
                person.body_reported = true;
                events.push(event);
            }
        }

        // Departures
        let max_disappeared = self.config.max_disappeared;
        let camera_id = self.camera_id;
        self.persons.retain(|track_id, person| {
            if visible.iter().any(|(id, _, _)| id == track_id) {
                return true;
            }
            person.disappeared += 1;
            let keep = person.disappeared <= max_disappeared;
            if !keep {
                trace!(camera_id, track_id, "Track departed");
            }
            keep
        });

        for event in &events {
            metrics::record_event(self.camera_id, event.kind());
        }
        metrics::set_active_tracks(self.camera_id, self.persons.len());

        Ok((annotated, events))
    }

    /// Nearest visible body whose margin-expanded box contains the face center.
    fn match_face_to_body(
        &self,
        face: &BoundingBox,
        visible: &[(TrackId, BoundingBox, f32)],
    ) -> Option<TrackId> {
        let (fx, fy) = (face.cx(), face.cy());
        visible
            .iter()
            .filter(|(_, bbox, _)| bbox.expand(self.config.face_body_margin).contains(fx, fy))
            .map(|(id, bbox, _)| (*id, (bbox.cx() - fx).powi(2) + (bbox.cy() - fy).powi(2)))
            .fold(None, |best: Option<(TrackId, f64)>, (id, dist)| match best {
                Some((_, best_dist)) if best_dist <= dist => best,
                _ => Some((id, dist)),
            })
            .map(|(id, _)| id)
    }
}

fn face_event(
    person: &TrackedPerson,
    frame: &Arc<RgbImage>,
    timestamp: DateTime<Utc>,
    config: &TrackerConfig,
) -> Option<TrackerEvent> {
    let face = person.best_face.as_ref()?;
    let face_image = crop_best(face, config.face_crop_pad)?;
    let body_image = person
        .best_body
        .as_ref()
        .and_then(|body| crop_best(body, config.body_crop_pad));

    Some(TrackerEvent::FaceDetected(FaceObservation {
        track_id: person.track_id,
        timestamp,
        face_image,
        body_image,
        full_image: frame.as_ref().clone(),
        face_score: face.score,
        body_score: person.best_body_score(),
        face_box: face.bbox,
        body_box: person.best_body.as_ref().map(|b| b.bbox),
    }))
}

fn body_event(
    person: &TrackedPerson,
    frame: &Arc<RgbImage>,
    timestamp: DateTime<Utc>,
    config: &TrackerConfig,
) -> Option<TrackerEvent> {
    let body = person.best_body.as_ref()?;
    let body_image = crop_best(body, config.body_crop_pad)?;

    Some(TrackerEvent::BodyDetected(BodyObservation {
        track_id: person.track_id,
        timestamp,
        body_image,
        full_image: frame.as_ref().clone(),
        body_score: body.score,
        body_box: body.bbox,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detection;
    use crate::error::TrackerError;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vigil_models::{Roi, TrackerEventKind};

    /// Returns whatever detections were last scripted.
    #[derive(Default)]
    struct Scripted {
        detections: Mutex<Vec<Detection>>,
        calls: AtomicUsize,
        fail: Mutex<bool>,
    }

    impl Scripted {
        fn set(&self, detections: Vec<Detection>) {
            *self.detections.lock().unwrap() = detections;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Vec<Detection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.detections.lock().unwrap().clone()
        }
    }

    impl BodyDetector for Scripted {
        fn detect_persons(&self, _frame: &RgbImage) -> TrackerResult<Vec<Detection>> {
            if *self.fail.lock().unwrap() {
                return Err(TrackerError::body_detection("scripted failure"));
            }
            Ok(self.next())
        }

        fn name(&self) -> &'static str {
            "scripted-body"
        }
    }

    impl FaceDetector for Scripted {
        fn detect_faces(&self, _frame: &RgbImage) -> TrackerResult<Vec<Detection>> {
            Ok(self.next())
        }

        fn name(&self) -> &'static str {
            "scripted-face"
        }
    }

    struct Harness {
        bodies: Arc<Scripted>,
        faces: Arc<Scripted>,
        tracker: ObjectTracker,
        frame: RgbImage,
        t0: DateTime<Utc>,
    }

    fn harness(config: TrackerConfig) -> Harness {
        let bodies = Arc::new(Scripted::default());
        let faces = Arc::new(Scripted::default());
        let tracker = ObjectTracker::new(
            7,
            Arc::clone(&bodies) as Arc<dyn BodyDetector>,
            Arc::clone(&faces) as Arc<dyn FaceDetector>,
            config,
        );
        Harness {
            bodies,
            faces,
            tracker,
            frame: RgbImage::new(640, 480),
            t0: Utc::now(),
        }
    }

    impl Harness {
        fn step(&mut self, millis: i64) -> Vec<TrackerEvent> {
            let ts = self.t0 + ChronoDuration::milliseconds(millis);
            self.tracker.process(&self.frame, ts).unwrap().1
        }
    }

    fn body() -> Detection {
        Detection::new(BoundingBox::new(280.0, 120.0, 80.0, 240.0), 0.9)
    }

    fn face(confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(305.0, 130.0, 30.0, 30.0), confidence)
    }

    #[test]
    fn test_face_event_emitted_once_for_steady_face() {
        let mut h = harness(TrackerConfig::default());
        h.bodies.set(vec![body()]);
        h.faces.set(vec![face(0.8)]);

        let first = h.step(0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind(), TrackerEventKind::FaceDetected);
        assert_eq!(first[0].track_id(), 1);
        assert!((first[0].score() - 800.0).abs() < 1e-3);

        for i in 1..10 {
            assert!(h.step(i * 200).is_empty(), "same face must not re-emit");
        }
    }

    #[test]
    fn test_improved_face_fast_passes_cooldown() {
        let mut h = harness(TrackerConfig::default());
        h.bodies.set(vec![body()]);
        h.faces.set(vec![face(0.7)]);
        assert_eq!(h.step(0).len(), 1);

        h.faces.set(vec![face(0.8)]);
        assert!(h.step(200).is_empty(), "14% better is not enough during cooldown");

        h.faces.set(vec![face(0.95)]);
        let events = h.step(400);
        assert_eq!(events.len(), 1);
        let TrackerEvent::FaceDetected(obs) = &events[0] else {
            panic!("expected face event");
        };
        assert!(obs.body_image.is_some());
        assert_eq!(obs.full_image.dimensions(), (640, 480));
        assert_eq!(obs.face_image.dimensions(), (48, 48));
    }

    #[test]
    fn test_low_quality_face_is_not_emitted() {
        let mut h = harness(TrackerConfig::default());
        h.bodies.set(vec![body()]);
        h.faces.set(vec![face(0.55)]);
        assert!(h.step(0).is_empty());
        assert!((h.tracker.person(1).unwrap().best_face_score() - 550.0).abs() < 1e-3);
    }

    #[test]
    fn test_loitering_fires_once() {
        let mut h = harness(TrackerConfig::default());
        h.bodies.set(vec![body()]);

        assert!(h.step(0).is_empty());
        assert!(h.step(500).is_empty());

        let events = h.step(1500);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), TrackerEventKind::BodyDetected);

        for i in 2..8 {
            assert!(h.step(i * 1000).is_empty());
        }
    }

    #[test]
    fn test_roi_gate_skips_face_detection() {
        let config = TrackerConfig {
            roi: Some(Roi::new(0.0, 0.0, 0.2, 0.2).unwrap()),
            ..Default::default()
        };
        let mut h = harness(config);
        h.bodies.set(vec![body()]);
        h.faces.set(vec![face(0.9)]);

        assert!(h.step(0).is_empty());
        assert_eq!(h.faces.calls(), 0);
    }

    #[test]
    fn test_small_and_weak_bodies_are_ignored() {
        let mut h = harness(TrackerConfig::default());
        h.bodies.set(vec![
            Detection::new(BoundingBox::new(10.0, 10.0, 10.0, 20.0), 0.9),
            Detection::new(BoundingBox::new(300.0, 100.0, 80.0, 240.0), 0.3),
        ]);
        h.step(0);
        assert_eq!(h.tracker.active_tracks(), 0);
        assert_eq!(h.faces.calls(), 0);
    }

    #[test]
    fn test_face_outside_body_margin_is_unmatched() {
        let mut h = harness(TrackerConfig::default());
        h.bodies.set(vec![body()]);
        h.faces.set(vec![Detection::new(BoundingBox::new(10.0, 10.0, 30.0, 30.0), 0.9)]);
        assert!(h.step(0).is_empty());
        assert!(h.tracker.person(1).unwrap().best_face.is_none());
    }

    #[test]
    fn test_track_evicted_after_absence() {
        let config = TrackerConfig {
            max_disappeared: 3,
            ..Default::default()
        };
        let mut h = harness(config);
        h.bodies.set(vec![body()]);
        h.step(0);
        assert_eq!(h.tracker.active_tracks(), 1);

        h.bodies.set(vec![]);
        for i in 1..=3 {
            assert!(h.step(i * 200).is_empty());
            assert_eq!(h.tracker.active_tracks(), 1);
        }
        assert!(h.step(800).is_empty());
        assert_eq!(h.tracker.active_tracks(), 0);
    }

    #[test]
    fn test_id_survives_as_long_as_the_person() {
        let config = TrackerConfig {
            id_max_gap: 2,
            max_disappeared: 5,
            ..Default::default()
        };
        let mut h = harness(config);
        h.bodies.set(vec![body()]);
        h.step(0);

        h.bodies.set(vec![]);
        for i in 1..=4 {
            h.step(i * 200);
        }
        h.bodies.set(vec![body()]);
        h.step(1000);
        assert_eq!(h.tracker.active_tracks(), 1);
        assert!(h.tracker.person(1).is_some());
        assert_eq!(h.tracker.next_track_id(), 2);
    }

    #[test]
    fn test_seeded_tracker_continues_numbering() {
        let mut h = harness(TrackerConfig::default());
        h.tracker = ObjectTracker::new(
            7,
            Arc::clone(&h.bodies) as Arc<dyn BodyDetector>,
            Arc::clone(&h.faces) as Arc<dyn FaceDetector>,
            TrackerConfig::default(),
        )
        .with_first_track_id(9);
        h.bodies.set(vec![body()]);
        h.step(0);
        assert!(h.tracker.person(9).is_some());
        assert_eq!(h.tracker.next_track_id(), 10);

        h.tracker.reset();
        h.step(200);
        assert!(h.tracker.person(10).is_some());
    }

    #[test]
    fn test_trackers_do_not_share_state() {
        let mut a = harness(TrackerConfig::default());
        let mut b = harness(TrackerConfig::default());
        a.bodies.set(vec![body()]);
        a.step(0);
        b.step(0);
        assert_eq!(a.tracker.active_tracks(), 1);
        assert_eq!(b.tracker.active_tracks(), 0);
    }

    #[test]
    fn test_detector_error_propagates() {
        let mut h = harness(TrackerConfig::default());
        *h.bodies.fail.lock().unwrap() = true;
        let result = h.tracker.process(&h.frame, h.t0);
        assert!(matches!(result, Err(TrackerError::BodyDetection(_))));
    }
}

//! Per-track best-shot state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use vigil_models::{BoundingBox, TrackId};

use crate::config::TrackerConfig;

/// Highest-scoring observation so far, with the frame it was seen on.
#[derive(Debug, Clone)]
pub struct BestShot {
    pub score: f64,
    pub bbox: BoundingBox,
    pub frame: Arc<RgbImage>,
}

/// State for one person visible to one camera.
///
/// Owned by a single [`ObjectTracker`](crate::ObjectTracker); never shared.
#[derive(Debug, Clone)]
pub struct TrackedPerson {
    pub track_id: TrackId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub best_body: Option<BestShot>,
    pub best_face: Option<BestShot>,
    /// When the last face event for this track was emitted
    pub last_emitted_at: Option<DateTime<Utc>>,
    /// Face score carried by the last emitted face event
    pub last_emitted_face_score: f64,
    /// Loitering already reported
    pub body_reported: bool,
    /// Consecutive frames this track was not visible
    pub disappeared: u32,
}

impl TrackedPerson {
    pub fn new(track_id: TrackId, now: DateTime<Utc>) -> Self {
        Self {
            track_id,
            first_seen: now,
            last_seen: now,
            best_body: None,
            best_face: None,
            last_emitted_at: None,
            last_emitted_face_score: 0.0,
            body_reported: false,
            disappeared: 0,
        }
    }

    pub fn best_body_score(&self) -> f64 {
        self.best_body.as_ref().map_or(0.0, |b| b.score)
    }

    pub fn best_face_score(&self) -> f64 {
        self.best_face.as_ref().map_or(0.0, |f| f.score)
    }

    /// Keep the body observation if it beats the stored best.
    ///
    /// Returns whether the best shot was replaced.
    pub fn update_body(&mut self, frame: &Arc<RgbImage>, bbox: BoundingBox) -> bool {
        let score = body_score(&bbox, frame.width(), frame.height());
        if score <= self.best_body_score() {
            return false;
        }
        self.best_body = Some(BestShot {
            score,
            bbox,
            frame: Arc::clone(frame),
        });
        true
    }

    /// Keep the face observation if it beats the stored best.
    ///
    /// Returns whether the best shot was replaced.
    pub fn update_face(&mut self, frame: &Arc<RgbImage>, bbox: BoundingBox, confidence: f32) -> bool {
        let score = face_score(confidence);
        if score <= self.best_face_score() {
            return false;
        }
        self.best_face = Some(BestShot {
            score,
            bbox,
            frame: Arc::clone(frame),
        });
        true
    }

    /// Decide whether a face scoring `score` at `now` warrants a new face event,
    /// and record the emission if so.
    pub fn should_emit_face(&mut self, score: f64, now: DateTime<Utc>, config: &TrackerConfig) -> bool {
        let saved = self.last_emitted_face_score;

        let in_cooldown = self.last_emitted_at.is_some_and(|at| {
            (now - at)
                .to_std()
                .map_or(true, |elapsed| elapsed < config.face_cooldown)
        });
        if in_cooldown && score <= saved * config.fast_pass_ratio {
            return false;
        }

        if score < config.min_face_quality {
            return false;
        }

        if score > saved * config.min_improvement_ratio {
            self.last_emitted_at = Some(now);
            self.last_emitted_face_score = score;
            return true;
        }
        false
    }

    /// Faceless and present long enough to be reported, and not reported yet.
    pub fn is_loitering(&self, now: DateTime<Utc>, config: &TrackerConfig) -> bool {
        if self.body_reported || self.best_face_score() >= config.loiter_face_floor {
            return false;
        }
        (now - self.first_seen)
            .to_std()
            .is_ok_and(|dwell| dwell > config.loiter_dwell)
    }
}

/// Area ratio weighted by how close the box center sits to the frame center, scaled to 0..1000.
pub fn body_score(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> f64 {
    let w = frame_width as f64;
    let h = frame_height as f64;
    if w <= 0.0 || h <= 0.0 {
        return 0.0;
    }

    let (fcx, fcy) = (w / 2.0, h / 2.0);
    let dist = ((bbox.cx() - fcx).powi(2) + (bbox.cy() - fcy).powi(2)).sqrt();
    let max_dist = (fcx.powi(2) + fcy.powi(2)).sqrt();
    let centrality = 1.0 - dist / max_dist;

    let area_ratio = bbox.area() / (w * h);
    area_ratio * (centrality + 0.5) * 1000.0
}

pub fn face_score(confidence: f32) -> f64 {
    confidence as f64 * 1000.0
}

//! Tracker tuning.

use std::time::Duration;

use vigil_models::Roi;

/// Thresholds for detection filtering, best-shot emission and departure.
///
/// Face and body scores are on a 0..1000 scale (confidence or
/// area-times-centrality, scaled by 1000).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Minimum body detector confidence
    pub body_confidence: f32,
    /// Minimum face detector confidence
    pub face_confidence: f32,
    /// Bodies shorter than this fraction of the frame height are ignored
    pub min_body_height_ratio: f64,
    /// IoU needed to keep a body on its previous track id
    pub iou_threshold: f64,
    /// Frames a body may go unmatched before its id is retired. Never below `max_disappeared`.
    pub id_max_gap: u32,
    /// Missed frames after which a tracked person is considered gone
    pub max_disappeared: u32,
    /// Face detection only runs while a body center is inside this region
    pub roi: Option<Roi>,
    /// Minimum spacing between face events of one track
    pub face_cooldown: Duration,
    /// Face score needed for a face event
    pub min_face_quality: f64,
    /// A face event during cooldown needs more than this ratio over the last emitted score
    pub fast_pass_ratio: f64,
    /// Any face event needs more than this ratio over the last emitted score
    pub min_improvement_ratio: f64,
    /// Tracks whose best face stays below this are loitering candidates
    pub loiter_face_floor: f64,
    /// Dwell time before a faceless track is reported
    pub loiter_dwell: Duration,
    /// Fractional margin around a body box within which a face center may fall
    pub face_body_margin: f64,
    /// Crop padding as a fraction of the face width
    pub face_crop_pad: f64,
    /// Crop padding as a fraction of the body width
    pub body_crop_pad: f64,
}

impl TrackerConfig {
    /// Identity gap actually used, so an id outlives the person it belongs to.
    pub fn effective_id_gap(&self) -> u32 {
        self.id_max_gap.max(self.max_disappeared)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            body_confidence: 0.55,
            face_confidence: 0.50,
            min_body_height_ratio: 0.05,
            iou_threshold: 0.3,
            id_max_gap: 40,
            max_disappeared: 40,
            roi: None,
            face_cooldown: Duration::from_secs(60),
            min_face_quality: 600.0,
            fast_pass_ratio: 1.2,
            min_improvement_ratio: 1.05,
            loiter_face_floor: 300.0,
            loiter_dwell: Duration::from_secs(1),
            face_body_margin: 0.2,
            face_crop_pad: 0.3,
            body_crop_pad: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_gap_covers_disappearance() {
        let config = TrackerConfig::default();
        assert!(config.id_max_gap >= config.max_disappeared);

        let short = TrackerConfig {
            id_max_gap: 5,
            max_disappeared: 12,
            ..Default::default()
        };
        assert_eq!(short.effective_id_gap(), 12);
    }
}

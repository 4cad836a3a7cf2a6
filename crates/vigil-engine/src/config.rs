//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use vigil_models::Roi;
use vigil_recognition::{RecognitionClientConfig, RecognizerConfig};

pub const DEFAULT_DETECTION_ROI: &str = "0.15,0.25,0.85,0.95";

/// Engine configuration, read once at process start.
///
/// Values that can change while the engine runs are copied into
/// [`EngineSettings`](crate::settings::EngineSettings) and updated there.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root served as `/static`
    pub data_dir: PathBuf,
    /// Where event crops are written
    pub captures_dir: PathBuf,
    pub recognition: RecognitionClientConfig,
    pub recognizer: RecognizerConfig,
    pub face_confidence: f32,
    pub body_confidence: f32,
    /// Face detection only runs for bodies inside this region; `None` means the whole frame
    pub detection_roi: Option<Roi>,
    pub data_retention_days: u32,
    /// JPEG quality for stored crops
    pub capture_quality: u8,
    /// JPEG quality for live-view frames
    pub stream_quality: u8,
    /// Frames buffered per live-view subscriber
    pub subscriber_capacity: usize,
    /// Pending work items the coordination loop accepts before workers block
    pub coordinator_capacity: usize,
    /// How long a worker waits on its frame queue before re-checking its stop flag
    pub frame_wait: Duration,
    /// Pause after a failed frame before the worker continues
    pub error_pause: Duration,
    /// Bounded join when stopping a camera
    pub stop_timeout: Duration,
    pub cooldown_sweep_interval: Duration,
    pub retention_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            captures_dir: PathBuf::from("data/captures"),
            recognition: RecognitionClientConfig::default(),
            recognizer: RecognizerConfig::default(),
            face_confidence: 0.50,
            body_confidence: 0.55,
            detection_roi: parse_roi(DEFAULT_DETECTION_ROI),
            data_retention_days: 30,
            capture_quality: 85,
            stream_quality: 70,
            subscriber_capacity: 2,
            coordinator_capacity: 256,
            frame_wait: Duration::from_millis(500),
            error_pause: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(2),
            cooldown_sweep_interval: Duration::from_secs(60),
            retention_interval: Duration::from_secs(6 * 3600),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = std::env::var("VIGIL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let captures_dir = std::env::var("VIGIL_CAPTURES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("captures"));

        Self {
            data_dir,
            captures_dir,
            recognition: RecognitionClientConfig::from_env(),
            recognizer: RecognizerConfig::from_env(),
            face_confidence: std::env::var("FACE_DETECTION_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.face_confidence),
            body_confidence: std::env::var("BODY_DETECTION_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.body_confidence),
            detection_roi: std::env::var("DETECTION_ROI")
                .map(|v| parse_roi(&v))
                .unwrap_or(defaults.detection_roi),
            data_retention_days: std::env::var("DATA_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.data_retention_days),
            capture_quality: std::env::var("CAPTURE_QUALITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capture_quality),
            stream_quality: std::env::var("STREAM_QUALITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stream_quality),
            stop_timeout: Duration::from_secs(
                std::env::var("CAMERA_STOP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
            ..defaults
        }
    }
}

/// Parse a detection ROI. Empty, `none` or `off` disable the region.
///
/// A malformed value is logged and treated as no region.
pub fn parse_roi(value: &str) -> Option<Roi> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("off") {
        return None;
    }
    match trimmed.parse::<Roi>() {
        Ok(roi) => Some(roi),
        Err(e) => {
            warn!(value = trimmed, "Ignoring invalid detection ROI: {}", e);
            None
        }
    }
}

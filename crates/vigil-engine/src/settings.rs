//! Live engine settings and the typed schema used to update them.
//!
//! The management layer stores settings as strings keyed by name. Each known
//! name maps to a [`SettingKey`] with a fixed [`SettingKind`]; a raw string is
//! coerced to that kind once, range-checked, then written into
//! [`EngineSettings`].

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use vigil_models::Roi;
use vigil_recognition::config::parse_id_list;
use vigil_tracker::TrackerConfig;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Value type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Int,
    Float,
    Bool,
    Text,
}

/// A coerced setting value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{}", v),
            SettingValue::Float(v) => write!(f, "{}", v),
            SettingValue::Bool(v) => write!(f, "{}", v),
            SettingValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl SettingKind {
    /// Coerce a raw string. Integers accept decimal input and truncate.
    pub fn coerce(&self, raw: &str) -> Result<SettingValue, String> {
        let trimmed = raw.trim();
        match self {
            SettingKind::Int => parse_number(trimmed).map(|v| SettingValue::Int(v.trunc() as i64)),
            SettingKind::Float => parse_number(trimmed).map(SettingValue::Float),
            SettingKind::Bool => Ok(SettingValue::Bool(
                trimmed.eq_ignore_ascii_case("true") || trimmed == "1",
            )),
            SettingKind::Text => Ok(SettingValue::Text(raw.to_string())),
        }
    }
}

fn parse_number(raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("'{}' is not a number", raw))
}

/// Externally visible setting names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    FaceSimilarityThreshold,
    FaceDetectionConfidence,
    BodyDetectionConfidence,
    AlertCooldownSeconds,
    DataRetentionDays,
    CaptureQuality,
    ConcurrentLimit,
    DetectionRoi,
    AlertOnStranger,
    BlacklistGroupIds,
}

impl SettingKey {
    pub const ALL: [SettingKey; 10] = [
        SettingKey::FaceSimilarityThreshold,
        SettingKey::FaceDetectionConfidence,
        SettingKey::BodyDetectionConfidence,
        SettingKey::AlertCooldownSeconds,
        SettingKey::DataRetentionDays,
        SettingKey::CaptureQuality,
        SettingKey::ConcurrentLimit,
        SettingKey::DetectionRoi,
        SettingKey::AlertOnStranger,
        SettingKey::BlacklistGroupIds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::FaceSimilarityThreshold => "face_similarity_threshold",
            SettingKey::FaceDetectionConfidence => "face_detection_confidence",
            SettingKey::BodyDetectionConfidence => "body_detection_confidence",
            SettingKey::AlertCooldownSeconds => "alert_cooldown_seconds",
            SettingKey::DataRetentionDays => "data_retention_days",
            SettingKey::CaptureQuality => "capture_quality",
            SettingKey::ConcurrentLimit => "concurrent_limit",
            SettingKey::DetectionRoi => "detection_roi",
            SettingKey::AlertOnStranger => "alert_on_stranger",
            SettingKey::BlacklistGroupIds => "blacklist_group_ids",
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingKey::FaceSimilarityThreshold
            | SettingKey::FaceDetectionConfidence
            | SettingKey::BodyDetectionConfidence => SettingKind::Float,
            SettingKey::AlertCooldownSeconds
            | SettingKey::DataRetentionDays
            | SettingKey::CaptureQuality
            | SettingKey::ConcurrentLimit => SettingKind::Int,
            SettingKey::AlertOnStranger => SettingKind::Bool,
            SettingKey::DetectionRoi | SettingKey::BlacklistGroupIds => SettingKind::Text,
        }
    }

    /// Resolve a stored setting name.
    pub fn from_external(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    /// Whether running trackers must pick up the change.
    pub fn affects_tracker(&self) -> bool {
        matches!(
            self,
            SettingKey::FaceDetectionConfidence
                | SettingKey::BodyDetectionConfidence
                | SettingKey::AlertCooldownSeconds
                | SettingKey::DetectionRoi
        )
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings that can change while the engine runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSettings {
    pub similarity_threshold: f32,
    pub face_confidence: f32,
    pub body_confidence: f32,
    pub alert_cooldown_seconds: u64,
    pub data_retention_days: u32,
    pub capture_quality: u8,
    pub concurrent_limit: usize,
    pub detection_roi: Option<Roi>,
    pub alert_on_stranger: bool,
    pub blacklist_group_ids: Vec<i64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            similarity_threshold: config.recognizer.similarity_threshold,
            face_confidence: config.face_confidence,
            body_confidence: config.body_confidence,
            alert_cooldown_seconds: config.recognizer.alert_cooldown.as_secs(),
            data_retention_days: config.data_retention_days,
            capture_quality: config.capture_quality,
            concurrent_limit: config.recognizer.concurrent_limit,
            detection_roi: config.detection_roi,
            alert_on_stranger: config.recognizer.alert_on_stranger,
            blacklist_group_ids: config.recognizer.blacklist_group_ids.clone(),
        }
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_seconds)
    }

    /// Tracker thresholds derived from the current settings.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            body_confidence: self.body_confidence,
            face_confidence: self.face_confidence,
            roi: self.detection_roi,
            face_cooldown: self.alert_cooldown(),
            ..TrackerConfig::default()
        }
    }

    /// Current value of a setting.
    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::FaceSimilarityThreshold => SettingValue::Float(f64::from(self.similarity_threshold)),
            SettingKey::FaceDetectionConfidence => SettingValue::Float(f64::from(self.face_confidence)),
            SettingKey::BodyDetectionConfidence => SettingValue::Float(f64::from(self.body_confidence)),
            SettingKey::AlertCooldownSeconds => SettingValue::Int(self.alert_cooldown_seconds as i64),
            SettingKey::DataRetentionDays => SettingValue::Int(i64::from(self.data_retention_days)),
            SettingKey::CaptureQuality => SettingValue::Int(i64::from(self.capture_quality)),
            SettingKey::ConcurrentLimit => SettingValue::Int(self.concurrent_limit as i64),
            SettingKey::DetectionRoi => SettingValue::Text(
                self.detection_roi
                    .map(|r| format!("{},{},{},{}", r.x_min, r.y_min, r.x_max, r.y_max))
                    .unwrap_or_default(),
            ),
            SettingKey::AlertOnStranger => SettingValue::Bool(self.alert_on_stranger),
            SettingKey::BlacklistGroupIds => SettingValue::Text(
                self.blacklist_group_ids
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }

    /// Write a coerced value, rejecting out-of-range input.
    pub fn set(&mut self, key: SettingKey, value: &SettingValue) -> EngineResult<()> {
        let invalid = |message: String| EngineError::invalid_setting(key.as_str(), message);

        match key {
            SettingKey::FaceSimilarityThreshold => {
                self.similarity_threshold = unit_interval(value).map_err(invalid)?;
            }
            SettingKey::FaceDetectionConfidence => {
                self.face_confidence = unit_interval(value).map_err(invalid)?;
            }
            SettingKey::BodyDetectionConfidence => {
                self.body_confidence = unit_interval(value).map_err(invalid)?;
            }
            SettingKey::AlertCooldownSeconds => {
                self.alert_cooldown_seconds = int_in(value, 0, i64::from(u32::MAX)).map_err(invalid)? as u64;
            }
            SettingKey::DataRetentionDays => {
                self.data_retention_days = int_in(value, 1, 36_500).map_err(invalid)? as u32;
            }
            SettingKey::CaptureQuality => {
                self.capture_quality = int_in(value, 1, 100).map_err(invalid)? as u8;
            }
            SettingKey::ConcurrentLimit => {
                self.concurrent_limit = int_in(value, 1, 1_024).map_err(invalid)? as usize;
            }
            SettingKey::DetectionRoi => {
                self.detection_roi = roi_value(value).map_err(invalid)?;
            }
            SettingKey::AlertOnStranger => match value {
                SettingValue::Bool(enabled) => self.alert_on_stranger = *enabled,
                other => return Err(invalid(format!("expected a boolean, got {}", other))),
            },
            SettingKey::BlacklistGroupIds => match value {
                SettingValue::Text(raw) => self.blacklist_group_ids = parse_id_list(raw),
                other => return Err(invalid(format!("expected a list of ids, got {}", other))),
            },
        }
        Ok(())
    }
}

fn unit_interval(value: &SettingValue) -> Result<f32, String> {
    let v = match value {
        SettingValue::Float(v) => *v,
        SettingValue::Int(v) => *v as f64,
        other => return Err(format!("expected a number, got {}", other)),
    };
    if (0.0..=1.0).contains(&v) {
        Ok(v as f32)
    } else {
        Err(format!("{} is outside [0, 1]", v))
    }
}

fn int_in(value: &SettingValue, min: i64, max: i64) -> Result<i64, String> {
    let v = match value {
        SettingValue::Int(v) => *v,
        SettingValue::Float(v) => v.trunc() as i64,
        other => return Err(format!("expected an integer, got {}", other)),
    };
    if (min..=max).contains(&v) {
        Ok(v)
    } else {
        Err(format!("{} is outside [{}, {}]", v, min, max))
    }
}

fn roi_value(value: &SettingValue) -> Result<Option<Roi>, String> {
    let SettingValue::Text(raw) = value else {
        return Err(format!("expected 'x_min,y_min,x_max,y_max', got {}", value));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    trimmed.parse::<Roi>().map(Some).map_err(|e| e.to_string())
}

//! Alert records and their lifecycle enums.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::frame::{CameraId, TrackId};

/// Durable alert identifier assigned by the repository.
pub type AlertId = i64;

/// Who the alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Stranger,
    Known,
    Blacklist,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Stranger => "stranger",
            AlertType::Known => "known",
            AlertType::Blacklist => "blacklist",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity. Ordered so that `Info < Warning < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operator-facing handling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Pending,
    Processed,
    Ignored,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Processed => "processed",
            AlertStatus::Ignored => "ignored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Processed | AlertStatus::Ignored)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observation appended to an alert's image history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageHistoryEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Image reference (face crop, or body crop for body-only events)
    #[serde(rename = "image")]
    pub image_ref: Option<String>,
    pub score: f64,
}

/// Persisted alert, merged per (camera, track) while the track is alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlertRecord {
    pub id: AlertId,
    pub camera_id: CameraId,
    pub track_id: TrackId,
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub status: AlertStatus,
    /// Score of the observation that created the record
    pub confidence: f64,
    pub person_id: Option<i64>,
    pub person_name: Option<String>,
    pub face_image_path: Option<String>,
    pub body_image_path: Option<String>,
    pub full_image_path: Option<String>,
    /// Append-only, oldest first
    pub image_history: Vec<ImageHistoryEntry>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl AlertRecord {
    /// Closed by a human operator, as opposed to auto-resolved by recognition.
    pub fn is_operator_resolved(&self) -> bool {
        self.status.is_terminal() && self.processed_by.is_some()
    }
}

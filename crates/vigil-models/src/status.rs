//! Capture and engine status enums.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Frame source connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    #[default]
    Idle,
    Connecting,
    Running,
    Reconnecting,
    Stopped,
    Error,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Idle => "idle",
            CaptureStatus::Connecting => "connecting",
            CaptureStatus::Running => "running",
            CaptureStatus::Reconnecting => "reconnecting",
            CaptureStatus::Stopped => "stopped",
            CaptureStatus::Error => "error",
        }
    }

    /// Idle or stopped: no capture worker should be producing frames.
    pub fn is_inactive(&self) -> bool {
        matches!(self, CaptureStatus::Idle | CaptureStatus::Stopped)
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Stopped => "stopped",
            EngineStatus::Starting => "starting",
            EngineStatus::Running => "running",
            EngineStatus::Stopping => "stopping",
            EngineStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_matches_as_str() {
        let json = serde_json::to_string(&CaptureStatus::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
        assert_eq!(EngineStatus::Error.to_string(), "error");
        assert!(CaptureStatus::Idle.is_inactive());
        assert!(!CaptureStatus::Running.is_inactive());
    }
}

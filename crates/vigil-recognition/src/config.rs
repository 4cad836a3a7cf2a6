//! Recognition decision settings.

use std::time::Duration;

/// Thresholds and policy for turning matches into alert decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerConfig {
    /// Cosine similarity at or above which a face is a known person
    pub similarity_threshold: f32,
    /// Whether unmatched faces raise alerts
    pub alert_on_stranger: bool,
    /// Minimum spacing between alerts for one (camera, subject)
    pub alert_cooldown: Duration,
    /// Known persons in these groups raise blacklist alerts
    pub blacklist_group_ids: Vec<i64>,
    /// Outstanding recognition calls across all cameras
    pub concurrent_limit: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.88,
            alert_on_stranger: true,
            alert_cooldown: Duration::from_secs(60),
            blacklist_group_ids: Vec::new(),
            concurrent_limit: 5,
        }
    }
}

impl RecognizerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            similarity_threshold: std::env::var("FACE_SIMILARITY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.similarity_threshold),
            alert_on_stranger: std::env::var("ALERT_ON_STRANGER")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.alert_on_stranger),
            alert_cooldown: Duration::from_secs(
                std::env::var("ALERT_COOLDOWN_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            blacklist_group_ids: std::env::var("BLACKLIST_GROUP_IDS")
                .map(|v| parse_id_list(&v))
                .unwrap_or_default(),
            concurrent_limit: std::env::var("CONCURRENT_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrent_limit),
        }
    }
}

/// Parse `"1, 2,3"`, skipping anything that is not an integer.
pub fn parse_id_list(value: &str) -> Vec<i64> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecognizerConfig::default();
        assert!((config.similarity_threshold - 0.88).abs() < 1e-6);
        assert!(config.alert_on_stranger);
        assert_eq!(config.concurrent_limit, 5);
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("3, 7,x, 9 "), vec![3, 7, 9]);
        assert!(parse_id_list("").is_empty());
    }
}

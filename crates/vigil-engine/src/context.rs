//! Shared engine collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{info, warn};
use vigil_alerts::{
    run_retention, AlertLifecycle, AlertRepository, AlertResult, EventHub, ImageStore,
    RetentionReport,
};
use vigil_recognition::{FaceMatcher, RecognitionGateway};

use crate::broadcaster::StreamBroadcaster;
use crate::config::EngineConfig;
use crate::metrics;
use crate::settings::{EngineSettings, SettingKey};

/// Everything the engine's components share, built once at start-up.
pub struct EngineContext {
    settings: RwLock<EngineSettings>,
    settings_version: AtomicU64,
    hub: EventHub,
    lifecycle: AlertLifecycle,
    gateway: Arc<RecognitionGateway>,
    images: Arc<ImageStore>,
    broadcaster: StreamBroadcaster,
}

impl EngineContext {
    /// Build the shared state from `config`. Alerts persist through `repository`
    /// and faces are matched by `matcher`.
    pub fn new(
        config: &EngineConfig,
        matcher: Arc<dyn FaceMatcher>,
        repository: Arc<dyn AlertRepository>,
    ) -> Self {
        Self {
            settings: RwLock::new(EngineSettings::from_config(config)),
            settings_version: AtomicU64::new(0),
            hub: EventHub::default(),
            lifecycle: AlertLifecycle::new(repository),
            gateway: Arc::new(RecognitionGateway::new(matcher, &config.recognizer)),
            images: Arc::new(ImageStore::new(
                &config.data_dir,
                &config.captures_dir,
                config.capture_quality,
            )),
            broadcaster: StreamBroadcaster::new(config.subscriber_capacity),
        }
    }

    /// Fan-out point for alert and status messages.
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Creates, escalates and refreshes alert records.
    pub fn lifecycle(&self) -> &AlertLifecycle {
        &self.lifecycle
    }

    /// Alert store behind the lifecycle.
    pub fn repository(&self) -> &Arc<dyn AlertRepository> {
        self.lifecycle.repository()
    }

    pub fn gateway(&self) -> &Arc<RecognitionGateway> {
        &self.gateway
    }

    /// Writes alert snapshots under the captures directory.
    pub fn images(&self) -> &Arc<ImageStore> {
        &self.images
    }

    /// Live-view JPEG fan-out.
    pub fn broadcaster(&self) -> &StreamBroadcaster {
        &self.broadcaster
    }

    /// Snapshot of the live settings.
    pub fn settings(&self) -> EngineSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Bumped on every change that running trackers must pick up.
    pub fn settings_version(&self) -> u64 {
        self.settings_version.load(Ordering::Acquire)
    }

    /// Apply a setting by its stored name and raw string value.
    ///
    /// Returns false when the name is unknown or the value does not fit the
    /// setting; nothing is changed in that case.
    pub fn update_setting(&self, name: &str, raw: &str) -> bool {
        let Some(key) = SettingKey::from_external(name) else {
            warn!(key = name, "Ignoring unknown setting");
            return false;
        };

        let value = match key.kind().coerce(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key.as_str(), value = raw, "Setting rejected: {}", e);
                return false;
            }
        };

        let updated = {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = settings.set(key, &value) {
                warn!(key = key.as_str(), "Setting rejected: {}", e);
                return false;
            }
            settings.clone()
        };

        self.apply_to_collaborators(key, &updated);
        if key.affects_tracker() {
            self.settings_version.fetch_add(1, Ordering::AcqRel);
        }
        metrics::record_setting_update(key.as_str());
        info!(key = key.as_str(), value = %value, "Setting updated");
        true
    }

    fn apply_to_collaborators(&self, key: SettingKey, settings: &EngineSettings) {
        match key {
            SettingKey::FaceSimilarityThreshold => {
                self.gateway.set_similarity_threshold(settings.similarity_threshold);
            }
            SettingKey::AlertCooldownSeconds => {
                self.gateway.set_alert_cooldown(settings.alert_cooldown());
            }
            SettingKey::ConcurrentLimit => {
                if !self.gateway.set_concurrency_limit(settings.concurrent_limit) {
                    warn!(limit = settings.concurrent_limit, "Concurrency limit not applied");
                }
            }
            SettingKey::AlertOnStranger => {
                self.gateway.set_alert_on_stranger(settings.alert_on_stranger);
            }
            SettingKey::BlacklistGroupIds => {
                self.gateway.set_blacklist_groups(settings.blacklist_group_ids.clone());
            }
            SettingKey::CaptureQuality => {
                self.images.set_quality(settings.capture_quality);
            }
            SettingKey::FaceDetectionConfidence
            | SettingKey::BodyDetectionConfidence
            | SettingKey::DetectionRoi
            | SettingKey::DataRetentionDays => {}
        }
    }

    /// Delete alerts and capture folders past the configured retention.
    pub async fn run_retention(&self) -> AlertResult<RetentionReport> {
        let days = self.settings().data_retention_days;
        run_retention(
            self.repository().as_ref(),
            self.images.captures_dir(),
            days,
            Utc::now(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use vigil_alerts::InMemoryAlertRepository;
    use vigil_models::MatchResult;
    use vigil_recognition::RecognitionResult;

    struct FixedMatcher {
        threshold: AtomicU32,
    }

    #[async_trait]
    impl FaceMatcher for FixedMatcher {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn match_face(&self, _face: &RgbImage) -> RecognitionResult<MatchResult> {
            Ok(MatchResult::stranger(0.1))
        }

        fn similarity_threshold(&self) -> f32 {
            f32::from_bits(self.threshold.load(Ordering::Relaxed))
        }

        fn set_similarity_threshold(&self, threshold: f32) {
            self.threshold.store(threshold.to_bits(), Ordering::Relaxed);
        }
    }

    fn context() -> EngineContext {
        let matcher = Arc::new(FixedMatcher {
            threshold: AtomicU32::new(0),
        });
        EngineContext::new(
            &EngineConfig::default(),
            matcher,
            Arc::new(InMemoryAlertRepository::new()),
        )
    }

    #[test]
    fn test_update_reaches_live_collaborators() {
        let ctx = context();

        assert!(ctx.update_setting("concurrent_limit", "3.0"));
        assert!(ctx.update_setting("face_similarity_threshold", "0.8"));
        assert!(ctx.update_setting("alert_cooldown_seconds", "30"));
        assert!(ctx.update_setting("capture_quality", "55"));

        let stats = ctx.gateway().stats();
        assert_eq!(stats.concurrent_limit, 3);
        assert!((stats.similarity_threshold - 0.8).abs() < 1e-6);
        assert_eq!(stats.alert_cooldown_secs, 30);
        assert_eq!(ctx.images().quality(), 55);
        assert_eq!(ctx.settings().concurrent_limit, 3);
    }

    #[test]
    fn test_unknown_or_invalid_setting_is_reported() {
        let ctx = context();
        let before = ctx.settings();

        assert!(!ctx.update_setting("tracker_type", "bytetrack"));
        assert!(!ctx.update_setting("capture_quality", "high"));
        assert!(!ctx.update_setting("concurrent_limit", "0"));
        assert_eq!(ctx.settings(), before);
        assert_eq!(ctx.settings_version(), 0);
    }

    #[test]
    fn test_tracker_settings_bump_version() {
        let ctx = context();

        assert!(ctx.update_setting("capture_quality", "70"));
        assert_eq!(ctx.settings_version(), 0);

        assert!(ctx.update_setting("face_detection_confidence", "0.6"));
        assert!(ctx.update_setting("detection_roi", "0,0,1,1"));
        assert_eq!(ctx.settings_version(), 2);
        assert_eq!(
            ctx.settings().tracker_config().face_cooldown,
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn test_retention_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            captures_dir: dir.path().join("captures"),
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(
            &config,
            Arc::new(FixedMatcher {
                threshold: AtomicU32::new(0),
            }),
            Arc::new(InMemoryAlertRepository::new()),
        );

        let report = ctx.run_retention().await.unwrap();
        assert_eq!(report, RetentionReport::default());
    }
}

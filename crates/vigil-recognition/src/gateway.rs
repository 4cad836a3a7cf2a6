//! Recognition gateway: bounded matching, alert typing and cooldown.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_models::{AlertType, CameraId, MatchResult};

use crate::config::RecognizerConfig;
use crate::cooldown::{AlertCooldownManager, CooldownSubject};
use crate::database::DatabaseStats;
use crate::gate::ConcurrencyGate;
use crate::matcher::FaceMatcher;
use crate::metrics;

/// What a match means for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertDecision {
    pub alert_type: AlertType,
    /// Type policy says alert and the cooldown allowed it
    pub should_alert: bool,
    /// Type policy said alert but the cooldown held it back
    pub cooldown_suppressed: bool,
}

/// Match plus decision for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub matched: MatchResult,
    pub decision: AlertDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStats {
    pub matcher: &'static str,
    pub similarity_threshold: f32,
    pub alert_on_stranger: bool,
    pub alert_cooldown_secs: u64,
    pub blacklist_group_ids: Vec<i64>,
    pub concurrent_limit: usize,
    pub cooldown_entries: usize,
    pub database: Option<DatabaseStats>,
}

#[derive(Debug, Clone)]
struct Policy {
    alert_on_stranger: bool,
    blacklist_group_ids: Vec<i64>,
}

/// Shared by every camera. Outbound matching goes through one concurrency gate.
pub struct RecognitionGateway {
    matcher: Arc<dyn FaceMatcher>,
    gate: ConcurrencyGate,
    cooldown: AlertCooldownManager,
    policy: RwLock<Policy>,
}

impl RecognitionGateway {
    /// Wrap `matcher` with the alert policy and limits from `config`.
    /// The matcher's similarity threshold is overwritten by the configured one.
    pub fn new(matcher: Arc<dyn FaceMatcher>, config: &RecognizerConfig) -> Self {
        matcher.set_similarity_threshold(config.similarity_threshold);
        Self {
            matcher,
            gate: ConcurrencyGate::new(config.concurrent_limit),
            cooldown: AlertCooldownManager::new(config.alert_cooldown),
            policy: RwLock::new(Policy {
                alert_on_stranger: config.alert_on_stranger,
                blacklist_group_ids: config.blacklist_group_ids.clone(),
            }),
        }
    }

    fn policy(&self) -> Policy {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Per-camera alert cooldowns.
    pub fn cooldown(&self) -> &AlertCooldownManager {
        &self.cooldown
    }

    pub fn matcher(&self) -> &Arc<dyn FaceMatcher> {
        &self.matcher
    }

    /// Match a face crop. Backend failure degrades to a stranger with similarity 0.
    pub async fn match_face(&self, face: &RgbImage) -> MatchResult {
        let name = self.matcher.name();
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Recognition gate unavailable: {}", e);
                metrics::record_failure(name);
                return MatchResult::stranger(0.0);
            }
        };

        let started = Instant::now();
        match self.matcher.match_face(face).await {
            Ok(matched) => {
                let outcome = if matched.is_stranger { "stranger" } else { "known" };
                metrics::record_recognition(name, outcome, started.elapsed().as_secs_f64());
                debug!(
                    person_id = ?matched.person_id,
                    similarity = matched.similarity,
                    outcome,
                    "Face matched"
                );
                matched
            }
            Err(e) => {
                warn!(matcher = name, "Recognition failed, treating as stranger: {}", e);
                metrics::record_failure(name);
                MatchResult::stranger(0.0)
            }
        }
    }

    /// Match a face and decide whether it should alert.
    pub async fn recognize(&self, camera_id: CameraId, face: &RgbImage) -> Recognition {
        let matched = self.match_face(face).await;
        let decision = self.decide_at(camera_id, &matched, Utc::now());
        Recognition { matched, decision }
    }

    /// Alert type for a match, before cooldown.
    ///
    /// Strangers alert if configured to; blacklisted groups always alert;
    /// other known persons are informational.
    pub fn classify(&self, matched: &MatchResult) -> (AlertType, bool) {
        let policy = self.policy();
        if matched.is_stranger {
            return (AlertType::Stranger, policy.alert_on_stranger);
        }
        match matched.group_id {
            Some(group) if policy.blacklist_group_ids.contains(&group) => (AlertType::Blacklist, true),
            _ => (AlertType::Known, false),
        }
    }

    /// Classify, then check the cooldown for alerting types.
    ///
    /// The cooldown is not consumed here; call [`record_alert`](Self::record_alert)
    /// once the alert has actually been delivered.
    pub fn decide_at(&self, camera_id: CameraId, matched: &MatchResult, now: DateTime<Utc>) -> AlertDecision {
        let (alert_type, wants_alert) = self.classify(matched);
        if !wants_alert {
            return AlertDecision {
                alert_type,
                should_alert: false,
                cooldown_suppressed: false,
            };
        }

        let subject = CooldownSubject::from(matched.person_id);
        if !self.cooldown.can_alert_at(camera_id, subject, now) {
            metrics::record_suppressed();
            debug!(camera_id, ?subject, "Alert suppressed by cooldown");
            return AlertDecision {
                alert_type,
                should_alert: false,
                cooldown_suppressed: true,
            };
        }

        AlertDecision {
            alert_type,
            should_alert: true,
            cooldown_suppressed: false,
        }
    }

    /// Start the cooldown window for a delivered alert.
    pub fn record_alert(&self, camera_id: CameraId, matched: &MatchResult) {
        self.record_alert_at(camera_id, matched, Utc::now());
    }

    pub fn record_alert_at(&self, camera_id: CameraId, matched: &MatchResult, now: DateTime<Utc>) {
        self.cooldown
            .record_at(camera_id, CooldownSubject::from(matched.person_id), now);
    }

    pub fn set_similarity_threshold(&self, threshold: f32) {
        self.matcher.set_similarity_threshold(threshold);
    }

    /// Applies to new and existing cooldown entries.
    pub fn set_alert_cooldown(&self, cooldown: Duration) {
        self.cooldown.set_cooldown(cooldown);
    }

    /// Whether unknown faces raise alerts at all.
    pub fn set_alert_on_stranger(&self, enabled: bool) {
        self.policy.write().unwrap_or_else(|e| e.into_inner()).alert_on_stranger = enabled;
    }

    /// Groups whose members are reported as blacklisted.
    pub fn set_blacklist_groups(&self, group_ids: Vec<i64>) {
        self.policy.write().unwrap_or_else(|e| e.into_inner()).blacklist_group_ids = group_ids;
    }

    /// Cap on in-flight backend calls. False if `limit` is zero.
    pub fn set_concurrency_limit(&self, limit: usize) -> bool {
        self.gate.set_limit(limit)
    }

    pub fn stats(&self) -> GatewayStats {
        let policy = self.policy();
        GatewayStats {
            matcher: self.matcher.name(),
            similarity_threshold: self.matcher.similarity_threshold(),
            alert_on_stranger: policy.alert_on_stranger,
            alert_cooldown_secs: self.cooldown.cooldown().as_secs(),
            blacklist_group_ids: policy.blacklist_group_ids,
            concurrent_limit: self.gate.limit(),
            cooldown_entries: self.cooldown.len(),
            database: self.matcher.registry_stats(),
        }
    }

    /// Periodically drop stale cooldown entries until `shutdown` flips to true.
    pub fn spawn_cooldown_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let removed = gateway.cooldown.cleanup_expired();
                        if removed > 0 {
                            debug!(removed, "Expired cooldown entries swept");
                        }
                    }
                }
            }
            info!("Cooldown sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RecognitionError, RecognitionResult};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    /// Returns a scripted result, or fails when none is set.
    struct Scripted(Mutex<Option<MatchResult>>);

    #[async_trait]
    impl FaceMatcher for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn match_face(&self, _face: &RgbImage) -> RecognitionResult<MatchResult> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| RecognitionError::ServiceUnavailable("down".to_string()))
        }

        fn similarity_threshold(&self) -> f32 {
            0.88
        }

        fn set_similarity_threshold(&self, _threshold: f32) {}
    }

    fn gateway(result: Option<MatchResult>) -> RecognitionGateway {
        let config = RecognizerConfig {
            blacklist_group_ids: vec![66],
            ..Default::default()
        };
        RecognitionGateway::new(Arc::new(Scripted(Mutex::new(result))), &config)
    }

    #[tokio::test]
    async fn test_failure_degrades_to_stranger() {
        let gateway = gateway(None);
        let recognition = gateway.recognize(1, &RgbImage::new(4, 4)).await;
        assert!(recognition.matched.is_stranger);
        assert_eq!(recognition.matched.similarity, 0.0);
        assert_eq!(recognition.decision.alert_type, AlertType::Stranger);
        assert!(recognition.decision.should_alert);
    }

    #[test]
    fn test_classify() {
        let gateway = gateway(None);
        let known = MatchResult::known(Some(1), "staff", Some(2), None, 0.95);
        let banned = MatchResult::known(Some(2), "banned", Some(66), None, 0.95);

        assert_eq!(gateway.classify(&MatchResult::stranger(0.3)), (AlertType::Stranger, true));
        assert_eq!(gateway.classify(&known), (AlertType::Known, false));
        assert_eq!(gateway.classify(&banned), (AlertType::Blacklist, true));

        gateway.set_alert_on_stranger(false);
        assert_eq!(gateway.classify(&MatchResult::stranger(0.3)), (AlertType::Stranger, false));
    }

    #[test]
    fn test_cooldown_applies_to_alerting_types() {
        let gateway = gateway(None);
        let t0 = Utc::now();
        let stranger = MatchResult::stranger(0.2);

        assert!(gateway.decide_at(1, &stranger, t0).should_alert);
        gateway.record_alert_at(1, &stranger, t0);
        let again = gateway.decide_at(1, &stranger, t0 + ChronoDuration::seconds(10));
        assert!(!again.should_alert);
        assert!(again.cooldown_suppressed);
        assert!(gateway.decide_at(2, &stranger, t0).should_alert);
        gateway.record_alert_at(2, &stranger, t0);
        assert!(gateway.decide_at(1, &stranger, t0 + ChronoDuration::seconds(61)).should_alert);

        let known = MatchResult::known(Some(1), "staff", None, None, 0.95);
        let decision = gateway.decide_at(1, &known, t0);
        assert!(!decision.should_alert);
        assert!(!decision.cooldown_suppressed);
        assert_eq!(gateway.cooldown().len(), 2);
    }

    #[test]
    fn test_decision_does_not_consume_cooldown() {
        let gateway = gateway(None);
        let t0 = Utc::now();
        let stranger = MatchResult::stranger(0.2);

        assert!(gateway.decide_at(1, &stranger, t0).should_alert);
        assert!(gateway.decide_at(1, &stranger, t0 + ChronoDuration::seconds(5)).should_alert);
        assert!(gateway.cooldown().is_empty());

        gateway.record_alert_at(1, &stranger, t0 + ChronoDuration::seconds(5));
        assert!(gateway.decide_at(1, &stranger, t0 + ChronoDuration::seconds(6)).cooldown_suppressed);
    }

    #[test]
    fn test_stats_reflect_updates() {
        let gateway = gateway(None);
        assert!(gateway.set_concurrency_limit(9));
        gateway.set_alert_cooldown(Duration::from_secs(15));
        let stats = gateway.stats();
        assert_eq!(stats.concurrent_limit, 9);
        assert_eq!(stats.alert_cooldown_secs, 15);
        assert_eq!(stats.matcher, "scripted");
        assert!(stats.database.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let gateway = Arc::new(gateway(None));
        let (tx, rx) = watch::channel(false);
        let handle = gateway.spawn_cooldown_sweeper(Duration::from_millis(10), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

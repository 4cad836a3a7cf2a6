//! Per-track alert merge and escalation.
//!
//! Each (camera, track) pair has at most one live record: the latest one,
//! unless an operator has already closed it. New observations for the pair
//! either create that record or merge into it:
//!
//! | existing            | observation          | result                                   | notify |
//! |---------------------|----------------------|------------------------------------------|--------|
//! | none / operator-closed | any               | new record                               | yes    |
//! | not known           | known person         | known, info, processed                   | yes    |
//! | below critical      | critical             | critical, observation's type, pending    | yes    |
//! | not blacklist       | blacklist            | blacklist, critical, pending             | yes    |
//! | anything else       |                      | images refreshed                         | no     |
//!
//! Every merge appends to the image history and advances `end_time`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use vigil_models::{
    AlertEvent, AlertId, AlertLevel, AlertRecord, AlertStatus, AlertType, CameraId,
    ImageHistoryEntry, MatchResult, TrackId, TrackerEventKind,
};

use crate::error::{AlertError, AlertResult};
use crate::images::ImageRefs;
use crate::metrics;
use crate::repository::AlertRepository;

/// One recognised tracker event, ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertObservation {
    pub camera_id: CameraId,
    pub track_id: TrackId,
    pub kind: TrackerEventKind,
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub person_id: Option<i64>,
    pub person_name: Option<String>,
    pub similarity: Option<f32>,
    pub score: f64,
    pub images: ImageRefs,
    pub timestamp: DateTime<Utc>,
}

impl AlertObservation {
    /// A face event after recognition.
    pub fn face(
        camera_id: CameraId,
        track_id: TrackId,
        matched: &MatchResult,
        alert_type: AlertType,
        score: f64,
        images: ImageRefs,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let alert_level = match alert_type {
            AlertType::Known => AlertLevel::Info,
            AlertType::Stranger | AlertType::Blacklist => AlertLevel::Critical,
        };
        let (person_id, person_name) = if matched.is_stranger {
            (None, None)
        } else {
            (matched.person_id, Some(matched.name.clone()))
        };
        Self {
            camera_id,
            track_id,
            kind: TrackerEventKind::FaceDetected,
            alert_type,
            alert_level,
            person_id,
            person_name,
            similarity: Some(matched.similarity),
            score,
            images,
            timestamp,
        }
    }

    /// A faceless loitering event.
    pub fn body(
        camera_id: CameraId,
        track_id: TrackId,
        score: f64,
        images: ImageRefs,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            camera_id,
            track_id,
            kind: TrackerEventKind::BodyDetected,
            alert_type: AlertType::Stranger,
            alert_level: AlertLevel::Warning,
            person_id: None,
            person_name: None,
            similarity: None,
            score,
            images,
            timestamp,
        }
    }

    fn history_entry(&self) -> ImageHistoryEntry {
        ImageHistoryEntry {
            timestamp: self.timestamp,
            image_ref: self.images.face.clone().or_else(|| self.images.body.clone()),
            score: self.score,
        }
    }

    /// Push payload straight from the observation, for when persistence failed.
    pub fn to_event(&self) -> AlertEvent {
        AlertEvent {
            id: None,
            camera_id: self.camera_id,
            track_id: self.track_id,
            alert_type: self.alert_type,
            alert_level: self.alert_level,
            status: initial_status(self.alert_type),
            person_id: self.person_id,
            person_name: self.person_name.clone(),
            similarity: self.similarity,
            score: self.score,
            face_image: self.images.face.clone(),
            body_image: self.images.body.clone(),
            full_image: self.images.full.clone(),
            timestamp: self.timestamp,
            is_update: false,
            original_alert_id: None,
        }
    }
}

/// How an observation changed the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Deescalated,
    Escalated,
    Refreshed,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Created => "created",
            Transition::Deescalated => "deescalated",
            Transition::Escalated => "escalated",
            Transition::Refreshed => "refreshed",
        }
    }

    /// Whether subscribers should hear about it.
    pub fn should_notify(&self) -> bool {
        !matches!(self, Transition::Refreshed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOutcome {
    pub record: AlertRecord,
    pub transition: Transition,
}

impl LifecycleOutcome {
    pub fn should_notify(&self) -> bool {
        self.transition.should_notify()
    }

    /// Push payload describing the record after this observation.
    pub fn to_event(&self, observation: &AlertObservation) -> AlertEvent {
        let record = &self.record;
        let is_update = self.transition != Transition::Created;
        AlertEvent {
            id: Some(record.id),
            camera_id: record.camera_id,
            track_id: record.track_id,
            alert_type: record.alert_type,
            alert_level: record.alert_level,
            status: record.status,
            person_id: record.person_id,
            person_name: record.person_name.clone(),
            similarity: observation.similarity,
            score: observation.score,
            face_image: record.face_image_path.clone(),
            body_image: record.body_image_path.clone(),
            full_image: record.full_image_path.clone(),
            timestamp: observation.timestamp,
            is_update,
            original_alert_id: is_update.then_some(record.id),
        }
    }
}

fn initial_status(alert_type: AlertType) -> AlertStatus {
    match alert_type {
        AlertType::Known => AlertStatus::Processed,
        AlertType::Stranger | AlertType::Blacklist => AlertStatus::Pending,
    }
}

/// Applies observations to alert records.
pub struct AlertLifecycle {
    repository: Arc<dyn AlertRepository>,
}

impl AlertLifecycle {
    pub fn new(repository: Arc<dyn AlertRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn AlertRepository> {
        &self.repository
    }

    /// Merge an observation into its track's record, creating one if needed.
    pub async fn apply(&self, observation: &AlertObservation) -> AlertResult<LifecycleOutcome> {
        let latest = self
            .repository
            .find_latest(observation.camera_id, observation.track_id)
            .await?;

        let outcome = match latest {
            Some(existing) if !existing.is_operator_resolved() => {
                let (record, transition) = merge(existing, observation);
                self.repository.update(&record).await?;
                metrics::record_updated(transition.as_str());
                LifecycleOutcome { record, transition }
            }
            _ => {
                let record = self.repository.create(new_record(observation)).await?;
                metrics::record_created(record.camera_id, record.alert_type);
                LifecycleOutcome {
                    record,
                    transition: Transition::Created,
                }
            }
        };

        debug!(
            alert_id = outcome.record.id,
            camera_id = observation.camera_id,
            track_id = observation.track_id,
            transition = outcome.transition.as_str(),
            level = %outcome.record.alert_level,
            "Alert observation applied"
        );
        Ok(outcome)
    }

    /// Operator closes an alert as processed or ignored.
    pub async fn resolve(
        &self,
        id: AlertId,
        status: AlertStatus,
        processed_by: impl Into<String>,
        remark: Option<String>,
    ) -> AlertResult<AlertRecord> {
        if !status.is_terminal() {
            return Err(AlertError::InvalidTransition(format!(
                "cannot resolve alert {} as {}",
                id, status
            )));
        }

        let mut record = self.repository.get(id).await?.ok_or(AlertError::NotFound(id))?;
        record.status = status;
        record.processed_by = Some(processed_by.into());
        record.processed_at = Some(Utc::now());
        record.remark = remark;
        self.repository.update(&record).await?;

        info!(alert_id = id, status = %status, "Alert resolved by operator");
        Ok(record)
    }
}

fn new_record(observation: &AlertObservation) -> AlertRecord {
    AlertRecord {
        id: 0,
        camera_id: observation.camera_id,
        track_id: observation.track_id,
        alert_type: observation.alert_type,
        alert_level: observation.alert_level,
        status: initial_status(observation.alert_type),
        confidence: observation.score,
        person_id: observation.person_id,
        person_name: observation.person_name.clone(),
        face_image_path: observation.images.face.clone(),
        body_image_path: observation.images.body.clone(),
        full_image_path: observation.images.full.clone(),
        image_history: vec![observation.history_entry()],
        processed_by: None,
        processed_at: None,
        remark: None,
        created_at: observation.timestamp,
        start_time: observation.timestamp,
        end_time: observation.timestamp,
    }
}

fn merge(mut record: AlertRecord, observation: &AlertObservation) -> (AlertRecord, Transition) {
    let escalates = observation.alert_level == AlertLevel::Critical
        && (record.alert_level < AlertLevel::Critical
            || (observation.alert_type == AlertType::Blacklist
                && record.alert_type != AlertType::Blacklist));

    let transition = if observation.alert_type == AlertType::Known
        && record.alert_type != AlertType::Known
    {
        record.alert_type = AlertType::Known;
        record.alert_level = AlertLevel::Info;
        record.status = AlertStatus::Processed;
        record.processed_at = Some(observation.timestamp);
        record.person_id = observation.person_id;
        record.person_name = observation.person_name.clone();
        Transition::Deescalated
    } else if escalates {
        record.alert_type = observation.alert_type;
        record.alert_level = AlertLevel::Critical;
        record.status = AlertStatus::Pending;
        record.processed_at = None;
        record.person_id = observation.person_id;
        record.person_name = observation.person_name.clone();
        Transition::Escalated
    } else {
        Transition::Refreshed
    };

    if let Some(face) = &observation.images.face {
        record.face_image_path = Some(face.clone());
    }
    if let Some(body) = &observation.images.body {
        record.body_image_path = Some(body.clone());
    }
    if let Some(full) = &observation.images.full {
        record.full_image_path = Some(full.clone());
    }

    record.image_history.push(observation.history_entry());
    if observation.timestamp > record.end_time {
        record.end_time = observation.timestamp;
    }
    (record, transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryAlertRepository;
    use chrono::Duration as ChronoDuration;

    fn images(tag: &str) -> ImageRefs {
        ImageRefs {
            face: Some(format!("/static/{}_face.jpg", tag)),
            body: Some(format!("/static/{}_body.jpg", tag)),
            full: Some(format!("/static/{}_full.jpg", tag)),
        }
    }

    fn stranger(track_id: TrackId, tag: &str, at: DateTime<Utc>) -> AlertObservation {
        AlertObservation::face(1, track_id, &MatchResult::stranger(0.2), AlertType::Stranger, 700.0, images(tag), at)
    }

    fn known(track_id: TrackId, at: DateTime<Utc>) -> AlertObservation {
        let matched = MatchResult::known(Some(8), "dana", Some(2), Some("staff".into()), 0.93);
        AlertObservation::face(1, track_id, &matched, AlertType::Known, 820.0, images("known"), at)
    }

    fn lifecycle() -> AlertLifecycle {
        AlertLifecycle::new(Arc::new(InMemoryAlertRepository::new()))
    }

    #[tokio::test]
    async fn test_create_levels() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();

        let created = lifecycle.apply(&stranger(1, "a", t0)).await.unwrap();
        assert_eq!(created.transition, Transition::Created);
        assert_eq!(created.record.alert_level, AlertLevel::Critical);
        assert_eq!(created.record.status, AlertStatus::Pending);
        assert!(created.should_notify());

        let known = lifecycle.apply(&known(2, t0)).await.unwrap();
        assert_eq!(known.record.alert_level, AlertLevel::Info);
        assert_eq!(known.record.status, AlertStatus::Processed);
        assert_eq!(known.record.person_name.as_deref(), Some("dana"));

        let body = lifecycle
            .apply(&AlertObservation::body(1, 3, 90.0, ImageRefs::default(), t0))
            .await
            .unwrap();
        assert_eq!(body.record.alert_level, AlertLevel::Warning);
        assert_eq!(body.record.alert_type, AlertType::Stranger);
    }

    #[tokio::test]
    async fn test_known_match_deescalates_stranger() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();
        let first = lifecycle.apply(&stranger(42, "a", t0)).await.unwrap();

        let outcome = lifecycle
            .apply(&known(42, t0 + ChronoDuration::seconds(2)))
            .await
            .unwrap();
        assert_eq!(outcome.transition, Transition::Deescalated);
        assert_eq!(outcome.record.id, first.record.id);
        assert_eq!(outcome.record.alert_type, AlertType::Known);
        assert_eq!(outcome.record.alert_level, AlertLevel::Info);
        assert_eq!(outcome.record.status, AlertStatus::Processed);
        assert_eq!(outcome.record.person_id, Some(8));
        assert_eq!(outcome.record.face_image_path.as_deref(), Some("/static/known_face.jpg"));
        assert!(outcome.should_notify());

        let event = outcome.to_event(&known(42, t0));
        assert!(event.is_update);
        assert_eq!(event.original_alert_id, Some(first.record.id));
    }

    #[tokio::test]
    async fn test_same_level_refresh_is_silent() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();
        lifecycle.apply(&stranger(5, "a", t0)).await.unwrap();

        let later = t0 + ChronoDuration::seconds(3);
        let outcome = lifecycle.apply(&stranger(5, "b", later)).await.unwrap();
        assert_eq!(outcome.transition, Transition::Refreshed);
        assert!(!outcome.should_notify());
        assert_eq!(outcome.record.image_history.len(), 2);
        assert_eq!(outcome.record.end_time, later);
        assert_eq!(outcome.record.face_image_path.as_deref(), Some("/static/b_face.jpg"));
        assert_eq!(
            outcome.record.image_history[1].image_ref.as_deref(),
            Some("/static/b_face.jpg")
        );
    }

    #[tokio::test]
    async fn test_face_escalates_body_record() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();
        let body = AlertObservation::body(1, 9, 80.0, images("body"), t0);
        lifecycle.apply(&body).await.unwrap();

        let outcome = lifecycle.apply(&stranger(9, "face", t0)).await.unwrap();
        assert_eq!(outcome.transition, Transition::Escalated);
        assert_eq!(outcome.record.alert_level, AlertLevel::Critical);
        assert_eq!(outcome.record.status, AlertStatus::Pending);
    }

    #[tokio::test]
    async fn test_escalation_reopens_auto_processed_known() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();
        lifecycle.apply(&known(4, t0)).await.unwrap();

        let outcome = lifecycle.apply(&stranger(4, "s", t0)).await.unwrap();
        assert_eq!(outcome.transition, Transition::Escalated);
        assert_eq!(outcome.record.alert_type, AlertType::Stranger);
        assert_eq!(outcome.record.status, AlertStatus::Pending);
        assert!(outcome.record.person_id.is_none());
    }

    #[tokio::test]
    async fn test_blacklist_escalates_critical_stranger() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();
        lifecycle.apply(&stranger(6, "s", t0)).await.unwrap();

        // Already critical: identifying the stranger as blacklisted still
        // changes the alert type and reopens it for the operator.
        let matched = MatchResult::known(Some(13), "eve", Some(66), None, 0.95);
        let blacklisted = AlertObservation::face(1, 6, &matched, AlertType::Blacklist, 900.0, images("b"), t0);
        let outcome = lifecycle.apply(&blacklisted).await.unwrap();
        assert_eq!(outcome.transition, Transition::Escalated);
        assert_eq!(outcome.record.alert_type, AlertType::Blacklist);
        assert_eq!(outcome.record.person_id, Some(13));

        let again = lifecycle.apply(&blacklisted).await.unwrap();
        assert_eq!(again.transition, Transition::Refreshed);
    }

    #[tokio::test]
    async fn test_operator_resolved_record_starts_fresh() {
        let lifecycle = lifecycle();
        let t0 = Utc::now();
        let first = lifecycle.apply(&stranger(42, "a", t0)).await.unwrap();
        let resolved = lifecycle
            .resolve(first.record.id, AlertStatus::Ignored, "operator", Some("false alarm".into()))
            .await
            .unwrap();
        assert!(resolved.is_operator_resolved());

        let next = lifecycle.apply(&stranger(42, "b", t0)).await.unwrap();
        assert_eq!(next.transition, Transition::Created);
        assert_ne!(next.record.id, first.record.id);
    }

    #[tokio::test]
    async fn test_resolve_rejects_pending() {
        let lifecycle = lifecycle();
        let first = lifecycle.apply(&stranger(1, "a", Utc::now())).await.unwrap();
        assert!(matches!(
            lifecycle.resolve(first.record.id, AlertStatus::Pending, "op", None).await,
            Err(AlertError::InvalidTransition(_))
        ));
        assert!(matches!(
            lifecycle.resolve(999, AlertStatus::Processed, "op", None).await,
            Err(AlertError::NotFound(999))
        ));
    }

    #[test]
    fn test_unpersisted_event() {
        let event = stranger(3, "x", Utc::now()).to_event();
        assert!(event.id.is_none());
        assert!(!event.is_update);
        assert_eq!(event.status, AlertStatus::Pending);
    }
}

//! Per (camera, subject) alert cooldown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vigil_models::CameraId;

/// Who an alert is about. All strangers on a camera share one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownSubject {
    Person(i64),
    Stranger,
}

impl From<Option<i64>> for CooldownSubject {
    fn from(person_id: Option<i64>) -> Self {
        person_id.map_or(CooldownSubject::Stranger, CooldownSubject::Person)
    }
}

#[derive(Debug)]
struct State {
    cooldown: Duration,
    last_alert: HashMap<(CameraId, CooldownSubject), DateTime<Utc>>,
}

/// Suppresses repeat alerts for the same subject on the same camera.
#[derive(Debug)]
pub struct AlertCooldownManager {
    state: Mutex<State>,
}

impl AlertCooldownManager {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                cooldown,
                last_alert: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cooldown(&self) -> Duration {
        self.lock().cooldown
    }

    pub fn set_cooldown(&self, cooldown: Duration) {
        self.lock().cooldown = cooldown;
    }

    pub fn can_alert(&self, camera_id: CameraId, subject: CooldownSubject) -> bool {
        self.can_alert_at(camera_id, subject, Utc::now())
    }

    pub fn can_alert_at(&self, camera_id: CameraId, subject: CooldownSubject, now: DateTime<Utc>) -> bool {
        let state = self.lock();
        match state.last_alert.get(&(camera_id, subject)) {
            Some(last) => elapsed(*last, now) >= state.cooldown,
            None => true,
        }
    }

    pub fn record(&self, camera_id: CameraId, subject: CooldownSubject) {
        self.record_at(camera_id, subject, Utc::now());
    }

    pub fn record_at(&self, camera_id: CameraId, subject: CooldownSubject, now: DateTime<Utc>) {
        self.lock().last_alert.insert((camera_id, subject), now);
    }

    /// Drop entries older than twice the cooldown. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let horizon = state.cooldown * 2;
        let before = state.last_alert.len();
        state.last_alert.retain(|_, last| elapsed(*last, now) <= horizon);
        before - state.last_alert.len()
    }

    pub fn clear(&self) {
        self.lock().last_alert.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().last_alert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Negative spans (clock went backwards) count as zero.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_cooldown_blocks_until_elapsed() {
        let manager = AlertCooldownManager::new(Duration::from_secs(60));
        let t0 = Utc::now();
        let subject = CooldownSubject::Person(4);

        assert!(manager.can_alert_at(1, subject, t0));
        manager.record_at(1, subject, t0);
        assert!(!manager.can_alert_at(1, subject, t0 + ChronoDuration::seconds(30)));
        assert!(manager.can_alert_at(1, subject, t0 + ChronoDuration::seconds(60)));
    }

    #[test]
    fn test_keys_are_per_camera_and_subject() {
        let manager = AlertCooldownManager::new(Duration::from_secs(60));
        let t0 = Utc::now();
        manager.record_at(1, CooldownSubject::Stranger, t0);

        assert!(!manager.can_alert_at(1, None.into(), t0));
        assert!(manager.can_alert_at(2, CooldownSubject::Stranger, t0));
        assert!(manager.can_alert_at(1, Some(9).into(), t0));
    }

    #[test]
    fn test_cleanup_removes_entries_past_twice_cooldown() {
        let manager = AlertCooldownManager::new(Duration::from_secs(10));
        let t0 = Utc::now();
        manager.record_at(1, CooldownSubject::Stranger, t0);
        manager.record_at(1, CooldownSubject::Person(2), t0 + ChronoDuration::seconds(15));

        assert_eq!(manager.cleanup_expired_at(t0 + ChronoDuration::seconds(21)), 1);
        assert_eq!(manager.len(), 1);
        assert!(manager.can_alert_at(1, CooldownSubject::Stranger, t0 + ChronoDuration::seconds(21)));
    }

    #[test]
    fn test_set_cooldown_applies_to_existing_entries() {
        let manager = AlertCooldownManager::new(Duration::from_secs(60));
        let t0 = Utc::now();
        manager.record_at(3, CooldownSubject::Stranger, t0);
        manager.set_cooldown(Duration::from_secs(5));
        assert!(manager.can_alert_at(3, CooldownSubject::Stranger, t0 + ChronoDuration::seconds(6)));
    }
}

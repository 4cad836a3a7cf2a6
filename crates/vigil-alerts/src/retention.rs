//! Retention cleanup for alert records and capture folders.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::AlertResult;
use crate::repository::AlertRepository;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub alerts_deleted: usize,
    pub folders_deleted: usize,
}

/// Remove `YYYYMMDD` folders under `captures_dir` dated before `cutoff`.
///
/// Entries that are not date folders are left alone. A missing directory counts as empty.
pub fn cleanup_capture_dirs(captures_dir: &Path, cutoff: NaiveDate) -> AlertResult<usize> {
    if !captures_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(captures_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(date) = name
            .to_str()
            .and_then(|n| NaiveDate::parse_from_str(n, "%Y%m%d").ok())
        else {
            continue;
        };
        if date >= cutoff {
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), "Failed to remove capture folder: {}", e),
        }
    }
    Ok(removed)
}

/// Delete alerts and capture folders older than `retention_days` before `now`.
pub async fn run_retention(
    repository: &dyn AlertRepository,
    captures_dir: &Path,
    retention_days: u32,
    now: DateTime<Utc>,
) -> AlertResult<RetentionReport> {
    let cutoff = now - ChronoDuration::days(i64::from(retention_days));
    let alerts_deleted = repository.delete_created_before(cutoff).await?;

    let dir = captures_dir.to_path_buf();
    let cutoff_date = cutoff.date_naive();
    let folders_deleted = tokio::task::spawn_blocking(move || cleanup_capture_dirs(&dir, cutoff_date))
        .await
        .map_err(|e| crate::error::AlertError::storage(format!("cleanup task failed: {}", e)))??;

    let report = RetentionReport {
        alerts_deleted,
        folders_deleted,
    };
    info!(
        retention_days,
        alerts_deleted, folders_deleted, "Retention cleanup finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{AlertLifecycle, AlertObservation};
    use crate::repository::InMemoryAlertRepository;
    use crate::images::ImageRefs;
    use std::sync::Arc;

    #[test]
    fn test_cleanup_capture_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20240101", "20240215", "20240301", "thumbnails"] {
            fs::create_dir_all(dir.path().join(name).join("1")).unwrap();
        }
        fs::write(dir.path().join("20230101"), b"not a folder").unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        assert_eq!(cleanup_capture_dirs(dir.path(), cutoff).unwrap(), 1);
        assert!(!dir.path().join("20240101").exists());
        assert!(dir.path().join("20240215").exists());
        assert!(dir.path().join("thumbnails").exists());
        assert!(dir.path().join("20230101").exists());
    }

    #[test]
    fn test_missing_captures_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cutoff = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(cleanup_capture_dirs(&dir.path().join("absent"), cutoff).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_retention() {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(InMemoryAlertRepository::new());
        let lifecycle = AlertLifecycle::new(repository.clone());
        let now = Utc::now();

        let old = AlertObservation::body(1, 1, 50.0, ImageRefs::default(), now - ChronoDuration::days(40));
        let fresh = AlertObservation::body(1, 2, 50.0, ImageRefs::default(), now - ChronoDuration::days(2));
        lifecycle.apply(&old).await.unwrap();
        lifecycle.apply(&fresh).await.unwrap();

        let old_folder = (now - ChronoDuration::days(40)).format("%Y%m%d").to_string();
        fs::create_dir_all(dir.path().join(&old_folder)).unwrap();

        let report = run_retention(repository.as_ref(), dir.path(), 30, now).await.unwrap();
        assert_eq!(
            report,
            RetentionReport {
                alerts_deleted: 1,
                folders_deleted: 1
            }
        );
        assert_eq!(repository.len().await, 1);
    }
}

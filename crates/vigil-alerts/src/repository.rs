//! Alert persistence boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use vigil_models::{AlertId, AlertRecord, AlertStatus, CameraId, TrackId};

use crate::error::{AlertError, AlertResult};

/// Filter for listing alerts. Newest first.
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub camera_id: Option<CameraId>,
    pub status: Option<AlertStatus>,
    pub limit: Option<usize>,
}

/// Where alert records live.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Most recent record for a (camera, track) pair.
    async fn find_latest(&self, camera_id: CameraId, track_id: TrackId) -> AlertResult<Option<AlertRecord>>;

    /// Insert a record. The repository assigns the id; the one passed in is ignored.
    async fn create(&self, record: AlertRecord) -> AlertResult<AlertRecord>;

    /// Overwrite an existing record.
    async fn update(&self, record: &AlertRecord) -> AlertResult<()>;

    async fn get(&self, id: AlertId) -> AlertResult<Option<AlertRecord>>;

    async fn list(&self, query: &AlertQuery) -> AlertResult<Vec<AlertRecord>>;

    /// Delete records created before `cutoff`. Returns how many were removed.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> AlertResult<usize>;
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<AlertId, AlertRecord>,
    next_id: AlertId,
}

/// Process-local repository. Ids increase monotonically from 1.
#[derive(Debug, Default)]
pub struct InMemoryAlertRepository {
    table: RwLock<Table>,
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn find_latest(&self, camera_id: CameraId, track_id: TrackId) -> AlertResult<Option<AlertRecord>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .rev()
            .find(|r| r.camera_id == camera_id && r.track_id == track_id)
            .cloned())
    }

    async fn create(&self, mut record: AlertRecord) -> AlertResult<AlertRecord> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        record.id = table.next_id;
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: &AlertRecord) -> AlertResult<()> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&record.id) {
            Some(row) => {
                *row = record.clone();
                Ok(())
            }
            None => Err(AlertError::NotFound(record.id)),
        }
    }

    async fn get(&self, id: AlertId) -> AlertResult<Option<AlertRecord>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn list(&self, query: &AlertQuery) -> AlertResult<Vec<AlertRecord>> {
        let table = self.table.read().await;
        let rows = table
            .rows
            .values()
            .rev()
            .filter(|r| query.camera_id.map_or(true, |c| r.camera_id == c))
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> AlertResult<usize> {
        let mut table = self.table.write().await;
        let before = table.rows.len();
        table.rows.retain(|_, r| r.created_at >= cutoff);
        Ok(before - table.rows.len())
    }
}

//! Resizable concurrency limit for outbound recognition calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::error::{RecognitionError, RecognitionResult};

/// Counting gate shared by every camera.
///
/// Resizing swaps in a fresh semaphore; permits already held against the
/// old one stay valid until dropped.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: RwLock<Arc<Semaphore>>,
    limit: AtomicUsize,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: RwLock::new(Arc::new(Semaphore::new(limit))),
            limit: AtomicUsize::new(limit),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// Resize the gate. A zero limit is rejected.
    pub fn set_limit(&self, limit: usize) -> bool {
        if limit == 0 {
            return false;
        }
        let mut semaphore = self.semaphore.write().unwrap_or_else(|e| e.into_inner());
        *semaphore = Arc::new(Semaphore::new(limit));
        self.limit.store(limit, Ordering::SeqCst);
        info!(limit, "Recognition concurrency limit updated");
        true
    }

    fn current(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub async fn acquire(&self) -> RecognitionResult<OwnedSemaphorePermit> {
        self.current()
            .acquire_owned()
            .await
            .map_err(|_| RecognitionError::ServiceUnavailable("concurrency gate closed".to_string()))
    }

    pub fn available_permits(&self) -> usize {
        self.current().available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_limits_permits() {
        let gate = ConcurrencyGate::new(2);
        let _a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.available_permits(), 0);

        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), gate.acquire()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_resize_swaps_semaphore() {
        let gate = ConcurrencyGate::new(1);
        let held = gate.acquire().await.unwrap();

        assert!(!gate.set_limit(0));
        assert!(gate.set_limit(3));
        assert_eq!(gate.limit(), 3);
        assert_eq!(gate.available_permits(), 3);
        drop(held);
        assert_eq!(gate.available_permits(), 3);
    }
}

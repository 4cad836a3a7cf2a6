//! Live-view frame fan-out.
//!
//! Every subscriber of a camera gets its own small drop-oldest queue, so a
//! slow viewer only loses its own frames and the producer never waits.
//! Dropping a [`Subscription`] removes its queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{self, Stream};
use tokio::sync::Notify;
use tracing::debug;
use vigil_models::CameraId;

use crate::metrics;

/// An encoded live-view frame, shared by every subscriber it is queued for.
pub type JpegFrame = Arc<[u8]>;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 2;

#[derive(Debug)]
struct SubscriberQueue {
    frames: Mutex<VecDeque<JpegFrame>>,
    capacity: usize,
    ready: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<JpegFrame>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns how many frames were evicted.
    fn push(&self, frame: JpegFrame) -> usize {
        let evicted = {
            let mut frames = self.frames();
            let mut evicted = 0;
            while frames.len() >= self.capacity {
                frames.pop_front();
                evicted += 1;
            }
            frames.push_back(frame);
            evicted
        };
        self.ready.notify_one();
        evicted
    }

    fn pop(&self) -> Option<JpegFrame> {
        self.frames().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_one();
    }
}

type Registry = HashMap<CameraId, Vec<(u64, Arc<SubscriberQueue>)>>;

#[derive(Debug)]
struct Shared {
    subscribers: Mutex<Registry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unsubscribe(&self, camera_id: CameraId, id: u64) {
        let mut registry = self.registry();
        if let Some(queues) = registry.get_mut(&camera_id) {
            queues.retain(|(queue_id, _)| *queue_id != id);
            let remaining = queues.len();
            if remaining == 0 {
                registry.remove(&camera_id);
            }
            metrics::set_stream_subscribers(camera_id, remaining);
            debug!(camera_id, subscriber = id, remaining, "Live-view subscriber left");
        }
    }
}

/// Per-camera live-view fan-out.
#[derive(Debug, Clone)]
pub struct StreamBroadcaster {
    shared: Arc<Shared>,
}

impl Default for StreamBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl StreamBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Cheap check so producers can skip encoding when nobody watches.
    pub fn has_subscribers(&self, camera_id: CameraId) -> bool {
        self.shared
            .registry()
            .get(&camera_id)
            .is_some_and(|queues| !queues.is_empty())
    }

    pub fn subscriber_count(&self, camera_id: CameraId) -> usize {
        self.shared.registry().get(&camera_id).map_or(0, Vec::len)
    }

    /// Queue a frame for every subscriber of the camera. Never blocks.
    ///
    /// Returns the number of subscribers the frame was queued for.
    pub fn broadcast(&self, camera_id: CameraId, frame: JpegFrame) -> usize {
        let queues: Vec<Arc<SubscriberQueue>> = match self.shared.registry().get(&camera_id) {
            Some(queues) => queues.iter().map(|(_, q)| Arc::clone(q)).collect(),
            None => return 0,
        };

        let mut dropped = 0;
        for queue in &queues {
            dropped += queue.push(Arc::clone(&frame));
        }
        if dropped > 0 {
            metrics::record_broadcast_dropped(camera_id, dropped);
            debug!(camera_id, dropped, "Live-view frames dropped for slow subscribers");
        }
        queues.len()
    }

    /// Start receiving a camera's frames.
    pub fn subscribe(&self, camera_id: CameraId) -> Subscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.shared.capacity));

        let count = {
            let mut registry = self.shared.registry();
            let queues = registry.entry(camera_id).or_default();
            queues.push((id, Arc::clone(&queue)));
            queues.len()
        };
        metrics::set_stream_subscribers(camera_id, count);
        debug!(camera_id, subscriber = id, count, "Live-view subscriber joined");

        Subscription {
            camera_id,
            id,
            queue,
            shared: Arc::clone(&self.shared),
        }
    }

    /// End every subscription of a camera, e.g. when the camera is removed.
    pub fn close_camera(&self, camera_id: CameraId) {
        let removed = self.shared.registry().remove(&camera_id);
        if let Some(queues) = removed {
            for (_, queue) in &queues {
                queue.close();
            }
            metrics::set_stream_subscribers(camera_id, 0);
            debug!(camera_id, closed = queues.len(), "Live-view subscriptions closed");
        }
    }
}

/// One viewer's frame queue. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    camera_id: CameraId,
    id: u64,
    queue: Arc<SubscriberQueue>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// Next frame, waiting if none is queued. `None` once the camera is closed.
    pub async fn next_frame(&mut self) -> Option<JpegFrame> {
        loop {
            if let Some(frame) = self.queue.pop() {
                return Some(frame);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.ready.notified().await;
        }
    }

    /// Next frame if one is already queued.
    pub fn try_next(&mut self) -> Option<JpegFrame> {
        self.queue.pop()
    }

    pub fn queued(&self) -> usize {
        self.queue.frames().len()
    }

    /// Frames as a stream. Dropping the stream unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = JpegFrame> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            let frame = subscription.next_frame().await?;
            Some((frame, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.unsubscribe(self.camera_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    fn frame(n: u8) -> JpegFrame {
        Arc::from(vec![n])
    }

    #[test]
    fn test_slow_subscriber_keeps_newest_frames() {
        let broadcaster = StreamBroadcaster::new(2);
        let mut subscription = broadcaster.subscribe(1);

        for n in 1..=5 {
            assert_eq!(broadcaster.broadcast(1, frame(n)), 1);
        }

        assert_eq!(subscription.queued(), 2);
        assert_eq!(subscription.try_next().as_deref(), Some(&[4u8][..]));
        assert_eq!(subscription.try_next().as_deref(), Some(&[5u8][..]));
        assert!(subscription.try_next().is_none());
    }

    #[test]
    fn test_subscribers_are_independent() {
        let broadcaster = StreamBroadcaster::new(2);
        let mut fast = broadcaster.subscribe(1);
        let mut slow = broadcaster.subscribe(1);
        let mut other_camera = broadcaster.subscribe(2);

        broadcaster.broadcast(1, frame(1));
        assert!(fast.try_next().is_some());
        broadcaster.broadcast(1, frame(2));
        broadcaster.broadcast(1, frame(3));

        assert_eq!(fast.queued(), 2);
        assert_eq!(slow.try_next().as_deref(), Some(&[2u8][..]));
        assert!(other_camera.try_next().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = StreamBroadcaster::default();
        let first = broadcaster.subscribe(7);
        let second = broadcaster.subscribe(7);
        assert_eq!(broadcaster.subscriber_count(7), 2);

        drop(first);
        assert_eq!(broadcaster.subscriber_count(7), 1);
        drop(second);
        assert!(!broadcaster.has_subscribers(7));
        assert_eq!(broadcaster.broadcast(7, frame(1)), 0);
    }

    #[test]
    fn test_pending_subscriber_is_woken_by_broadcast() {
        let broadcaster = StreamBroadcaster::default();
        let mut subscription = broadcaster.subscribe(4);
        let mut next = task::spawn(subscription.next_frame());

        assert_pending!(next.poll());
        broadcaster.broadcast(4, frame(6));
        assert!(next.is_woken());
        let received = assert_ready!(next.poll());
        assert_eq!(received.as_deref(), Some(&[6u8][..]));
    }

    #[test]
    fn test_pending_subscriber_sees_close() {
        let broadcaster = StreamBroadcaster::default();
        let mut subscription = broadcaster.subscribe(4);
        let mut next = task::spawn(subscription.next_frame());

        assert_pending!(next.poll());
        broadcaster.close_camera(4);
        assert!(next.is_woken());
        assert_eq!(assert_ready!(next.poll()), None);
    }

    #[tokio::test]
    async fn test_next_frame_waits_for_broadcast() {
        let broadcaster = StreamBroadcaster::default();
        let mut subscription = broadcaster.subscribe(3);

        let producer = broadcaster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.broadcast(3, frame(9));
        });

        let received = tokio::time::timeout(Duration::from_secs(2), subscription.next_frame())
            .await
            .expect("frame before timeout");
        assert_eq!(received.as_deref(), Some(&[9u8][..]));
    }

    #[tokio::test]
    async fn test_stream_ends_on_close_and_cleans_up() {
        let broadcaster = StreamBroadcaster::default();
        let stream = broadcaster.subscribe(4).into_stream();
        broadcaster.broadcast(4, frame(1));
        broadcaster.close_camera(4);

        let frames: Vec<JpegFrame> = stream.collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(broadcaster.subscriber_count(4), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_unsubscribes() {
        let broadcaster = StreamBroadcaster::default();
        let mut stream = Box::pin(broadcaster.subscribe(5).into_stream());
        broadcaster.broadcast(5, frame(1));
        assert!(stream.next().await.is_some());
        assert!(broadcaster.has_subscribers(5));

        drop(stream);
        assert!(!broadcaster.has_subscribers(5));
    }
}

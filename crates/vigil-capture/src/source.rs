//! Per-camera frame source with its own capture thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use vigil_models::{CameraId, CaptureStatus, Frame};

use crate::backoff::Backoff;
use crate::config::CaptureConfig;
use crate::queue::DropOldestQueue;
use crate::stream::{StreamOpener, VideoStream};

/// Consecutive read failures tolerated before reconnecting.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Pause after a throttled skip read.
const SKIP_PAUSE: Duration = Duration::from_millis(1);

/// Receives `(camera_id, new_status)` on every status change.
///
/// Invoked on the capture thread (or the caller of `stop`); must not block.
pub type StatusCallback = Arc<dyn Fn(CameraId, CaptureStatus) + Send + Sync>;

/// Snapshot of a source's counters.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    pub camera_id: CameraId,
    pub status: CaptureStatus,
    pub frame_count: u64,
    pub reconnect_count: u64,
    pub current_fps: f64,
    /// `WxH`
    pub resolution: String,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub last_frame_time: Option<DateTime<Utc>>,
}

/// Cancellation flag whose waits can be cut short by `set`.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn set(&self) {
        *lock(&self.stopped) = true;
        self.cond.notify_all();
    }

    fn clear(&self) {
        *lock(&self.stopped) = false;
    }

    fn is_set(&self) -> bool {
        *lock(&self.stopped)
    }

    /// Sleep up to `timeout`; returns true if stop was requested meanwhile.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = lock(&self.stopped);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

/// State shared between the handle and the capture thread.
struct Shared {
    config: CaptureConfig,
    opener: Arc<dyn StreamOpener>,
    on_status: Option<StatusCallback>,
    status: Mutex<CaptureStatus>,
    stop: StopSignal,
    queue: DropOldestQueue<Frame>,
    frame_count: AtomicU64,
    reconnect_count: AtomicU64,
    /// f64 bits
    current_fps: AtomicU64,
    resolution: Mutex<(u32, u32)>,
    last_frame_time: Mutex<Option<DateTime<Utc>>>,
}

/// Running capture thread plus a channel that disconnects when it exits.
struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Connects to one stream, throttles it to the target rate and buffers frames.
///
/// ```ignore
/// let source = FrameSource::new(CaptureConfig::new(1, "rtsp://..."), opener, None);
/// source.start();
/// while let Some(frame) = source.get_frame(Some(Duration::from_millis(500))) {
///     process(frame);
/// }
/// source.stop(Duration::from_secs(5));
/// ```
pub struct FrameSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl FrameSource {
    /// Idle source for `config`. Nothing is opened until [`FrameSource::start`].
    ///
    /// `on_status` is called from the capture thread on every status change.
    pub fn new(
        config: CaptureConfig,
        opener: Arc<dyn StreamOpener>,
        on_status: Option<StatusCallback>,
    ) -> Self {
        let queue = DropOldestQueue::new(config.queue_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                opener,
                on_status,
                status: Mutex::new(CaptureStatus::Idle),
                stop: StopSignal::default(),
                queue,
                frame_count: AtomicU64::new(0),
                reconnect_count: AtomicU64::new(0),
                current_fps: AtomicU64::new(0f64.to_bits()),
                resolution: Mutex::new((0, 0)),
                last_frame_time: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn camera_id(&self) -> CameraId {
        self.shared.config.camera_id
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.shared.config
    }

    /// Current connection state.
    pub fn status(&self) -> CaptureStatus {
        *lock(&self.shared.status)
    }

    /// Spawn the capture thread.
    ///
    /// Returns true if a capture thread is (already) live, including one still
    /// connecting or reconnecting. Returns false if a previous thread was told
    /// to stop but has not exited yet.
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.worker);
        let camera_id = self.camera_id();

        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                if self.shared.stop.is_set() {
                    warn!(camera_id, "Previous capture thread still alive");
                    return false;
                }
                debug!(camera_id, status = %self.status(), "Capture already running");
                return true;
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.handle.join();
        }

        let shared = &self.shared;
        shared.stop.clear();
        shared.frame_count.store(0, Ordering::Relaxed);
        shared.reconnect_count.store(0, Ordering::Relaxed);
        shared.queue.clear();

        let (done_tx, done_rx) = bounded::<()>(0);
        let thread_shared = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", camera_id))
            .spawn(move || {
                let _done = done_tx;
                thread_shared.run();
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker {
                    handle,
                    done: done_rx,
                });
                info!(camera_id, "Capture thread started");
                true
            }
            Err(e) => {
                error!(camera_id, "Failed to spawn capture thread: {}", e);
                shared.set_status(CaptureStatus::Error);
                false
            }
        }
    }

    /// Request cancellation and wait up to `timeout` for the capture thread.
    ///
    /// The status ends as `Stopped` whether or not the thread exited in time.
    pub fn stop(&self, timeout: Duration) {
        let mut worker = lock(&self.worker);
        let camera_id = self.camera_id();

        if worker.is_none() && self.status().is_inactive() {
            return;
        }

        info!(camera_id, "Stopping capture");
        self.shared.stop.set();

        if let Some(running) = worker.take() {
            match running.done.recv_timeout(timeout) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    let _ = running.handle.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        camera_id,
                        "Capture thread did not exit within {:?}", timeout
                    );
                    *worker = Some(running);
                }
            }
        }

        self.shared.set_status(CaptureStatus::Stopped);
        info!(camera_id, "Capture stopped");
    }

    /// Dequeue one frame. `None` timeout polls without waiting.
    pub fn get_frame(&self, timeout: Option<Duration>) -> Option<Frame> {
        self.shared.queue.pop(timeout)
    }

    /// Frames waiting to be analysed.
    pub fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    /// Frames delivered over the last full second.
    pub fn current_fps(&self) -> f64 {
        f64::from_bits(self.shared.current_fps.load(Ordering::Relaxed))
    }

    /// When the last frame was queued. `None` before the first one.
    pub fn last_frame_time(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.last_frame_time)
    }

    /// Counters and connection state for status reports.
    pub fn stats(&self) -> CaptureStats {
        let shared = &self.shared;
        let (width, height) = *lock(&shared.resolution);
        CaptureStats {
            camera_id: shared.config.camera_id,
            status: self.status(),
            frame_count: shared.frame_count.load(Ordering::Relaxed),
            reconnect_count: shared.reconnect_count.load(Ordering::Relaxed),
            current_fps: (self.current_fps() * 100.0).round() / 100.0,
            resolution: format!("{}x{}", width, height),
            queue_size: shared.queue.len(),
            queue_capacity: shared.queue.capacity(),
            last_frame_time: self.last_frame_time(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shared.stop.set();
    }
}

impl Shared {
    fn camera_id(&self) -> CameraId {
        self.config.camera_id
    }

    fn set_status(&self, status: CaptureStatus) {
        let previous = {
            let mut current = lock(&self.status);
            if *current == status {
                return;
            }
            std::mem::replace(&mut *current, status)
        };

        info!(
            camera_id = self.camera_id(),
            "Capture status {} -> {}", previous, status
        );
        if let Some(callback) = &self.on_status {
            callback(self.camera_id(), status);
        }
    }

    /// Open the stream and validate it with one test frame.
    fn connect(&self) -> Option<Box<dyn VideoStream>> {
        self.set_status(CaptureStatus::Connecting);
        let camera_id = self.camera_id();

        let mut stream = match self.opener.open(&self.config.stream_uri(), &self.config) {
            Ok(stream) => stream,
            Err(e) => {
                error!(camera_id, "Failed to open stream: {}", e);
                self.set_status(CaptureStatus::Error);
                return None;
            }
        };

        if let Err(e) = stream.read() {
            error!(camera_id, "Failed to read first frame: {}", e);
            self.set_status(CaptureStatus::Error);
            return None;
        }

        let resolution = stream.resolution();
        *lock(&self.resolution) = resolution;
        info!(
            camera_id,
            width = resolution.0,
            height = resolution.1,
            source_fps = ?stream.source_fps(),
            target_fps = self.config.target_fps,
            opener = self.opener.name(),
            "Stream connected"
        );

        self.set_status(CaptureStatus::Running);
        Some(stream)
    }

    /// Retry `connect` with exponential backoff until it succeeds or stop is requested.
    fn reconnect(&self) -> Option<Box<dyn VideoStream>> {
        self.set_status(CaptureStatus::Reconnecting);
        let camera_id = self.camera_id();
        let mut backoff = Backoff::new(
            self.config.reconnect_interval,
            self.config.reconnect_backoff,
            self.config.max_reconnect_interval,
        );

        while !self.stop.is_set() {
            let attempt = self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1;
            crate::metrics::record_reconnect(camera_id);
            info!(camera_id, attempt, "Reconnecting");

            if let Some(stream) = self.connect() {
                info!(camera_id, attempt, "Reconnected");
                return Some(stream);
            }

            let wait = backoff.next().unwrap_or(self.config.max_reconnect_interval);
            warn!(camera_id, "Reconnect failed, retrying in {:?}", wait);
            if self.stop.wait(wait) {
                break;
            }
        }
        None
    }

    fn run(&self) {
        let camera_id = self.camera_id();

        let mut stream = match self.connect().or_else(|| self.reconnect()) {
            Some(stream) => stream,
            None => {
                self.set_status(CaptureStatus::Stopped);
                return;
            }
        };

        let interval = self.config.frame_interval();
        let mut last_capture: Option<Instant> = None;
        let mut fps_window_start = Instant::now();
        let mut fps_frames = 0u32;
        let mut failures = 0u32;

        while !self.stop.is_set() {
            let now = Instant::now();
            if last_capture.is_some_and(|last| now.duration_since(last) < interval) {
                let _ = stream.grab();
                std::thread::sleep(SKIP_PAUSE);
                continue;
            }

            let image = match stream.read() {
                Ok(image) => image,
                Err(e) => {
                    failures += 1;
                    warn!(
                        camera_id,
                        "Frame read failed ({}/{}): {}", failures, MAX_CONSECUTIVE_FAILURES, e
                    );
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        error!(camera_id, "Too many consecutive read failures, reconnecting");
                        drop(stream);
                        match self.reconnect() {
                            Some(reopened) => stream = reopened,
                            None => {
                                self.set_status(CaptureStatus::Stopped);
                                return;
                            }
                        }
                        failures = 0;
                    }
                    continue;
                }
            };

            failures = 0;
            last_capture = Some(now);
            let sequence = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
            let timestamp = Utc::now();
            *lock(&self.last_frame_time) = Some(timestamp);

            fps_frames += 1;
            let elapsed = now.duration_since(fps_window_start);
            if elapsed >= Duration::from_secs(1) {
                let fps = fps_frames as f64 / elapsed.as_secs_f64();
                self.current_fps.store(fps.to_bits(), Ordering::Relaxed);
                crate::metrics::set_fps(camera_id, fps);
                fps_frames = 0;
                fps_window_start = now;
            }

            let mut frame = Frame::new(image, camera_id, sequence, timestamp);
            frame.resolution = *lock(&self.resolution);
            crate::metrics::record_frame_captured(camera_id);

            let evicted = self.queue.push(frame);
            if evicted > 0 {
                debug!(camera_id, evicted, "Frame queue full, dropped oldest");
                crate::metrics::record_frame_dropped(camera_id);
            }
        }

        drop(stream);
        self.set_status(CaptureStatus::Stopped);
    }
}

/// Lock ignoring poisoning; the guarded data stays consistent across panics.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, CaptureResult};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicUsize;

    /// Endless synthetic stream; each frame's top-left pixel encodes its index.
    struct SyntheticStream {
        next: u32,
        fail_after: Option<u32>,
    }

    impl VideoStream for SyntheticStream {
        fn read(&mut self) -> CaptureResult<RgbImage> {
            if self.fail_after.is_some_and(|limit| self.next >= limit) {
                return Err(CaptureError::EndOfStream);
            }
            let mut image = RgbImage::new(8, 6);
            image.put_pixel(0, 0, Rgb([(self.next % 256) as u8, 0, 0]));
            self.next += 1;
            Ok(image)
        }

        fn resolution(&self) -> (u32, u32) {
            (8, 6)
        }
    }

    struct SyntheticOpener {
        opens: AtomicUsize,
        refuse_first: usize,
        fail_after: Option<u32>,
    }

    impl SyntheticOpener {
        fn healthy() -> Self {
            Self {
                opens: AtomicUsize::new(0),
                refuse_first: 0,
                fail_after: None,
            }
        }
    }

    impl StreamOpener for SyntheticOpener {
        fn name(&self) -> &'static str {
            "synthetic"
        }

        fn open(&self, _uri: &str, _config: &CaptureConfig) -> CaptureResult<Box<dyn VideoStream>> {
            let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
            if attempt < self.refuse_first {
                return Err(CaptureError::open_failed("connection refused"));
            }
            Ok(Box::new(SyntheticStream {
                next: 0,
                fail_after: self.fail_after,
            }))
        }
    }

    fn fast_config(queue_capacity: usize) -> CaptureConfig {
        let mut config = CaptureConfig::new(7, "rtsp://camera/live")
            .with_target_fps(1000)
            .with_queue_capacity(queue_capacity);
        config.reconnect_interval = Duration::from_millis(10);
        config.max_reconnect_interval = Duration::from_millis(40);
        config
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_start_get_frame_stop() {
        let source = FrameSource::new(fast_config(4), Arc::new(SyntheticOpener::healthy()), None);
        assert_eq!(source.status(), CaptureStatus::Idle);
        assert!(source.start());

        let frame = source.get_frame(Some(Duration::from_secs(2))).expect("frame");
        assert_eq!(frame.camera_id, 7);
        assert_eq!(frame.resolution, (8, 6));
        assert_eq!(source.status(), CaptureStatus::Running);

        source.stop(Duration::from_secs(2));
        assert_eq!(source.status(), CaptureStatus::Stopped);
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let source = FrameSource::new(fast_config(4), Arc::new(SyntheticOpener::healthy()), None);
        assert!(source.start());
        assert!(wait_until(Duration::from_secs(2), || source.status() == CaptureStatus::Running));
        assert!(source.start());
        source.stop(Duration::from_secs(2));
    }

    #[test]
    fn test_start_is_noop_while_reconnecting() {
        let opener = Arc::new(SyntheticOpener {
            opens: AtomicUsize::new(0),
            refuse_first: usize::MAX,
            fail_after: None,
        });
        let mut config = fast_config(4);
        config.reconnect_interval = Duration::from_secs(30);
        config.max_reconnect_interval = Duration::from_secs(30);

        let source = FrameSource::new(config, opener.clone(), None);
        assert!(source.start());
        assert!(wait_until(Duration::from_secs(2), || opener.opens.load(Ordering::SeqCst) >= 1));
        assert_ne!(source.status(), CaptureStatus::Running);

        assert!(source.start());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1, "no second capture thread");
        source.stop(Duration::from_secs(2));
    }

    #[test]
    fn test_queue_keeps_only_newest_frames() {
        let source = FrameSource::new(fast_config(3), Arc::new(SyntheticOpener::healthy()), None);
        source.start();
        assert!(wait_until(Duration::from_secs(2), || source.stats().frame_count >= 10));
        source.stop(Duration::from_secs(2));

        let produced = source.stats().frame_count;
        assert_eq!(source.queue_size(), 3);
        let sequences: Vec<u64> = std::iter::from_fn(|| source.get_frame(None))
            .map(|f| f.sequence)
            .collect();
        assert_eq!(sequences, vec![produced - 2, produced - 1, produced]);
    }

    #[test]
    fn test_reconnects_after_refused_opens() {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        let callback: StatusCallback = Arc::new(move |_, status| sink.lock().unwrap().push(status));

        let opener = Arc::new(SyntheticOpener {
            opens: AtomicUsize::new(0),
            refuse_first: 3,
            fail_after: None,
        });
        let source = FrameSource::new(fast_config(4), opener.clone(), Some(callback));
        source.start();

        assert!(source.get_frame(Some(Duration::from_secs(3))).is_some());
        source.stop(Duration::from_secs(2));

        assert_eq!(opener.opens.load(Ordering::SeqCst), 4);
        assert_eq!(source.stats().reconnect_count, 3);
        let seen = statuses.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&CaptureStatus::Connecting));
        assert!(seen.contains(&CaptureStatus::Reconnecting));
        assert!(seen.contains(&CaptureStatus::Error));
        assert_eq!(seen.last(), Some(&CaptureStatus::Stopped));
    }

    #[test]
    fn test_read_failures_trigger_reconnect() {
        let opener = Arc::new(SyntheticOpener {
            opens: AtomicUsize::new(0),
            refuse_first: 0,
            fail_after: Some(3),
        });
        let source = FrameSource::new(fast_config(4), opener.clone(), None);
        source.start();

        assert!(wait_until(Duration::from_secs(3), || opener.opens.load(Ordering::SeqCst) >= 2));
        source.stop(Duration::from_secs(2));
        assert!(source.stats().reconnect_count >= 1);
    }

    #[test]
    fn test_stop_interrupts_backoff_wait() {
        let opener = Arc::new(SyntheticOpener {
            opens: AtomicUsize::new(0),
            refuse_first: usize::MAX,
            fail_after: None,
        });
        let mut config = fast_config(4);
        config.reconnect_interval = Duration::from_secs(30);
        config.max_reconnect_interval = Duration::from_secs(30);

        let source = FrameSource::new(config, opener, None);
        source.start();
        assert!(wait_until(Duration::from_secs(2), || source.status() == CaptureStatus::Error));

        let started = Instant::now();
        source.stop(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(source.status(), CaptureStatus::Stopped);
    }

    #[test]
    fn test_stop_on_idle_source_is_noop() {
        let source = FrameSource::new(fast_config(4), Arc::new(SyntheticOpener::healthy()), None);
        source.stop(Duration::from_millis(10));
        assert_eq!(source.status(), CaptureStatus::Idle);
        assert!(source.get_frame(None).is_none());
    }
}

//! Camera registry and per-camera analysis workers.
//!
//! Structural changes (add, remove, start, stop) are serialised by one lock
//! on the camera table. Once a camera runs, its worker thread owns the
//! camera's tracker outright and only talks to the rest of the engine through
//! the coordination loop's channel, so a camera stuck reconnecting or
//! analysing slowly never holds up another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use image::RgbImage;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_capture::{CaptureConfig, Credentials, FrameSource, StatusCallback, StreamOpener};
use vigil_models::{CameraId, CaptureStatus, EngineStatus, TrackerEvent};
use vigil_recognition::matcher::encode_jpeg;
use vigil_recognition::GatewayStats;
use vigil_tracker::{BodyDetector, FaceDetector, ObjectTracker};

use crate::broadcaster::Subscription;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::coordinator::{Coordinator, WorkItem};
use crate::error::{EngineError, EngineResult};
use crate::logging::CameraLogger;
use crate::metrics;

/// Detection models shared read-only by every camera.
#[derive(Clone)]
pub struct DetectionModels {
    pub body: Arc<dyn BodyDetector>,
    pub face: Arc<dyn FaceDetector>,
}

/// Loads the detection models when the engine starts. Blocking.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> EngineResult<DetectionModels>;

    fn name(&self) -> &'static str;
}

/// A camera as registered by the management layer.
#[derive(Debug, Clone)]
pub struct CameraSpec {
    pub camera_id: CameraId,
    pub name: String,
    pub uri: String,
    pub credentials: Option<Credentials>,
    pub target_fps: u32,
    /// Disabled cameras stay registered but are not started with the engine
    pub enabled: bool,
}

impl CameraSpec {
    pub fn new(camera_id: CameraId, name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            camera_id,
            name: name.into(),
            uri: uri.into(),
            credentials: None,
            target_fps: 5,
            enabled: true,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_target_fps(mut self, target_fps: u32) -> Self {
        self.target_fps = target_fps;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig::new(self.camera_id, self.uri.clone())
            .with_credentials(self.credentials.clone())
            .with_target_fps(self.target_fps)
    }
}

/// Point-in-time view of one camera.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatusReport {
    pub camera_id: CameraId,
    pub camera_name: String,
    pub enabled: bool,
    pub status: CaptureStatus,
    pub fps: f64,
    pub queue_size: usize,
    pub frame_count: u64,
    pub reconnect_count: u64,
    pub resolution: Option<String>,
    pub last_frame_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub status: EngineStatus,
    pub camera_count: usize,
    pub running_camera_count: usize,
    pub recognition: GatewayStats,
}

struct RunningCamera {
    source: Arc<FrameSource>,
    stop: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
    done: Receiver<()>,
}

struct CameraEntry {
    spec: CameraSpec,
    running: Option<RunningCamera>,
}

impl CameraEntry {
    fn report(&self) -> CameraStatusReport {
        let spec = &self.spec;
        match &self.running {
            Some(running) => {
                let stats = running.source.stats();
                CameraStatusReport {
                    camera_id: spec.camera_id,
                    camera_name: spec.name.clone(),
                    enabled: spec.enabled,
                    status: stats.status,
                    fps: stats.current_fps,
                    queue_size: stats.queue_size,
                    frame_count: stats.frame_count,
                    reconnect_count: stats.reconnect_count,
                    resolution: Some(stats.resolution),
                    last_frame_time: stats.last_frame_time,
                }
            }
            None => CameraStatusReport {
                camera_id: spec.camera_id,
                camera_name: spec.name.clone(),
                enabled: spec.enabled,
                status: CaptureStatus::Stopped,
                fps: 0.0,
                queue_size: 0,
                frame_count: 0,
                reconnect_count: 0,
                resolution: None,
                last_frame_time: None,
            },
        }
    }

    fn is_capturing(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.source.status() == CaptureStatus::Running)
    }
}

/// Coordination loop and background tasks that exist while the engine runs.
struct Runtime {
    work_tx: mpsc::Sender<WorkItem>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    context: Arc<EngineContext>,
    config: EngineConfig,
    loader: Arc<dyn ModelLoader>,
    opener: Arc<dyn StreamOpener>,
    status: Mutex<EngineStatus>,
    models: RwLock<Option<DetectionModels>>,
    cameras: Mutex<HashMap<CameraId, CameraEntry>>,
    /// Next track id per camera. Outlives camera removal so ids are never reissued
    track_ids: Mutex<HashMap<CameraId, Arc<AtomicU32>>>,
    runtime: Mutex<Option<Runtime>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn status(&self) -> EngineStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: EngineStatus) {
        *lock(&self.status) = status;
    }

    fn counts(&self) -> (usize, usize) {
        let cameras = lock(&self.cameras);
        let running = cameras.values().filter(|c| c.is_capturing()).count();
        (cameras.len(), running)
    }

    fn track_id_counter(&self, camera_id: CameraId) -> Arc<AtomicU32> {
        let mut counters = lock(&self.track_ids);
        Arc::clone(
            counters
                .entry(camera_id)
                .or_insert_with(|| Arc::new(AtomicU32::new(1))),
        )
    }

    fn push_engine_status(&self) {
        let (camera_count, running_count) = self.counts();
        self.context
            .hub()
            .push_engine_status(self.status(), camera_count, running_count);
    }

    fn update_active_gauge(&self) {
        let active = lock(&self.cameras)
            .values()
            .filter(|c| c.running.is_some())
            .count();
        metrics::set_active_cameras(active);
    }

    /// Signal, join within the stop timeout, then release the frame source. Blocking.
    fn shutdown_camera(&self, camera_id: CameraId, running: RunningCamera) {
        let timeout = self.config.stop_timeout;
        running.stop.store(true, Ordering::Release);

        match running.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if running.worker.join().is_err() {
                    error!(camera_id, "Analysis worker panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(camera_id, "Analysis worker did not exit within {:?}", timeout);
            }
        }

        running.source.stop(timeout);
        info!(camera_id, "Camera stopped");
    }
}

/// Runs every registered camera's pipeline.
#[derive(Clone)]
pub struct EngineOrchestrator {
    inner: Arc<Inner>,
}

impl EngineOrchestrator {
    pub fn new(
        context: Arc<EngineContext>,
        config: EngineConfig,
        loader: Arc<dyn ModelLoader>,
        opener: Arc<dyn StreamOpener>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                config,
                loader,
                opener,
                status: Mutex::new(EngineStatus::Stopped),
                models: RwLock::new(None),
                cameras: Mutex::new(HashMap::new()),
                track_ids: Mutex::new(HashMap::new()),
                runtime: Mutex::new(None),
            }),
        }
    }

    /// Shared state: hub, alert lifecycle, recognition and live view.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.inner.context
    }

    pub fn status(&self) -> EngineStatus {
        self.inner.status()
    }

    /// Load models, start the coordination loop, then every enabled camera.
    ///
    /// A model load failure leaves the engine in `Error` with no camera started.
    pub async fn start(&self) -> EngineResult<()> {
        let inner = &self.inner;
        {
            let mut status = lock(&inner.status);
            if matches!(*status, EngineStatus::Running | EngineStatus::Starting) {
                return Ok(());
            }
            *status = EngineStatus::Starting;
        }
        inner.push_engine_status();
        info!(loader = inner.loader.name(), "Loading detection models");

        let loader = Arc::clone(&inner.loader);
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(EngineError::from)
            .and_then(|result| result);

        let models = match loaded {
            Ok(models) => models,
            Err(e) => {
                error!("Engine start failed: {}", e);
                inner.set_status(EngineStatus::Error);
                inner.push_engine_status();
                inner
                    .context
                    .hub()
                    .notify("error", Some("Engine"), format!("Engine start failed: {}", e));
                return Err(e);
            }
        };
        *inner.models.write().unwrap_or_else(|e| e.into_inner()) = Some(models);

        let (work_tx, work_rx) = mpsc::channel(inner.config.coordinator_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = Arc::clone(&inner.context);
        let tasks = vec![
            tokio::spawn(Coordinator::new(Arc::clone(&context)).run(work_rx, shutdown_rx.clone())),
            context
                .gateway()
                .spawn_cooldown_sweeper(inner.config.cooldown_sweep_interval, shutdown_rx.clone()),
            spawn_retention(context, inner.config.retention_interval, shutdown_rx),
        ];
        *lock(&inner.runtime) = Some(Runtime {
            work_tx,
            shutdown: shutdown_tx,
            tasks,
        });
        inner.set_status(EngineStatus::Running);
        info!("Engine running");

        let enabled: Vec<CameraId> = lock(&inner.cameras)
            .values()
            .filter(|c| c.spec.enabled)
            .map(|c| c.spec.camera_id)
            .collect();
        for camera_id in enabled {
            if let Err(e) = self.start_camera(camera_id) {
                warn!(camera_id, "Camera failed to start: {}", e);
            }
        }

        inner.push_engine_status();
        Ok(())
    }

    /// Stop every camera, then the coordination loop and background tasks.
    pub async fn stop(&self) -> EngineResult<()> {
        let inner = &self.inner;
        {
            let mut status = lock(&inner.status);
            if *status == EngineStatus::Stopped {
                return Ok(());
            }
            *status = EngineStatus::Stopping;
        }
        inner.push_engine_status();
        info!("Stopping engine");

        let running: Vec<(CameraId, RunningCamera)> = lock(&inner.cameras)
            .iter_mut()
            .filter_map(|(id, entry)| entry.running.take().map(|r| (*id, r)))
            .collect();
        let stopper = Arc::clone(inner);
        tokio::task::spawn_blocking(move || {
            for (camera_id, camera) in running {
                stopper.shutdown_camera(camera_id, camera);
            }
        })
        .await?;
        inner.update_active_gauge();

        let runtime = lock(&inner.runtime).take();
        if let Some(runtime) = runtime {
            let _ = runtime.shutdown.send(true);
            drop(runtime.work_tx);
            for task in runtime.tasks {
                if tokio::time::timeout(inner.config.stop_timeout, task).await.is_err() {
                    warn!("Background task did not stop within {:?}", inner.config.stop_timeout);
                }
            }
        }

        *inner.models.write().unwrap_or_else(|e| e.into_inner()) = None;
        inner.set_status(EngineStatus::Stopped);
        inner.push_engine_status();
        info!("Engine stopped");
        Ok(())
    }

    /// Register a camera. Starts it right away if the engine runs and the camera is enabled.
    ///
    /// Returns false if the id is already registered.
    pub fn add_camera(&self, spec: CameraSpec) -> bool {
        let camera_id = spec.camera_id;
        let enabled = spec.enabled;
        {
            let mut cameras = lock(&self.inner.cameras);
            if cameras.contains_key(&camera_id) {
                warn!(camera_id, "Camera already registered");
                return false;
            }
            cameras.insert(camera_id, CameraEntry { spec, running: None });
        }
        info!(camera_id, "Camera registered");

        if enabled && self.status() == EngineStatus::Running {
            if let Err(e) = self.start_camera(camera_id) {
                warn!(camera_id, "Camera registered but not started: {}", e);
            }
        }
        true
    }

    /// Stop and unregister a camera. Returns false if it was not registered.
    pub async fn remove_camera(&self, camera_id: CameraId) -> EngineResult<bool> {
        let Some(entry) = lock(&self.inner.cameras).remove(&camera_id) else {
            return Ok(false);
        };

        if let Some(running) = entry.running {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.shutdown_camera(camera_id, running)).await?;
        }
        self.inner.context.broadcaster().close_camera(camera_id);
        self.inner.update_active_gauge();
        info!(camera_id, "Camera removed");
        Ok(true)
    }

    /// Start one registered camera's capture and analysis worker.
    pub fn start_camera(&self, camera_id: CameraId) -> EngineResult<()> {
        let inner = &self.inner;
        if inner.status() != EngineStatus::Running {
            return Err(EngineError::NotRunning);
        }
        let models = inner
            .models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(EngineError::NotRunning)?;
        let work_tx = lock(&inner.runtime)
            .as_ref()
            .map(|r| r.work_tx.clone())
            .ok_or(EngineError::NotRunning)?;

        // A worker that already exited is released outside the table lock
        let stale = {
            let mut cameras = lock(&inner.cameras);
            let entry = cameras
                .get_mut(&camera_id)
                .ok_or(EngineError::CameraNotFound(camera_id))?;
            let alive = entry
                .running
                .as_ref()
                .is_some_and(|running| !running.worker.is_finished());
            if alive {
                debug!(camera_id, "Camera already running");
                return Ok(());
            }
            entry.running.take()
        };
        if let Some(stale) = stale {
            stale.source.stop(inner.config.stop_timeout);
        }

        let mut cameras = lock(&inner.cameras);
        let entry = cameras
            .get_mut(&camera_id)
            .ok_or(EngineError::CameraNotFound(camera_id))?;
        if entry.running.is_some() {
            debug!(camera_id, "Camera started concurrently");
            return Ok(());
        }

        let status_tx = work_tx.clone();
        let on_status: StatusCallback = Arc::new(move |camera_id, status| {
            if status_tx
                .try_send(WorkItem::CameraStatus { camera_id, status })
                .is_err()
            {
                metrics::record_work_item_dropped("camera_status");
            }
        });
        let source = Arc::new(FrameSource::new(
            entry.spec.capture_config(),
            Arc::clone(&inner.opener),
            Some(on_status),
        ));
        if !source.start() {
            return Err(EngineError::CaptureStart(camera_id));
        }

        let context = Arc::clone(&inner.context);
        let settings_version = context.settings_version();
        let next_track_id = inner.track_id_counter(camera_id);
        let tracker = ObjectTracker::new(
            camera_id,
            models.body,
            models.face,
            context.settings().tracker_config(),
        )
        .with_first_track_id(next_track_id.load(Ordering::Acquire));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = AnalysisWorker {
            camera_id,
            logger: CameraLogger::new(camera_id, entry.spec.name.clone()),
            source: Arc::clone(&source),
            tracker,
            next_track_id,
            stop: Arc::clone(&stop),
            context,
            work_tx,
            settings_version,
            frame_wait: inner.config.frame_wait,
            error_pause: inner.config.error_pause,
            stream_quality: inner.config.stream_quality,
        };

        let (done_tx, done_rx) = bounded::<()>(0);
        let spawned = thread::Builder::new()
            .name(format!("analysis-{}", camera_id))
            .spawn(move || {
                let _done = done_tx;
                worker.run();
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                source.stop(inner.config.stop_timeout);
                return Err(EngineError::Spawn(e));
            }
        };

        entry.running = Some(RunningCamera {
            source,
            stop,
            worker: handle,
            done: done_rx,
        });
        drop(cameras);
        inner.update_active_gauge();
        Ok(())
    }

    /// Stop one camera but keep it registered.
    pub async fn stop_camera(&self, camera_id: CameraId) -> EngineResult<()> {
        let running = {
            let mut cameras = lock(&self.inner.cameras);
            let entry = cameras
                .get_mut(&camera_id)
                .ok_or(EngineError::CameraNotFound(camera_id))?;
            entry.running.take()
        };

        if let Some(running) = running {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.shutdown_camera(camera_id, running)).await?;
            self.inner.update_active_gauge();
        }
        Ok(())
    }

    /// Apply a stored setting. False if the key is unknown or the value invalid.
    pub fn update_config(&self, key: &str, value: &str) -> bool {
        self.inner.context.update_setting(key, value)
    }

    /// Engine status, camera counts and recognition settings.
    pub fn get_engine_stats(&self) -> EngineStats {
        let (camera_count, running_camera_count) = self.inner.counts();
        EngineStats {
            status: self.status(),
            camera_count,
            running_camera_count,
            recognition: self.inner.context.gateway().stats(),
        }
    }

    pub fn get_camera_status(&self, camera_id: CameraId) -> Option<CameraStatusReport> {
        lock(&self.inner.cameras).get(&camera_id).map(CameraEntry::report)
    }

    /// Status of every registered camera, ordered by id.
    pub fn get_all_camera_status(&self) -> Vec<CameraStatusReport> {
        let mut reports: Vec<CameraStatusReport> = lock(&self.inner.cameras)
            .values()
            .map(CameraEntry::report)
            .collect();
        reports.sort_by_key(|r| r.camera_id);
        reports
    }

    /// Live view of a registered camera's annotated frames.
    pub fn subscribe_stream(&self, camera_id: CameraId) -> Option<Subscription> {
        if !lock(&self.inner.cameras).contains_key(&camera_id) {
            return None;
        }
        Some(self.inner.context.broadcaster().subscribe(camera_id))
    }
}

fn spawn_retention(
    context: Arc<EngineContext>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
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
                    if let Err(e) = context.run_retention().await {
                        warn!("Retention cleanup failed: {}", e);
                    }
                }
            }
        }
        debug!("Retention task stopped");
    })
}

/// One camera's analysis loop, run on its own thread.
struct AnalysisWorker {
    camera_id: CameraId,
    logger: CameraLogger,
    source: Arc<FrameSource>,
    tracker: ObjectTracker,
    /// Shared with the camera table so a restarted tracker continues numbering
    next_track_id: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    context: Arc<EngineContext>,
    work_tx: mpsc::Sender<WorkItem>,
    settings_version: u64,
    frame_wait: Duration,
    error_pause: Duration,
    stream_quality: u8,
}

impl AnalysisWorker {
    fn run(mut self) {
        let span = self.logger.create_span();
        let _entered = span.enter();
        self.logger.log_start("analysis loop running");

        while !self.stop.load(Ordering::Acquire) {
            match self.step() {
                Ok(()) => {}
                Err(EngineError::ChannelClosed) => {
                    self.logger.log_warning("coordination loop closed");
                    break;
                }
                Err(e) => {
                    metrics::record_worker_error(self.camera_id);
                    self.logger.log_error(&e.to_string());
                    self.pause();
                }
            }
        }

        self.logger.log_stop("analysis loop exited");
    }

    /// Sleep after a failure, waking early if asked to stop.
    fn pause(&self) {
        let deadline = Instant::now() + self.error_pause;
        while !self.stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }

    fn step(&mut self) -> EngineResult<()> {
        self.refresh_tracker_config();

        let Some(frame) = self.source.get_frame(Some(self.frame_wait)) else {
            return Ok(());
        };
        let started = Instant::now();
        let (annotated, events) = self.tracker.process(&frame.image, frame.timestamp)?;
        self.next_track_id
            .store(self.tracker.next_track_id(), Ordering::Release);

        self.publish_frame(&annotated)?;
        if !events.is_empty() {
            self.submit_events(events)?;
        }

        metrics::record_frame(self.camera_id, started.elapsed().as_secs_f64());
        Ok(())
    }

    fn refresh_tracker_config(&mut self) {
        let version = self.context.settings_version();
        if version != self.settings_version {
            self.tracker
                .set_config(self.context.settings().tracker_config());
            self.settings_version = version;
            debug!(camera_id = self.camera_id, version, "Tracker settings refreshed");
        }
    }

    /// Encode and hand over the annotated frame, only when someone watches.
    fn publish_frame(&self, annotated: &RgbImage) -> EngineResult<()> {
        if !self.context.broadcaster().has_subscribers(self.camera_id) {
            return Ok(());
        }
        let jpeg = encode_jpeg(annotated, self.stream_quality)?;
        let item = WorkItem::Frame {
            camera_id: self.camera_id,
            frame: Arc::from(jpeg),
        };
        match self.work_tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::record_work_item_dropped("frame");
                debug!(camera_id = self.camera_id, "Coordination queue full, live frame dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(EngineError::ChannelClosed),
        }
    }

    /// Submit events and wait until the coordination loop has handled them.
    fn submit_events(&self, events: Vec<TrackerEvent>) -> EngineResult<()> {
        let count = events.len();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.work_tx
            .blocking_send(WorkItem::Events {
                camera_id: self.camera_id,
                events,
                reply: Some(reply_tx),
            })
            .map_err(|_| EngineError::ChannelClosed)?;

        match reply_rx.blocking_recv() {
            Ok(pushed) => debug!(camera_id = self.camera_id, count, pushed, "Events handled"),
            Err(_) => warn!(camera_id = self.camera_id, count, "Event handling ended without a reply"),
        }
        Ok(())
    }
}

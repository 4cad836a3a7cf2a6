//! Vigil analysis engine.
//!
//! [`EngineOrchestrator`] runs one analysis worker thread per camera. Each
//! worker pulls frames from its own [`FrameSource`], runs its own
//! [`ObjectTracker`], and hands tracker events and live-view frames to a
//! single coordination loop, the only place where recognition calls,
//! alert persistence and subscriber pushes happen.
//!
//! Shared collaborators live in one [`EngineContext`] built at start-up and
//! passed explicitly; nothing is looked up globally.
//!
//! [`FrameSource`]: vigil_capture::FrameSource
//! [`ObjectTracker`]: vigil_tracker::ObjectTracker

pub mod broadcaster;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod logging;
mod metrics;
pub mod orchestrator;
pub mod settings;

pub use broadcaster::{JpegFrame, StreamBroadcaster, Subscription};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use coordinator::{Coordinator, WorkItem};
pub use error::{EngineError, EngineResult};
pub use logging::{init_tracing, CameraLogger};
pub use orchestrator::{
    CameraSpec, CameraStatusReport, DetectionModels, EngineOrchestrator, EngineStats, ModelLoader,
};
pub use settings::{EngineSettings, SettingKey, SettingKind, SettingValue};

//! Per-camera frame capture.
//!
//! A [`FrameSource`] owns one capture thread that connects to a stream,
//! throttles delivery to a target frame rate, reconnects with exponential
//! backoff, and buffers frames in a drop-oldest queue for the consumer.
//!
//! Stream access goes through the [`StreamOpener`] / [`VideoStream`] traits;
//! [`FfmpegOpener`] is the production implementation.

pub mod backoff;
pub mod config;
pub mod error;
pub mod ffmpeg;
mod metrics;
pub mod queue;
pub mod source;
pub mod stream;

pub use backoff::Backoff;
pub use config::{CaptureConfig, Credentials};
pub use error::{CaptureError, CaptureResult};
pub use ffmpeg::{test_connection, ConnectionReport, FfmpegOpener, StreamInfo};
pub use queue::DropOldestQueue;
pub use source::{CaptureStats, FrameSource, StatusCallback};
pub use stream::{StreamOpener, VideoStream};

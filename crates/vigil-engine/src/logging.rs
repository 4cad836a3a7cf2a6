//! Tracing setup and per-camera structured logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vigil_models::CameraId;

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; otherwise ANSI text. `RUST_LOG`
/// directives are honoured on top of `vigil=info`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vigil=info", "reqwest=warn", "hyper=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

/// Logger carrying a camera's identity on every line.
#[derive(Debug, Clone)]
pub struct CameraLogger {
    camera_id: CameraId,
    name: String,
}

impl CameraLogger {
    pub fn new(camera_id: CameraId, name: impl Into<String>) -> Self {
        Self {
            camera_id,
            name: name.into(),
        }
    }

    /// Log a camera coming online, with the reason or source in `message`.
    pub fn log_start(&self, message: &str) {
        info!(camera_id = self.camera_id, camera = %self.name, "Camera started: {}", message);
    }

    /// Recoverable trouble, e.g. a dropped connection that will be retried.
    pub fn log_warning(&self, message: &str) {
        warn!(camera_id = self.camera_id, camera = %self.name, "Camera warning: {}", message);
    }

    /// Failure that needs an operator.
    pub fn log_error(&self, message: &str) {
        error!(camera_id = self.camera_id, camera = %self.name, "Camera error: {}", message);
    }

    /// Log a camera going offline.
    pub fn log_stop(&self, message: &str) {
        info!(camera_id = self.camera_id, camera = %self.name, "Camera stopped: {}", message);
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span wrapping a camera's analysis worker.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("camera", camera_id = self.camera_id, camera = %self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_logger_identity() {
        let logger = CameraLogger::new(3, "lobby");
        assert_eq!(logger.camera_id(), 3);
        assert_eq!(logger.name(), "lobby");
    }

    #[test]
    fn test_camera_logger_logging() {
        let logger = CameraLogger::new(3, "lobby");
        logger.log_start("capture running");
        logger.log_warning("frame dropped");
        logger.log_error("detector failed");
        logger.log_stop("requested");
        let _span = logger.create_span();
    }
}

//! Stream access seams.

use image::RgbImage;

use crate::config::CaptureConfig;
use crate::error::CaptureResult;

/// An open, decoding video stream. Owned by exactly one capture thread.
pub trait VideoStream: Send {
    /// Decode the next frame.
    fn read(&mut self) -> CaptureResult<RgbImage>;

    /// Advance past the next frame without handing it out.
    ///
    /// Implementations that can skip decoding should do so; the default
    /// simply reads and discards.
    fn grab(&mut self) -> CaptureResult<()> {
        self.read().map(|_| ())
    }

    /// (width, height) reported by the source.
    fn resolution(&self) -> (u32, u32);

    /// Native frame rate, when the source reports one.
    fn source_fps(&self) -> Option<f64> {
        None
    }
}

/// Opens streams for frame sources. Shared across cameras.
pub trait StreamOpener: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open `uri` (credentials already embedded) honoring the config's timeouts.
    fn open(&self, uri: &str, config: &CaptureConfig) -> CaptureResult<Box<dyn VideoStream>>;
}

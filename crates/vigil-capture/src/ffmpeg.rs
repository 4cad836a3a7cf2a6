//! FFmpeg-backed stream access.
//!
//! `ffprobe` learns the stream geometry, then an `ffmpeg` child decodes to
//! raw RGB24 on stdout, one `width * height * 3` chunk per frame.

use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CaptureConfig, Credentials};
use crate::error::{CaptureError, CaptureResult};
use crate::stream::{StreamOpener, VideoStream};

const PROBE_POLL: Duration = Duration::from_millis(50);

/// Stream geometry as reported by `ffprobe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub codec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Production [`StreamOpener`] driving the FFmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegOpener {
    /// Locate `ffmpeg` and `ffprobe` on PATH.
    pub fn locate() -> CaptureResult<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| CaptureError::FfmpegNotFound)?;
        let ffprobe = which::which("ffprobe").map_err(|_| CaptureError::FfprobeNotFound)?;
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Run `ffprobe` on `uri` and describe its first video stream.
    pub fn inspect(&self, uri: &str, timeout: Duration) -> CaptureResult<StreamInfo> {
        let mut command = Command::new(&self.ffprobe);
        command.args(["-v", "error", "-print_format", "json", "-show_streams"]);
        command.args(timeout_args(uri, timeout));
        command
            .arg(uri)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Timeout(timeout.as_secs()));
            }
            std::thread::sleep(PROBE_POLL);
        };

        let mut stdout = Vec::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout)?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr)?;
        }

        if !status.success() {
            return Err(CaptureError::InspectFailed {
                message: format!("ffprobe exited with {}", status),
                stderr: Some(stderr),
            });
        }

        parse_ffprobe_output(&stdout)
    }
}

impl StreamOpener for FfmpegOpener {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, uri: &str, config: &CaptureConfig) -> CaptureResult<Box<dyn VideoStream>> {
        let info = self.inspect(uri, config.connect_timeout)?;
        if info.width == 0 || info.height == 0 {
            return Err(CaptureError::open_failed("stream reported zero resolution"));
        }

        let mut command = Command::new(&self.ffmpeg);
        command.args(["-nostdin", "-loglevel", "error"]);
        if is_rtsp(uri) {
            command.args(["-rtsp_transport", "tcp"]);
        }
        command.args(timeout_args(uri, config.read_timeout));
        command
            .args(["-i", uri])
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::open_failed("ffmpeg stdout not captured"))?;

        debug!(
            width = info.width,
            height = info.height,
            fps = ?info.fps,
            "ffmpeg decoder started"
        );

        let frame_len = info.width as usize * info.height as usize * 3;
        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            info,
            buffer: vec![0u8; frame_len],
        }))
    }
}

/// Raw RGB24 frames read from an `ffmpeg` child process.
struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    info: StreamInfo,
    buffer: Vec<u8>,
}

impl FfmpegStream {
    fn fill(&mut self) -> CaptureResult<()> {
        self.stdout.read_exact(&mut self.buffer).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                CaptureError::EndOfStream
            } else {
                CaptureError::Io(e)
            }
        })
    }
}

impl VideoStream for FfmpegStream {
    fn read(&mut self) -> CaptureResult<RgbImage> {
        self.fill()?;
        RgbImage::from_raw(self.info.width, self.info.height, self.buffer.clone())
            .ok_or_else(|| CaptureError::read_failed("frame buffer size mismatch"))
    }

    /// Raw pipes cannot skip decoding, but skipping the image copy still saves work.
    fn grab(&mut self) -> CaptureResult<()> {
        self.fill()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn source_fps(&self) -> Option<f64> {
        self.info.fps
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!("Failed to kill ffmpeg decoder: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

/// Outcome of a one-off connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub success: bool,
    /// `WxH`
    pub resolution: Option<String>,
    pub fps: Option<f64>,
    pub error: Option<String>,
    pub response_time_ms: u64,
}

/// Check that a stream can be opened and inspected, without starting a capture loop.
pub fn test_connection(
    uri: &str,
    credentials: Option<Credentials>,
    timeout: Duration,
) -> ConnectionReport {
    let started = Instant::now();
    let config = CaptureConfig::new(0, uri).with_credentials(credentials);

    let result = FfmpegOpener::locate().and_then(|opener| opener.inspect(&config.stream_uri(), timeout));
    let response_time_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(info) => ConnectionReport {
            success: info.width > 0 && info.height > 0,
            resolution: Some(format!("{}x{}", info.width, info.height)),
            fps: info.fps.map(|f| (f * 100.0).round() / 100.0),
            error: None,
            response_time_ms,
        },
        Err(e) => ConnectionReport {
            success: false,
            resolution: None,
            fps: None,
            error: Some(e.to_string()),
            response_time_ms,
        },
    }
}

fn is_rtsp(uri: &str) -> bool {
    let lower = uri.to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
}

/// FFmpeg expresses I/O timeouts in microseconds; RTSP uses its own option name.
fn timeout_args(uri: &str, timeout: Duration) -> [String; 2] {
    let micros = timeout.as_micros().to_string();
    if is_rtsp(uri) {
        ["-timeout".to_string(), micros]
    } else {
        ["-rw_timeout".to_string(), micros]
    }
}

fn parse_ffprobe_output(stdout: &[u8]) -> CaptureResult<StreamInfo> {
    let output: FfprobeOutput = serde_json::from_slice(stdout)?;
    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| CaptureError::InspectFailed {
            message: "No video stream found".to_string(),
            stderr: None,
        })?;

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));

    Ok(StreamInfo {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps,
        codec: video.codec_name.clone(),
    })
}

/// Parse "30/1", "30000/1001" or "29.97". A zero rate ("0/0") counts as unknown.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (rate > 0.0).then_some(rate)
}

//! On-disk storage for event crops.
//!
//! Layout: `{captures}/{YYYYMMDD}/{camera}/{face|body|full}/{track}_{HHMMSS_micro}_{kind}.jpg`.
//! References handed out are `/static/<path relative to the data dir>`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_models::{CameraId, TrackerEvent};

use crate::error::AlertResult;
use crate::metrics;

pub const STATIC_PREFIX: &str = "/static";

/// Stored image references for one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRefs {
    pub face: Option<String>,
    pub body: Option<String>,
    pub full: Option<String>,
}

/// Writes event crops as JPEG files.
#[derive(Debug)]
pub struct ImageStore {
    data_dir: PathBuf,
    captures_dir: PathBuf,
    quality: AtomicU8,
}

impl ImageStore {
    pub fn new(data_dir: impl Into<PathBuf>, captures_dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            data_dir: data_dir.into(),
            captures_dir: captures_dir.into(),
            quality: AtomicU8::new(clamp_quality(quality)),
        }
    }

    pub fn captures_dir(&self) -> &Path {
        &self.captures_dir
    }

    pub fn quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    pub fn set_quality(&self, quality: u8) {
        self.quality.store(clamp_quality(quality), Ordering::Relaxed);
    }

    /// Write every crop the event carries. Blocking.
    pub fn save_event(&self, camera_id: CameraId, event: &TrackerEvent) -> AlertResult<ImageRefs> {
        let timestamp = event.timestamp();
        let date_dir = self
            .captures_dir
            .join(timestamp.format("%Y%m%d").to_string())
            .join(camera_id.to_string());
        let stem = format!("{}_{}", event.track_id(), timestamp.format("%H%M%S_%6f"));

        Ok(ImageRefs {
            full: Some(self.write(&date_dir, &stem, "full", event.full_image())?),
            face: event
                .face_image()
                .map(|face| self.write(&date_dir, &stem, "face", face))
                .transpose()?,
            body: event
                .body_image()
                .map(|body| self.write(&date_dir, &stem, "body", body))
                .transpose()?,
        })
    }

    fn write(&self, date_dir: &Path, stem: &str, kind: &'static str, image: &RgbImage) -> AlertResult<String> {
        let dir = date_dir.join(kind);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_{}.jpg", stem, kind));

        let mut writer = BufWriter::new(File::create(&path)?);
        JpegEncoder::new_with_quality(&mut writer, self.quality()).encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )?;

        metrics::record_capture_file(kind);
        debug!(path = %path.display(), "Capture written");
        Ok(self.reference(&path))
    }

    /// Public reference for a stored file.
    pub fn reference(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.data_dir)
            .unwrap_or(path);
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", STATIC_PREFIX, joined.trim_start_matches('/'))
    }
}

fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(1, 100)
}

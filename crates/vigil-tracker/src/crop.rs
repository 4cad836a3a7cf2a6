//! Padded crops around stored best shots.

use image::{imageops, RgbImage};
use vigil_models::BoundingBox;

use crate::person::BestShot;

/// Crop `bbox` padded on every side by `pad_ratio` of its width, clipped to the frame.
///
/// Returns `None` when the box lies entirely outside the frame.
pub fn padded_crop(frame: &RgbImage, bbox: &BoundingBox, pad_ratio: f64) -> Option<RgbImage> {
    let pad = (bbox.width * pad_ratio).trunc();
    let (x, y, w, h) = bbox.pad(pad).clip_to_frame(frame.width(), frame.height())?;
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Crop a best shot from the frame it was recorded on.
pub fn crop_best(shot: &BestShot, pad_ratio: f64) -> Option<RgbImage> {
    padded_crop(&shot.frame, &shot.bbox, pad_ratio)
}

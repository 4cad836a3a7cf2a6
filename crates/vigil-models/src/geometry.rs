//! Pixel and fractional geometry used by detection and tracking.

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    /// Left edge x-coordinate
    pub x: f64,
    /// Top edge y-coordinate
    pub y: f64,
    /// Box width
    pub width: f64,
    /// Box height
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Build from detector-style corner coordinates.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.x + self.width / 2.0
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.y + self.height / 2.0
    }

    #[inline]
    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Intersection over Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Grow each side by `ratio` of the box's own width/height.
    pub fn expand(&self, ratio: f64) -> BoundingBox {
        let dx = self.width * ratio;
        let dy = self.height * ratio;
        BoundingBox {
            x: self.x - dx,
            y: self.y - dy,
            width: self.width + 2.0 * dx,
            height: self.height + 2.0 * dy,
        }
    }

    /// Inclusive point containment.
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x2() && py >= self.y && py <= self.y2()
    }

    /// Pad all sides by a fixed pixel amount.
    pub fn pad(&self, padding: f64) -> BoundingBox {
        BoundingBox {
            x: self.x - padding,
            y: self.y - padding,
            width: self.width + 2.0 * padding,
            height: self.height + 2.0 * padding,
        }
    }

    /// Integer crop rectangle `(x, y, width, height)` clipped to the frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clip_to_frame(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0.0).floor() as u32;
        let y1 = self.y.max(0.0).floor() as u32;
        let x2 = (self.x2().min(frame_width as f64).max(0.0)).floor() as u32;
        let y2 = (self.y2().min(frame_height as f64).max(0.0)).floor() as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Fractional region of interest `[x_min, y_min, x_max, y_max]` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Roi {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum RoiParseError {
    #[error("ROI needs exactly 4 values, got {0}")]
    WrongArity(usize),

    #[error("ROI value is not a number: {0}")]
    NotANumber(String),

    #[error("ROI bounds out of order or outside [0, 1]")]
    OutOfRange,
}

impl Roi {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self, RoiParseError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(x_min) && in_unit(y_min) && in_unit(x_max) && in_unit(y_max))
            || x_min >= x_max
            || y_min >= y_max
        {
            return Err(RoiParseError::OutOfRange);
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Pixel rectangle for a frame of the given size.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let w = frame_width as f64;
        let h = frame_height as f64;
        BoundingBox::from_corners(
            (self.x_min * w).trunc(),
            (self.y_min * h).trunc(),
            (self.x_max * w).trunc(),
            (self.y_max * h).trunc(),
        )
    }

    /// Whether a pixel point falls inside the region on a frame of the given size.
    pub fn contains(&self, px: f64, py: f64, frame_width: u32, frame_height: u32) -> bool {
        self.to_pixels(frame_width, frame_height).contains(px, py)
    }
}

impl FromStr for Roi {
    type Err = RoiParseError;

    /// Parse `"x_min,y_min,x_max,y_max"`; brackets and spaces are tolerated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        let parts: Vec<&str> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() != 4 {
            return Err(RoiParseError::WrongArity(parts.len()));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| RoiParseError::NotANumber(part.to_string()))?;
        }
        Roi::new(values[0], values[1], values[2], values[3])
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Core types for detection results
//!
//! Backends produce [`RawDetection`]s in normalized frame coordinates. The
//! session scales them to canvas pixels before they reach the Result Sink
//! as [`Detection`]s.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
/// This allows easy transformation to canvas coordinates regardless of
/// the actual frame size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let fw = frame_width.max(1) as f32;
        let fh = frame_height.max(1) as f32;
        Self {
            x: x as f32 / fw,
            y: y as f32 / fh,
            width: width as f32 / fw,
            height: height as f32 / fh,
        }
    }

    /// Create a region from normalized `[ymin, xmin, ymax, xmax]` corners
    ///
    /// Corners are clamped into the frame and swapped if inverted.
    pub fn from_corners(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        let (y0, y1) = (clamp(ymin), clamp(ymax));
        let (x0, x1) = (clamp(xmin), clamp(xmax));
        let (top, bottom) = (y0.min(y1), y0.max(y1));
        let (left, right) = (x0.min(x1), x0.max(x1));

        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    /// Scale to pixel units of a `width` x `height` canvas
    pub fn to_pixels(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        BoundingBox {
            x: self.x * w,
            y: self.y * h,
            width: self.width * w,
            height: self.height * h,
        }
    }
}

/// Bounding box in canvas pixel units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Backend output before scaling and filtering
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bounds: FrameRegion,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bounds: FrameRegion) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounds,
        }
    }
}

/// One labeled, scored, localized recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name, or the decoded text for barcodes
    pub label: String,
    /// Score in [0, 1]
    pub confidence: f32,
    /// Location in canvas pixels
    pub region: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, region: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            region,
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.0}% at ({:.0}, {:.0}) {:.0}x{:.0}",
            self.label,
            self.confidence * 100.0,
            self.region.x,
            self.region.y,
            self.region.width,
            self.region.height
        )
    }
}

/// Which Detection Loop variant a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Barcode scan, single-shot
    Scan,
    /// Object detection, polling
    Detect,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Scan => write!(f, "scan"),
            BackendKind::Detect => write!(f, "detect"),
        }
    }
}

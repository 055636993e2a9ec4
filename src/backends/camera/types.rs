// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Which camera the caller asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear camera, pointed at the product
    #[default]
    Environment,
    /// Front (selfie) camera
    User,
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::Environment => write!(f, "environment"),
            FacingMode::User => write!(f, "user"),
        }
    }
}

/// Constraints passed to the Media Acquirer
#[derive(Debug, Clone, PartialEq)]
pub struct MediaConstraints {
    pub facing_mode: FacingMode,
    /// Preferred width / height ratio
    pub aspect_ratio: Option<f32>,
    /// Preferred frames per second
    pub frame_rate: Option<u32>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::Environment,
            aspect_ratio: None,
            frame_rate: None,
        }
    }
}

/// Native resolution of a stream, known once the first frame arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
}

/// Lifecycle of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Delivering frames, camera held
    Live,
    /// Stopped, camera released
    Ended,
}

/// Description of one track of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub label: String,
    pub state: TrackState,
}

/// Pixel layout of [`CameraFrame::data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba,
    /// 8-bit luma, 1 byte per pixel
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A single frame pulled from a stream
///
/// Pixel data is reference counted so frames can be handed to detection
/// tasks without copying.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, may include padding
    pub stride: u32,
    pub format: PixelFormat,
    /// Monotonic frame counter of the stream
    pub sequence: u64,
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Create a tightly packed RGBA frame
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data: Arc::from(data.into_boxed_slice()),
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Rgba,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    /// Create a frame from a decoded image
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_rgba(width, height, image.into_raw())
    }

    /// Create a uniformly coloured RGBA frame
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::from_rgba(width, height, data)
    }

    /// Same pixels, new sequence number and timestamp
    pub fn resequenced(&self, sequence: u64) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            ..self.clone()
        }
    }

    /// Native resolution of this frame
    pub fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            width: self.width,
            height: self.height,
        }
    }

    /// Copy rows without stride padding
    fn packed_rows(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * self.format.bytes_per_pixel();
        let stride = self.stride as usize;
        let mut result = Vec::with_capacity(row_bytes * self.height as usize);

        for y in 0..self.height as usize {
            let row_start = y * stride;
            let row_end = row_start + row_bytes;
            if row_end <= self.data.len() {
                result.extend_from_slice(&self.data[row_start..row_end]);
            }
        }

        result
    }

    /// Convert to an RGBA image, `None` if the buffer is truncated
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let packed = self.packed_rows();
        match self.format {
            PixelFormat::Rgba => RgbaImage::from_raw(self.width, self.height, packed),
            PixelFormat::Gray8 => {
                let rgba = packed.iter().flat_map(|&l| [l, l, l, 255]).collect();
                RgbaImage::from_raw(self.width, self.height, rgba)
            }
        }
    }

    /// Convert to a luma image (BT.601 weights), `None` if the buffer is truncated
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        let packed = self.packed_rows();
        match self.format {
            PixelFormat::Gray8 => GrayImage::from_raw(self.width, self.height, packed),
            PixelFormat::Rgba => {
                let luma = packed
                    .chunks_exact(4)
                    .map(|px| {
                        let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                        ((299 * r + 587 * g + 114 * b) / 1000) as u8
                    })
                    .collect();
                GrayImage::from_raw(self.width, self.height, luma)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rgba_image_strips_stride() {
        // 2x2 RGBA with 2 bytes of padding per row
        let data: Vec<u8> = vec![
            255, 0, 0, 255, 0, 255, 0, 255, 0, 0, //
            0, 0, 255, 255, 255, 255, 255, 255, 0, 0,
        ];
        let frame = CameraFrame {
            data: Arc::from(data.as_slice()),
            width: 2,
            height: 2,
            stride: 10,
            format: PixelFormat::Rgba,
            sequence: 0,
            captured_at: Instant::now(),
        };

        let image = frame.to_rgba_image().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_to_gray_image_uses_luma_weights() {
        let frame = CameraFrame::solid(3, 2, [255, 255, 255, 255]);
        let gray = frame.to_gray_image().unwrap();
        assert_eq!(gray.dimensions(), (3, 2));
        assert_eq!(gray.get_pixel(2, 1).0, [255]);

        let red = CameraFrame::solid(1, 1, [255, 0, 0, 255]);
        assert_eq!(red.to_gray_image().unwrap().get_pixel(0, 0).0, [76]);
    }

    #[test]
    fn test_truncated_frame_has_no_image() {
        let mut frame = CameraFrame::solid(4, 4, [0, 0, 0, 255]);
        frame.data = Arc::from(&frame.data[..8]);
        assert!(frame.to_rgba_image().is_none());
    }
}

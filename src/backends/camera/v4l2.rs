// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera acquisition
//!
//! Opens a capture device, negotiates MJPG or YUYV and pumps decoded RGBA
//! frames into a [`FrameSlot`] from a dedicated [`CaptureThread`].

use super::frame_loop::{CaptureThread, StopSignal};
use super::types::{CameraFrame, MediaConstraints, TrackInfo, TrackState, VideoMetadata};
use super::{FrameSlot, MediaDevices, MediaStream};
use crate::constants::{capture, timing};
use crate::errors::AcquireError;
use futures::future::BoxFuture;
use image::{ImageFormat, RgbaImage};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};
use v4l::Device;
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

/// A capture device found on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub card: String,
}

/// List V4L2 devices that support video capture
pub fn enumerate_cameras() -> Vec<CameraDevice> {
    let mut cameras = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().to_string();
        let Ok(device) = Device::with_path(&path) else {
            debug!(path = %path, "Skipping device that cannot be opened");
            continue;
        };
        let Ok(caps) = device.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            trace!(path = %path, "Skipping non-capture node");
            continue;
        }

        cameras.push(CameraDevice {
            name: node.name().unwrap_or_else(|| caps.card.clone()),
            path,
            driver: caps.driver,
            card: caps.card,
        });
    }

    debug!(count = cameras.len(), "Enumerated V4L2 cameras");
    cameras
}

/// [`MediaDevices`] backed by V4L2
#[derive(Debug, Clone, Default)]
pub struct V4l2Devices {
    path: Option<String>,
}

impl V4l2Devices {
    /// Use `path`, or the first capture device when `None`
    pub fn new(path: Option<String>) -> Self {
        Self { path }
    }

    fn resolve_path(&self) -> Result<String, AcquireError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        enumerate_cameras()
            .into_iter()
            .next()
            .map(|camera| camera.path)
            .ok_or_else(|| AcquireError::DeviceUnavailable("no capture device found".to_string()))
    }
}

/// Negotiated capture format
#[derive(Debug, Clone, Copy)]
struct NegotiatedFormat {
    fourcc: FourCC,
    width: u32,
    height: u32,
}

fn open_device(
    path: &str,
    constraints: &MediaConstraints,
) -> Result<(Device, NegotiatedFormat), AcquireError> {
    let device = Device::with_path(path)?;
    let mut format = device.format()?;

    let mut negotiated = None;
    for fourcc in capture::PREFERRED_FOURCC {
        format.fourcc = FourCC::new(fourcc);
        match device.set_format(&format) {
            Ok(actual) if actual.fourcc.repr == **fourcc => {
                negotiated = Some(NegotiatedFormat {
                    fourcc: actual.fourcc,
                    width: actual.width,
                    height: actual.height,
                });
                break;
            }
            Ok(actual) => {
                debug!(requested = ?fourcc, got = %actual.fourcc, "Driver substituted format");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let negotiated = negotiated.ok_or_else(|| {
        AcquireError::DeviceUnavailable(format!("{} supports neither MJPG nor YUYV", path))
    })?;

    if let Some(fps) = constraints.frame_rate {
        if let Ok(mut params) = device.params() {
            params.interval.numerator = 1;
            params.interval.denominator = fps;
            if let Err(e) = device.set_params(&params) {
                debug!(error = %e, fps, "Driver rejected frame interval");
            }
        }
    }

    info!(
        path = %path,
        width = negotiated.width,
        height = negotiated.height,
        fourcc = %negotiated.fourcc,
        "Opened V4L2 device"
    );
    Ok((device, negotiated))
}

impl MediaDevices for V4l2Devices {
    fn get_user_media<'a>(
        &'a self,
        constraints: &'a MediaConstraints,
    ) -> BoxFuture<'a, Result<Arc<dyn MediaStream>, AcquireError>> {
        Box::pin(async move {
            let path = self.resolve_path()?;
            let open_path = path.clone();
            let open_constraints = constraints.clone();

            let (device, format) =
                tokio::task::spawn_blocking(move || open_device(&open_path, &open_constraints))
                    .await
                    .map_err(|e| AcquireError::DeviceUnavailable(e.to_string()))??;

            let stream = V4l2Stream::start(path, device, format)?;
            Ok(Arc::new(stream) as Arc<dyn MediaStream>)
        })
    }
}

/// A running V4L2 capture
pub struct V4l2Stream {
    id: String,
    label: String,
    slot: Arc<FrameSlot>,
    pump: Mutex<Option<CaptureThread>>,
}

impl V4l2Stream {
    fn start(path: String, device: Device, format: NegotiatedFormat) -> Result<Self, AcquireError> {
        let slot = Arc::new(FrameSlot::new());
        let pump_slot = Arc::clone(&slot);
        let pump = CaptureThread::spawn("v4l2-capture", move |stop| {
            pump_frames(device, format, &pump_slot, &stop);
            pump_slot.close();
        })
        .map_err(|e| AcquireError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: path,
            slot,
            pump: Mutex::new(Some(pump)),
        })
    }
}

fn pump_frames(device: Device, format: NegotiatedFormat, slot: &FrameSlot, stop: &StopSignal) {
    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, capture::BUFFER_COUNT)
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to map capture buffers");
            return;
        }
    };

    let mut sequence: u64 = 0;
    while !stop.is_set() {
        let data = match stream.next() {
            Ok((data, _)) => data,
            Err(e) => {
                warn!(error = %e, "Capture stream failed");
                return;
            }
        };

        match decode_frame(data, &format) {
            Some(image) => {
                sequence += 1;
                if sequence % timing::FRAME_LOG_INTERVAL == 0 {
                    trace!(sequence, "Captured frame");
                }
                slot.publish(CameraFrame::from_image(image).resequenced(sequence));
            }
            None => debug!(bytes = data.len(), "Dropped undecodable frame"),
        }
    }
}

fn decode_frame(data: &[u8], format: &NegotiatedFormat) -> Option<RgbaImage> {
    match &format.fourcc.repr {
        b"MJPG" => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .ok()
            .map(|image| image.to_rgba8()),
        b"YUYV" => yuyv_to_rgba(data, format.width, format.height),
        _ => None,
    }
}

/// Convert packed YUYV (4:2:2) to RGBA using BT.601 coefficients
fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Option<RgbaImage> {
    let pixels = width as usize * height as usize;
    if yuyv.len() < pixels * 2 {
        return None;
    }

    let mut out = Vec::with_capacity(pixels * 4);
    // [Y0, U, Y1, V] encodes two pixels sharing chroma
    for chunk in yuyv[..pixels * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            out.extend_from_slice(&[r, g, b, 255]);
        }
    }

    RgbaImage::from_raw(width, height, out)
}

impl MediaStream for V4l2Stream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        let live = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|pump| pump.is_running());

        vec![TrackInfo {
            label: self.label.clone(),
            state: if live {
                TrackState::Live
            } else {
                TrackState::Ended
            },
        }]
    }

    fn metadata_ready(&self) -> BoxFuture<'_, Result<VideoMetadata, AcquireError>> {
        Box::pin(self.slot.first_frame())
    }

    fn current_frame(&self) -> Option<Arc<CameraFrame>> {
        self.slot.latest()
    }

    fn stop_tracks(&self) {
        let pump = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut pump) = pump {
            info!(device = %self.label, "Releasing V4L2 device");
            self.slot.close();
            pump.stop();
        }
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_maps_to_grey() {
        // Two pixels, Y=128, neutral chroma
        let rgba = yuyv_to_rgba(&[128, 128, 128, 128], 2, 1).unwrap();
        assert_eq!(rgba.get_pixel(0, 0).0, [128, 128, 128, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [128, 128, 128, 255]);
    }

    #[test]
    fn test_yuyv_short_buffer_is_rejected() {
        assert!(yuyv_to_rgba(&[0; 6], 2, 2).is_none());
    }

    #[test]
    fn test_unknown_fourcc_is_not_decoded() {
        let format = NegotiatedFormat {
            fourcc: FourCC::new(b"NV12"),
            width: 2,
            height: 2,
        };
        assert!(decode_frame(&[0; 16], &format).is_none());
    }
}

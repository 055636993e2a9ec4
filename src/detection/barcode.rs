// SPDX-License-Identifier: GPL-3.0-only

//! Barcode scan backend
//!
//! The decoder runs its own scan loop in a [`DecodeSubscription`] task,
//! scanning the centred detection region of the newest frame at the
//! configured rate. The Detection Loop only waits for the first decode,
//! delivers it and completes, so a scan session closes after one code.

use super::types::{BackendKind, FrameRegion, RawDetection};
use super::DetectionBackend;
use crate::backends::camera::CameraFrame;
use crate::config::RegionSize;
use crate::errors::SessionError;
use crate::session::{Delivery, LoopContext, LoopExit};
use futures::future::BoxFuture;
use image::GrayImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// A decoded code and where it was found, in pixels of the scanned image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCode {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Barcode decoder
pub trait CodeReader: Send + Sync {
    /// Decode every code visible in `image`
    fn decode(&self, image: &GrayImage) -> Vec<DecodedCode>;
}

/// QR decoder backed by `rqrr`
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrReader;

impl CodeReader for RqrrReader {
    fn decode(&self, image: &GrayImage) -> Vec<DecodedCode> {
        let mut prepared = rqrr::PreparedImage::prepare(image.clone());
        let grids = prepared.detect_grids();
        trace!(grids = grids.len(), "Found candidate QR grids");

        grids
            .into_iter()
            .filter_map(|grid| {
                let (_, text) = match grid.decode() {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        trace!(error = ?e, "Grid decode failed");
                        return None;
                    }
                };

                let xs = grid.bounds.iter().map(|p| p.x.max(0) as u32);
                let ys = grid.bounds.iter().map(|p| p.y.max(0) as u32);
                let (min_x, max_x) = (xs.clone().min()?, xs.max()?);
                let (min_y, max_y) = (ys.clone().min()?, ys.max()?);

                Some(DecodedCode {
                    text,
                    x: min_x,
                    y: min_y,
                    width: max_x - min_x,
                    height: max_y - min_y,
                })
            })
            .collect()
    }
}

/// Pixel rectangle of the scan region, centred and clipped to the frame
pub fn centered_region(frame_width: u32, frame_height: u32, size: RegionSize) -> (u32, u32, u32, u32) {
    let width = size.width.min(frame_width);
    let height = size.height.min(frame_height);
    (
        (frame_width - width) / 2,
        (frame_height - height) / 2,
        width,
        height,
    )
}

/// Single-shot Detection Loop backend around a [`CodeReader`]
pub struct BarcodeBackend {
    reader: Arc<dyn CodeReader>,
    region: RegionSize,
}

impl BarcodeBackend {
    pub fn new(reader: Arc<dyn CodeReader>, region: RegionSize) -> Self {
        Self { reader, region }
    }

    /// Backend with the default QR decoder
    pub fn qr(region: RegionSize) -> Self {
        Self::new(Arc::new(RqrrReader), region)
    }

    pub fn region(&self) -> RegionSize {
        self.region
    }

    async fn scan(&self, frame: Arc<CameraFrame>) -> Result<Vec<RawDetection>, SessionError> {
        let reader = Arc::clone(&self.reader);
        let region = self.region;

        tokio::task::spawn_blocking(move || scan_sync(reader.as_ref(), &frame, region))
            .await
            .map_err(|e| SessionError::Inference(format!("barcode decoder crashed: {}", e)))
    }
}

fn scan_sync(reader: &dyn CodeReader, frame: &CameraFrame, region: RegionSize) -> Vec<RawDetection> {
    let start = std::time::Instant::now();
    let Some(gray) = frame.to_gray_image() else {
        warn!(sequence = frame.sequence, "Frame buffer truncated, skipping scan");
        return Vec::new();
    };

    let (x, y, width, height) = centered_region(frame.width, frame.height, region);
    let crop = image::imageops::crop_imm(&gray, x, y, width, height).to_image();

    let detections: Vec<RawDetection> = reader
        .decode(&crop)
        .into_iter()
        .map(|code| {
            debug!(content = %code.text, "Decoded barcode");
            RawDetection::new(
                code.text,
                1.0,
                FrameRegion::from_pixels(
                    x + code.x,
                    y + code.y,
                    code.width,
                    code.height,
                    frame.width,
                    frame.height,
                ),
            )
        })
        .collect();

    trace!(
        count = detections.len(),
        scan_ms = start.elapsed().as_millis(),
        "Barcode scan complete"
    );
    detections
}

/// First successful decode and the frame it came from
#[derive(Debug)]
pub struct ScanHit {
    pub sequence: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<RawDetection>,
}

/// Decoder-owned scan loop, aborted on drop
pub struct DecodeSubscription {
    task: JoinHandle<()>,
    receiver: oneshot::Receiver<Result<ScanHit, SessionError>>,
}

impl DecodeSubscription {
    /// Scan frames from `frames` every `interval` until one decodes
    ///
    /// A failed scan ends the subscription with that error.
    pub fn start<F>(backend: Arc<BarcodeBackend>, interval: Duration, frames: F) -> Self
    where
        F: Fn() -> Option<Arc<CameraFrame>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(frame) = frames() else {
                    continue;
                };

                match backend.scan(Arc::clone(&frame)).await {
                    Ok(detections) if !detections.is_empty() => {
                        let _ = sender.send(Ok(ScanHit {
                            sequence: frame.sequence,
                            frame_width: frame.width,
                            frame_height: frame.height,
                            detections,
                        }));
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Barcode scan failed");
                        let _ = sender.send(Err(e));
                        return;
                    }
                }
            }
        });

        Self { task, receiver }
    }

    /// Wait for the first decode or the scan failure
    pub async fn first(&mut self) -> Result<ScanHit, SessionError> {
        (&mut self.receiver).await.unwrap_or_else(|_| {
            Err(SessionError::Inference(
                "barcode scan loop stopped".to_string(),
            ))
        })
    }
}

impl Drop for DecodeSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl DetectionBackend for BarcodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scan
    }

    fn detect_frame(
        &self,
        frame: Arc<CameraFrame>,
    ) -> BoxFuture<'_, Result<Vec<RawDetection>, SessionError>> {
        Box::pin(self.scan(frame))
    }

    fn run(self: Arc<Self>, ctx: LoopContext) -> BoxFuture<'static, LoopExit> {
        Box::pin(async move {
            info!(
                width = self.region.width,
                height = self.region.height,
                "Listening for barcode decode"
            );

            loop {
                let frame_ctx = ctx.clone();
                let mut subscription =
                    DecodeSubscription::start(Arc::clone(&self), ctx.poll_interval(), move || {
                        frame_ctx.current_frame()
                    });

                let hit = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return LoopExit::Cancelled,
                    hit = subscription.first() => hit,
                };
                let hit = match hit {
                    Ok(hit) => hit,
                    Err(e) => return LoopExit::Failed(e),
                };

                match ctx.deliver(hit.sequence, hit.frame_width, hit.frame_height, hit.detections) {
                    // A manual capture already delivered this frame's code
                    Delivery::Delivered { .. } | Delivery::Duplicate => {
                        return LoopExit::Completed;
                    }
                    Delivery::Empty => continue,
                    Delivery::Stale => return LoopExit::Cancelled,
                }
            }
        })
    }
}

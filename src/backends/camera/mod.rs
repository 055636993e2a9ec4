// SPDX-License-Identifier: GPL-3.0-only

//! Camera acquisition
//!
//! A [`MediaDevices`] implementation turns [`MediaConstraints`] into a live
//! [`MediaStream`]. The stream publishes frames into a [`FrameSlot`]; the
//! session reads the newest frame on every detection pass and never queues
//! frames. Whoever holds the [`StreamGuard`] holds the camera: dropping it
//! stops every track.

pub mod frame_loop;
pub mod types;
pub mod v4l2;
pub mod virtual_camera;

pub use frame_loop::{CaptureThread, StopSignal};
pub use types::*;
pub use v4l2::{CameraDevice, V4l2Devices, enumerate_cameras};
pub use virtual_camera::{AccessPolicy, VirtualCamera};

use crate::errors::AcquireError;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

/// Platform camera access
pub trait MediaDevices: Send + Sync {
    /// Request a camera stream
    ///
    /// Resolves once the device is open. Frames may arrive later; use
    /// [`MediaStream::metadata_ready`] to wait for the first one.
    fn get_user_media<'a>(
        &'a self,
        constraints: &'a MediaConstraints,
    ) -> BoxFuture<'a, Result<Arc<dyn MediaStream>, AcquireError>>;
}

/// A live camera stream
pub trait MediaStream: Send + Sync {
    /// Unique stream id, used to link the video surface to its source
    fn id(&self) -> &str;

    /// Tracks of this stream and their state
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Wait for the first frame and report the native resolution
    fn metadata_ready(&self) -> BoxFuture<'_, Result<VideoMetadata, AcquireError>>;

    /// Newest frame, `None` before the first frame or after stop
    fn current_frame(&self) -> Option<Arc<CameraFrame>>;

    /// Stop every track and release the device. Idempotent.
    fn stop_tracks(&self);

    /// True while at least one track is live
    fn is_live(&self) -> bool {
        self.tracks()
            .iter()
            .any(|track| track.state == TrackState::Live)
    }
}

/// Owns a stream for the lifetime of a session and stops it on drop
pub struct StreamGuard {
    stream: Arc<dyn MediaStream>,
}

impl StreamGuard {
    pub fn new(stream: Arc<dyn MediaStream>) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &Arc<dyn MediaStream> {
        &self.stream
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        debug!(stream = %self.stream.id(), "Stopping stream tracks");
        self.stream.stop_tracks();
    }
}

type FrameCell = Option<Arc<CameraFrame>>;

/// Latest-frame cell shared between a frame producer and the session
///
/// Producers overwrite the previous frame. Closing the slot wakes anyone
/// still waiting for the first frame with an error.
pub struct FrameSlot {
    sender: Mutex<Option<watch::Sender<FrameCell>>>,
    receiver: watch::Receiver<FrameCell>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(None);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Replace the current frame. Ignored once closed.
    pub fn publish(&self, frame: CameraFrame) {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = guard.as_ref() {
            sender.send_replace(Some(Arc::new(frame)));
        }
    }

    /// Newest frame, `None` before the first publish or after close
    pub fn latest(&self) -> Option<Arc<CameraFrame>> {
        if self.is_closed() {
            return None;
        }
        self.receiver.borrow().clone()
    }

    /// Stop accepting frames
    pub fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Resolve with the resolution of the first frame
    pub async fn first_frame(&self) -> Result<VideoMetadata, AcquireError> {
        let mut receiver = self.receiver.clone();
        let metadata = receiver
            .wait_for(|frame| frame.is_some())
            .await
            .map(|frame| frame.as_ref().map(|f| f.metadata()));

        match metadata {
            Ok(Some(metadata)) => Ok(metadata),
            _ => Err(AcquireError::DeviceUnavailable(
                "stream ended before the first frame".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_frame_reports_resolution() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);
        tokio::spawn(async move {
            producer.publish(CameraFrame::solid(64, 48, [0, 0, 0, 255]));
        });

        let metadata = slot.first_frame().await.unwrap();
        assert_eq!(
            metadata,
            VideoMetadata {
                width: 64,
                height: 48
            }
        );
        assert_eq!(slot.latest().unwrap().width, 64);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let slot = Arc::new(FrameSlot::new());
        let closer = Arc::clone(&slot);
        tokio::spawn(async move { closer.close() });

        assert!(slot.first_frame().await.is_err());
        assert!(slot.latest().is_none());
    }

    #[test]
    fn test_publish_after_close_is_ignored() {
        let slot = FrameSlot::new();
        slot.close();
        slot.publish(CameraFrame::solid(2, 2, [0, 0, 0, 255]));
        assert!(slot.latest().is_none());
    }
}

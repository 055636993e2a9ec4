// SPDX-License-Identifier: GPL-3.0-only

//! In-process camera
//!
//! Serves still frames, loaded from memory or an image file, through the
//! same [`MediaDevices`] interface as real hardware. The access policy can
//! be switched to simulate a denied permission prompt or a missing device,
//! and acquisitions are counted so callers can verify the camera is
//! released.

use super::types::{CameraFrame, MediaConstraints, TrackInfo, TrackState, VideoMetadata};
use super::{FrameSlot, MediaDevices, MediaStream};
use crate::errors::AcquireError;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How the virtual camera answers an access request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    #[default]
    Grant,
    DenyPermission,
    Unavailable,
}

const BLANK_WIDTH: u32 = 640;
const BLANK_HEIGHT: u32 = 480;
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Virtual [`MediaDevices`] implementation
pub struct VirtualCamera {
    frames: Arc<Vec<CameraFrame>>,
    policy: Mutex<AccessPolicy>,
    frame_interval: Duration,
    first_frame_delay: Option<Duration>,
    acquire_delay: Option<Duration>,
    counters: Arc<Counters>,
}

impl VirtualCamera {
    /// Serve `frames` in a loop, one per frame interval
    ///
    /// An empty list serves a blank frame.
    pub fn from_frames(frames: Vec<CameraFrame>) -> Self {
        let frames = if frames.is_empty() {
            vec![CameraFrame::solid(
                BLANK_WIDTH,
                BLANK_HEIGHT,
                [32, 32, 32, 255],
            )]
        } else {
            frames
        };

        Self {
            frames: Arc::new(frames),
            policy: Mutex::new(AccessPolicy::Grant),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            first_frame_delay: None,
            acquire_delay: None,
            counters: Arc::default(),
        }
    }

    /// Serve a single uniformly grey frame
    pub fn blank(width: u32, height: u32) -> Self {
        Self::from_frames(vec![CameraFrame::solid(width, height, [32, 32, 32, 255])])
    }

    /// Serve the decoded contents of an image file
    pub fn from_image(path: &Path) -> Result<Self, AcquireError> {
        let image = image::open(path).map_err(|e| {
            AcquireError::DeviceUnavailable(format!("cannot load {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), width = image.width(), height = image.height(), "Loaded virtual camera image");
        Ok(Self::from_frames(vec![CameraFrame::from_image(
            image.to_rgba8(),
        )]))
    }

    pub fn with_policy(self, policy: AccessPolicy) -> Self {
        self.set_policy(policy);
        self
    }

    /// Delay before the first frame becomes available
    pub fn with_first_frame_delay(mut self, delay: Duration) -> Self {
        self.first_frame_delay = Some(delay);
        self
    }

    /// Delay before an access request is granted
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = Some(delay);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Change the answer given to later access requests
    pub fn set_policy(&self, policy: AccessPolicy) {
        *self.policy.lock().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Streams handed out so far
    pub fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    /// Streams stopped so far
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    /// Streams with a live track
    pub fn live_tracks(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

impl MediaDevices for VirtualCamera {
    fn get_user_media<'a>(
        &'a self,
        constraints: &'a MediaConstraints,
    ) -> BoxFuture<'a, Result<Arc<dyn MediaStream>, AcquireError>> {
        Box::pin(async move {
            let policy = *self.policy.lock().unwrap_or_else(|e| e.into_inner());
            match policy {
                AccessPolicy::DenyPermission => {
                    debug!("Virtual camera denying access");
                    return Err(AcquireError::PermissionDenied);
                }
                AccessPolicy::Unavailable => {
                    return Err(AcquireError::DeviceUnavailable(
                        "virtual camera unavailable".to_string(),
                    ));
                }
                AccessPolicy::Grant => {}
            }

            if let Some(delay) = self.acquire_delay {
                tokio::time::sleep(delay).await;
            }

            let stream = VirtualStream::start(
                Arc::clone(&self.frames),
                self.frame_interval,
                self.first_frame_delay,
                Arc::clone(&self.counters),
            );
            self.counters.acquired.fetch_add(1, Ordering::SeqCst);
            debug!(stream = %stream.id, facing = %constraints.facing_mode, "Virtual camera granted");
            Ok(Arc::new(stream) as Arc<dyn MediaStream>)
        })
    }
}

struct VirtualStream {
    id: String,
    slot: Arc<FrameSlot>,
    feeder: Mutex<Option<JoinHandle<()>>>,
    ended: AtomicBool,
    counters: Arc<Counters>,
}

impl VirtualStream {
    fn start(
        frames: Arc<Vec<CameraFrame>>,
        interval: Duration,
        delay: Option<Duration>,
        counters: Arc<Counters>,
    ) -> Self {
        let slot = Arc::new(FrameSlot::new());
        let feed_slot = Arc::clone(&slot);

        let feeder = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut sequence: u64 = 0;
            for frame in frames.iter().cycle() {
                sequence += 1;
                feed_slot.publish(frame.resequenced(sequence));
                tokio::time::sleep(interval).await;
            }
        });

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            slot,
            feeder: Mutex::new(Some(feeder)),
            ended: AtomicBool::new(false),
            counters,
        }
    }
}

impl MediaStream for VirtualStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        vec![TrackInfo {
            label: "Virtual Camera".to_string(),
            state: if self.ended.load(Ordering::SeqCst) {
                TrackState::Ended
            } else {
                TrackState::Live
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
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(feeder) = self.feeder.lock().unwrap_or_else(|e| e.into_inner()).take() {
            feeder.abort();
        }
        self.slot.close();
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        debug!(stream = %self.id, "Virtual camera released");
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_serves_frames() {
        let camera = VirtualCamera::blank(320, 240);
        let stream = camera
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap();

        let metadata = stream.metadata_ready().await.unwrap();
        assert_eq!((metadata.width, metadata.height), (320, 240));
        assert!(stream.current_frame().is_some());
        assert!(stream.is_live());
        assert_eq!(camera.live_tracks(), 1);

        stream.stop_tracks();
        stream.stop_tracks();
        assert!(!stream.is_live());
        assert_eq!(camera.released(), 1);
        assert_eq!(camera.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_policies_refuse_access() {
        let camera = VirtualCamera::blank(8, 8).with_policy(AccessPolicy::DenyPermission);
        let result = camera.get_user_media(&MediaConstraints::default()).await;
        assert_eq!(result.err(), Some(AcquireError::PermissionDenied));

        camera.set_policy(AccessPolicy::Unavailable);
        let result = camera.get_user_media(&MediaConstraints::default()).await;
        assert!(matches!(result, Err(AcquireError::DeviceUnavailable(_))));
        assert_eq!(camera.acquired(), 0);
    }

    #[tokio::test]
    async fn test_frames_cycle() {
        let camera = VirtualCamera::from_frames(vec![
            CameraFrame::solid(4, 4, [255, 0, 0, 255]),
            CameraFrame::solid(4, 4, [0, 255, 0, 255]),
        ])
        .with_frame_interval(Duration::from_millis(5));
        let stream = camera
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap();
        stream.metadata_ready().await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let frame = stream.current_frame().unwrap();
        assert!(frame.sequence > 2);
    }

    #[tokio::test]
    async fn test_still_frame_keeps_advancing() {
        let camera = VirtualCamera::blank(4, 4).with_frame_interval(Duration::from_millis(5));
        let stream = camera
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap();
        stream.metadata_ready().await.unwrap();
        let first = stream.current_frame().unwrap().sequence;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(stream.current_frame().unwrap().sequence > first);
    }

    #[test]
    fn test_missing_image_is_unavailable() {
        let result = VirtualCamera::from_image(Path::new("/nonexistent/shelf.png"));
        assert!(matches!(result, Err(AcquireError::DeviceUnavailable(_))));
    }
}

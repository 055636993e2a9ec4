// SPDX-License-Identifier: GPL-3.0-only

//! Render target binding
//!
//! A [`SurfaceHost`] is the registry of mount points a caller can bind a
//! session to. [`bind`] fills a mount with a video surface linked to the
//! camera stream and a transparent overlay surface of the same size, and
//! returns a [`RenderTargets`] handle that owns both. Releasing the handle,
//! explicitly or by dropping it, removes them again exactly once.

pub mod overlay;

pub use overlay::Annotation;

use crate::backends::camera::{MediaStream, VideoMetadata};
use crate::detection::Detection;
use crate::errors::SessionError;
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Kind of a surface inside a mount point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Live camera picture
    Video,
    /// Transparent annotation layer stacked on the video
    Overlay,
}

/// Snapshot of one surface, for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub kind: SurfaceKind,
    pub width: u32,
    pub height: u32,
    /// Stream id the video surface shows
    pub source: Option<String>,
}

struct Surface {
    kind: SurfaceKind,
    width: u32,
    height: u32,
    source: Option<String>,
    binding: u64,
    pixels: RgbaImage,
    annotations: Vec<Annotation>,
}

impl Surface {
    fn new(kind: SurfaceKind, source: Option<String>, binding: u64) -> Self {
        Self {
            kind,
            width: 0,
            height: 0,
            source,
            binding,
            pixels: RgbaImage::new(0, 0),
            annotations: Vec::new(),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        if self.kind == SurfaceKind::Overlay {
            self.pixels = RgbaImage::new(width, height);
            self.annotations.clear();
        }
    }

    fn info(&self) -> SurfaceInfo {
        SurfaceInfo {
            kind: self.kind,
            width: self.width,
            height: self.height,
            source: self.source.clone(),
        }
    }
}

#[derive(Default)]
struct MountNode {
    children: Vec<Surface>,
}

/// Registry of mount points
#[derive(Clone, Default)]
pub struct SurfaceHost {
    mounts: Arc<Mutex<HashMap<String, MountNode>>>,
    next_binding: Arc<AtomicU64>,
}

impl SurfaceHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MountNode>> {
        self.mounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty mount point; existing mounts are left as they are
    pub fn register_mount(&self, mount_id: &str) {
        self.lock().entry(mount_id.to_string()).or_default();
        debug!(mount = %mount_id, "Registered mount point");
    }

    /// Remove a mount point and everything in it
    pub fn remove_mount(&self, mount_id: &str) -> bool {
        self.lock().remove(mount_id).is_some()
    }

    pub fn has_mount(&self, mount_id: &str) -> bool {
        self.lock().contains_key(mount_id)
    }

    /// Number of surfaces inside a mount, `None` if it does not exist
    pub fn child_count(&self, mount_id: &str) -> Option<usize> {
        self.lock().get(mount_id).map(|node| node.children.len())
    }

    /// Surfaces inside a mount, in stacking order
    pub fn surfaces(&self, mount_id: &str) -> Vec<SurfaceInfo> {
        self.lock()
            .get(mount_id)
            .map(|node| node.children.iter().map(Surface::info).collect())
            .unwrap_or_default()
    }

    /// Copy of the overlay pixels of a mount
    pub fn overlay_snapshot(&self, mount_id: &str) -> Option<RgbaImage> {
        self.lock().get(mount_id).and_then(|node| {
            node.children
                .iter()
                .find(|s| s.kind == SurfaceKind::Overlay)
                .map(|s| s.pixels.clone())
        })
    }

    /// Text annotations currently on the overlay of a mount
    pub fn annotations(&self, mount_id: &str) -> Vec<Annotation> {
        self.lock()
            .get(mount_id)
            .and_then(|node| {
                node.children
                    .iter()
                    .find(|s| s.kind == SurfaceKind::Overlay)
                    .map(|s| s.annotations.clone())
            })
            .unwrap_or_default()
    }
}

/// Attach `stream` to a mount point
///
/// Empties the mount, then appends a video surface and an overlay surface.
/// Both stay 0x0 until [`RenderTargets::size_to`] is called with the
/// stream's metadata.
pub fn bind(
    host: &SurfaceHost,
    mount_id: &str,
    stream: &dyn MediaStream,
) -> Result<RenderTargets, SessionError> {
    let binding = host.next_binding.fetch_add(1, Ordering::SeqCst) + 1;
    {
        let mut mounts = host.lock();
        let node = mounts
            .get_mut(mount_id)
            .ok_or_else(|| SessionError::MountNotFound(mount_id.to_string()))?;

        node.children.clear();
        node.children.push(Surface::new(
            SurfaceKind::Video,
            Some(stream.id().to_string()),
            binding,
        ));
        node.children
            .push(Surface::new(SurfaceKind::Overlay, None, binding));
    }

    info!(mount = %mount_id, stream = %stream.id(), "Bound render targets");
    Ok(RenderTargets {
        host: host.clone(),
        mount_id: mount_id.to_string(),
        binding,
        released: false,
    })
}

/// Scoped ownership of the surfaces created by [`bind`]
pub struct RenderTargets {
    host: SurfaceHost,
    mount_id: String,
    binding: u64,
    released: bool,
}

impl RenderTargets {
    pub fn mount_id(&self) -> &str {
        &self.mount_id
    }

    fn with_surfaces<R>(&self, f: impl FnOnce(&mut Vec<&mut Surface>) -> R) -> Option<R> {
        let mut mounts = self.host.lock();
        let node = mounts.get_mut(&self.mount_id)?;
        let mut owned: Vec<&mut Surface> = node
            .children
            .iter_mut()
            .filter(|s| s.binding == self.binding)
            .collect();
        if owned.is_empty() {
            return None;
        }
        Some(f(&mut owned))
    }

    /// Size both surfaces to the stream's native resolution
    pub fn size_to(&self, metadata: VideoMetadata) {
        self.with_surfaces(|surfaces| {
            for surface in surfaces.iter_mut() {
                surface.resize(metadata.width, metadata.height);
            }
        });
        debug!(
            mount = %self.mount_id,
            width = metadata.width,
            height = metadata.height,
            "Sized render targets"
        );
    }

    /// Current overlay (canvas) size
    pub fn canvas_size(&self) -> (u32, u32) {
        self.with_surfaces(|surfaces| {
            surfaces
                .iter()
                .find(|s| s.kind == SurfaceKind::Overlay)
                .map(|s| (s.width, s.height))
        })
        .flatten()
        .unwrap_or((0, 0))
    }

    /// Resize both surfaces if the frame resolution changed
    ///
    /// Returns true when a resize happened.
    pub fn sync_to(&self, width: u32, height: u32) -> bool {
        if self.canvas_size() == (width, height) {
            return false;
        }
        self.size_to(VideoMetadata { width, height });
        true
    }

    /// Repaint the overlay with `detections`
    pub fn draw_overlay(&self, detections: &[Detection]) {
        self.with_surfaces(|surfaces| {
            if let Some(surface) = surfaces
                .iter_mut()
                .find(|s| s.kind == SurfaceKind::Overlay)
            {
                surface.annotations = overlay::paint_detections(&mut surface.pixels, detections);
            }
        });
    }

    /// Remove the surfaces from the mount point
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut mounts = self.host.lock();
        if let Some(node) = mounts.get_mut(&self.mount_id) {
            node.children.retain(|s| s.binding != self.binding);
            debug!(mount = %self.mount_id, "Released render targets");
        }
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{MediaConstraints, MediaDevices, VirtualCamera};

    async fn stream() -> Arc<dyn MediaStream> {
        VirtualCamera::blank(64, 48)
            .get_user_media(&MediaConstraints::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_missing_mount() {
        let host = SurfaceHost::new();
        let stream = stream().await;
        let result = bind(&host, "nowhere", stream.as_ref());
        assert!(matches!(result, Err(SessionError::MountNotFound(id)) if id == "nowhere"));
    }

    #[tokio::test]
    async fn test_bind_size_and_release() {
        let host = SurfaceHost::new();
        host.register_mount("scanner");
        let stream = stream().await;

        let targets = bind(&host, "scanner", stream.as_ref()).unwrap();
        assert_eq!(host.child_count("scanner"), Some(2));
        assert_eq!(targets.canvas_size(), (0, 0));

        targets.size_to(VideoMetadata {
            width: 64,
            height: 48,
        });
        let surfaces = host.surfaces("scanner");
        assert_eq!(surfaces[0].kind, SurfaceKind::Video);
        assert_eq!(surfaces[0].source.as_deref(), Some(stream.id()));
        assert!(surfaces.iter().all(|s| (s.width, s.height) == (64, 48)));

        assert!(!targets.sync_to(64, 48));
        assert!(targets.sync_to(32, 24));
        assert_eq!(targets.canvas_size(), (32, 24));

        targets.release();
        assert_eq!(host.child_count("scanner"), Some(0));
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_binding() {
        let host = SurfaceHost::new();
        host.register_mount("scanner");
        let stream = stream().await;

        let first = bind(&host, "scanner", stream.as_ref()).unwrap();
        let second = bind(&host, "scanner", stream.as_ref()).unwrap();
        drop(first);
        assert_eq!(host.child_count("scanner"), Some(2));
        drop(second);
        assert_eq!(host.child_count("scanner"), Some(0));
    }
}

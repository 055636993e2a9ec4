// SPDX-License-Identifier: MPL-2.0

//! Stockcam - camera capture sessions for inventory smart entry
//!
//! This library drives camera-based capture workflows for product entry:
//! scanning a barcode, or recognising an object with a detection model,
//! while a preview and an annotated overlay are shown inside a host
//! container.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera acquisition (V4L2 and an in-process virtual camera)
//! - [`render`]: Render targets bound into mount points, overlay painting
//! - [`detection`]: Barcode and object-detection backends, result filtering
//! - [`session`]: The capture session lifecycle
//! - [`entry`]: Product-form assist built on a scanner and a detector
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let session = CaptureSession::barcode("scanner", options, callbacks, platform);
//! session.start().await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod detection;
pub mod entry;
pub mod errors;
pub mod render;
pub mod session;

// Re-export commonly used types
pub use backends::camera::{CameraFrame, MediaDevices, MediaStream, V4l2Devices, VirtualCamera};
pub use config::{CaptureOptions, Config, DetectorOptions, ScannerOptions};
pub use detection::{BackendKind, Detection, LabelMap, RecordedModel};
pub use entry::{CatalogLookup, EntryAssist, ProductDraft, ProductInfo, ProductLookup};
pub use errors::{AcquireError, ApiError, ConfigError, SessionError, SessionResult};
pub use render::SurfaceHost;
pub use session::{CaptureSession, Platform, SessionCallbacks, SessionState, SessionStatus};

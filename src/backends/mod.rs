// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera access
//!
//! The backend layer hides where frames come from, so the session code is
//! identical whether it runs against a V4L2 device or an in-process virtual
//! camera:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              CaptureSession                  │
//! └────────────────────┬────────────────────────┘
//!                      │ MediaDevices / MediaStream
//! ┌────────────────────┴────────────────────────┐
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │    V4L2     │    │  Virtual camera  │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - [`camera`]: acquisition traits, frame types and the concrete acquirers

pub mod camera;

// SPDX-License-Identifier: GPL-3.0-only

//! Detection Loop backends
//!
//! A session runs exactly one [`DetectionBackend`]. The backend decides the
//! loop pattern:
//!
//! - [`ObjectBackend`] polls: on a fixed interval it grabs the newest frame,
//!   runs inference and hands the result to the session, frame after frame
//! - [`BarcodeBackend`] subscribes: a decoder task scans frames on its own
//!   schedule and the loop waits for the first successful decode, delivers
//!   it and completes
//!
//! Either way results go through [`LoopContext::deliver`], which applies the
//! [`ResultSink`], paints the overlay and invokes the caller's callback.
//!
//! [`LoopContext::deliver`]: crate::session::LoopContext::deliver

pub mod barcode;
pub mod object;
pub mod replay;
pub mod sink;
pub mod tensor;
pub mod types;

pub use barcode::{BarcodeBackend, CodeReader, DecodeSubscription, DecodedCode, RqrrReader};
pub use object::{InferenceModel, LabelMap, ObjectBackend, decode_outputs};
pub use replay::{RecordedFrame, RecordedModel, RecordedTensor};
pub use sink::ResultSink;
pub use tensor::{Tensor, TensorArena};
pub use types::{BackendKind, BoundingBox, Detection, FrameRegion, RawDetection};

use crate::backends::camera::CameraFrame;
use crate::constants::timing;
use crate::errors::SessionError;
use crate::session::{Delivery, LoopContext, LoopExit};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// A decoding/inference strategy plugged into the Detection Loop
pub trait DetectionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run one pass over `frame`
    ///
    /// Boxes are normalized to the frame. Every intermediate buffer the
    /// pass allocates is released before the future resolves.
    fn detect_frame(
        &self,
        frame: Arc<CameraFrame>,
    ) -> BoxFuture<'_, Result<Vec<RawDetection>, SessionError>>;

    /// Drive the loop until cancelled, completed or failed
    fn run(self: Arc<Self>, ctx: LoopContext) -> BoxFuture<'static, LoopExit>;
}

/// Fixed-interval polling loop
///
/// Iterations never overlap: the next tick is only awaited after the
/// previous pass, including delivery, has finished.
pub async fn polling_loop<B>(backend: Arc<B>, ctx: LoopContext) -> LoopExit
where
    B: DetectionBackend + ?Sized,
{
    let mut ticker = tokio::time::interval(ctx.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut passes: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return LoopExit::Cancelled,
            _ = ticker.tick() => {}
        }

        let Some(frame) = ctx.current_frame() else {
            trace!("No frame available yet");
            continue;
        };

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => return LoopExit::Cancelled,
            result = backend.detect_frame(Arc::clone(&frame)) => result,
        };

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Detection pass failed");
                return LoopExit::Failed(e);
            }
        };

        passes += 1;
        if passes % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(passes, sequence = frame.sequence, "Detection loop alive");
        }

        match ctx.deliver(frame.sequence, frame.width, frame.height, raw) {
            Delivery::Delivered { close: true } => return LoopExit::Completed,
            Delivery::Delivered { close: false } | Delivery::Empty | Delivery::Duplicate => {}
            Delivery::Stale => return LoopExit::Cancelled,
        }
    }
}

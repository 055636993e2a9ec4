// SPDX-License-Identifier: GPL-3.0-only

//! Object-detection backend
//!
//! Polls the newest frame at the configured rate, runs it through an
//! [`InferenceModel`] and normalizes whatever output layout the model uses
//! into [`RawDetection`]s.
//!
//! Two output layouts are understood:
//!
//! - split, four or more tensors: `[classes, boxes, scores, count, ..]`
//!   with boxes as `[ymin, xmin, ymax, xmax]` rows
//! - combined, two or three tensors: `[rows, count, ..]` where every row is
//!   `[y1, x1, y2, x2, score, class]` and `count` limits the valid rows

use super::tensor::{Tensor, TensorArena};
use super::types::{BackendKind, FrameRegion, RawDetection};
use super::{DetectionBackend, polling_loop};
use crate::backends::camera::CameraFrame;
use crate::constants::{COCO_LABELS, UNKNOWN_LABEL};
use crate::errors::SessionError;
use crate::session::{LoopContext, LoopExit};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, trace};

/// Minimum values per row of the combined layout
const COMBINED_ROW_WIDTH: usize = 6;

/// An object-detection model
pub trait InferenceModel: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "model"
    }

    /// Run one inference pass
    ///
    /// Output tensors must be leased from `arena`; the caller drops them
    /// after decoding.
    fn infer<'a>(
        &'a self,
        input: &'a Tensor,
        arena: &'a TensorArena,
    ) -> BoxFuture<'a, Result<Vec<Tensor>, String>>;
}

/// Class id to name mapping
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    labels: Vec<String>,
    base: usize,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::coco()
    }
}

impl LabelMap {
    /// The 80 COCO classes, first class id 0
    pub fn coco() -> Self {
        Self::from_labels(COCO_LABELS.iter().map(|l| l.to_string()).collect())
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels, base: 0 }
    }

    /// Set the class id of the first label (1 for models that reserve 0)
    pub fn with_base(mut self, base: usize) -> Self {
        self.base = base;
        self
    }

    /// Name for a raw class value; anything out of range is "unknown"
    pub fn label(&self, class_id: f32) -> &str {
        if !class_id.is_finite() || class_id < 0.0 {
            return UNKNOWN_LABEL;
        }
        (class_id.round() as usize)
            .checked_sub(self.base)
            .and_then(|index| self.labels.get(index))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Count tensor value, if present and sane
fn declared_count(tensor: Option<&Tensor>) -> Option<usize> {
    tensor
        .and_then(|t| t.data().first().copied())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as usize)
}

/// Normalize model output into raw detections
pub fn decode_outputs(
    outputs: &[Tensor],
    labels: &LabelMap,
) -> Result<Vec<RawDetection>, SessionError> {
    match outputs.len() {
        n if n >= 4 => Ok(decode_split(outputs, labels)),
        2 | 3 => Ok(decode_combined(outputs, labels)),
        n => Err(SessionError::Inference(format!(
            "unsupported model output: {} tensors",
            n
        ))),
    }
}

fn decode_split(outputs: &[Tensor], labels: &LabelMap) -> Vec<RawDetection> {
    let classes = outputs[0].data();
    let boxes: Vec<&[f32]> = outputs[1].rows().collect();
    let scores = outputs[2].data();

    let mut count = classes.len().min(boxes.len()).min(scores.len());
    if let Some(declared) = declared_count(outputs.get(3)) {
        count = count.min(declared);
    }

    (0..count)
        .filter_map(|i| {
            let row = boxes[i];
            if row.len() < 4 {
                return None;
            }
            Some(RawDetection::new(
                labels.label(classes[i]),
                scores[i],
                FrameRegion::from_corners(row[0], row[1], row[2], row[3]),
            ))
        })
        .collect()
}

fn decode_combined(outputs: &[Tensor], labels: &LabelMap) -> Vec<RawDetection> {
    let rows = &outputs[0];
    if rows.row_width() < COMBINED_ROW_WIDTH {
        trace!(width = rows.row_width(), "Combined rows too narrow");
        return Vec::new();
    }

    let available = rows.rows().len();
    let count = declared_count(outputs.get(1))
        .map(|n| n.min(available))
        .unwrap_or(available);

    rows.rows()
        .take(count)
        .map(|row| {
            RawDetection::new(
                labels.label(row[5]),
                row[4],
                FrameRegion::from_corners(row[0], row[1], row[2], row[3]),
            )
        })
        .collect()
}

/// Polling Detection Loop backend around an [`InferenceModel`]
pub struct ObjectBackend {
    model: Arc<dyn InferenceModel>,
    labels: LabelMap,
    arena: TensorArena,
}

impl ObjectBackend {
    pub fn new(model: Arc<dyn InferenceModel>, labels: LabelMap) -> Self {
        Self {
            model,
            labels,
            arena: TensorArena::new(),
        }
    }

    /// Arena every per-frame tensor is leased from
    pub fn arena(&self) -> &TensorArena {
        &self.arena
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    async fn infer_frame(&self, frame: &CameraFrame) -> Result<Vec<RawDetection>, SessionError> {
        let input = self
            .arena
            .image_input(frame)
            .map_err(SessionError::Inference)?;
        let outputs = self
            .model
            .infer(&input, &self.arena)
            .await
            .map_err(SessionError::Inference)?;

        let detections = decode_outputs(&outputs, &self.labels);
        drop(outputs);
        drop(input);

        trace!(
            model = %self.model.name(),
            live = self.arena.live(),
            "Inference pass complete"
        );
        detections
    }
}

impl DetectionBackend for ObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Detect
    }

    fn detect_frame(
        &self,
        frame: Arc<CameraFrame>,
    ) -> BoxFuture<'_, Result<Vec<RawDetection>, SessionError>> {
        Box::pin(async move { self.infer_frame(&frame).await })
    }

    fn run(self: Arc<Self>, ctx: LoopContext) -> BoxFuture<'static, LoopExit> {
        debug!(model = %self.model.name(), "Starting object detection loop");
        Box::pin(polling_loop(self, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(arena: &TensorArena, shape: Vec<usize>, data: Vec<f32>) -> Tensor {
        arena.tensor(shape, data).unwrap()
    }

    #[test]
    fn test_label_map_bases() {
        let labels = LabelMap::coco();
        assert_eq!(labels.label(0.0), "person");
        assert_eq!(labels.label(41.0), "cup");
        assert_eq!(labels.label(80.0), "unknown");
        assert_eq!(labels.label(-1.0), "unknown");
        assert_eq!(labels.label(f32::NAN), "unknown");

        let one_based = LabelMap::coco().with_base(1);
        assert_eq!(one_based.label(1.0), "person");
        assert_eq!(one_based.label(0.0), "unknown");
        assert_eq!(one_based.label(80.0), "toothbrush");
    }

    #[test]
    fn test_decode_split_layout() {
        let arena = TensorArena::new();
        let outputs = vec![
            t(&arena, vec![1, 2], vec![41.0, 39.0]),
            t(
                &arena,
                vec![1, 2, 4],
                vec![0.1, 0.2, 0.5, 0.6, 0.0, 0.0, 1.0, 1.0],
            ),
            t(&arena, vec![1, 2], vec![0.9, 0.4]),
            t(&arena, vec![1], vec![2.0]),
        ];

        let raw = decode_outputs(&outputs, &LabelMap::coco()).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].label, "cup");
        assert_eq!(raw[0].confidence, 0.9);
        assert!((raw[0].bounds.x - 0.2).abs() < 1e-6);
        assert!((raw[0].bounds.y - 0.1).abs() < 1e-6);
        assert!((raw[0].bounds.width - 0.4).abs() < 1e-6);
        assert_eq!(raw[1].label, "bottle");
    }

    #[test]
    fn test_decode_split_respects_count() {
        let arena = TensorArena::new();
        let outputs = vec![
            t(&arena, vec![2], vec![41.0, 39.0]),
            t(&arena, vec![2, 4], vec![0.0; 8]),
            t(&arena, vec![2], vec![0.9, 0.8]),
            t(&arena, vec![1], vec![1.0]),
        ];
        assert_eq!(decode_outputs(&outputs, &LabelMap::coco()).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_combined_layout() {
        let arena = TensorArena::new();
        let outputs = vec![
            t(
                &arena,
                vec![1, 3, 6],
                vec![
                    0.0, 0.0, 0.5, 0.5, 0.9, 41.0, //
                    0.5, 0.5, 1.0, 1.0, 0.6, 39.0, //
                    0.0, 0.0, 0.1, 0.1, 0.99, 0.0,
                ],
            ),
            t(&arena, vec![1], vec![2.0]),
        ];

        let raw = decode_outputs(&outputs, &LabelMap::coco()).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].label, "cup");
        assert_eq!(raw[1].label, "bottle");
        assert!((raw[1].bounds.x - 0.5).abs() < 1e-6);
        assert!((raw[1].bounds.height - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_unknown_layout() {
        let arena = TensorArena::new();
        let outputs = vec![t(&arena, vec![1], vec![0.0])];
        assert!(matches!(
            decode_outputs(&outputs, &LabelMap::coco()),
            Err(SessionError::Inference(_))
        ));
        assert!(decode_outputs(&[], &LabelMap::coco()).is_err());
    }

    #[test]
    fn test_boxes_are_clamped() {
        let arena = TensorArena::new();
        let outputs = vec![
            t(&arena, vec![1, 6], vec![-0.2, -0.1, 1.3, 1.5, 0.7, 0.0]),
            t(&arena, vec![1], vec![1.0]),
        ];
        let raw = decode_outputs(&outputs, &LabelMap::coco()).unwrap();
        assert_eq!(
            raw[0].bounds,
            FrameRegion {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0
            }
        );
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Recorded model outputs
//!
//! [`RecordedModel`] is an [`InferenceModel`] that replays raw output
//! tensors captured from a real model, one recorded frame per inference
//! pass, cycling when it runs out. A recorded frame may also be an error,
//! which replays as an inference failure.
//!
//! ```json
//! { "frames": [
//!     { "outputs": [ { "shape": [1, 1, 6], "data": [0.1, 0.1, 0.6, 0.5, 0.92, 41] },
//!                    { "shape": [1], "data": [1] } ] },
//!     { "error": "delegate crashed" }
//! ] }
//! ```

use super::object::InferenceModel;
use super::tensor::{Tensor, TensorArena};
use crate::errors::SessionError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// One recorded output tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// The outcome of one recorded inference pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedFrame {
    Outputs { outputs: Vec<RecordedTensor> },
    Error { error: String },
}

impl RecordedFrame {
    /// Combined-layout frame from `[y1, x1, y2, x2, score, class]` rows
    pub fn combined(rows: &[[f32; 6]]) -> Self {
        RecordedFrame::Outputs {
            outputs: vec![
                RecordedTensor {
                    shape: vec![1, rows.len(), 6],
                    data: rows.iter().flatten().copied().collect(),
                },
                RecordedTensor {
                    shape: vec![1],
                    data: vec![rows.len() as f32],
                },
            ],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RecordedFrame::Error {
            error: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Recording {
    frames: Vec<RecordedFrame>,
}

/// Replays recorded frames in order
#[derive(Debug)]
pub struct RecordedModel {
    name: String,
    frames: Vec<RecordedFrame>,
    cursor: AtomicUsize,
    latency: Option<Duration>,
}

impl RecordedModel {
    pub fn new(frames: Vec<RecordedFrame>) -> Self {
        Self {
            name: "recording".to_string(),
            frames,
            cursor: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Parse a recording from JSON
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let recording: Recording = serde_json::from_str(json)
            .map_err(|e| SessionError::Inference(format!("invalid recording: {}", e)))?;
        Ok(Self::new(recording.frames))
    }

    /// Load a recording file
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Inference(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut model = Self::from_json(&json)?;
        model.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(model.name);

        info!(path = %path.display(), frames = model.frames.len(), "Loaded recorded model");
        Ok(model)
    }

    /// Simulated inference time per pass
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Passes replayed so far
    pub fn passes(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn lease(
        outputs: &[RecordedTensor],
        arena: &TensorArena,
    ) -> Result<Vec<Tensor>, String> {
        outputs
            .iter()
            .map(|t| arena.tensor(t.shape.clone(), t.data.clone()))
            .collect()
    }
}

impl InferenceModel for RecordedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer<'a>(
        &'a self,
        _input: &'a Tensor,
        arena: &'a TensorArena,
    ) -> BoxFuture<'a, Result<Vec<Tensor>, String>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.frames.is_empty() {
                return Err("recording has no frames".to_string());
            }

            let pass = self.cursor.fetch_add(1, Ordering::SeqCst);
            let frame = &self.frames[pass % self.frames.len()];
            debug!(pass, "Replaying recorded frame");

            match frame {
                RecordedFrame::Outputs { outputs } => Self::lease(outputs, arena),
                RecordedFrame::Error { error } => Err(error.clone()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_and_cycles() {
        let model = RecordedModel::new(vec![
            RecordedFrame::combined(&[[0.0, 0.0, 1.0, 1.0, 0.9, 41.0]]),
            RecordedFrame::error("boom"),
        ]);
        let arena = TensorArena::new();
        let input = arena.tensor(vec![1], vec![0.0]).unwrap();

        let first = model.infer(&input, &arena).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].shape(), &[1, 1, 6]);
        assert_eq!(arena.live(), 3);
        drop(first);

        assert_eq!(model.infer(&input, &arena).await.unwrap_err(), "boom");
        assert!(model.infer(&input, &arena).await.is_ok());
        assert_eq!(model.passes(), 3);

        drop(input);
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_parses_json_recording() {
        let json = r#"{"frames": [
            {"outputs": [{"shape": [1, 6], "data": [0, 0, 1, 1, 0.5, 0]},
                         {"shape": [1], "data": [1]}]},
            {"error": "delegate crashed"}
        ]}"#;
        let model = RecordedModel::from_json(json).unwrap();
        assert_eq!(model.frames.len(), 2);
        assert_eq!(model.frames[1], RecordedFrame::error("delegate crashed"));
    }

    #[test]
    fn test_invalid_recording_is_an_inference_error() {
        assert!(matches!(
            RecordedModel::from_json("{\"frames\": 3}"),
            Err(SessionError::Inference(_))
        ));
    }
}

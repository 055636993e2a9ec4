// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame tensor accounting
//!
//! Every tensor an inference pass touches is leased from a [`TensorArena`]
//! and handed back when dropped. [`TensorArena::live`] is zero between
//! iterations of a healthy loop; anything else is a per-frame leak.

use crate::backends::camera::CameraFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct ArenaCounters {
    live: AtomicUsize,
    leased: AtomicU64,
}

/// Lease tracker for inference tensors
#[derive(Debug, Clone, Default)]
pub struct TensorArena {
    counters: Arc<ArenaCounters>,
}

impl TensorArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease a tensor; `data.len()` must equal the product of `shape`
    pub fn tensor(&self, shape: Vec<usize>, data: Vec<f32>) -> Result<Tensor, String> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(format!(
                "tensor shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            ));
        }

        self.counters.live.fetch_add(1, Ordering::SeqCst);
        self.counters.leased.fetch_add(1, Ordering::SeqCst);
        Ok(Tensor {
            shape,
            data,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Lease a `[1, height, width, 3]` tensor holding the frame's RGB values
    pub fn image_input(&self, frame: &CameraFrame) -> Result<Tensor, String> {
        let image = frame
            .to_rgba_image()
            .ok_or_else(|| "frame buffer is truncated".to_string())?;
        let (width, height) = image.dimensions();
        let data = image
            .pixels()
            .flat_map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
            .collect();
        self.tensor(vec![1, height as usize, width as usize, 3], data)
    }

    /// Tensors currently leased
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Tensors leased since creation
    pub fn total_leased(&self) -> u64 {
        self.counters.leased.load(Ordering::SeqCst)
    }
}

/// A leased f32 tensor
#[derive(Debug)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    counters: Arc<ArenaCounters>,
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the innermost dimension
    pub fn row_width(&self) -> usize {
        self.shape.last().copied().unwrap_or(1).max(1)
    }

    /// Iterate rows of the innermost dimension
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.row_width())
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_and_release() {
        let arena = TensorArena::new();
        let a = arena.tensor(vec![2, 2], vec![0.0; 4]).unwrap();
        let b = arena.tensor(vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(arena.live(), 2);

        drop(a);
        assert_eq!(arena.live(), 1);
        drop(b);
        assert_eq!(arena.live(), 0);
        assert_eq!(arena.total_leased(), 2);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let arena = TensorArena::new();
        assert!(arena.tensor(vec![2, 3], vec![0.0; 5]).is_err());
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_rows_follow_innermost_dimension() {
        let arena = TensorArena::new();
        let t = arena
            .tensor(vec![1, 2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        let rows: Vec<&[f32]> = t.rows().collect();
        assert_eq!(rows, vec![&[1.0, 2.0, 3.0][..], &[4.0, 5.0, 6.0][..]]);
    }

    #[test]
    fn test_image_input_shape() {
        let arena = TensorArena::new();
        let frame = CameraFrame::solid(4, 2, [10, 20, 30, 255]);
        let input = arena.image_input(&frame).unwrap();
        assert_eq!(input.shape(), &[1, 2, 4, 3]);
        assert_eq!(&input.data()[..3], &[10.0, 20.0, 30.0]);
    }
}

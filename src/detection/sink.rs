// SPDX-License-Identifier: GPL-3.0-only

//! Result Sink filtering
//!
//! Turns the unordered candidates of one frame into the list the caller
//! sees: inclusive confidence threshold, highest confidence first, capped.

use super::types::Detection;
use crate::config::CaptureOptions;
use tracing::trace;

/// Threshold, ranking and cap applied to every processed frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultSink {
    threshold: f32,
    max_detections: usize,
}

impl ResultSink {
    pub fn new(threshold: f32, max_detections: usize) -> Self {
        Self {
            threshold,
            max_detections,
        }
    }

    pub fn from_options(options: &CaptureOptions) -> Self {
        Self::new(options.confidence_threshold, options.max_detections)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn max_detections(&self) -> usize {
        self.max_detections
    }

    /// Whether a single score passes the threshold (`>=`, NaN never passes)
    pub fn accepts(&self, confidence: f32) -> bool {
        confidence >= self.threshold
    }

    /// Filter, sort descending by confidence and truncate
    ///
    /// The sort is stable, so equal scores keep the backend's order.
    pub fn filter(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let candidates = detections.len();
        let mut accepted: Vec<Detection> = detections
            .into_iter()
            .filter(|d| self.accepts(d.confidence))
            .collect();

        accepted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        accepted.truncate(self.max_detections);

        trace!(
            candidates,
            accepted = accepted.len(),
            threshold = self.threshold,
            "Filtered detections"
        );
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::default())
    }

    fn labels(detections: &[Detection]) -> Vec<&str> {
        detections.iter().map(|d| d.label.as_str()).collect()
    }

    #[test]
    fn test_threshold_is_inclusive_and_sorted() {
        let sink = ResultSink::new(0.6, 5);
        let result = sink.filter(vec![
            det("cup", 0.9),
            det("bottle", 0.4),
            det("shaker", 0.6),
        ]);
        assert_eq!(labels(&result), vec!["cup", "shaker"]);
        assert_eq!(result[1].confidence, 0.6);
    }

    #[test]
    fn test_truncates_to_cap() {
        let sink = ResultSink::new(0.0, 2);
        let result = sink.filter(vec![det("a", 0.1), det("b", 0.7), det("c", 0.3)]);
        assert_eq!(labels(&result), vec!["b", "c"]);
    }

    #[test]
    fn test_equal_scores_keep_backend_order() {
        let sink = ResultSink::new(0.5, 5);
        let result = sink.filter(vec![det("first", 0.8), det("second", 0.8)]);
        assert_eq!(labels(&result), vec!["first", "second"]);
    }

    #[test]
    fn test_nan_scores_are_dropped() {
        let sink = ResultSink::new(0.0, 5);
        let result = sink.filter(vec![det("nan", f32::NAN), det("ok", 0.2)]);
        assert_eq!(labels(&result), vec!["ok"]);
    }

    #[test]
    fn test_output_is_ordered_and_bounded_for_many_inputs() {
        let sink = ResultSink::new(0.25, 3);
        for seed in 0..50u32 {
            let input: Vec<Detection> = (0..(seed % 9))
                .map(|i| det("x", ((seed * 31 + i * 17) % 100) as f32 / 100.0))
                .collect();
            let result = sink.filter(input);
            assert!(result.len() <= 3);
            assert!(result.iter().all(|d| d.confidence >= 0.25));
            assert!(result.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        }
    }
}

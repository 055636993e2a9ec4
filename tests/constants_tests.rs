// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use stockcam::config::CaptureOptions;
use stockcam::constants::{COCO_LABELS, UNKNOWN_LABEL, defaults, timing};

#[test]
fn test_options_defaults_match_constants() {
    let options = CaptureOptions::default();
    assert_eq!(options.frame_rate, defaults::FRAME_RATE);
    assert_eq!(options.confidence_threshold, defaults::CONFIDENCE_THRESHOLD);
    assert_eq!(options.max_detections, defaults::MAX_DETECTIONS);
    assert_eq!(
        options.auto_close_on_detection,
        defaults::AUTO_CLOSE_ON_DETECTION
    );
    assert_eq!(options.detection_region_size.width, defaults::REGION_WIDTH);
}

#[test]
fn test_default_poll_interval_is_100ms() {
    // 10 fps
    assert_eq!(CaptureOptions::default().poll_interval().as_millis(), 100);
}

#[test]
fn test_coco_labels() {
    // Test that the label map covers the 80 COCO classes without the sentinel
    assert_eq!(COCO_LABELS.len(), 80);
    assert_eq!(COCO_LABELS[0], "person");
    assert_eq!(COCO_LABELS[41], "cup");
    assert!(!COCO_LABELS.contains(&UNKNOWN_LABEL));
}

#[test]
fn test_metadata_timeout_is_bounded() {
    assert!(timing::METADATA_TIMEOUT_SECS > 0);
    assert!(timing::METADATA_TIMEOUT_SECS <= 10);
}

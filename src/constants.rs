// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Defaults applied to omitted capture options
pub mod defaults {
    /// Frames per second the detection loop targets
    pub const FRAME_RATE: u32 = 10;

    /// Highest frame rate the detection loop accepts
    pub const MAX_FRAME_RATE: u32 = 1000;

    /// Minimum confidence a detection needs to be forwarded (inclusive)
    pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

    /// Maximum detections forwarded per frame
    pub const MAX_DETECTIONS: usize = 5;

    /// Close the session after the first qualifying detection
    pub const AUTO_CLOSE_ON_DETECTION: bool = false;

    /// Barcode scan region width in frame pixels
    pub const REGION_WIDTH: u32 = 500;

    /// Barcode scan region height in frame pixels
    pub const REGION_HEIGHT: u32 = 500;

    /// Requested camera aspect ratio (width / height)
    pub const ASPECT_RATIO: f32 = 1.0;
}

/// Timing constants
pub mod timing {
    /// Upper bound on waiting for the first frame after the camera opens
    pub const METADATA_TIMEOUT_SECS: u64 = 5;

    /// Frame counter modulo for periodic loop logging
    pub const FRAME_LOG_INTERVAL: u64 = 50;
}

/// V4L2 capture constants
pub mod capture {
    /// Number of mmap buffers queued on the device
    pub const BUFFER_COUNT: u32 = 4;

    /// Fourcc codes tried in order of preference
    pub const PREFERRED_FOURCC: &[&[u8; 4]] = &[b"MJPG", b"YUYV"];
}

/// Overlay drawing constants
pub mod overlay {
    /// Outer box stroke width in pixels
    pub const BOX_STROKE: u32 = 3;

    /// Dash length of the white outline drawn over the box
    pub const DASH_LENGTH: u32 = 5;

    /// Label plate height
    pub const LABEL_HEIGHT: u32 = 30;

    /// Label plate padding and minimum distance from the top edge
    pub const LABEL_PADDING: u32 = 8;

    /// Approximate glyph advance used to size label plates
    pub const GLYPH_WIDTH: u32 = 9;

    /// Boxes at least this tall get a confidence meter underneath
    pub const METER_MIN_BOX_HEIGHT: f32 = 40.0;

    /// Confidence meter height
    pub const METER_HEIGHT: u32 = 8;

    /// Gap between the box and the confidence meter
    pub const METER_GAP: u32 = 5;

    /// Alpha of the dimming layer drawn under the annotations
    pub const DIM_ALPHA: f32 = 0.2;
}

/// Class names of the COCO dataset, in model index order
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Label used for class ids outside the label map
pub const UNKNOWN_LABEL: &str = "unknown";

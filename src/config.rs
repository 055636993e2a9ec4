// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::FacingMode;
use crate::constants::defaults;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Config directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "stockcam";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.json";

/// Size of the barcode scan region in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSize {
    pub width: u32,
    pub height: u32,
}

impl Default for RegionSize {
    fn default() -> Self {
        Self {
            width: defaults::REGION_WIDTH,
            height: defaults::REGION_HEIGHT,
        }
    }
}

/// Options captured when a session is constructed
///
/// Immutable for the lifetime of the session. Keys are camelCase so the
/// same JSON a browser caller would pass is accepted unchanged; unknown keys
/// are ignored and omitted keys take their documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureOptions {
    /// Target detection rate; the polling interval is `1000 / frame_rate` ms
    pub frame_rate: u32,
    /// Barcode scan region, centred in the frame
    pub detection_region_size: RegionSize,
    /// Aspect ratio requested from the camera
    pub aspect_ratio: f32,
    /// Inclusive confidence threshold
    pub confidence_threshold: f32,
    /// Maximum detections forwarded per frame
    pub max_detections: usize,
    /// Stop the session after the first frame with a qualifying detection
    pub auto_close_on_detection: bool,
}

/// Options of a barcode-scan session
pub type ScannerOptions = CaptureOptions;

/// Options of an object-detection session
pub type DetectorOptions = CaptureOptions;

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            frame_rate: defaults::FRAME_RATE,
            detection_region_size: RegionSize::default(),
            aspect_ratio: defaults::ASPECT_RATIO,
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            max_detections: defaults::MAX_DETECTIONS,
            auto_close_on_detection: defaults::AUTO_CLOSE_ON_DETECTION,
        }
    }
}

impl CaptureOptions {
    /// Return a copy with every field forced into its valid range
    pub fn validated(mut self) -> Self {
        self.frame_rate = self.frame_rate.clamp(1, defaults::MAX_FRAME_RATE);
        self.max_detections = self.max_detections.max(1);
        self.confidence_threshold = if self.confidence_threshold.is_nan() {
            defaults::CONFIDENCE_THRESHOLD
        } else {
            self.confidence_threshold.clamp(0.0, 1.0)
        };
        if !(self.aspect_ratio.is_finite() && self.aspect_ratio > 0.0) {
            self.aspect_ratio = defaults::ASPECT_RATIO;
        }
        self.detection_region_size.width = self.detection_region_size.width.max(1);
        self.detection_region_size.height = self.detection_region_size.height.max(1);
        self
    }

    /// Interval between detection loop iterations
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis((1000 / u64::from(self.frame_rate.max(1))).max(1))
    }

    /// Set the confidence threshold
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the per-frame detection cap
    pub fn with_max_detections(mut self, max: usize) -> Self {
        self.max_detections = max;
        self
    }

    /// Enable or disable auto-close
    pub fn with_auto_close(mut self, enabled: bool) -> Self {
        self.auto_close_on_detection = enabled;
        self
    }

    /// Set the target frame rate
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config format version
    pub version: u32,
    /// V4L2 device to open (first capture device when unset)
    pub camera_path: Option<String>,
    /// Camera facing requested from the platform
    pub facing_mode: FacingMode,
    /// Barcode scanner options
    pub scanner: ScannerOptions,
    /// Object detector options
    pub detector: DetectorOptions,
    /// First class id of the detection model's label map (0 or 1)
    pub label_index_base: usize,
    /// Where `detect --overlay` writes snapshots when no path is given
    pub overlay_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            camera_path: None,
            facing_mode: FacingMode::Environment,
            scanner: ScannerOptions::default(),
            detector: DetectorOptions::default(),
            label_index_base: 0,
            overlay_dir: None,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the config from its default location, falling back to defaults
    /// when the file does not exist
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load the config from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file missing, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&contents)?;
        config.scanner = config.scanner.validated();
        config.detector = config.detector.validated();

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Directory used for overlay snapshots
    pub fn overlay_dir(&self) -> PathBuf {
        self.overlay_dir.clone().unwrap_or_else(|| {
            dirs::picture_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
                .join(CONFIG_DIR_NAME)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omitted_options_take_defaults() {
        let options: CaptureOptions = serde_json::from_str(r#"{"maxDetections": 3}"#).unwrap();
        assert_eq!(options.max_detections, 3);
        assert_eq!(options.frame_rate, 10);
        assert_eq!(options.confidence_threshold, 0.5);
        assert!(!options.auto_close_on_detection);
    }

    #[test]
    fn test_unknown_options_are_ignored() {
        let options: CaptureOptions =
            serde_json::from_str(r#"{"fps": 60, "qrbox": 10, "confidenceThreshold": 0.7}"#)
                .unwrap();
        assert_eq!(options.frame_rate, 10);
        assert_eq!(options.confidence_threshold, 0.7);
    }

    #[test]
    fn test_validated_clamps_ranges() {
        let options = CaptureOptions {
            frame_rate: 0,
            confidence_threshold: 1.5,
            max_detections: 0,
            aspect_ratio: -2.0,
            ..CaptureOptions::default()
        }
        .validated();

        assert_eq!(options.frame_rate, 1);
        assert_eq!(options.confidence_threshold, 1.0);
        assert_eq!(options.max_detections, 1);
        assert_eq!(options.aspect_ratio, 1.0);
    }

    #[test]
    fn test_poll_interval_follows_frame_rate() {
        assert_eq!(
            CaptureOptions::default().poll_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(
            CaptureOptions::default().with_frame_rate(50).poll_interval(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_frame_rate_upper_bound() {
        let options = CaptureOptions::default().with_frame_rate(2000).validated();
        assert_eq!(options.frame_rate, defaults::MAX_FRAME_RATE);
        assert_eq!(options.poll_interval(), Duration::from_millis(1));

        // Unvalidated options still never yield a zero period
        let raw = CaptureOptions::default().with_frame_rate(u32::MAX);
        assert_eq!(raw.poll_interval(), Duration::from_millis(1));
    }
}

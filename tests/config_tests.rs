// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use stockcam::Config;
use stockcam::backends::camera::FacingMode;
use stockcam::config::CaptureOptions;

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = Config::default();

    // Check sensible defaults
    assert_eq!(config.facing_mode, FacingMode::Environment);
    assert_eq!(config.scanner, CaptureOptions::default());
    assert_eq!(config.label_index_base, 0);
    assert!(config.camera_path.is_none());
}

#[test]
fn test_config_round_trip_through_file() {
    let dir = std::env::temp_dir().join(format!("stockcam-config-{}", std::process::id()));
    let path = dir.join("config.json");

    let mut config = Config::default();
    config.camera_path = Some("/dev/video2".to_string());
    config.detector = config.detector.with_confidence_threshold(0.65);
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_missing_file_gives_defaults() {
    let path = std::env::temp_dir().join("stockcam-does-not-exist/config.json");
    assert_eq!(Config::load_from(&path).unwrap(), Config::default());
}

#[test]
fn test_loaded_options_are_validated() {
    let dir = std::env::temp_dir().join(format!("stockcam-invalid-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(
        &path,
        r#"{"detector": {"confidenceThreshold": 4.0, "frameRate": 0}, "unknownKey": true}"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.detector.confidence_threshold, 1.0);
    assert_eq!(config.detector.frame_rate, 1);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_malformed_file_is_parse_error() {
    let dir = std::env::temp_dir().join(format!("stockcam-malformed-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Config::load_from(&path),
        Err(stockcam::ConfigError::Parse(_))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

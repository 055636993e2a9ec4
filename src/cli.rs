// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for capture sessions
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Scanning a barcode and looking up the product
//! - Running object detection from recorded model outputs
//! - Showing the effective configuration

use chrono::Local;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stockcam::backends::camera::enumerate_cameras;
use stockcam::detection::Detection;
use stockcam::entry::{CatalogLookup, ProductDraft, ProductLookup};
use stockcam::{
    CaptureSession, Config, LabelMap, MediaDevices, Platform, RecordedModel, SessionCallbacks,
    SessionError, SurfaceHost, V4l2Devices, VirtualCamera,
};
use tokio::sync::mpsc;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Mount point the CLI binds its session to
const MOUNT_ID: &str = "preview";

/// Notifications forwarded from session callbacks
enum SessionEvent {
    Result {
        detections: Vec<Detection>,
        overlay: Option<image::RgbaImage>,
    },
    Closed,
    Failed(SessionError),
}

/// Arguments of the `detect` command
pub struct DetectArgs {
    pub replay: PathBuf,
    pub camera: Option<String>,
    pub image: Option<PathBuf>,
    pub threshold: Option<f32>,
    pub max: Option<usize>,
    pub auto_close: bool,
    /// `Some(None)` writes into the configured overlay directory
    pub overlay: Option<Option<PathBuf>>,
}

/// Run `future` on a fresh multi-threaded runtime
pub fn block_on<F>(future: F) -> CliResult
where
    F: Future<Output = CliResult>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Print the config location and effective settings
pub fn show_config(path: Option<&Path>, config: &Config) -> CliResult {
    match path.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) => {
            let state = if path.exists() { "" } else { " (not created yet)" };
            println!("Config file: {}{}", path.display(), state);
        }
        None => println!("Config file: none (no config directory on this platform)"),
    }
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// List all available cameras
pub fn list_cameras() -> CliResult {
    let cameras = enumerate_cameras();

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  {} {}", camera.path, camera.name);
        println!("      Driver: {} ({})", camera.driver, camera.card);
        println!();
    }

    Ok(())
}

fn media_for(
    config: &Config,
    camera: Option<String>,
    image: Option<&Path>,
) -> Result<Arc<dyn MediaDevices>, Box<dyn std::error::Error>> {
    if let Some(path) = image {
        println!("Using image: {}", path.display());
        return Ok(Arc::new(VirtualCamera::from_image(path)?));
    }

    let path = camera.or_else(|| config.camera_path.clone());
    println!("Using camera: {}", path.as_deref().unwrap_or("first available"));
    Ok(Arc::new(V4l2Devices::new(path)))
}

fn event_callbacks(
    events: mpsc::UnboundedSender<SessionEvent>,
    host: Option<SurfaceHost>,
) -> SessionCallbacks {
    let results = events.clone();
    let closed = events.clone();
    SessionCallbacks::new()
        .on_result(move |detections| {
            let overlay = host.as_ref().and_then(|h| h.overlay_snapshot(MOUNT_ID));
            let _ = results.send(SessionEvent::Result {
                detections: detections.to_vec(),
                overlay,
            });
        })
        .on_closed(move || {
            let _ = closed.send(SessionEvent::Closed);
        })
        .on_error(move |e| {
            let _ = events.send(SessionEvent::Failed(e.clone()));
        })
}

/// Error reported right after a close, if the close was a failure
async fn trailing_failure(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Option<SessionError> {
    match tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        Ok(Some(SessionEvent::Failed(e))) => Some(e),
        _ => None,
    }
}

/// Stop `session` on Ctrl+C
fn stop_on_interrupt(session: &CaptureSession) -> CliResult {
    let weak = session.downgrade();
    ctrlc::set_handler(move || {
        if let Some(session) = weak.upgrade() {
            session.stop();
        }
    })?;
    Ok(())
}

/// Scan one barcode and print the resulting product draft
pub async fn scan(
    config: &Config,
    camera: Option<String>,
    image: Option<PathBuf>,
    catalog: Option<PathBuf>,
) -> CliResult {
    let lookup = match catalog {
        Some(path) => CatalogLookup::load(&path)?,
        None => CatalogLookup::default(),
    };

    let host = SurfaceHost::new();
    host.register_mount(MOUNT_ID);
    let platform = Platform::new(media_for(config, camera, image.as_deref())?, host);

    let (sender, mut events) = mpsc::unbounded_channel();
    let session = CaptureSession::barcode(
        MOUNT_ID,
        config.scanner.clone(),
        event_callbacks(sender, None),
        platform,
    );
    stop_on_interrupt(&session)?;

    session.start().await?;
    println!("Scanning... (press Ctrl+C to stop)");

    let mut code = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Result { detections, .. } => {
                code = detections.first().map(|d| d.label.clone());
            }
            SessionEvent::Closed => {
                if let Some(e) = trailing_failure(&mut events).await {
                    return Err(e.into());
                }
                break;
            }
            SessionEvent::Failed(e) => return Err(e.into()),
        }
    }

    let Some(code) = code else {
        println!("No barcode scanned.");
        return Ok(());
    };
    println!("Scanned barcode: {}", code);

    let mut draft = ProductDraft::default();
    match lookup.by_barcode(&code).await {
        Ok(info) => {
            println!("Product information loaded");
            draft.apply_scan(&code, Some(&info));
        }
        Err(e) if e.is_not_found() => {
            println!("No product information found. Using barcode as reference.");
            draft.apply_scan(&code, None);
        }
        Err(e) => return Err(e.into()),
    }

    println!();
    println!("{}", serde_json::to_string_pretty(&draft)?);
    Ok(())
}

/// Run object detection until closed or interrupted
pub async fn detect(config: &Config, args: DetectArgs) -> CliResult {
    let model = Arc::new(RecordedModel::load(&args.replay)?);
    let labels = LabelMap::coco().with_base(config.label_index_base);

    let mut options = config.detector.clone();
    if let Some(threshold) = args.threshold {
        options.confidence_threshold = threshold;
    }
    if let Some(max) = args.max {
        options.max_detections = max;
    }
    options.auto_close_on_detection |= args.auto_close;

    let host = SurfaceHost::new();
    host.register_mount(MOUNT_ID);
    let media = media_for(config, args.camera, args.image.as_deref())?;
    let platform = Platform::new(media, host.clone());

    let (sender, mut events) = mpsc::unbounded_channel();
    let snapshot_host = args.overlay.is_some().then(|| host.clone());
    let session = CaptureSession::object_detection(
        MOUNT_ID,
        model,
        labels,
        options,
        event_callbacks(sender, snapshot_host),
        platform,
    );
    stop_on_interrupt(&session)?;

    session.start().await?;
    println!("Detecting... (press Ctrl+C to stop)");

    let mut last_overlay = None;
    let mut failure = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Result {
                detections,
                overlay,
            } => {
                let timestamp = Local::now().format("%H:%M:%S%.3f");
                let summary: Vec<String> = detections.iter().map(ToString::to_string).collect();
                println!("[{}] {}", timestamp, summary.join(", "));
                if overlay.is_some() {
                    last_overlay = overlay;
                }
            }
            SessionEvent::Closed => {
                failure = trailing_failure(&mut events).await;
                break;
            }
            SessionEvent::Failed(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    if let Some(target) = args.overlay {
        match last_overlay {
            Some(overlay) => {
                let path = target.unwrap_or_else(|| {
                    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
                    config
                        .overlay_dir()
                        .join(format!("overlay_{}.png", timestamp))
                });
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                overlay.save(&path)?;
                println!("Overlay saved: {}", path.display());
            }
            None => println!("No detections, overlay not saved."),
        }
    }

    if let Some(e) = failure {
        eprintln!("{}", e.user_message());
        return Err(e.into());
    }
    Ok(())
}

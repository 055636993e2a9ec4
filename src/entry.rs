// SPDX-License-Identifier: GPL-3.0-only

//! Smart-entry assist for the product form
//!
//! Couples a barcode scanner and an object detector sharing one mount point
//! to a [`ProductDraft`]. A scanned code is looked up through a
//! [`ProductLookup`] and its catalog data fills the draft; a detection sets
//! the detected object and, when the form has no name yet, names the
//! product after it. Only one of the two sessions runs at a time.

use crate::config::Config;
use crate::detection::{BackendKind, Detection, DetectionBackend};
use crate::errors::{ApiError, ConfigError, SessionResult};
use crate::session::{CaptureSession, Platform, SessionCallbacks};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Form state being filled by the smart-entry tools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductDraft {
    pub barcode: String,
    pub product_name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub detected_object: String,
}

impl ProductDraft {
    /// Record a scanned code and, when found, its catalog data
    pub fn apply_scan(&mut self, code: &str, info: Option<&ProductInfo>) {
        self.barcode = code.to_string();
        let Some(info) = info else {
            return;
        };

        self.product_name = if info.name.is_empty() {
            code.to_string()
        } else {
            info.name.clone()
        };
        self.description = info.description.clone();
        self.price = info.price;
        if let Some(category) = info.category.as_ref().filter(|c| !c.is_empty()) {
            self.category = category.clone();
        }
    }

    /// Take the highest-scoring detection as the detected object
    ///
    /// Returns the label used, if any.
    pub fn apply_detections(&mut self, detections: &[Detection]) -> Option<String> {
        let top = detections
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        self.detected_object = top.label.clone();
        if self.product_name.is_empty() {
            self.product_name = capitalize(&top.label);
        }
        Some(top.label.clone())
    }

    /// Fill fields the user has not entered yet from a catalog match
    pub fn apply_product(&mut self, info: &ProductInfo) {
        if self.product_name.is_empty() {
            self.product_name = info.name.clone();
        }
        if self.description.is_empty() {
            self.description = info.description.clone();
        }
        if self.price == 0.0 {
            self.price = info.price;
        }
        if self.barcode.is_empty() {
            if let Some(barcode) = &info.barcode {
                self.barcode = barcode.clone();
            }
        }
        if self.category.is_empty() {
            if let Some(category) = &info.category {
                self.category = category.clone();
            }
        }
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Catalog entry returned by a product lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductInfo {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: Option<String>,
    pub barcode: Option<String>,
    /// Detector class this product is recognised as
    pub object_name: Option<String>,
}

/// Product lookups behind `GET /api/products/barcode/{code}` and
/// `GET /api/products/object/{className}`
pub trait ProductLookup: Send + Sync {
    fn by_barcode<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<ProductInfo, ApiError>>;

    fn by_object<'a>(
        &'a self,
        class_name: &'a str,
    ) -> BoxFuture<'a, Result<ProductInfo, ApiError>>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Decode a REST response
///
/// 2xx bodies are either the payload itself or a `{data: ...}` envelope;
/// any other status carries `{error: message}`.
pub fn parse_api_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ApiError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    "request failed".to_string()
                } else {
                    trimmed.to_string()
                }
            });
        return Err(ApiError::Status { status, message });
    }

    let mut value: serde_json::Value = serde_json::from_str(body)?;
    if let Some(data) = value.get_mut("data") {
        return Ok(serde_json::from_value(data.take())?);
    }
    Ok(serde_json::from_value(value)?)
}

/// In-memory catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogLookup {
    products: Vec<ProductInfo>,
}

impl CatalogLookup {
    pub fn new(products: Vec<ProductInfo>) -> Self {
        Self { products }
    }

    /// Parse a JSON array of products
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let catalog = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), products = catalog.len(), "Loaded product catalog");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn find_barcode(&self, code: &str) -> Option<&ProductInfo> {
        self.products
            .iter()
            .find(|p| p.barcode.as_deref() == Some(code))
    }

    fn find_object(&self, class_name: &str) -> Option<&ProductInfo> {
        let needle = class_name.to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.products.iter().find(|p| {
            p.object_name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&needle))
        })
    }
}

impl ProductLookup for CatalogLookup {
    fn by_barcode<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<ProductInfo, ApiError>> {
        let found = self.find_barcode(code).cloned();
        Box::pin(async move { found.ok_or_else(|| ApiError::not_found("Product not found")) })
    }

    fn by_object<'a>(
        &'a self,
        class_name: &'a str,
    ) -> BoxFuture<'a, Result<ProductInfo, ApiError>> {
        let found = self.find_object(class_name).cloned();
        Box::pin(async move { found.ok_or_else(|| ApiError::not_found("Product not found")) })
    }
}

/// Scanner and detector over one mount point, feeding one draft
pub struct EntryAssist {
    scanner: CaptureSession,
    detector: CaptureSession,
    draft: Arc<watch::Sender<ProductDraft>>,
    lookup: Arc<dyn ProductLookup>,
}

impl EntryAssist {
    pub fn new(
        mount_id: &str,
        scanner: Arc<dyn DetectionBackend>,
        detector: Arc<dyn DetectionBackend>,
        config: &Config,
        lookup: Arc<dyn ProductLookup>,
        platform: Platform,
    ) -> Self {
        let draft = Arc::new(watch::Sender::new(ProductDraft::default()));

        let scan_draft = Arc::clone(&draft);
        let scan_lookup = Arc::clone(&lookup);
        let scanner_callbacks = SessionCallbacks::new()
            .on_result(move |detections| {
                let Some(code) = detections.first().map(|d| d.label.clone()) else {
                    return;
                };
                info!(code = %code, "Scanned barcode");
                spawn_barcode_lookup(code, Arc::clone(&scan_draft), Arc::clone(&scan_lookup));
            })
            .on_error(|e| warn!(error = %e, "Barcode scanner failed"));

        let detect_draft = Arc::clone(&draft);
        let detector_callbacks = SessionCallbacks::new()
            .on_result(move |detections| {
                detect_draft.send_modify(|d| {
                    if let Some(label) = d.apply_detections(detections) {
                        debug!(label = %label, "Detected object");
                    }
                });
            })
            .on_error(|e| warn!(error = %e, "Object detector failed"));

        Self {
            scanner: CaptureSession::new(
                mount_id,
                scanner,
                config.scanner.clone(),
                scanner_callbacks,
                platform.clone(),
            ),
            detector: CaptureSession::new(
                mount_id,
                detector,
                config.detector.clone(),
                detector_callbacks,
                platform,
            ),
            draft,
            lookup,
        }
    }

    pub fn scanner(&self) -> &CaptureSession {
        &self.scanner
    }

    pub fn detector(&self) -> &CaptureSession {
        &self.detector
    }

    /// Stop the detector, then start the scanner
    pub async fn start_scanner(&self) -> SessionResult<()> {
        self.detector.stop();
        self.scanner.start().await
    }

    /// Stop the scanner, then start the detector
    pub async fn start_detector(&self) -> SessionResult<()> {
        self.scanner.stop();
        self.detector.start().await
    }

    /// Start the detector if it is idle, stop it otherwise
    ///
    /// Returns whether the detector is now running.
    pub async fn toggle_detector(&self) -> SessionResult<bool> {
        if self.detector.state().is_running() {
            self.detector.stop();
            return Ok(false);
        }
        self.start_detector().await?;
        Ok(true)
    }

    pub fn stop_all(&self) {
        self.scanner.stop();
        self.detector.stop();
    }

    /// Which tool currently holds the camera
    pub fn active(&self) -> Option<BackendKind> {
        if self.scanner.state().is_running() {
            Some(BackendKind::Scan)
        } else if self.detector.state().is_running() {
            Some(BackendKind::Detect)
        } else {
            None
        }
    }

    pub fn draft(&self) -> ProductDraft {
        self.draft.borrow().clone()
    }

    /// Receiver notified after every draft change
    pub fn subscribe(&self) -> watch::Receiver<ProductDraft> {
        self.draft.subscribe()
    }

    /// Look up the detected object and fill empty draft fields from it
    pub async fn lookup_detected(&self) -> Result<ProductInfo, ApiError> {
        let object = self.draft.borrow().detected_object.clone();
        if object.is_empty() {
            return Err(ApiError::not_found("No object detected"));
        }

        let info = self.lookup.by_object(&object).await?;
        self.draft.send_modify(|d| d.apply_product(&info));
        Ok(info)
    }
}

impl Drop for EntryAssist {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn spawn_barcode_lookup(
    code: String,
    draft: Arc<watch::Sender<ProductDraft>>,
    lookup: Arc<dyn ProductLookup>,
) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(code = %code, "No runtime for product lookup, recording code only");
        draft.send_modify(|d| d.apply_scan(&code, None));
        return;
    };

    runtime.spawn(async move {
        let info = match lookup.by_barcode(&code).await {
            Ok(info) => {
                info!(code = %code, name = %info.name, "Product information loaded");
                Some(info)
            }
            Err(e) if e.is_not_found() => {
                info!(code = %code, "No product information found, using barcode as reference");
                None
            }
            Err(e) => {
                warn!(code = %code, error = %e, "Barcode lookup failed");
                None
            }
        };
        draft.send_modify(|d| d.apply_scan(&code, info.as_ref()));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection::new(
            label,
            confidence,
            BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
        )
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("cup"), "Cup");
        assert_eq!(capitalize("wine glass"), "Wine glass");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_detection_names_empty_product() {
        let mut draft = ProductDraft::default();
        let label = draft.apply_detections(&[detection("bottle", 0.7), detection("cup", 0.9)]);
        assert_eq!(label.as_deref(), Some("cup"));
        assert_eq!(draft.detected_object, "cup");
        assert_eq!(draft.product_name, "Cup");
    }

    #[test]
    fn test_detection_keeps_entered_name() {
        let mut draft = ProductDraft {
            product_name: "Travel mug".to_string(),
            ..ProductDraft::default()
        };
        draft.apply_detections(&[detection("cup", 0.9)]);
        assert_eq!(draft.product_name, "Travel mug");
        assert!(draft.apply_detections(&[]).is_none());
    }

    #[test]
    fn test_scan_without_name_uses_code() {
        let mut draft = ProductDraft::default();
        let info = ProductInfo {
            price: 4.5,
            ..ProductInfo::default()
        };
        draft.apply_scan("0123", Some(&info));
        assert_eq!(draft.product_name, "0123");
        assert_eq!(draft.price, 4.5);
    }

    #[test]
    fn test_error_envelope() {
        let err = parse_api_response::<ProductInfo>(404, r#"{"error": "Product not found"}"#)
            .unwrap_err();
        assert!(err.is_not_found());

        let err = parse_api_response::<ProductInfo>(500, "").unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 500,
                message: "request failed".to_string()
            }
        );
    }

    #[test]
    fn test_data_envelope_and_bare_payload() {
        let wrapped: ProductInfo =
            parse_api_response(200, r#"{"data": {"name": "Shaker", "price": 14.99}}"#).unwrap();
        let bare: ProductInfo = parse_api_response(200, r#"{"name": "Shaker", "price": 14.99}"#)
            .unwrap();
        assert_eq!(wrapped, bare);
        assert!(matches!(
            parse_api_response::<ProductInfo>(200, "not json"),
            Err(ApiError::Parse(_))
        ));
    }
}

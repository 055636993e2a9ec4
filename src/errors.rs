// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture sessions
//!
//! Every failure a session can report crosses the component boundary as one
//! of these values, either returned from [`CaptureSession::start`] or passed
//! to the session's error callback. Nothing here is raised as a panic.
//!
//! [`CaptureSession::start`]: crate::session::CaptureSession::start

use crate::session::SessionState;
use std::fmt;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Failure to obtain a camera stream from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The user or the OS refused camera access
    PermissionDenied,
    /// No usable camera, or the camera is held by someone else
    DeviceUnavailable(String),
}

/// Errors reported by a capture session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Camera permission was denied
    PermissionDenied,
    /// Camera missing, busy or failed to deliver frames
    DeviceUnavailable(String),
    /// The decoding/inference backend failed while the loop was running
    Inference(String),
    /// The mount point the session is bound to does not exist
    MountNotFound(String),
    /// `start()` called on a session that is not idle
    AlreadyRunning(SessionState),
    /// Operation requires an active session
    NotActive,
    /// `stop()` was called while `start()` was still pending
    Cancelled,
}

/// Stable, payload-free name for a [`SessionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    Inference,
    MountNotFound,
    AlreadyRunning,
    NotActive,
    Cancelled,
}

impl SessionError {
    /// Get the error kind without its payload
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            SessionError::PermissionDenied => SessionErrorKind::PermissionDenied,
            SessionError::DeviceUnavailable(_) => SessionErrorKind::DeviceUnavailable,
            SessionError::Inference(_) => SessionErrorKind::Inference,
            SessionError::MountNotFound(_) => SessionErrorKind::MountNotFound,
            SessionError::AlreadyRunning(_) => SessionErrorKind::AlreadyRunning,
            SessionError::NotActive => SessionErrorKind::NotActive,
            SessionError::Cancelled => SessionErrorKind::Cancelled,
        }
    }

    /// True for failures of the Media Acquirer
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied | SessionError::DeviceUnavailable(_)
        )
    }

    /// Short user-facing hint, matching what the product form shows
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied => "Camera access denied. Please enable permissions.",
            SessionError::DeviceUnavailable(_) => "Camera unavailable. Check device support.",
            SessionError::Inference(_) => "Object detection failed. Check device support.",
            SessionError::MountNotFound(_) => "Camera view is not available on this page.",
            SessionError::AlreadyRunning(_) => "The camera is already running.",
            SessionError::NotActive => "The camera is not running.",
            SessionError::Cancelled => "Camera start was cancelled.",
        }
    }
}

/// Configuration file errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Reading or writing the file failed
    Io(String),
    /// The file is not valid JSON for [`crate::config::Config`]
    Parse(String),
}

/// Failure reported by a product lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Non-2xx response, with the `{error}` message of its body
    Status { status: u16, message: String },
    /// The response body did not match the expected shape
    Parse(String),
    /// The lookup service could not be reached
    Unavailable(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Status {
            status: 404,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::PermissionDenied => write!(f, "Camera permission denied"),
            AcquireError::DeviceUnavailable(msg) => write!(f, "Camera unavailable: {}", msg),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::PermissionDenied => write!(f, "Camera permission denied"),
            SessionError::DeviceUnavailable(msg) => write!(f, "Camera unavailable: {}", msg),
            SessionError::Inference(msg) => write!(f, "Inference failed: {}", msg),
            SessionError::MountNotFound(id) => write!(f, "Mount point '{}' not found", id),
            SessionError::AlreadyRunning(state) => {
                write!(f, "Session already running (state: {})", state)
            }
            SessionError::NotActive => write!(f, "Session is not active"),
            SessionError::Cancelled => write!(f, "Session start cancelled"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Configuration I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Configuration parse error: {}", msg),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Status { status, message } => write!(f, "HTTP {}: {}", status, message),
            ApiError::Parse(msg) => write!(f, "Malformed response: {}", msg),
            ApiError::Unavailable(msg) => write!(f, "Lookup unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AcquireError {}
impl std::error::Error for ApiError {}
impl std::error::Error for SessionError {}
impl std::error::Error for ConfigError {}

impl From<AcquireError> for SessionError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::PermissionDenied => SessionError::PermissionDenied,
            AcquireError::DeviceUnavailable(msg) => SessionError::DeviceUnavailable(msg),
        }
    }
}

impl From<std::io::Error> for AcquireError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => AcquireError::PermissionDenied,
            std::io::ErrorKind::NotFound => {
                AcquireError::DeviceUnavailable(format!("device not found: {}", err))
            }
            std::io::ErrorKind::ResourceBusy => {
                AcquireError::DeviceUnavailable(format!("device busy: {}", err))
            }
            _ => AcquireError::DeviceUnavailable(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_error_maps_to_session_error() {
        assert_eq!(
            SessionError::from(AcquireError::PermissionDenied),
            SessionError::PermissionDenied
        );
        let err = SessionError::from(AcquireError::DeviceUnavailable("busy".into()));
        assert_eq!(err.kind(), SessionErrorKind::DeviceUnavailable);
        assert!(err.is_acquisition());
    }

    #[test]
    fn test_io_permission_error_is_permission_denied() {
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(AcquireError::from(io), AcquireError::PermissionDenied);
    }

    #[test]
    fn test_io_other_error_is_device_unavailable() {
        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            AcquireError::from(io),
            AcquireError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn test_api_not_found() {
        let err = ApiError::not_found("Product not found");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "HTTP 404: Product not found");
        assert!(!ApiError::Parse("eof".into()).is_not_found());
    }

    #[test]
    fn test_inference_error_is_not_acquisition() {
        assert!(!SessionError::Inference("boom".into()).is_acquisition());
        assert!(!SessionError::MountNotFound("scanner".into()).is_acquisition());
    }
}

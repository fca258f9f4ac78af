//! Error types for the capture pipeline
//!
//! Each stage of the pipeline has its own error enum so callers can tell a
//! recoverable per-frame failure from one that ends a session. Every error
//! exposes a stable machine-readable `kind()` and an actionable
//! `remediation_hint()`, and converts into an [`ErrorPayload`] for tool
//! responses.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Result type alias for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Shared behaviour of every error in the taxonomy
pub trait Remediable: std::fmt::Display {
    /// Stable, machine-readable error kind (e.g. `"TargetUnavailable"`)
    fn kind(&self) -> &'static str;

    /// Actionable next step for the user
    fn remediation_hint(&self) -> &str;

    /// Converts the error into a serializable payload
    fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind:    self.kind().to_string(),
            message: self.to_string(),
            hint:    self.remediation_hint().to_string(),
        }
    }
}

/// Structured error returned to tool callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorPayload {
    /// Machine-readable kind
    pub kind:    String,
    /// Human-readable message
    pub message: String,
    /// Suggested remediation
    pub hint:    String,
}

/// Failure modes reported by the window-system collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum WindowSystemError {
    /// No usable display server connection
    #[error("Window system unavailable: {reason}")]
    Unavailable {
        /// Why the connection could not be used
        reason: String,
    },

    /// The display server refused the request
    #[error("Window system denied access: {reason}")]
    PermissionDenied {
        /// Server-provided reason
        reason: String,
    },

    /// The window disappeared between listing and use
    #[error("Window {id} no longer exists")]
    WindowGone {
        /// Window id that vanished
        id: String,
    },

    /// The operation did not complete in time
    #[error("Window system operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    /// Synthetic key event could not be delivered
    #[error("Failed to send key '{key}': {reason}")]
    KeySendFailed {
        /// Key name (xdotool syntax)
        key:    String,
        /// Reason for the failure
        reason: String,
    },
}

impl Remediable for WindowSystemError {
    fn kind(&self) -> &'static str {
        match self {
            WindowSystemError::Unavailable { .. } => "WindowSystemUnavailable",
            WindowSystemError::PermissionDenied { .. } => "PermissionDenied",
            WindowSystemError::WindowGone { .. } => "WindowGone",
            WindowSystemError::Timeout { .. } => "Timeout",
            WindowSystemError::KeySendFailed { .. } => "KeySendFailed",
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            WindowSystemError::Unavailable { .. } => {
                "Ensure an X11 session is running and the DISPLAY environment variable points at \
                 it. Under Wayland, run the target application through XWayland."
            }
            WindowSystemError::PermissionDenied { .. } => {
                "The X server rejected the request. Check xhost/xauth settings if running in a \
                 restricted environment."
            }
            WindowSystemError::WindowGone { .. } => {
                "The window was closed. Use list_windows to pick a live window, or capture the \
                 full screen instead."
            }
            WindowSystemError::Timeout { .. } => {
                "The X server did not answer in time. Check that the display is responsive and \
                 retry."
            }
            WindowSystemError::KeySendFailed { .. } => {
                "Install xdotool to let sessions advance pages automatically, or advance pages \
                 manually while the session runs."
            }
        }
    }
}

/// Target resolution failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    /// No window title matched the query
    #[error("No window matches '{query}' ({searched} windows searched)")]
    NotFound {
        /// The natural-language query
        query:    String,
        /// How many windows were inspected
        searched: usize,
    },

    /// The query itself is unusable
    #[error("Invalid window query: {reason}")]
    InvalidQuery {
        /// Why the query was rejected
        reason: String,
    },

    /// Listing windows failed
    #[error(transparent)]
    WindowSystem(#[from] WindowSystemError),
}

impl Remediable for ResolutionError {
    fn kind(&self) -> &'static str {
        match self {
            ResolutionError::NotFound { .. } => "NotFound",
            ResolutionError::InvalidQuery { .. } => "InvalidQuery",
            ResolutionError::WindowSystem(e) => e.kind(),
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            ResolutionError::NotFound { .. } => {
                "Use the list_windows tool to see available windows. Window titles change often \
                 (browser tabs, document names); try a shorter substring or capture the full \
                 screen."
            }
            ResolutionError::InvalidQuery { .. } => {
                "Provide a non-empty window title substring, a valid regex, or a window id from \
                 list_windows."
            }
            ResolutionError::WindowSystem(e) => e.remediation_hint(),
        }
    }
}

/// Failures of a single capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The target could not be captured right now (closed, minimised, slow)
    #[error("Capture target {target} unavailable: {reason}")]
    TargetUnavailable {
        /// Description of the target
        target: String,
        /// Underlying reason
        reason: String,
    },

    /// The frame could not be written to disk
    #[error("Failed to write frame to {}: {source}", path.display())]
    WriteFailure {
        /// Destination path
        path:   PathBuf,
        /// I/O error
        source: std::io::Error,
    },

    /// Image encoding failed
    #[error("Failed to encode image as {format}: {reason}")]
    EncodingFailed {
        /// Image format that failed
        format: String,
        /// Reason for encoding failure
        reason: String,
    },

    /// A required external tool or service is missing
    #[error("Required dependency '{dependency}' is missing")]
    DependencyMissing {
        /// Name of the missing dependency
        dependency: String,
    },

    /// Fatal window-system failure
    #[error(transparent)]
    WindowSystem(WindowSystemError),
}

impl CaptureError {
    /// Maps a collaborator error into the capture taxonomy
    ///
    /// Vanished windows and timeouts are treated as a transient unavailability
    /// of the target; everything else is fatal for the session.
    pub fn from_window_system(target: impl Into<String>, err: WindowSystemError) -> Self {
        match err {
            WindowSystemError::WindowGone { .. } | WindowSystemError::Timeout { .. } => {
                CaptureError::TargetUnavailable {
                    target: target.into(),
                    reason: err.to_string(),
                }
            }
            other => CaptureError::WindowSystem(other),
        }
    }

    /// Whether a session may retry after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::TargetUnavailable { .. })
    }
}

impl Remediable for CaptureError {
    fn kind(&self) -> &'static str {
        match self {
            CaptureError::TargetUnavailable { .. } => "TargetUnavailable",
            CaptureError::WriteFailure { .. } => "WriteFailure",
            CaptureError::EncodingFailed { .. } => "EncodingFailed",
            CaptureError::DependencyMissing { .. } => "DependencyMissing",
            CaptureError::WindowSystem(e) => e.kind(),
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            CaptureError::TargetUnavailable { .. } => {
                "The window could not be captured. Make sure it is open and not minimised, or \
                 fall back to full-screen capture."
            }
            CaptureError::WriteFailure { .. } => {
                "Check that the temp and output directories exist, are writable, and that the \
                 disk is not full. Set AUTO_SNAP_TEMP_DIR to a writable location."
            }
            CaptureError::EncodingFailed { format, .. } => match format.as_str() {
                "jpeg" | "jpg" => "JPEG encoding failed. Try PNG format instead.",
                _ => "Image encoding failed. Try a different image format.",
            },
            CaptureError::DependencyMissing { dependency } => match dependency.as_str() {
                "tesseract" => {
                    "Install Tesseract OCR (e.g. `sudo apt install tesseract-ocr`) to enable text \
                     extraction."
                }
                "xdotool" => "Install xdotool (e.g. `sudo apt install xdotool`).",
                _ => {
                    "Start an X11 session (DISPLAY must be set) so windows can be listed and \
                     captured."
                }
            },
            CaptureError::WindowSystem(e) => e.remediation_hint(),
        }
    }
}

/// OCR failures; always recoverable per frame
#[derive(Debug, Clone, thiserror::Error)]
pub enum OcrError {
    /// The requested language pack is not installed
    #[error("OCR language '{language}' is not installed (available: {})", available.join(", "))]
    LanguageUnavailable {
        /// Requested language code
        language:  String,
        /// Installed language codes
        available: Vec<String>,
    },

    /// The engine failed or timed out
    #[error("OCR engine failed: {reason}")]
    EngineFailure {
        /// Reason for the failure
        reason: String,
    },
}

impl Remediable for OcrError {
    fn kind(&self) -> &'static str {
        match self {
            OcrError::LanguageUnavailable { .. } => "LanguageUnavailable",
            OcrError::EngineFailure { .. } => "EngineFailure",
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            OcrError::LanguageUnavailable { .. } => {
                "Install the language pack (e.g. `sudo apt install tesseract-ocr-deu`) or pick one \
                 of the available languages."
            }
            OcrError::EngineFailure { .. } => {
                "Check that tesseract is installed and on PATH. Try enhancing the image first or \
                 raising AUTO_SNAP_OCR_TIMEOUT_SECS."
            }
        }
    }
}

/// Image enhancement failures
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// The source image could not be decoded
    #[error("Failed to decode {}: {reason}", path.display())]
    Decode {
        /// Source image
        path:   PathBuf,
        /// Decoder message
        reason: String,
    },

    /// The derived image could not be written
    #[error("Failed to write {}: {reason}", path.display())]
    Write {
        /// Destination image
        path:   PathBuf,
        /// Encoder or I/O message
        reason: String,
    },
}

impl Remediable for ProcessingError {
    fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Decode { .. } => "DecodeFailure",
            ProcessingError::Write { .. } => "WriteFailure",
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            ProcessingError::Decode { .. } => {
                "The image file is missing or corrupt. Re-capture the page."
            }
            ProcessingError::Write { .. } => {
                "Check that the directory next to the source image is writable."
            }
        }
    }
}

/// Output naming failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum NamingError {
    /// Target exists and the collision policy forbids suffixing
    #[error("Output path {} already exists", path.display())]
    Collision {
        /// The conflicting path
        path: PathBuf,
    },
}

impl Remediable for NamingError {
    fn kind(&self) -> &'static str {
        "PathExists"
    }

    fn remediation_hint(&self) -> &str {
        "Choose a different output name, include {timestamp} in the template, or set \
         AUTO_SNAP_COLLISION_POLICY=suffix."
    }
}

/// PDF assembly failures
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// Nothing to assemble
    #[error("No pages to assemble into a PDF")]
    NoPages,

    /// A page image could not be loaded
    #[error("Failed to load page image {}: {reason}", path.display())]
    ImageLoad {
        /// Image path
        path:   PathBuf,
        /// Decoder or I/O message
        reason: String,
    },

    /// The output path is taken
    #[error(transparent)]
    OutputExists(#[from] NamingError),

    /// The PDF writer failed
    #[error("Failed to build PDF: {reason}")]
    Pdf {
        /// Writer message
        reason: String,
    },

    /// Output could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Remediable for AssemblyError {
    fn kind(&self) -> &'static str {
        match self {
            AssemblyError::NoPages => "NoPages",
            AssemblyError::ImageLoad { .. } => "ImageLoad",
            AssemblyError::OutputExists(_) => "OutputExists",
            AssemblyError::Pdf { .. } => "PdfFailure",
            AssemblyError::Io(_) => "Io",
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            AssemblyError::NoPages => {
                "The session accepted no frames. Check session_status for warnings and make sure \
                 the window shows content before starting."
            }
            AssemblyError::ImageLoad { .. } => {
                "A staged frame was removed or corrupted. Do not clean the temp directory while a \
                 session is being assembled."
            }
            AssemblyError::OutputExists(e) => e.remediation_hint(),
            AssemblyError::Pdf { .. } => "PDF generation failed. Retry with compression disabled.",
            AssemblyError::Io(_) => {
                "An I/O error occurred. Check file permissions and disk space in the output \
                 directory."
            }
        }
    }
}

/// Problems with caller-supplied image files or directories
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The file name pattern does not compile
    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern as given
        pattern: String,
        /// Parser message
        reason:  String,
    },

    /// The image directory cannot be listed
    #[error("Cannot read image directory {}: {source}", path.display())]
    DirectoryUnreadable {
        /// Directory path
        path:   PathBuf,
        /// I/O error
        source: std::io::Error,
    },

    /// Every candidate image was rejected, or there were none
    #[error("No valid images found ({rejected} rejected)")]
    NoValidImages {
        /// How many files were skipped
        rejected: usize,
    },
}

impl Remediable for InputError {
    fn kind(&self) -> &'static str {
        match self {
            InputError::InvalidPattern { .. } => "InvalidPattern",
            InputError::DirectoryUnreadable { .. } => "DirectoryUnreadable",
            InputError::NoValidImages { .. } => "NoValidImages",
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            InputError::InvalidPattern { .. } => {
                "Use a shell-style pattern such as '*' or 'page_*.png' (matched against file names)."
            }
            InputError::DirectoryUnreadable { .. } => {
                "Check that the directory exists and is readable by the server process."
            }
            InputError::NoValidImages { .. } => {
                "Pass existing PNG, JPEG, BMP or TIFF files that open in an image viewer. The \
                 server log lists why each file was rejected."
            }
        }
    }
}

/// Session lifecycle failures
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Unknown session id
    #[error("Session '{id}' not found")]
    NotFound {
        /// Requested id
        id: String,
    },

    /// The request is malformed
    #[error("Invalid session request: {reason}")]
    InvalidRequest {
        /// Why it was rejected
        reason: String,
    },

    /// Target could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Capture failed fatally
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Page naming failed
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// Staging directory problem
    #[error("Failed to prepare staging directory {}: {source}", path.display())]
    Staging {
        /// Directory path
        path:   PathBuf,
        /// I/O error
        source: std::io::Error,
    },
}

impl Remediable for SessionError {
    fn kind(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "SessionNotFound",
            SessionError::InvalidRequest { .. } => "InvalidRequest",
            SessionError::Resolution(e) => e.kind(),
            SessionError::Capture(e) => e.kind(),
            SessionError::Naming(e) => e.kind(),
            SessionError::Staging { .. } => "WriteFailure",
        }
    }

    fn remediation_hint(&self) -> &str {
        match self {
            SessionError::NotFound { .. } => {
                "Session ids are returned by start_capture_session and are lost when the server \
                 restarts."
            }
            SessionError::InvalidRequest { .. } => {
                "Provide either a window query, a window id, or full_screen=true, and a page count \
                 of at least 1."
            }
            SessionError::Resolution(e) => e.remediation_hint(),
            SessionError::Capture(e) => e.remediation_hint(),
            SessionError::Naming(e) => e.remediation_hint(),
            SessionError::Staging { .. } => {
                "Check that AUTO_SNAP_TEMP_DIR is writable and has free space."
            }
        }
    }
}

/// Configuration loading failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Environment variable name
        key:    String,
        /// Raw value
        value:  String,
        /// Parse failure
        reason: String,
    },
}

impl Remediable for ConfigError {
    fn kind(&self) -> &'static str {
        "InvalidConfig"
    }

    fn remediation_hint(&self) -> &str {
        "Fix or unset the offending AUTO_SNAP_* environment variable."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_and_hint() {
        let error = ResolutionError::NotFound {
            query:    "Firefox".to_string(),
            searched: 4,
        };

        let msg = error.to_string();
        assert!(msg.contains("Firefox"));
        assert!(msg.contains('4'));
        assert_eq!(error.kind(), "NotFound");
        assert!(error.remediation_hint().contains("list_windows"));
    }

    #[test]
    fn test_window_gone_maps_to_target_unavailable() {
        let error = CaptureError::from_window_system(
            "window 42",
            WindowSystemError::WindowGone {
                id: "42".to_string(),
            },
        );

        assert!(matches!(error, CaptureError::TargetUnavailable { .. }));
        assert!(error.is_recoverable());
        assert_eq!(error.kind(), "TargetUnavailable");
    }

    #[test]
    fn test_timeout_maps_to_target_unavailable() {
        let error = CaptureError::from_window_system(
            "full screen",
            WindowSystemError::Timeout { duration_ms: 2000 },
        );

        assert!(error.is_recoverable());
        assert!(error.to_string().contains("2000"));
    }

    #[test]
    fn test_unavailable_is_fatal() {
        let error = CaptureError::from_window_system(
            "window 1",
            WindowSystemError::Unavailable {
                reason: "no DISPLAY".to_string(),
            },
        );

        assert!(!error.is_recoverable());
        assert_eq!(error.kind(), "WindowSystemUnavailable");
        assert!(error.remediation_hint().contains("DISPLAY"));
    }

    #[test]
    fn test_write_failure_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let error = CaptureError::WriteFailure {
            path:   PathBuf::from("/ro/page_001.png"),
            source: io,
        };

        let msg = error.to_string();
        assert!(msg.contains("/ro/page_001.png"));
        assert!(msg.contains("read-only"));
        assert!(std::error::Error::source(&error).is_some());
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_dependency_missing_hints() {
        let tesseract = CaptureError::DependencyMissing {
            dependency: "tesseract".to_string(),
        };
        assert!(tesseract.remediation_hint().contains("tesseract-ocr"));

        let display = CaptureError::DependencyMissing {
            dependency: "x11".to_string(),
        };
        assert!(display.remediation_hint().contains("DISPLAY"));
    }

    #[test]
    fn test_language_unavailable_lists_languages() {
        let error = OcrError::LanguageUnavailable {
            language:  "klingon".to_string(),
            available: vec!["eng".to_string(), "deu".to_string()],
        };

        let msg = error.to_string();
        assert!(msg.contains("klingon"));
        assert!(msg.contains("eng, deu"));
        assert_eq!(error.kind(), "LanguageUnavailable");
    }

    #[test]
    fn test_assembly_output_exists_kind() {
        let error: AssemblyError = NamingError::Collision {
            path: PathBuf::from("/out/doc.pdf"),
        }
        .into();

        assert!(matches!(error, AssemblyError::OutputExists(_)));
        assert_eq!(error.kind(), "OutputExists");
        assert!(error.to_string().contains("/out/doc.pdf"));
    }

    #[test]
    fn test_payload_carries_kind_message_and_hint() {
        let payload = AssemblyError::NoPages.payload();

        assert_eq!(payload.kind, "NoPages");
        assert!(payload.message.contains("No pages"));
        assert!(payload.hint.contains("session_status"));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "NoPages");
    }

    #[test]
    fn test_input_error_kinds() {
        let pattern = InputError::InvalidPattern {
            pattern: "[".to_string(),
            reason:  "unclosed".to_string(),
        };
        assert_eq!(pattern.kind(), "InvalidPattern");

        let none = InputError::NoValidImages { rejected: 2 };
        assert_eq!(none.kind(), "NoValidImages");
        assert!(none.to_string().contains("2 rejected"));
        assert!(none.remediation_hint().contains("server log"));
    }

    #[test]
    fn test_session_error_delegates_kind() {
        let error: SessionError = ResolutionError::NotFound {
            query:    "Reader".to_string(),
            searched: 0,
        }
        .into();

        assert_eq!(error.kind(), "NotFound");
        assert!(error.remediation_hint().contains("list_windows"));
    }

    #[test]
    fn test_config_error_message() {
        let error = ConfigError::InvalidValue {
            key:    "AUTO_SNAP_PDF_DPI".to_string(),
            value:  "abc".to_string(),
            reason: "invalid digit found in string".to_string(),
        };

        let msg = error.to_string();
        assert!(msg.contains("AUTO_SNAP_PDF_DPI"));
        assert!(msg.contains("abc"));
    }
}

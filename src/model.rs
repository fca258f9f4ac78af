//! Data models and type definitions for auto-snap-mcp
//!
//! This module defines the core types shared by the pipeline stages:
//! - Window snapshots and capture targets
//! - Captured frames and their fingerprints
//! - Session state and summaries
//! - Processed pages and PDF artifacts
//! - Dependency/health reporting

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;

/// Represents the display backend in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// No backend detected
    None,
    /// X11 display server (also XWayland)
    X11,
    /// Scripted in-memory backend
    Mock,
}

impl BackendType {
    /// Returns the backend type as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::None => "none",
            BackendType::X11 => "x11",
            BackendType::Mock => "mock",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Screen-space rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Geometry {
    /// Left edge
    pub x:      i32,
    /// Top edge
    pub y:      i32,
    /// Width
    pub width:  u32,
    /// Height
    pub height: u32,
}

impl Geometry {
    /// Creates a new geometry
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle covers no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Snapshot of a top-level window at the time it was listed
///
/// The window may be closed at any later point; operations against a stale
/// handle fail with a recoverable error rather than panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WindowHandle {
    /// Window-system identifier (X11 window id, decimal)
    pub id:         String,
    /// Window title
    pub title:      String,
    /// Absolute on-screen geometry
    pub geometry:   Geometry,
    /// WM_CLASS class name
    pub class:      String,
    /// Owning process id (0 if unknown)
    pub pid:        u32,
    /// Stacking rank; higher means more recently focused
    pub focus_rank: u32,
}

impl WindowHandle {
    /// Creates a new window snapshot
    pub fn new(id: impl Into<String>, title: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            geometry,
            class: String::new(),
            pid: 0,
            focus_rank: 0,
        }
    }

    /// Sets the window class
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Sets the owning process id
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Sets the stacking rank
    pub fn with_focus_rank(mut self, rank: u32) -> Self {
        self.focus_rank = rank;
        self
    }
}

/// What a capture is aimed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureTarget {
    /// A single window's rectangle
    Window(WindowHandle),
    /// The whole root window
    FullScreen,
}

impl CaptureTarget {
    /// Short human-readable description used in logs and errors
    pub fn describe(&self) -> String {
        match self {
            CaptureTarget::Window(window) => format!("window {} ('{}')", window.id, window.title),
            CaptureTarget::FullScreen => "full screen".to_string(),
        }
    }

    /// Window title, if the target is a window
    pub fn title(&self) -> Option<&str> {
        match self {
            CaptureTarget::Window(window) => Some(window.title.as_str()),
            CaptureTarget::FullScreen => None,
        }
    }
}

/// On-disk image encoding for captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless PNG
    #[default]
    Png,
    /// Lossy JPEG
    Jpeg,
}

impl ImageFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// MIME type for inline image content
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(format!("unsupported image format '{other}' (expected png or jpeg)")),
        }
    }
}

/// Content fingerprint of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// SHA-256 over dimensions and RGBA pixels, hex encoded
    pub checksum:   String,
    /// Gradient perceptual hash, base64 encoded
    pub perceptual: String,
}

/// One screenshot written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFrame {
    /// 1-based page index within its session
    pub index:       u32,
    /// Absolute path of the image file
    pub path:        PathBuf,
    /// When the pixels were grabbed
    pub captured_at: DateTime<Utc>,
    /// Content fingerprint
    pub fingerprint: Fingerprint,
    /// Captured screen region
    pub region:      Geometry,
    /// Focus could not be confirmed before capture
    pub degraded:    bool,
    /// Encoded file size
    pub size_bytes:  u64,
}

/// How many pages a session should collect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "pages", rename_all = "snake_case")]
pub enum PageTarget {
    /// Stop after this many distinct pages
    Exactly(u32),
    /// Run until stopped, timed out, or stalled
    UntilStopped,
}

impl PageTarget {
    /// Requested page count, if bounded
    pub fn requested(&self) -> Option<u32> {
        match self {
            PageTarget::Exactly(n) => Some(*n),
            PageTarget::UntilStopped => None,
        }
    }

    /// Whether `accepted` pages satisfy the target
    pub fn is_reached(&self, accepted: usize) -> bool {
        match self {
            PageTarget::Exactly(n) => accepted >= *n as usize,
            PageTarget::UntilStopped => false,
        }
    }
}

impl From<Option<u32>> for PageTarget {
    fn from(value: Option<u32>) -> Self {
        match value {
            Some(n) => PageTarget::Exactly(n),
            None => PageTarget::UntilStopped,
        }
    }
}

/// Capture session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet started
    Idle,
    /// Target resolved, first tick pending
    Armed,
    /// Taking the next shot
    Capturing,
    /// Comparing a fresh frame against the last accepted one
    Gating,
    /// Wrapping up
    Finalizing,
    /// Finished normally (possibly with warnings)
    Closed,
    /// Stopped by cancellation or a fatal error
    Aborted,
}

impl SessionState {
    /// Whether the session has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Aborted)
    }
}

/// Why a session left the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Requested number of pages collected
    PageCountReached,
    /// Caller asked to stop and keep frames
    StopRequested,
    /// Caller cancelled
    Cancelled,
    /// No distinct page appeared within the per-page wait
    PageWaitExpired,
    /// Whole-session time budget exhausted
    SessionTimeout,
    /// A capture error ended the session
    Failed,
}

/// Serializable snapshot of a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id
    pub id:                  String,
    /// Current state
    pub state:               SessionState,
    /// What is being captured
    pub target:              CaptureTarget,
    /// Requested page count (None = until stopped)
    pub requested_pages:     Option<u32>,
    /// Accepted frames in index order
    pub frames:              Vec<CaptureFrame>,
    /// Shots discarded as near-duplicates
    pub rejected_duplicates: u32,
    /// Accepted frames taken without confirmed focus
    pub degraded_frames:     u32,
    /// Transient capture failures that were retried
    pub capture_retries:     u32,
    /// Non-fatal problems
    pub warnings:            Vec<String>,
    /// Why the loop ended
    pub stop_reason:         Option<StopReason>,
    /// Fatal error, if aborted by one
    pub error:               Option<ErrorPayload>,
    /// Per-session staging directory
    pub staging_dir:         PathBuf,
    /// Session start
    pub started_at:          DateTime<Utc>,
    /// Session end
    pub finished_at:         Option<DateTime<Utc>>,
}

impl SessionSummary {
    /// Number of accepted pages
    pub fn accepted(&self) -> usize {
        self.frames.len()
    }

    /// Whether the session has stopped
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A frame after optional enhancement and OCR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedPage {
    /// Source frame
    pub frame:         CaptureFrame,
    /// Extracted text, if OCR ran and succeeded
    pub text:          Option<String>,
    /// OCR failure for this page, if any
    pub ocr_error:     Option<ErrorPayload>,
    /// Enhanced image, if produced
    pub enhanced_path: Option<PathBuf>,
}

impl ProcessedPage {
    /// Wraps a frame with no processing applied
    pub fn raw(frame: CaptureFrame) -> Self {
        Self {
            frame,
            text: None,
            ocr_error: None,
            enhanced_path: None,
        }
    }

    /// Image to place in a document
    pub fn image_path(&self, prefer_enhanced: bool) -> &PathBuf {
        match (&self.enhanced_path, prefer_enhanced) {
            (Some(enhanced), true) => enhanced,
            _ => &self.frame.path,
        }
    }
}

/// A finished PDF on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfArtifact {
    /// Output file
    pub path:       PathBuf,
    /// Frame indices in page order
    pub pages:      Vec<u32>,
    /// Number of pages
    pub page_count: usize,
    /// File size in bytes
    pub size_bytes: u64,
    /// Lossy image compression was kept
    pub compressed: bool,
    /// Document title
    pub title:      String,
    /// Concatenated OCR text
    pub text:       Option<String>,
    /// Text sidecar file
    pub text_path:  Option<PathBuf>,
    /// Image files embedded, in page order
    #[serde(default)]
    pub sources:    Vec<PathBuf>,
}

impl PdfArtifact {
    /// File size in mebibytes, rounded to two decimals
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Platform information including OS and display backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlatformInfo {
    /// Operating system name (e.g., "linux")
    pub os:      String,
    /// Detected display backend
    pub backend: BackendType,
}

impl PlatformInfo {
    /// Creates a new PlatformInfo instance
    pub fn new(os: String, backend: BackendType) -> Self {
        Self { os, backend }
    }
}

/// Availability of one external dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DependencyStatus {
    /// Dependency name
    pub name:         String,
    /// Whether it can be used
    pub available:    bool,
    /// Version or failure detail
    pub detail:       Option<String>,
    /// How to install it when missing
    pub install_hint: Option<String>,
}

impl DependencyStatus {
    /// A usable dependency
    pub fn available(name: &str, detail: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            detail,
            install_hint: None,
        }
    }

    /// A missing dependency
    pub fn missing(name: &str, detail: impl Into<String>, install_hint: &str) -> Self {
        Self {
            name:         name.to_string(),
            available:    false,
            detail:       Some(detail.into()),
            install_hint: Some(install_hint.to_string()),
        }
    }
}

/// Response structure for the health_check tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DependencyReport {
    /// Platform and backend
    pub platform:      PlatformInfo,
    /// Display server connectivity
    pub display:       DependencyStatus,
    /// Key sender used for page navigation
    pub xdotool:       DependencyStatus,
    /// OCR engine
    pub tesseract:     DependencyStatus,
    /// Installed OCR languages
    pub ocr_languages: Vec<String>,
    /// Capture is possible
    pub ok:            bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u32) -> CaptureFrame {
        CaptureFrame {
            index,
            path: PathBuf::from(format!("/tmp/page_{index:03}.png")),
            captured_at: Utc::now(),
            fingerprint: Fingerprint {
                checksum:   "00".to_string(),
                perceptual: String::new(),
            },
            region: Geometry::new(0, 0, 10, 10),
            degraded: false,
            size_bytes: 10,
        }
    }

    #[test]
    fn test_backend_type_serialization() {
        assert_eq!(serde_json::to_string(&BackendType::X11).unwrap(), r#""x11""#);
        assert_eq!(serde_json::to_string(&BackendType::Mock).unwrap(), r#""mock""#);
        assert_eq!(format!("{}", BackendType::None), "none");
    }

    #[test]
    fn test_capture_target_serialization() {
        let json = serde_json::to_value(CaptureTarget::FullScreen).unwrap();
        assert_eq!(json["kind"], "full_screen");

        let window = WindowHandle::new("42", "Reader", Geometry::new(0, 0, 800, 600));
        let json = serde_json::to_value(CaptureTarget::Window(window)).unwrap();
        assert_eq!(json["kind"], "window");
        assert_eq!(json["title"], "Reader");
    }

    #[test]
    fn test_capture_target_describe() {
        let window = WindowHandle::new("7", "Docs", Geometry::default());
        assert_eq!(CaptureTarget::Window(window).describe(), "window 7 ('Docs')");
        assert_eq!(CaptureTarget::FullScreen.describe(), "full screen");
        assert_eq!(CaptureTarget::FullScreen.title(), None);
    }

    #[test]
    fn test_image_format_parsing() {
        assert_eq!("PNG".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!("jpg".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert!("webp".parse::<ImageFormat>().is_err());
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn test_page_target() {
        assert_eq!(PageTarget::from(Some(3)), PageTarget::Exactly(3));
        assert_eq!(PageTarget::from(None), PageTarget::UntilStopped);
        assert!(PageTarget::Exactly(2).is_reached(2));
        assert!(!PageTarget::Exactly(2).is_reached(1));
        assert!(!PageTarget::UntilStopped.is_reached(1000));
    }

    #[test]
    fn test_session_state_terminal() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(!SessionState::Gating.is_terminal());
    }

    #[test]
    fn test_processed_page_image_path() {
        let mut page = ProcessedPage::raw(frame(1));
        assert_eq!(page.image_path(true), &PathBuf::from("/tmp/page_001.png"));

        page.enhanced_path = Some(PathBuf::from("/tmp/page_001_enhanced.png"));
        assert_eq!(page.image_path(true), &PathBuf::from("/tmp/page_001_enhanced.png"));
        assert_eq!(page.image_path(false), &PathBuf::from("/tmp/page_001.png"));
    }

    #[test]
    fn test_pdf_artifact_size_mb() {
        let artifact = PdfArtifact {
            path:       PathBuf::from("/out/doc.pdf"),
            pages:      vec![1, 2],
            page_count: 2,
            size_bytes: 3 * 1024 * 1024 / 2,
            compressed: false,
            title:      "Doc".to_string(),
            text:       None,
            text_path:  None,
            sources:    Vec::new(),
        };
        assert_eq!(artifact.size_mb(), 1.5);
    }

    #[test]
    fn test_json_schema_generation() {
        let _window_schema = schemars::schema_for!(WindowHandle);
        let _report_schema = schemars::schema_for!(DependencyReport);
        let _format_schema = schemars::schema_for!(ImageFormat);
    }
}

//! MCP service implementation with tool routing
//!
//! Exposes the capture pipeline (window lookup, multi-page capture sessions,
//! OCR and PDF assembly) as MCP tools over stdio.
//!
//! Every tool answers with JSON text. Malformed arguments are rejected with
//! an MCP `invalid_params` error; failures of the pipeline itself come back
//! as an error *result* whose body is an [`ErrorPayload`]
//! (`{"kind", "message", "hint"}`), so agents can branch on `kind` and show
//! the hint to the user.

use std::{path::PathBuf, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Local, Utc};
use rmcp::{
    ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ErrorData as McpError, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    capture::{Capturer, MatchStrategy, MockBackend, WindowLocator, WindowSystem},
    config::Config,
    error::{CaptureError, ErrorPayload, Remediable, SessionError},
    model::{CaptureFrame, Fingerprint, Geometry, PdfArtifact, ProcessedPage, SessionSummary},
    naming::{self, NamingContext},
    pdf::{AssemblyRequest, PdfAssembler},
    processing::{
        BatchOperation, BatchOptions, ImageProcessor, MockOcrEngine, OcrEngine, ProcessOptions,
        batch::{DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH},
    },
    session::{SessionManager, SessionRequest},
    util::{
        detect::check_dependencies,
        image_files::{self, ImageValidation, RejectedImage},
    },
};

/// Name template for single screenshots
const SCREENSHOT_TEMPLATE: &str = "{title}_{timestamp}";

const INSTRUCTIONS: &str = "Captures multi-page documents from desktop windows. Call \
                            list_windows to find the window, start_capture_session to page \
                            through it, then build_pdf with the session id to get an OCR'd PDF. \
                            build_pdf and process_images also accept existing image files.";

/// Matches every file when no pattern is given
const DEFAULT_PATTERN: &str = "*";

/// Which window (or the whole screen) a tool should capture
///
/// At least one of `query`, `windowId` or `fullScreen` is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetParams {
    /// Window title query (substring by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Exact window id from list_windows (takes precedence over `query`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,

    /// How `query` is matched: substring, regex, class or fuzzy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MatchStrategy>,

    /// Capture the whole screen instead of a window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_screen: Option<bool>,

    /// Fall back to the whole screen when no window matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to_full_screen: Option<bool>,
}

impl TargetParams {
    fn validate(&self) -> Result<(), McpError> {
        if self.query.is_none() && self.window_id.is_none() && !self.full_screen.unwrap_or(false) {
            return Err(McpError::invalid_params(
                "At least one of 'query', 'windowId' or 'fullScreen' must be specified",
                None,
            ));
        }
        Ok(())
    }

    fn to_request(&self) -> SessionRequest {
        SessionRequest {
            query: self.query.clone(),
            window_id: self.window_id.clone(),
            strategy: self.strategy.unwrap_or_default(),
            full_screen: self.full_screen.unwrap_or(false),
            fallback_to_full_screen: self.fallback_to_full_screen.unwrap_or(false),
            ..Default::default()
        }
    }
}

/// Parameters for the capture_screenshot tool
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureScreenshotParams {
    /// What to capture
    #[serde(flatten)]
    pub target: TargetParams,

    /// Title used in the file name; defaults to the window title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Return the image inline as well as on disk (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_image: Option<bool>,
}

/// Parameters for the start_capture_session tool
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartCaptureSessionParams {
    /// What to capture
    #[serde(flatten)]
    pub target: TargetParams,

    /// Number of distinct pages to collect; omit to run until stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,

    /// Title used in page and PDF names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Key sent to turn the page (xdotool syntax, e.g. "Page_Down", "Right")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_key: Option<String>,

    /// Delay after each accepted page in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shot_delay_ms: Option<u64>,

    /// Block until the session finishes (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,

    /// Wait for the session and build a PDF from it (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_pdf: Option<bool>,

    /// Run OCR when building the PDF (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<bool>,

    /// Enhance pages before OCR and embed the enhanced images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance: Option<bool>,

    /// OCR language (tesseract code, e.g. "eng" or "eng+deu")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Try lossy image compression in the PDF
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
}

/// Parameters for the session_status tool
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusParams {
    /// Session to inspect; omit to list every session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Parameters for the stop_capture_session tool
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopCaptureSessionParams {
    /// Session to stop
    pub session_id: String,

    /// Cancel instead of stopping gracefully (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
}

/// Parameters for the extract_text tool
///
/// Exactly one of `sessionId` and `imagePath` is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextParams {
    /// OCR every accepted page of this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// OCR a single image file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,

    /// OCR language (tesseract code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Parameters for the build_pdf tool
///
/// Exactly one of `sessionId`, `imagePaths` and `imageDir` is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildPdfParams {
    /// Build from the accepted frames of a finished session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Build from these image files, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_paths: Option<Vec<String>>,

    /// Build from the images in this directory, sorted by file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dir: Option<String>,

    /// File name pattern for `imageDir`, e.g. "page_*" (default: "*")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Sort `imagePaths` by file name instead of keeping the given order
    /// (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_files: Option<bool>,

    /// Document title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Try lossy image compression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,

    /// Run OCR and write a text sidecar (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<bool>,

    /// Enhance pages and embed the enhanced images (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance: Option<bool>,

    /// OCR language (tesseract code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Delete the session's staged files afterwards; defaults to
    /// AUTO_SNAP_AUTO_CLEANUP_TEMP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,
}

/// Parameters for the process_images tool
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImagesParams {
    /// Directory holding the images
    pub image_dir: String,

    /// File name pattern, e.g. "*.png" (default: "*")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Operations to run: enhance, ocr, resize, deduplicate (default:
    /// ["enhance"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<BatchOperation>>,

    /// OCR language (tesseract code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Resize bounding box width (default: 1920)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,

    /// Resize bounding box height (default: 1080)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
}

impl ProcessImagesParams {
    fn to_options(&self) -> Result<BatchOptions, McpError> {
        let operations = self
            .operations
            .clone()
            .unwrap_or_else(|| BatchOptions::default().operations);
        if operations.is_empty() {
            return Err(McpError::invalid_params("'operations' must not be empty", None));
        }
        if self.max_width == Some(0) || self.max_height == Some(0) {
            return Err(McpError::invalid_params(
                "'maxWidth' and 'maxHeight' must be at least 1",
                None,
            ));
        }

        Ok(BatchOptions {
            operations,
            language: self.language.clone(),
            max_width: self.max_width.unwrap_or(DEFAULT_MAX_WIDTH),
            max_height: self.max_height.unwrap_or(DEFAULT_MAX_HEIGHT),
        })
    }
}

/// Metadata returned by capture_screenshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotResponse {
    /// Image file
    pub path:       PathBuf,
    /// Captured region
    pub region:     Geometry,
    /// Encoded size
    pub size_bytes: u64,
    /// Focus could not be confirmed
    pub degraded:   bool,
    /// What was captured
    pub target:     String,
    /// Fallback notice, if any
    pub warning:    Option<String>,
}

/// Response of start_capture_session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    /// Session snapshot (final if the call waited)
    pub session:   SessionSummary,
    /// Built document, if requested
    pub pdf:       Option<PdfArtifact>,
    /// Why the requested document could not be built
    pub pdf_error: Option<ErrorPayload>,
    /// Per-page OCR problems
    pub warnings:  Vec<String>,
}

/// OCR result for one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// Page index (1 for a single image)
    pub index: u32,
    /// Image that was read
    pub path:  PathBuf,
    /// Recognized text
    pub text:  Option<String>,
    /// Why OCR failed
    pub error: Option<ErrorPayload>,
}

/// Response of build_pdf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPdfResponse {
    /// Built document
    pub pdf:           PdfArtifact,
    /// Per-page OCR problems
    pub warnings:      Vec<String>,
    /// Input files left out of the document
    pub skipped:       Vec<RejectedImage>,
    /// Staged files removed afterwards
    pub cleaned_files: usize,
}

#[derive(Debug, Clone, Default)]
struct DocumentOptions {
    title:    Option<String>,
    compress: Option<bool>,
    ocr:      bool,
    enhance:  bool,
    language: Option<String>,
    session:  Option<String>,
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string(value).map_err(|e| {
        McpError::internal_error(format!("Failed to serialize response: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Wraps a pipeline failure as an error result carrying the payload
fn error_result(payload: &ErrorPayload) -> Result<CallToolResult, McpError> {
    tracing::warn!("Tool failed: {} ({})", payload.message, payload.kind);
    let json = serde_json::to_string(payload).map_err(|e| {
        McpError::internal_error(format!("Failed to serialize error payload: {}", e), None)
    })?;
    Ok(CallToolResult::error(vec![Content::text(json)]))
}

fn internal_payload(message: String) -> ErrorPayload {
    ErrorPayload {
        kind: "Internal".to_string(),
        message,
        hint: "This is a bug in the server. Check its log output.".to_string(),
    }
}

/// Lists, orders and validates the caller's image files
///
/// A directory is always sorted by file name; an explicit list only when
/// `sort` is set.
fn resolve_images(
    dir: Option<PathBuf>,
    pattern: &str,
    mut paths: Vec<PathBuf>,
    sort: bool,
) -> Result<ImageValidation, ErrorPayload> {
    if let Some(dir) = dir {
        paths = image_files::list_images(&dir, pattern).map_err(|e| e.payload())?;
    } else if sort {
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    }
    Ok(image_files::validate(&paths))
}

/// Wraps caller-supplied image files as frames in the given order
fn frames_from_paths(paths: &[PathBuf]) -> Vec<CaptureFrame> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let path = path.clone();
            let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            CaptureFrame {
                index: i as u32 + 1,
                path,
                captured_at: Utc::now(),
                fingerprint: Fingerprint {
                    checksum:   String::new(),
                    perceptual: String::new(),
                },
                region: Geometry::default(),
                degraded: false,
                size_bytes,
            }
        })
        .collect()
}

fn ocr_warnings(pages: &[ProcessedPage]) -> Vec<String> {
    pages
        .iter()
        .filter_map(|page| {
            page.ocr_error
                .as_ref()
                .map(|e| format!("page {}: {}", page.frame.index, e.message))
        })
        .collect()
}

/// Auto-snap MCP server
///
/// # Tools
///
/// - `health_check`: platform and dependency report
/// - `list_windows`: enumerate capturable windows
/// - `capture_screenshot`: one screenshot of a window or the screen
/// - `start_capture_session`: page through a document in the background
/// - `session_status`: progress of one or all sessions
/// - `stop_capture_session`: stop (keeping frames) or cancel a session
/// - `extract_text`: OCR a session or an image file
/// - `build_pdf`: assemble a session, image files or a directory into a PDF
/// - `process_images`: enhance, OCR, resize or deduplicate a directory
#[derive(Clone)]
pub struct AutoSnapServer {
    /// Tool router for dispatching tool calls
    tool_router: ToolRouter<Self>,
    config:      Arc<Config>,
    system:      Arc<dyn WindowSystem>,
    capturer:    Capturer,
    locator:     WindowLocator,
    sessions:    SessionManager,
    processor:   ImageProcessor,
    assembler:   PdfAssembler,
}

#[tool_router]
impl AutoSnapServer {
    /// Creates a server over the given window system and OCR engine
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use auto_snap_mcp::{
    ///     capture::MockBackend, config::Config, mcp::AutoSnapServer, processing::MockOcrEngine,
    /// };
    ///
    /// let server = AutoSnapServer::new(
    ///     Arc::new(Config::default()),
    ///     Arc::new(MockBackend::new()),
    ///     Arc::new(MockOcrEngine::new()),
    /// );
    /// assert_eq!(server.sessions().list().len(), 0);
    /// ```
    pub fn new(config: Arc<Config>, system: Arc<dyn WindowSystem>, ocr: Arc<dyn OcrEngine>) -> Self {
        let capturer = Capturer::from_config(system.clone(), &config);
        Self {
            tool_router: Self::tool_router(),
            locator: WindowLocator::new(system.clone()),
            sessions: SessionManager::new(config.clone(), capturer.clone()),
            processor: ImageProcessor::from_config(ocr, &config),
            assembler: PdfAssembler::new(config.clone()),
            capturer,
            system,
            config,
        }
    }

    /// Creates a server backed by [`MockBackend`] and [`MockOcrEngine`]
    pub fn new_with_mock(config: Arc<Config>) -> Self {
        Self::new(config, Arc::new(MockBackend::new()), Arc::new(MockOcrEngine::new()))
    }

    /// Session registry, for shutdown handling
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Health check tool - reports platform, display and tool availability
    ///
    /// # Examples
    ///
    /// Response:
    /// ```json
    /// {
    ///   "platform": {"os": "linux", "backend": "x11"},
    ///   "display": {"name": "display", "available": true, ...},
    ///   "xdotool": {"name": "xdotool", "available": false, "installHint": ...},
    ///   "tesseract": {"name": "tesseract", "available": true, ...},
    ///   "ocr_languages": ["eng", "osd"],
    ///   "ok": true
    /// }
    /// ```
    #[tool(description = "Check server health: display connectivity, xdotool and tesseract availability")]
    pub async fn health_check(&self) -> Result<CallToolResult, McpError> {
        let report = check_dependencies(self.system.as_ref(), self.processor.ocr_engine().as_ref()).await;
        json_result(&report)
    }

    /// List windows tool - enumerates capturable top-level windows
    ///
    /// Each entry carries the `id` accepted by `windowId` parameters and a
    /// `focus_rank` (higher = more recently focused).
    #[tool(description = "List all capturable windows with id, title, class, geometry and focus rank")]
    pub async fn list_windows(&self) -> Result<CallToolResult, McpError> {
        match self.locator.list_windows().await {
            Ok(windows) => json_result(&windows),
            Err(e) => error_result(&e.payload()),
        }
    }

    /// Capture screenshot tool - one shot of a window or the whole screen
    ///
    /// The image is written to the output directory and, unless
    /// `includeImage` is false, also returned inline.
    ///
    /// # Examples
    ///
    /// Request:
    /// ```json
    /// {
    ///   "method": "tools/call",
    ///   "params": {
    ///     "name": "capture_screenshot",
    ///     "arguments": {"query": "Document Viewer"}
    ///   }
    /// }
    /// ```
    #[tool(description = "Capture a single screenshot of a window (by title query or id) or the full screen")]
    pub async fn capture_screenshot(
        &self,
        Parameters(params): Parameters<CaptureScreenshotParams>,
    ) -> Result<CallToolResult, McpError> {
        params.target.validate()?;

        let (target, warning) = match self.sessions.resolve_target(&params.target.to_request()).await {
            Ok(resolved) => resolved,
            Err(e) => return error_result(&e.payload()),
        };

        let now = Local::now();
        let dir = naming::output_directory(&self.config, &now, None);
        if let Err(source) = std::fs::create_dir_all(&dir) {
            return error_result(&CaptureError::WriteFailure { path: dir, source }.payload());
        }

        let title = params.title.clone().or_else(|| target.title().map(str::to_string));
        let ctx = NamingContext::from_config(&self.config, now).with_title(title);
        let mut name = naming::render(SCREENSHOT_TEMPLATE, &ctx).into_os_string();
        name.push(".");
        name.push(self.capturer.format().extension());

        let path = match naming::resolve_collision(dir.join(name), self.config.collision_policy) {
            Ok(path) => path,
            Err(e) => return error_result(&e.payload()),
        };

        let frame = match self.capturer.capture(&target, &path, 1).await {
            Ok(frame) => frame,
            Err(e) => return error_result(&e.payload()),
        };
        tracing::info!("Screenshot of {} saved to {}", target.describe(), frame.path.display());

        let response = ScreenshotResponse {
            path: frame.path.clone(),
            region: frame.region,
            size_bytes: frame.size_bytes,
            degraded: frame.degraded,
            target: target.describe(),
            warning,
        };
        let metadata = serde_json::to_string(&response).map_err(|e| {
            McpError::internal_error(format!("Failed to serialize response: {}", e), None)
        })?;

        let mut content = Vec::with_capacity(2);
        if params.include_image.unwrap_or(true) {
            let bytes = std::fs::read(&frame.path).map_err(|e| {
                McpError::internal_error(format!("Failed to read back screenshot: {}", e), None)
            })?;
            content.push(Content::image(STANDARD.encode(bytes), self.capturer.format().mime_type()));
        }
        content.push(Content::text(metadata));

        Ok(CallToolResult::success(content))
    }

    /// Start capture session tool - pages through a document in the
    /// background
    ///
    /// Returns immediately with the session snapshot unless `wait` or
    /// `buildPdf` is set.
    ///
    /// # Examples
    ///
    /// Request:
    /// ```json
    /// {
    ///   "method": "tools/call",
    ///   "params": {
    ///     "name": "start_capture_session",
    ///     "arguments": {
    ///       "query": "report.pdf",
    ///       "pages": 12,
    ///       "navigationKey": "Page_Down",
    ///       "buildPdf": true
    ///     }
    ///   }
    /// }
    /// ```
    #[tool(
        description = "Start capturing a multi-page document: screenshot, skip duplicates, press the navigation key, repeat"
    )]
    pub async fn start_capture_session(
        &self,
        Parameters(params): Parameters<StartCaptureSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        params.target.validate()?;
        if params.pages == Some(0) {
            return Err(McpError::invalid_params("'pages' must be at least 1", None));
        }

        let request = SessionRequest {
            pages: params.pages,
            title: params.title.clone(),
            navigation_key: params.navigation_key.clone(),
            shot_delay: params.shot_delay_ms.map(Duration::from_millis),
            ..params.target.to_request()
        };

        let started = match self.sessions.start(request).await {
            Ok(summary) => summary,
            Err(e) => return error_result(&e.payload()),
        };

        let build = params.build_pdf.unwrap_or(false);
        if !build && !params.wait.unwrap_or(false) {
            return json_result(&StartSessionResponse {
                session:   started,
                pdf:       None,
                pdf_error: None,
                warnings:  Vec::new(),
            });
        }

        let session = match self.sessions.wait(&started.id).await {
            Ok(summary) => summary,
            Err(e) => return error_result(&e.payload()),
        };

        let mut response = StartSessionResponse {
            session,
            pdf: None,
            pdf_error: None,
            warnings: Vec::new(),
        };
        if build {
            let options = DocumentOptions {
                title:    params.title.clone(),
                compress: params.compress,
                ocr:      params.ocr.unwrap_or(true),
                enhance:  params.enhance.unwrap_or(false),
                language: params.language.clone(),
                session:  Some(response.session.id.clone()),
            };
            match self.build_document(response.session.frames.clone(), options).await {
                Ok((artifact, warnings)) => {
                    response.pdf = Some(artifact);
                    response.warnings = warnings;
                }
                Err(payload) => response.pdf_error = Some(payload),
            }
        }

        json_result(&response)
    }

    /// Session status tool - snapshot of one session, or all of them
    #[tool(description = "Get the progress of a capture session, or list all sessions when no id is given")]
    pub async fn session_status(
        &self,
        Parameters(params): Parameters<SessionStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        match params.session_id {
            Some(id) => match self.sessions.status(&id) {
                Ok(summary) => json_result(&summary),
                Err(e) => error_result(&e.payload()),
            },
            None => json_result(&self.sessions.list()),
        }
    }

    /// Stop capture session tool - ends a running session
    ///
    /// A stopped session keeps its frames for build_pdf; a cancelled one
    /// is marked aborted. Stopping a finished session is a no-op.
    #[tool(description = "Stop a capture session (keeping captured pages) or cancel it")]
    pub async fn stop_capture_session(
        &self,
        Parameters(params): Parameters<StopCaptureSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .sessions
            .stop(&params.session_id, params.cancel.unwrap_or(false))
            .await
        {
            Ok(summary) => json_result(&summary),
            Err(e) => error_result(&e.payload()),
        }
    }

    /// Extract text tool - OCR for a session's pages or a single image
    ///
    /// For a session, OCR failures are reported per page and do not fail
    /// the call.
    #[tool(description = "Extract text with OCR from every page of a session or from one image file")]
    pub async fn extract_text(
        &self,
        Parameters(params): Parameters<ExtractTextParams>,
    ) -> Result<CallToolResult, McpError> {
        match (&params.session_id, &params.image_path) {
            (Some(id), None) => {
                let frames = match self.sessions.frames(id) {
                    Ok(frames) => frames,
                    Err(e) => return error_result(&e.payload()),
                };
                let options = ProcessOptions {
                    ocr:      true,
                    enhance:  false,
                    language: params.language.clone(),
                };
                let pages: Vec<PageText> = self
                    .processor
                    .process_all(&frames, &options)
                    .await
                    .into_iter()
                    .map(|page| PageText {
                        index: page.frame.index,
                        path:  page.frame.path,
                        text:  page.text,
                        error: page.ocr_error,
                    })
                    .collect();
                json_result(&pages)
            }
            (None, Some(path)) => {
                let path = PathBuf::from(path);
                match self.processor.extract_text(&path, params.language.as_deref()).await {
                    Ok(text) => json_result(&PageText {
                        index: 1,
                        path,
                        text: Some(text),
                        error: None,
                    }),
                    Err(e) => error_result(&e.payload()),
                }
            }
            _ => Err(McpError::invalid_params(
                "Exactly one of 'sessionId' or 'imagePath' must be specified",
                None,
            )),
        }
    }

    /// Build PDF tool - assembles pages into a document
    ///
    /// Session frames are used in capture order, image files in the given
    /// order (or by name with `sortFiles`) and directory images by name.
    /// Input files that are missing, unsupported or undecodable are skipped
    /// and listed in `skipped`. With `ocr` (the default) a `.txt` sidecar is
    /// written next to the PDF.
    ///
    /// Cleanup only removes stray staged files: the session's frames and
    /// every image embedded in the PDF are kept, so the session can still be
    /// inspected or rebuilt.
    ///
    /// # Examples
    ///
    /// Response:
    /// ```json
    /// {
    ///   "pdf": {"path": "/home/me/auto-snap-captures/2025-03-01/Report_2025-03-01T10-00-00.pdf",
    ///           "page_count": 12, "compressed": true, ...},
    ///   "warnings": [],
    ///   "skipped": [],
    ///   "cleaned_files": 0
    /// }
    /// ```
    #[tool(
        description = "Build a PDF (with optional OCR text sidecar) from a finished session, image files or an image directory"
    )]
    pub async fn build_pdf(
        &self,
        Parameters(params): Parameters<BuildPdfParams>,
    ) -> Result<CallToolResult, McpError> {
        let given = [
            params.session_id.is_some(),
            params.image_paths.is_some(),
            params.image_dir.is_some(),
        ];
        if given.iter().filter(|g| **g).count() != 1 {
            return Err(McpError::invalid_params(
                "Exactly one of 'sessionId', 'imagePaths' or 'imageDir' must be specified",
                None,
            ));
        }

        let mut skipped = Vec::new();
        let frames = if let Some(id) = &params.session_id {
            let summary = match self.sessions.status(id) {
                Ok(summary) => summary,
                Err(e) => return error_result(&e.payload()),
            };
            if !summary.is_finished() {
                let error = SessionError::InvalidRequest {
                    reason: format!("session {id} is still running; stop it first"),
                };
                return error_result(&error.payload());
            }
            summary.frames
        } else {
            let dir = params.image_dir.as_ref().map(PathBuf::from);
            let pattern = params.pattern.clone().unwrap_or_else(|| DEFAULT_PATTERN.to_string());
            let paths: Vec<PathBuf> = params
                .image_paths
                .iter()
                .flatten()
                .map(PathBuf::from)
                .collect();
            let sort = params.sort_files.unwrap_or(false);

            let resolved = tokio::task::spawn_blocking(move || resolve_images(dir, &pattern, paths, sort)).await;
            let validation = match resolved {
                Ok(Ok(validation)) => validation,
                Ok(Err(payload)) => return error_result(&payload),
                Err(e) => return error_result(&internal_payload(format!("Image validation task failed: {}", e))),
            };
            if !validation.rejected.is_empty() {
                if let Err(e) = validation.require_any() {
                    return error_result(&e.payload());
                }
            }
            skipped = validation.rejected;
            frames_from_paths(&validation.valid)
        };
        let frame_paths: Vec<PathBuf> = frames.iter().map(|f| f.path.clone()).collect();

        let options = DocumentOptions {
            title:    params.title.clone(),
            compress: params.compress,
            ocr:      params.ocr.unwrap_or(true),
            enhance:  params.enhance.unwrap_or(false),
            language: params.language.clone(),
            session:  params.session_id.clone(),
        };
        let (pdf, warnings) = match self.build_document(frames, options).await {
            Ok(built) => built,
            Err(payload) => return error_result(&payload),
        };

        let mut cleaned_files = 0;
        if let Some(id) = &params.session_id {
            if params.cleanup.unwrap_or(self.config.auto_cleanup_temp) {
                let mut keep = frame_paths;
                keep.extend(pdf.sources.iter().cloned());
                keep.push(pdf.path.clone());
                keep.extend(pdf.text_path.clone());
                match self.sessions.cleanup(id, &keep) {
                    Ok(removed) => cleaned_files = removed,
                    Err(e) => tracing::warn!("Could not clean up session {}: {}", id, e),
                }
            }
        }

        json_result(&BuildPdfResponse {
            pdf,
            warnings,
            skipped,
            cleaned_files,
        })
    }

    /// Process images tool - batch operations over a directory
    ///
    /// Failures of single files are listed in `failures`; the call itself
    /// only fails when the directory or pattern is unusable.
    ///
    /// # Examples
    ///
    /// Response:
    /// ```json
    /// {
    ///   "processed": ["/scans/a.png", "/scans/b.png"],
    ///   "enhanced": ["/scans/a_enhanced.png", "/scans/b_enhanced.png"],
    ///   "texts": [], "resized": [], "duplicates": [], "failures": []
    /// }
    /// ```
    #[tool(description = "Run enhance, ocr, resize and/or deduplicate over the images in a directory")]
    pub async fn process_images(
        &self,
        Parameters(params): Parameters<ProcessImagesParams>,
    ) -> Result<CallToolResult, McpError> {
        let options = params.to_options()?;

        let dir = PathBuf::from(&params.image_dir);
        let pattern = params.pattern.clone().unwrap_or_else(|| DEFAULT_PATTERN.to_string());
        let listed = tokio::task::spawn_blocking(move || image_files::list_images(&dir, &pattern)).await;
        let paths = match listed {
            Ok(Ok(paths)) => paths,
            Ok(Err(e)) => return error_result(&e.payload()),
            Err(e) => return error_result(&internal_payload(format!("Image listing task failed: {}", e))),
        };

        let report = self.processor.process_batch(&paths, &options).await;
        json_result(&report)
    }
}

impl AutoSnapServer {
    /// Processes frames as requested and writes the PDF
    async fn build_document(
        &self,
        frames: Vec<CaptureFrame>,
        options: DocumentOptions,
    ) -> Result<(PdfArtifact, Vec<String>), ErrorPayload> {
        let pages = if options.ocr || options.enhance {
            let process = ProcessOptions {
                ocr:      options.ocr,
                enhance:  options.enhance,
                language: options.language.clone(),
            };
            self.processor.process_all(&frames, &process).await
        } else {
            frames.into_iter().map(ProcessedPage::raw).collect()
        };
        let warnings = ocr_warnings(&pages);

        let request = AssemblyRequest {
            title:           options.title,
            compress:        options.compress,
            prefer_enhanced: options.enhance,
            write_text:      options.ocr,
            session:         options.session,
        };
        let assembler = self.assembler.clone();
        let artifact = tokio::task::spawn_blocking(move || assembler.assemble(&pages, &request))
            .await
            .map_err(|e| internal_payload(format!("PDF assembly task failed: {}", e)))?
            .map_err(|e| e.payload())?;

        Ok((artifact, warnings))
    }
}

#[tool_handler]
impl ServerHandler for AutoSnapServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }
}

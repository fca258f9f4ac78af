//! MCP Server Test Harness
//!
//! Wraps an [`AutoSnapServer`] over [`MockBackend`] and [`MockOcrEngine`]
//! with helpers for calling tools and decoding their JSON responses.
//!
//! # Usage
//!
//! ```rust
//! use common::mcp_harness::McpTestContext;
//!
//! #[tokio::test]
//! async fn test_windows() {
//!     let ctx = McpTestContext::new_with_mock();
//!     let result = ctx.server.list_windows().await.unwrap();
//!     let windows: Vec<serde_json::Value> = ctx.parse(&result);
//!     assert_eq!(windows.len(), 3);
//! }
//! ```

use std::{path::Path, sync::Arc};

use auto_snap_mcp::{
    capture::MockBackend, config::Config, error::ErrorPayload, mcp::AutoSnapServer,
    processing::MockOcrEngine,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rmcp::model::CallToolResult;
use serde::de::DeserializeOwned;

use super::test_config;

/// Test fixture for MCP server integration tests
pub struct McpTestContext {
    /// The MCP server instance
    pub server:  AutoSnapServer,
    /// Backend used by the server, for inspection
    pub backend: Arc<MockBackend>,
    /// OCR engine used by the server, for inspection
    pub ocr:     Arc<MockOcrEngine>,
    /// Root of the output and staging directories
    pub dir:     tempfile::TempDir,
}

impl McpTestContext {
    /// Context with default mocks
    pub fn new_with_mock() -> Self {
        Self::new_with_configured_mock(MockBackend::new(), MockOcrEngine::new())
    }

    /// Context with configured mocks
    pub fn new_with_configured_mock(backend: MockBackend, ocr: MockOcrEngine) -> Self {
        Self::new_with_config(backend, ocr, |_| {})
    }

    /// Context with configured mocks and configuration tweaks
    pub fn new_with_config(backend: MockBackend, ocr: MockOcrEngine, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let backend = Arc::new(backend);
        let ocr = Arc::new(ocr);
        let server = AutoSnapServer::new(Arc::new(config), backend.clone(), ocr.clone());

        Self {
            server,
            backend,
            ocr,
            dir,
        }
    }

    /// Output directory of the server
    pub fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }

    /// Staging root of the server
    pub fn staging_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("staging")
    }

    /// Decodes the JSON text of a successful result
    ///
    /// # Panics
    ///
    /// Panics if the result is an error or carries no JSON text.
    pub fn parse<T: DeserializeOwned>(&self, result: &CallToolResult) -> T {
        assert!(!result.is_error.unwrap_or(false), "unexpected error result: {}", json_text(result));
        serde_json::from_str(json_text(result)).unwrap()
    }

    /// Decodes the payload of an error result
    ///
    /// # Panics
    ///
    /// Panics if the result is not an error.
    pub fn error(&self, result: &CallToolResult) -> ErrorPayload {
        assert_eq!(result.is_error, Some(true), "expected an error result");
        serde_json::from_str(json_text(result)).unwrap()
    }
}

/// The JSON text block of a result
pub fn json_text(result: &CallToolResult) -> &str {
    result
        .content
        .iter()
        .find_map(|c| c.as_text())
        .map(|t| t.text.as_str())
        .unwrap_or("")
}

/// Decoded bytes of the inline image, if any
pub fn image_bytes(result: &CallToolResult) -> Option<Vec<u8>> {
    result
        .content
        .iter()
        .find_map(|c| c.as_image())
        .map(|image| STANDARD.decode(&image.data).unwrap())
}

/// Number of entries directly inside `dir` (0 if it does not exist)
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

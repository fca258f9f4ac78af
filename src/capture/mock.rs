//! Mock window system for testing
//!
//! `MockBackend` implements [`WindowSystem`] without a display server. It
//! models a screen showing a multi-page document: every capture renders the
//! current page as a synthetic pattern, and the page advances according to a
//! [`PageAdvance`] script (never, on each key press, or every N captures).
//!
//! # Features
//!
//! - **Mock Window List:** 3 predefined windows with distinct focus ranks
//! - **Scripted Paging:** static content, key-driven or capture-driven pages
//! - **Configurable Delay:** simulate slow display servers
//! - **Error Injection:** fail every call, fail the next captures, fail focus,
//!   or close a window mid-session
//!
//! # Examples
//!
//! ```
//! use auto_snap_mcp::{
//!     capture::{WindowSystem, mock::{MockBackend, PageAdvance}},
//!     model::CaptureTarget,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MockBackend::new().with_pages(3, PageAdvance::OnKey);
//!
//!     let windows = backend.list_windows().await.unwrap();
//!     assert_eq!(windows.len(), 3);
//!
//!     backend.send_key(None, "Page_Down").await.unwrap();
//!     assert_eq!(backend.current_page(), 1);
//!
//!     let (image, _) = backend.capture(&CaptureTarget::FullScreen).await.unwrap();
//!     assert_eq!(image.dimensions(), (1280, 800));
//! }
//! ```

use std::{
    collections::{HashSet, VecDeque},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

use super::{ImageBuffer, WindowSystem};
use crate::{
    error::WindowSystemError,
    model::{BackendType, CaptureTarget, Geometry, WindowHandle},
};

/// When the simulated document turns the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAdvance {
    /// Content never changes
    Static,
    /// Each key press shows the next page
    OnKey,
    /// Every N captures show the next page
    EveryCapture(u32),
}

/// Mock window system for tests and development
#[derive(Debug)]
pub struct MockBackend {
    /// Optional delay to simulate async operation timing
    delay:            Option<Duration>,
    /// Error returned by every operation
    error_injection:  Option<WindowSystemError>,
    /// Errors returned by the next captures, in order
    capture_failures: Mutex<VecDeque<WindowSystemError>>,
    /// Focus requests fail
    focus_fails:      bool,
    /// Root window size
    screen:           Geometry,
    /// Predefined mock windows
    windows:          Vec<WindowHandle>,
    /// Windows closed since creation
    closed:           Mutex<HashSet<String>>,
    /// Number of distinct pages in the document
    page_count:       u32,
    /// Paging script
    advance:          PageAdvance,
    /// Page currently shown
    current:          AtomicU32,
    /// Successful captures so far
    captures:         AtomicU32,
    /// Focus requests so far
    focuses:          AtomicU32,
    /// Keys received so far
    keys:             Mutex<Vec<String>>,
}

impl MockBackend {
    /// Creates a mock with 3 windows and a single static page
    ///
    /// Windows, in list order:
    /// - Firefox (focus rank 1)
    /// - Document Viewer (focus rank 3, most recently focused)
    /// - Terminal (focus rank 2)
    pub fn new() -> Self {
        Self {
            delay:            None,
            error_injection:  None,
            capture_failures: Mutex::new(VecDeque::new()),
            focus_fails:      false,
            screen:           Geometry::new(0, 0, 1280, 800),
            windows:          Self::create_mock_windows(),
            closed:           Mutex::new(HashSet::new()),
            page_count:       1,
            advance:          PageAdvance::Static,
            current:          AtomicU32::new(0),
            captures:         AtomicU32::new(0),
            focuses:          AtomicU32::new(0),
            keys:             Mutex::new(Vec::new()),
        }
    }

    /// Sets the document length and paging script
    ///
    /// After the last page the content stays on it.
    pub fn with_pages(mut self, page_count: u32, advance: PageAdvance) -> Self {
        self.page_count = page_count.max(1);
        self.advance = advance;
        self
    }

    /// Sets a delay applied to every async operation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every operation fail with `error`
    pub fn with_error(mut self, error: WindowSystemError) -> Self {
        self.error_injection = Some(error);
        self
    }

    /// Makes focus requests fail
    pub fn with_focus_failure(mut self) -> Self {
        self.focus_fails = true;
        self
    }

    /// Replaces the window list
    pub fn with_windows(mut self, windows: Vec<WindowHandle>) -> Self {
        self.windows = windows;
        self
    }

    /// Queues errors for the next captures
    pub fn fail_next_captures(&self, errors: impl IntoIterator<Item = WindowSystemError>) {
        self.capture_failures.lock().extend(errors);
    }

    /// Simulates the user closing a window
    pub fn close_window(&self, id: &str) {
        self.closed.lock().insert(id.to_string());
    }

    /// Snapshot of the configured windows (including closed ones)
    pub fn windows(&self) -> &[WindowHandle] {
        &self.windows
    }

    /// Page currently on screen (0-based)
    pub fn current_page(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }

    /// Successful captures so far
    pub fn capture_count(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    /// Focus requests so far
    pub fn focus_count(&self) -> u32 {
        self.focuses.load(Ordering::SeqCst)
    }

    /// Keys received so far
    pub fn sent_keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }

    fn create_mock_windows() -> Vec<WindowHandle> {
        vec![
            WindowHandle::new("4194305", "Mozilla Firefox", Geometry::new(0, 0, 640, 480))
                .with_class("Navigator")
                .with_pid(1000)
                .with_focus_rank(1),
            WindowHandle::new(
                "4194306",
                "Document Viewer - report.pdf",
                Geometry::new(100, 50, 480, 640),
            )
            .with_class("Evince")
            .with_pid(2000)
            .with_focus_rank(3),
            WindowHandle::new("4194307", "Terminal - Alacritty", Geometry::new(200, 100, 640, 400))
                .with_class("Alacritty")
                .with_pid(3000)
                .with_focus_rank(2),
        ]
    }

    async fn apply_delay(&self) {
        if let Some(duration) = self.delay {
            sleep(duration).await;
        }
    }

    fn check_error_injection(&self) -> Result<(), WindowSystemError> {
        match &self.error_injection {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn check_open(&self, window: &WindowHandle) -> Result<(), WindowSystemError> {
        if self.closed.lock().contains(&window.id) {
            return Err(WindowSystemError::WindowGone {
                id: window.id.clone(),
            });
        }
        Ok(())
    }

    fn advance_page(&self) {
        let last = self.page_count - 1;
        let _ = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| Some((p + 1).min(last)));
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowSystem for MockBackend {
    async fn list_windows(&self) -> Result<Vec<WindowHandle>, WindowSystemError> {
        self.apply_delay().await;
        self.check_error_injection()?;

        let closed = self.closed.lock();
        Ok(self
            .windows
            .iter()
            .filter(|w| !closed.contains(&w.id))
            .cloned()
            .collect())
    }

    async fn focus_window(&self, window: &WindowHandle) -> Result<(), WindowSystemError> {
        self.apply_delay().await;
        self.check_error_injection()?;
        self.check_open(window)?;
        self.focuses.fetch_add(1, Ordering::SeqCst);

        if self.focus_fails {
            return Err(WindowSystemError::PermissionDenied {
                reason: "focus stealing prevented".to_string(),
            });
        }
        Ok(())
    }

    async fn capture(
        &self,
        target: &CaptureTarget,
    ) -> Result<(ImageBuffer, Geometry), WindowSystemError> {
        self.apply_delay().await;
        self.check_error_injection()?;

        if let Some(error) = self.capture_failures.lock().pop_front() {
            return Err(error);
        }

        let region = match target {
            CaptureTarget::Window(window) => {
                self.check_open(window)?;
                window.geometry
            }
            CaptureTarget::FullScreen => self.screen,
        };

        let page = self.current_page();
        let image = ImageBuffer::from_page_pattern(page, region.width, region.height);

        let taken = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if let PageAdvance::EveryCapture(n) = self.advance {
            if n > 0 && taken % n == 0 {
                self.advance_page();
            }
        }

        Ok((image, region))
    }

    async fn send_key(
        &self,
        window: Option<&WindowHandle>,
        key: &str,
    ) -> Result<(), WindowSystemError> {
        self.apply_delay().await;
        self.check_error_injection()?;
        if let Some(window) = window {
            self.check_open(window)?;
        }
        if key.trim().is_empty() {
            return Err(WindowSystemError::KeySendFailed {
                key:    key.to_string(),
                reason: "empty key name".to_string(),
            });
        }

        self.keys.lock().push(key.to_string());
        if self.advance == PageAdvance::OnKey {
            self.advance_page();
        }
        Ok(())
    }

    fn backend(&self) -> BackendType {
        BackendType::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_windows() {
        let backend = MockBackend::new();
        let windows = backend.list_windows().await.unwrap();

        assert_eq!(windows.len(), 3);
        assert!(windows.iter().any(|w| w.title.contains("Firefox")));
        assert_eq!(backend.backend(), BackendType::Mock);
    }

    #[tokio::test]
    async fn test_closed_window_disappears() {
        let backend = MockBackend::new();
        let id = backend.windows()[0].id.clone();
        backend.close_window(&id);

        let windows = backend.list_windows().await.unwrap();
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| w.id != id));
    }

    #[tokio::test]
    async fn test_static_content_never_changes() {
        let backend = MockBackend::new();
        let (a, _) = backend.capture(&CaptureTarget::FullScreen).await.unwrap();
        let (b, _) = backend.capture(&CaptureTarget::FullScreen).await.unwrap();

        assert_eq!(a.to_rgba8().as_raw(), b.to_rgba8().as_raw());
        assert_eq!(backend.capture_count(), 2);
    }

    #[tokio::test]
    async fn test_on_key_advances_and_saturates() {
        let backend = MockBackend::new().with_pages(2, PageAdvance::OnKey);

        backend.send_key(None, "Page_Down").await.unwrap();
        assert_eq!(backend.current_page(), 1);
        backend.send_key(None, "Page_Down").await.unwrap();
        assert_eq!(backend.current_page(), 1);
        assert_eq!(backend.sent_keys(), vec!["Page_Down", "Page_Down"]);
    }

    #[tokio::test]
    async fn test_every_capture_advances() {
        let backend = MockBackend::new().with_pages(3, PageAdvance::EveryCapture(2));

        backend.capture(&CaptureTarget::FullScreen).await.unwrap();
        assert_eq!(backend.current_page(), 0);
        backend.capture(&CaptureTarget::FullScreen).await.unwrap();
        assert_eq!(backend.current_page(), 1);
    }

    #[tokio::test]
    async fn test_window_capture_uses_window_geometry() {
        let backend = MockBackend::new();
        let window = backend.windows()[1].clone();

        let (image, region) = backend
            .capture(&CaptureTarget::Window(window.clone()))
            .await
            .unwrap();
        assert_eq!(region, window.geometry);
        assert_eq!(image.dimensions(), (480, 640));
    }

    #[tokio::test]
    async fn test_queued_capture_failures() {
        let backend = MockBackend::new();
        backend.fail_next_captures([WindowSystemError::Timeout { duration_ms: 10 }]);

        assert!(backend.capture(&CaptureTarget::FullScreen).await.is_err());
        assert!(backend.capture(&CaptureTarget::FullScreen).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_injection() {
        let backend = MockBackend::new().with_error(WindowSystemError::Unavailable {
            reason: "no display".to_string(),
        });

        assert!(backend.list_windows().await.is_err());
        assert!(backend.capture(&CaptureTarget::FullScreen).await.is_err());
        assert!(backend.send_key(None, "Right").await.is_err());
    }

    #[tokio::test]
    async fn test_focus_failure() {
        let backend = MockBackend::new().with_focus_failure();
        let window = backend.windows()[0].clone();

        assert!(backend.focus_window(&window).await.is_err());
        assert_eq!(backend.focus_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_delay() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(100));
        let start = tokio::time::Instant::now();

        backend.list_windows().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}

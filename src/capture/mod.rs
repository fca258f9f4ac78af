//! Window discovery and screenshot capture
//!
//! This module provides the capture side of the pipeline:
//!
//! - `WindowSystem`: trait for the display-server collaborator (list, focus,
//!   grab pixels, send keys), implemented by the X11 backend and the
//!   scriptable mock
//! - `WindowLocator`: live window listing and title resolution
//! - `Capturer`: one shot of a window or the full screen, written to disk
//!   with a content fingerprint
//! - `fingerprint`: exact and perceptual frame comparison

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    config::Config,
    error::{CaptureError, CaptureResult, Remediable, WindowSystemError},
    model::{BackendType, CaptureFrame, CaptureTarget, Fingerprint, Geometry, ImageFormat, WindowHandle},
    util::encode::encode_image,
};

pub mod fingerprint;
pub mod image_buffer;
pub mod locator;
pub mod matching;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "linux-x11"))]
pub mod x11_backend;

pub use image_buffer::ImageBuffer;
pub use locator::WindowLocator;
pub use matching::MatchStrategy;
pub use mock::MockBackend;
#[cfg(all(target_os = "linux", feature = "linux-x11"))]
pub use x11_backend::X11Backend;

/// Display-server collaborator
///
/// All implementations must be thread-safe (`Send + Sync`): sessions run as
/// background tasks while tool calls keep listing windows concurrently.
///
/// # Examples
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use auto_snap_mcp::{capture::*, error::WindowSystemError, model::*};
///
/// struct MyBackend;
///
/// #[async_trait]
/// impl WindowSystem for MyBackend {
///     async fn list_windows(&self) -> Result<Vec<WindowHandle>, WindowSystemError> {
///         Ok(vec![])
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait WindowSystem: Send + Sync {
    /// Lists top-level windows; one live query per call
    async fn list_windows(&self) -> Result<Vec<WindowHandle>, WindowSystemError>;

    /// Raises and focuses a window
    async fn focus_window(&self, window: &WindowHandle) -> Result<(), WindowSystemError>;

    /// Grabs the pixels of a target and reports the region actually captured
    async fn capture(
        &self,
        target: &CaptureTarget,
    ) -> Result<(ImageBuffer, Geometry), WindowSystemError>;

    /// Sends a key press, to `window` or to whatever has focus
    async fn send_key(
        &self,
        window: Option<&WindowHandle>,
        key: &str,
    ) -> Result<(), WindowSystemError>;

    /// Which backend this is
    fn backend(&self) -> BackendType;
}

/// Takes single screenshots and writes them to disk
#[derive(Clone)]
pub struct Capturer {
    system:       Arc<dyn WindowSystem>,
    format:       ImageFormat,
    quality:      u8,
    focus_settle: Duration,
}

impl Capturer {
    /// Creates a capturer writing PNG frames
    pub fn new(system: Arc<dyn WindowSystem>) -> Self {
        Self {
            system,
            format: ImageFormat::Png,
            quality: 95,
            focus_settle: Duration::ZERO,
        }
    }

    /// Creates a capturer using the configured format, quality and settle
    /// time
    pub fn from_config(system: Arc<dyn WindowSystem>, config: &Config) -> Self {
        Self {
            system,
            format: config.image_format,
            quality: config.image_quality,
            focus_settle: config.focus_settle,
        }
    }

    /// The underlying window system
    pub fn system(&self) -> &Arc<dyn WindowSystem> {
        &self.system
    }

    /// Frame encoding
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Focuses (for window targets) and grabs pixels without touching disk
    ///
    /// Returns the image, the captured region and whether focus failed.
    pub async fn grab(&self, target: &CaptureTarget) -> CaptureResult<(ImageBuffer, Geometry, bool)> {
        let mut degraded = false;

        if let CaptureTarget::Window(window) = target {
            match self.system.focus_window(window).await {
                Ok(()) => {
                    if !self.focus_settle.is_zero() {
                        tokio::time::sleep(self.focus_settle).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Could not focus {} ({}); capturing anyway",
                        target.describe(),
                        e.kind()
                    );
                    degraded = true;
                }
            }
        }

        let (image, region) = self
            .system
            .capture(target)
            .await
            .map_err(|e| CaptureError::from_window_system(target.describe(), e))?;

        Ok((image, region, degraded))
    }

    /// Captures `target` into `destination` and fingerprints the result
    ///
    /// # Errors
    ///
    /// - [`CaptureError::TargetUnavailable`] - window vanished or the grab
    ///   timed out (recoverable)
    /// - [`CaptureError::WriteFailure`] - destination not writable
    /// - [`CaptureError::WindowSystem`] - display server unusable
    pub async fn capture(
        &self,
        target: &CaptureTarget,
        destination: &Path,
        index: u32,
    ) -> CaptureResult<CaptureFrame> {
        let (image, region, degraded) = self.grab(target).await?;
        let captured_at = Utc::now();

        let (format, quality) = (self.format, self.quality);
        let path = destination.to_path_buf();
        let (size_bytes, fingerprint) = tokio::task::spawn_blocking(move || store(&image, &path, format, quality))
            .await
            .map_err(|e| CaptureError::WriteFailure {
                path:   destination.to_path_buf(),
                source: std::io::Error::other(format!("capture worker failed: {e}")),
            })??;

        tracing::debug!(
            "Captured {} -> {} ({} bytes, degraded: {})",
            target.describe(),
            destination.display(),
            size_bytes,
            degraded
        );

        Ok(CaptureFrame {
            index,
            path: destination.to_path_buf(),
            captured_at,
            fingerprint,
            region,
            degraded,
            size_bytes,
        })
    }
}

/// Encodes, writes and fingerprints one frame
fn store(
    image: &ImageBuffer,
    path: &Path,
    format: ImageFormat,
    quality: u8,
) -> CaptureResult<(u64, Fingerprint)> {
    let bytes = encode_image(image, format, quality)?;
    std::fs::write(path, &bytes).map_err(|source| CaptureError::WriteFailure {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((bytes.len() as u64, fingerprint::compute(image)))
}

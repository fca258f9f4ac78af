//! Per-page image processing: enhancement and OCR
//!
//! [`ImageProcessor`] turns accepted frames into [`ProcessedPage`]s. OCR
//! failures never fail a page; they are recorded on it so a document can
//! still be assembled from the images. The same processor also runs batch
//! jobs over arbitrary image files (see [`batch`]).

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::Config,
    error::{OcrError, ProcessingError, Remediable},
    model::{CaptureFrame, ProcessedPage},
};

pub mod batch;
pub mod enhance;
pub mod ocr;

pub use batch::{BatchOperation, BatchOptions, BatchReport};
pub use ocr::{MockOcrEngine, OcrEngine, TesseractEngine};

/// What to do with each page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Run OCR
    pub ocr:      bool,
    /// Keep an enhanced copy beside the frame
    pub enhance:  bool,
    /// OCR language, `None` for the configured default
    pub language: Option<String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            ocr:      true,
            enhance:  false,
            language: None,
        }
    }
}

/// Enhancement and OCR over captured frames
#[derive(Clone)]
pub struct ImageProcessor {
    ocr:              Arc<dyn OcrEngine>,
    default_language: String,
}

impl ImageProcessor {
    /// Creates a processor with `language` as the OCR default
    pub fn new(ocr: Arc<dyn OcrEngine>, language: impl Into<String>) -> Self {
        Self {
            ocr,
            default_language: language.into(),
        }
    }

    /// Creates a processor with the configured OCR language
    pub fn from_config(ocr: Arc<dyn OcrEngine>, config: &Config) -> Self {
        Self::new(ocr, config.ocr_language.clone())
    }

    /// The OCR engine
    pub fn ocr_engine(&self) -> &Arc<dyn OcrEngine> {
        &self.ocr
    }

    /// Default OCR language
    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Writes `<stem>_enhanced.png` beside `source`
    ///
    /// Re-running overwrites the previous output with identical pixels.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] if the source cannot be decoded or the
    /// output cannot be written.
    pub async fn enhance(&self, source: &Path) -> Result<PathBuf, ProcessingError> {
        let destination = enhance::enhanced_path(source);
        let (src, dst) = (source.to_path_buf(), destination.clone());

        tokio::task::spawn_blocking(move || enhance::enhance_file(&src, &dst))
            .await
            .map_err(|e| ProcessingError::Write {
                path:   destination.clone(),
                reason: format!("enhancement task failed: {e}"),
            })??;

        tracing::debug!("Enhanced {} -> {}", source.display(), destination.display());
        Ok(destination)
    }

    /// Extracts trimmed text from an image
    ///
    /// The image is enhanced into a scratch file first; if that fails the
    /// original is recognized instead.
    ///
    /// # Errors
    ///
    /// - [`OcrError::LanguageUnavailable`] - language pack not installed
    /// - [`OcrError::EngineFailure`] - engine missing, crashed or timed out
    pub async fn extract_text(&self, source: &Path, language: Option<&str>) -> Result<String, OcrError> {
        let language = language.unwrap_or(&self.default_language);
        let scratch = scratch_path(source);

        let (src, dst) = (source.to_path_buf(), scratch.clone());
        let enhanced = tokio::task::spawn_blocking(move || enhance::enhance_file(&src, &dst)).await;
        let input = match enhanced {
            Ok(Ok(())) => scratch.as_path(),
            Ok(Err(e)) => {
                tracing::warn!("Enhancement before OCR failed ({}); using the original", e);
                source
            }
            Err(e) => {
                tracing::warn!("Enhancement task failed ({}); using the original", e);
                source
            }
        };

        let result = self.ocr.recognize(input, language).await;

        if scratch.exists() {
            if let Err(e) = std::fs::remove_file(&scratch) {
                tracing::debug!("Failed to remove OCR scratch {}: {}", scratch.display(), e);
            }
        }

        let text = result?.trim().to_string();
        tracing::info!("Text extracted from {}: {} characters", source.display(), text.len());
        Ok(text)
    }

    /// Processes one frame, absorbing OCR failures into the page
    pub async fn process(&self, frame: &CaptureFrame, options: &ProcessOptions) -> ProcessedPage {
        let mut page = ProcessedPage::raw(frame.clone());

        if options.enhance {
            match self.enhance(&frame.path).await {
                Ok(path) => page.enhanced_path = Some(path),
                Err(e) => tracing::warn!("Page {} not enhanced: {}", frame.index, e),
            }
        }

        if options.ocr {
            match self.extract_text(&frame.path, options.language.as_deref()).await {
                Ok(text) => page.text = Some(text),
                Err(e) => {
                    tracing::warn!("OCR failed for page {}: {}", frame.index, e);
                    page.ocr_error = Some(e.payload());
                }
            }
        }

        page
    }

    /// Processes frames in index order
    pub async fn process_all(&self, frames: &[CaptureFrame], options: &ProcessOptions) -> Vec<ProcessedPage> {
        let mut ordered: Vec<&CaptureFrame> = frames.iter().collect();
        ordered.sort_by_key(|f| f.index);

        let mut pages = Vec::with_capacity(ordered.len());
        for frame in ordered {
            pages.push(self.process(frame, options).await);
        }
        pages
    }
}

fn scratch_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    source.with_file_name(format!(".{stem}_ocr_{}.png", uuid::Uuid::new_v4().simple()))
}

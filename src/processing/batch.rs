//! Batch operations over a set of image files
//!
//! Runs any of enhance, OCR, resize and duplicate detection over files the
//! caller points at. A file that fails one operation is recorded in the
//! report and the batch moves on.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ImageProcessor;
use crate::{
    capture::{ImageBuffer, fingerprint},
    error::{ErrorPayload, ProcessingError, Remediable},
};

/// Default bounding box for `resize`
pub const DEFAULT_MAX_WIDTH: u32 = 1920;
/// Default bounding box for `resize`
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

/// Suffixes of files this module (or enhancement) derives from a source
const DERIVED_SUFFIXES: &[&str] = &["_enhanced", "_resized"];

/// One batch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperation {
    /// Write `<stem>_enhanced.png` beside each image
    Enhance,
    /// Recognize text in each image
    Ocr,
    /// Write `<stem>_resized.<ext>` shrunk to fit the bounding box
    Resize,
    /// Report groups of pixel-identical images
    Deduplicate,
}

/// What a batch should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Operations to run
    pub operations: Vec<BatchOperation>,
    /// OCR language, `None` for the configured default
    pub language:   Option<String>,
    /// Resize bounding box width
    pub max_width:  u32,
    /// Resize bounding box height
    pub max_height: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            operations: vec![BatchOperation::Enhance],
            language:   None,
            max_width:  DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

impl BatchOptions {
    fn wants(&self, operation: BatchOperation) -> bool {
        self.operations.contains(&operation)
    }
}

/// Text read from one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileText {
    /// Source image
    pub path: PathBuf,
    /// Recognized text
    pub text: String,
}

/// One failed operation on one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Source image
    pub path:      PathBuf,
    /// Operation that failed
    pub operation: BatchOperation,
    /// Why
    pub error:     ErrorPayload,
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Source images visited, in order
    pub processed:  Vec<PathBuf>,
    /// Enhanced copies written
    pub enhanced:   Vec<PathBuf>,
    /// OCR results
    pub texts:      Vec<FileText>,
    /// Resized copies written
    pub resized:    Vec<PathBuf>,
    /// Groups of two or more pixel-identical images
    pub duplicates: Vec<Vec<PathBuf>>,
    /// Operations that failed
    pub failures:   Vec<BatchFailure>,
}

impl BatchReport {
    fn fail(&mut self, path: &Path, operation: BatchOperation, error: ErrorPayload) {
        tracing::error!("{:?} failed for {}: {}", operation, path.display(), error.message);
        self.failures.push(BatchFailure {
            path: path.to_path_buf(),
            operation,
            error,
        });
    }
}

/// Whether `path` is an output of a previous batch or enhancement
pub fn is_derived(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with('.') || DERIVED_SUFFIXES.iter().any(|s| stem.ends_with(s)))
}

/// Path of the resized sibling of `source`
pub fn resized_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    source.with_file_name(format!("{stem}_resized.{ext}"))
}

/// Shrinks `source` to fit `max_width` x `max_height` and writes the result
/// to [`resized_path`]
///
/// Aspect ratio is kept and images are never enlarged.
///
/// # Errors
///
/// - [`ProcessingError::Decode`] - source unreadable
/// - [`ProcessingError::Write`] - destination not writable
pub fn resize_file(source: &Path, max_width: u32, max_height: u32) -> Result<PathBuf, ProcessingError> {
    let image = image::open(source).map_err(|e| ProcessingError::Decode {
        path:   source.to_path_buf(),
        reason: e.to_string(),
    })?;

    let fits = image.width() <= max_width && image.height() <= max_height;
    let resized = if fits {
        image
    } else {
        image.resize(max_width, max_height, image::imageops::FilterType::Lanczos3)
    };

    let destination = resized_path(source);
    let format = image::ImageFormat::from_path(&destination).unwrap_or(image::ImageFormat::Png);
    let resized = match format {
        image::ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };
    resized
        .save_with_format(&destination, format)
        .map_err(|e| ProcessingError::Write {
            path:   destination.clone(),
            reason: e.to_string(),
        })?;
    Ok(destination)
}

/// Groups files whose decoded pixels are identical
///
/// Undecodable files are returned separately. Groups keep input order.
fn duplicate_groups(paths: &[PathBuf]) -> (Vec<Vec<PathBuf>>, Vec<(PathBuf, ProcessingError)>) {
    let mut by_checksum: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut first_seen: Vec<String> = Vec::new();
    let mut failures = Vec::new();

    for path in paths {
        match image::open(path) {
            Ok(image) => {
                let checksum = fingerprint::compute(&ImageBuffer::new(image)).checksum;
                let group = by_checksum.entry(checksum.clone()).or_default();
                if group.is_empty() {
                    first_seen.push(checksum);
                }
                group.push(path.clone());
            }
            Err(e) => failures.push((path.clone(), ProcessingError::Decode {
                path:   path.clone(),
                reason: e.to_string(),
            })),
        }
    }

    let groups = first_seen
        .into_iter()
        .filter_map(|checksum| by_checksum.remove(&checksum))
        .filter(|group| group.len() > 1)
        .collect();
    (groups, failures)
}

fn task_failure(path: &Path, e: tokio::task::JoinError) -> ProcessingError {
    ProcessingError::Write {
        path:   path.to_path_buf(),
        reason: format!("batch task failed: {e}"),
    }
}

impl ImageProcessor {
    /// Runs the requested operations over `paths`
    ///
    /// Derived files (`*_enhanced`, `*_resized`, hidden scratch files) are
    /// ignored so re-running a batch over the same directory does not
    /// process its own output.
    pub async fn process_batch(&self, paths: &[PathBuf], options: &BatchOptions) -> BatchReport {
        let sources: Vec<PathBuf> = paths.iter().filter(|p| !is_derived(p)).cloned().collect();
        let mut report = BatchReport::default();

        if options.wants(BatchOperation::Deduplicate) {
            let inputs = sources.clone();
            match tokio::task::spawn_blocking(move || duplicate_groups(&inputs)).await {
                Ok((groups, failures)) => {
                    report.duplicates = groups;
                    for (path, e) in failures {
                        report.fail(&path, BatchOperation::Deduplicate, e.payload());
                    }
                }
                Err(e) => tracing::error!("Duplicate detection failed: {}", e),
            }
        }

        for source in &sources {
            report.processed.push(source.clone());

            if options.wants(BatchOperation::Enhance) {
                match self.enhance(source).await {
                    Ok(path) => report.enhanced.push(path),
                    Err(e) => report.fail(source, BatchOperation::Enhance, e.payload()),
                }
            }

            if options.wants(BatchOperation::Ocr) {
                match self.extract_text(source, options.language.as_deref()).await {
                    Ok(text) => report.texts.push(FileText {
                        path: source.clone(),
                        text,
                    }),
                    Err(e) => report.fail(source, BatchOperation::Ocr, e.payload()),
                }
            }

            if options.wants(BatchOperation::Resize) {
                let (src, w, h) = (source.clone(), options.max_width, options.max_height);
                let resized = tokio::task::spawn_blocking(move || resize_file(&src, w, h))
                    .await
                    .map_err(|e| task_failure(source, e))
                    .and_then(|result| result);
                match resized {
                    Ok(path) => report.resized.push(path),
                    Err(e) => report.fail(source, BatchOperation::Resize, e.payload()),
                }
            }
        }

        tracing::info!(
            "Batch processed {} images ({} failures)",
            report.processed.len(),
            report.failures.len()
        );
        report
    }
}

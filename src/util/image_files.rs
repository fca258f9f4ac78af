//! Caller-supplied image sets
//!
//! Documents and batch jobs can be built from files the agent points at
//! instead of a capture session. Files are listed from a directory with a
//! shell-style pattern and validated before use: missing, unsupported or
//! undecodable files are skipped and reported rather than failing the job.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Extensions accepted as page images (lowercase, without the dot)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Whether `path` has a supported image extension (case-insensitive)
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Supported images directly inside `dir` whose file name matches `pattern`
///
/// Subdirectories are not searched. The result is sorted by file name.
///
/// # Errors
///
/// - [`InputError::InvalidPattern`] - `pattern` is not a valid glob
/// - [`InputError::DirectoryUnreadable`] - `dir` cannot be listed
pub fn list_images(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, InputError> {
    let matcher = glob::Pattern::new(pattern).map_err(|e| InputError::InvalidPattern {
        pattern: pattern.to_string(),
        reason:  e.to_string(),
    })?;

    let entries = std::fs::read_dir(dir).map_err(|source| InputError::DirectoryUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_supported(path))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| matcher.matches(name))
        })
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    tracing::debug!("Found {} images matching '{}' in {}", images.len(), pattern, dir.display());
    Ok(images)
}

/// A file left out of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedImage {
    /// File as given
    pub path:   PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of [`validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageValidation {
    /// Usable images, in input order
    pub valid:       Vec<PathBuf>,
    /// Skipped files
    pub rejected:    Vec<RejectedImage>,
    /// Combined size of the usable images
    pub total_bytes: u64,
}

impl ImageValidation {
    /// Fails when nothing usable is left
    ///
    /// # Errors
    ///
    /// Returns [`InputError::NoValidImages`] if `valid` is empty.
    pub fn require_any(&self) -> Result<(), InputError> {
        if self.valid.is_empty() {
            return Err(InputError::NoValidImages {
                rejected: self.rejected.len(),
            });
        }
        Ok(())
    }
}

/// Checks that every file exists, has a supported extension and decodes
///
/// Decoding reads the whole image, so run this off the async workers.
pub fn validate(paths: &[PathBuf]) -> ImageValidation {
    let mut result = ImageValidation::default();

    for path in paths {
        let reject = |reason: String| RejectedImage {
            path: path.clone(),
            reason,
        };

        let size = match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                result.rejected.push(reject("not a regular file".to_string()));
                continue;
            }
            Err(_) => {
                result.rejected.push(reject("file not found".to_string()));
                continue;
            }
        };

        if !is_supported(path) {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            result.rejected.push(reject(format!("unsupported format '.{ext}'")));
            continue;
        }

        let decoded = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(image::ImageError::IoError)
            .and_then(|reader| reader.decode());
        if let Err(e) = decoded {
            result.rejected.push(reject(format!("unreadable image: {e}")));
            continue;
        }

        result.total_bytes += size;
        result.valid.push(path.clone());
    }

    for rejected in &result.rejected {
        tracing::warn!("Skipping {}: {}", rejected.path.display(), rejected.reason);
    }
    if !result.rejected.is_empty() {
        tracing::info!(
            "{} of {} images usable, {} skipped",
            result.valid.len(),
            paths.len(),
            result.rejected.len()
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageBuffer;

    fn write_page(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        ImageBuffer::from_page_pattern(1, 40, 30).inner().save(&path).unwrap();
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_supported_extensions_ignore_case() {
        assert!(is_supported(Path::new("a.PNG")));
        assert!(is_supported(Path::new("b.jpeg")));
        assert!(is_supported(Path::new("c.Tiff")));
        assert!(!is_supported(Path::new("d.gif")));
        assert!(!is_supported(Path::new("noext")));
    }

    #[test]
    fn test_list_images_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_page(dir.path(), "page_010.png");
        write_page(dir.path(), "page_002.png");
        write_page(dir.path(), "cover.png");
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let all = list_images(dir.path(), "*").unwrap();
        assert_eq!(names(&all), vec!["cover.png", "page_002.png", "page_010.png"]);

        let pages = list_images(dir.path(), "page_*").unwrap();
        assert_eq!(names(&pages), vec!["page_002.png", "page_010.png"]);
    }

    #[test]
    fn test_list_images_errors() {
        let dir = tempfile::tempdir().unwrap();

        let bad = list_images(dir.path(), "[").unwrap_err();
        assert!(matches!(bad, InputError::InvalidPattern { .. }));

        let missing = list_images(&dir.path().join("nope"), "*").unwrap_err();
        assert!(matches!(missing, InputError::DirectoryUnreadable { .. }));
    }

    #[test]
    fn test_validate_skips_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_page(dir.path(), "good.png");
        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"not an image").unwrap();
        let gif = dir.path().join("anim.gif");
        std::fs::write(&gif, b"GIF89a").unwrap();
        let missing = dir.path().join("missing.png");

        let result = validate(&[missing.clone(), good.clone(), corrupt.clone(), gif.clone()]);

        assert_eq!(result.valid, vec![good.clone()]);
        assert_eq!(result.total_bytes, std::fs::metadata(&good).unwrap().len());
        let reasons: Vec<(&Path, &str)> = result
            .rejected
            .iter()
            .map(|r| (r.path.as_path(), r.reason.as_str()))
            .collect();
        assert_eq!(reasons[0], (missing.as_path(), "file not found"));
        assert!(reasons[1].1.starts_with("unreadable image"));
        assert_eq!(reasons[2], (gif.as_path(), "unsupported format '.gif'"));
        assert!(result.require_any().is_ok());
    }

    #[test]
    fn test_nothing_valid_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate(&[dir.path().join("missing.png")]);

        let err = result.require_any().unwrap_err();
        assert!(matches!(err, InputError::NoValidImages { rejected: 1 }));
    }
}

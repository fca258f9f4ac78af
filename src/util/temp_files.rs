//! Staging directory management for capture sessions
//!
//! Every session writes its frames into its own directory under the
//! configured temp root (`<temp_dir>/<session-id>/`), so concurrent sessions
//! never share files. Rejected shots are deleted immediately; accepted frames
//! stay until the session's artifact is finalized and only unreferenced files
//! are removed then.
//!
//! The root may be shared with other programs: only directories named by a
//! session id are ever pruned.
//!
//! # Examples
//!
//! ```
//! use auto_snap_mcp::util::temp_files::StagingArea;
//!
//! let root = tempfile::tempdir().unwrap();
//! let staging = StagingArea::new(root.path());
//!
//! let dir = staging.create_session_dir("abc").unwrap();
//! assert!(dir.ends_with("abc"));
//! assert!(dir.is_dir());
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use crate::{error::SessionError, model::ImageFormat};

/// Per-session staging directories under one root
#[derive(Clone, Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Creates a staging area rooted at `root` (created lazily)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `<root>/<id>/`
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Staging`] if the directory cannot be created.
    pub fn create_session_dir(&self, id: &str) -> Result<PathBuf, SessionError> {
        let dir = self.root.join(id);
        fs::create_dir_all(&dir).map_err(|source| SessionError::Staging {
            path: dir.clone(),
            source,
        })?;

        tracing::debug!("Created staging directory {}", dir.display());
        Ok(dir)
    }

    /// Path for the n-th raw shot of a session
    pub fn candidate_path(dir: &Path, attempt: u32, format: ImageFormat) -> PathBuf {
        dir.join(format!("shot_{:05}.{}", attempt, format.extension()))
    }

    /// Deletes a single staged file, logging failures
    pub fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staged file {}: {}", path.display(), e);
            }
        }
    }

    /// Removes every file in `dir` not listed in `keep`
    ///
    /// The directory itself is removed when it ends up empty. Returns the
    /// number of files deleted.
    pub fn cleanup_session(dir: &Path, keep: &[PathBuf]) -> usize {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Nothing to clean in {}: {}", dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        let mut remaining = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                remaining += 1;
                continue;
            }
            if keep.iter().any(|k| k == &path) {
                remaining += 1;
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    remaining += 1;
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }

        if remaining == 0 {
            if let Err(e) = fs::remove_dir(dir) {
                tracing::debug!("Could not remove {}: {}", dir.display(), e);
            }
        }

        tracing::debug!("Removed {} staged files from {}", removed, dir.display());
        removed
    }

    /// Deletes session directories under the root older than `retention`
    ///
    /// Only directories whose name is a session id (a UUID) are touched;
    /// anything else under the root is left alone. Returns the number of
    /// directories removed.
    pub fn prune_stale(&self, retention: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
            return 0;
        };

        let mut pruned = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let modified = entry.metadata().and_then(|m| m.modified());
            let stale = matches!(modified, Ok(t) if t < cutoff);
            if !path.is_dir() || !stale || !is_session_dir(&path) {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    pruned += 1;
                    tracing::info!("Pruned stale staging directory {}", path.display());
                }
                Err(e) => tracing::warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
        pruned
    }
}

fn is_session_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| uuid::Uuid::parse_str(name).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[test]
    fn test_create_session_dir() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(root.path());

        let dir = staging.create_session_dir("s1").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, root.path().join("s1"));
        assert_eq!(staging.root(), root.path());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(root.path());

        let a = staging.create_session_dir("a").unwrap();
        let b = staging.create_session_dir("b").unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
    }

    #[test]
    fn test_candidate_path() {
        let path = StagingArea::candidate_path(Path::new("/tmp/s"), 7, ImageFormat::Png);
        assert_eq!(path, PathBuf::from("/tmp/s/shot_00007.png"));
    }

    #[test]
    fn test_discard_missing_file_is_quiet() {
        let root = tempfile::tempdir().unwrap();
        StagingArea::discard(&root.path().join("nope.png"));
    }

    #[test]
    fn test_cleanup_keeps_referenced_files() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(root.path());
        let dir = staging.create_session_dir("s").unwrap();

        let keep = dir.join("page_001.png");
        let drop = dir.join("page_001_enhanced.png");
        fs::write(&keep, b"a").unwrap();
        fs::write(&drop, b"b").unwrap();

        let removed = StagingArea::cleanup_session(&dir, std::slice::from_ref(&keep));
        assert_eq!(removed, 1);
        assert!(keep.exists());
        assert!(!drop.exists());
        assert!(dir.exists());
    }

    #[test]
    fn test_cleanup_removes_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(root.path());
        let dir = staging.create_session_dir("s").unwrap();
        fs::write(dir.join("shot_00001.png"), b"a").unwrap();

        assert_eq!(StagingArea::cleanup_session(&dir, &[]), 1);
        assert!(!dir.exists());
    }

    #[test]
    fn test_prune_stale_respects_retention() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(root.path());
        let id = session_id();
        staging.create_session_dir(&id).unwrap();

        assert_eq!(staging.prune_stale(Duration::from_secs(3600)), 0);
        assert!(root.path().join(&id).exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(staging.prune_stale(Duration::ZERO), 1);
        assert!(!root.path().join(&id).exists());
    }

    #[test]
    fn test_prune_stale_leaves_foreign_directories() {
        let root = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(root.path());

        let foreign = root.path().join("my_unrelated_project").join("src");
        fs::create_dir_all(&foreign).unwrap();
        fs::write(foreign.join("important.txt"), b"keep me").unwrap();
        let stale_session = staging.create_session_dir(&session_id()).unwrap();
        fs::write(stale_session.join("page_001.png"), b"a").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let pruned = staging.prune_stale(Duration::from_millis(10));

        assert_eq!(pruned, 1);
        assert!(!stale_session.exists());
        assert!(foreign.join("important.txt").exists());
    }
}

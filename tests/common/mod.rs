//! Shared test utilities for integration tests

#![allow(dead_code)]

pub mod mcp_harness;

use std::{path::Path, sync::Arc, time::Duration};

use auto_snap_mcp::{
    capture::{Capturer, MockBackend},
    config::Config,
    session::SessionManager,
};

/// Configuration writing everything under `root`
///
/// Date subdirectories are off so artifact paths are predictable, and the
/// focus settle time is zero so paused-clock tests only see session timing.
pub fn test_config(root: &Path) -> Config {
    Config {
        output_dir: root.join("out"),
        temp_dir: root.join("staging"),
        use_date_subdirs: false,
        focus_settle: Duration::ZERO,
        ..Config::default()
    }
}

/// A session manager over a shared mock backend
pub struct SessionFixture {
    /// Manager under test
    pub sessions: SessionManager,
    /// Backend, for inspecting captures and keys
    pub backend:  Arc<MockBackend>,
    /// Configuration the manager runs with
    pub config:   Arc<Config>,
    /// Keeps the directories alive
    pub dir:      tempfile::TempDir,
}

impl SessionFixture {
    /// Creates a fixture; `tweak` adjusts the configuration
    pub fn new(backend: MockBackend, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);
        let config = Arc::new(config);

        let backend = Arc::new(backend);
        let capturer = Capturer::from_config(backend.clone(), &config);
        let sessions = SessionManager::new(config.clone(), capturer);

        Self {
            sessions,
            backend,
            config,
            dir,
        }
    }
}

//! Registry of running capture sessions
//!
//! Each session runs as its own tokio task driving a
//! [`SequenceController`]. The registry keeps the control and status
//! channels; its lock is never held across an `.await`.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use super::controller::{SequenceController, SessionParams, Signal};
use crate::{
    capture::{Capturer, MatchStrategy, WindowLocator},
    config::Config,
    error::{ResolutionError, SessionError},
    model::{CaptureFrame, CaptureTarget, PageTarget, SessionSummary},
    util::temp_files::StagingArea,
};

/// How to start a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRequest {
    /// Title query
    pub query:                   Option<String>,
    /// Explicit window id (takes precedence over `query`)
    pub window_id:               Option<String>,
    /// How `query` is matched
    pub strategy:                MatchStrategy,
    /// Capture the whole screen
    pub full_screen:             bool,
    /// Use the full screen when the query matches nothing
    pub fallback_to_full_screen: bool,
    /// Page count; `None` runs until stopped
    pub pages:                   Option<u32>,
    /// Title for page names; defaults to the window title
    pub title:                   Option<String>,
    /// Overrides the configured navigation key
    pub navigation_key:          Option<String>,
    /// Overrides the configured delay between pages
    pub shot_delay:              Option<Duration>,
}

struct SessionEntry {
    signal: watch::Sender<Signal>,
    status: watch::Receiver<SessionSummary>,
    task:   Option<JoinHandle<SessionSummary>>,
}

/// Owns all capture sessions of the server
#[derive(Clone)]
pub struct SessionManager {
    config:   Arc<Config>,
    capturer: Capturer,
    locator:  WindowLocator,
    staging:  StagingArea,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl SessionManager {
    /// Creates a manager staging frames under `config.temp_dir`
    pub fn new(config: Arc<Config>, capturer: Capturer) -> Self {
        let locator = WindowLocator::new(capturer.system().clone());
        let staging = StagingArea::new(config.temp_dir.clone());
        Self {
            config,
            capturer,
            locator,
            staging,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Configuration snapshot
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Resolves what a request should capture
    ///
    /// Returns the target plus a warning when the full-screen fallback was
    /// used.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidRequest`] - no target given
    /// - [`SessionError::Resolution`] - no window matched and no fallback
    pub async fn resolve_target(
        &self,
        request: &SessionRequest,
    ) -> Result<(CaptureTarget, Option<String>), SessionError> {
        if request.full_screen {
            return Ok((CaptureTarget::FullScreen, None));
        }

        if let Some(id) = &request.window_id {
            let window = self.locator.resolve_id(id).await?;
            return Ok((CaptureTarget::Window(window), None));
        }

        let Some(query) = &request.query else {
            return Err(SessionError::InvalidRequest {
                reason: "no window query, window id or full_screen given".to_string(),
            });
        };

        match self.locator.resolve_with(query, request.strategy).await {
            Ok(window) => Ok((CaptureTarget::Window(window), None)),
            Err(ResolutionError::NotFound { query, .. }) if request.fallback_to_full_screen => {
                let warning = format!("no window matched '{query}', capturing the full screen");
                tracing::warn!("{}", warning);
                Ok((CaptureTarget::FullScreen, Some(warning)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Starts a session in the background
    ///
    /// The target is resolved before anything is written to disk.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidRequest`] - zero pages or no target
    /// - [`SessionError::Resolution`] - target not found
    /// - [`SessionError::Staging`] - staging directory not creatable
    pub async fn start(&self, request: SessionRequest) -> Result<SessionSummary, SessionError> {
        if request.pages == Some(0) {
            return Err(SessionError::InvalidRequest {
                reason: "page count must be at least 1".to_string(),
            });
        }

        let (target, warning) = self.resolve_target(&request).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let staging_dir = self.staging.create_session_dir(&id)?;

        let mut params = SessionParams::from_config(target, PageTarget::from(request.pages), &self.config);
        if request.title.is_some() {
            params.title = request.title.clone();
        }
        if request.navigation_key.is_some() {
            params.navigation_key = request.navigation_key.clone();
        }
        if let Some(delay) = request.shot_delay {
            params.shot_delay = delay;
        }

        let mut controller =
            SequenceController::new(id.clone(), params, self.config.clone(), self.capturer.clone(), staging_dir);
        if let Some(warning) = warning {
            controller.warn(warning);
        }
        controller.arm();
        let initial = controller.summary();

        let (signal_tx, signal_rx) = watch::channel(Signal::Run);
        let (status_tx, status_rx) = watch::channel(initial.clone());
        let task = tokio::spawn(controller.run(signal_rx, status_tx));

        self.sessions.lock().insert(
            id.clone(),
            SessionEntry {
                signal: signal_tx,
                status: status_rx,
                task:   Some(task),
            },
        );

        tracing::info!("Started session {} for {}", id, initial.target.describe());
        Ok(initial)
    }

    fn receiver(&self, id: &str) -> Result<watch::Receiver<SessionSummary>, SessionError> {
        self.sessions
            .lock()
            .get(id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Latest snapshot of a session
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown ids.
    pub fn status(&self, id: &str) -> Result<SessionSummary, SessionError> {
        Ok(self.receiver(id)?.borrow().clone())
    }

    /// Snapshots of every known session
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut all: Vec<SessionSummary> = self
            .sessions
            .lock()
            .values()
            .map(|entry| entry.status.borrow().clone())
            .collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Accepted frames of a session
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown ids.
    pub fn frames(&self, id: &str) -> Result<Vec<CaptureFrame>, SessionError> {
        Ok(self.status(id)?.frames)
    }

    /// Waits until a session finishes
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown ids.
    pub async fn wait(&self, id: &str) -> Result<SessionSummary, SessionError> {
        let mut rx = self.receiver(id)?;
        let result = rx.wait_for(SessionSummary::is_finished).await.map(|s| s.clone());
        match result {
            Ok(summary) => Ok(summary),
            // The task is gone; its last published snapshot is final
            Err(_) => Ok(rx.borrow().clone()),
        }
    }

    /// Stops (keeping frames) or cancels a session and waits for it
    ///
    /// Stopping a finished session returns its final snapshot unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown ids.
    pub async fn stop(&self, id: &str, cancel: bool) -> Result<SessionSummary, SessionError> {
        {
            let sessions = self.sessions.lock();
            let entry = sessions
                .get(id)
                .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
            if !entry.status.borrow().is_finished() {
                let signal = if cancel { Signal::Cancel } else { Signal::Stop };
                let _ = entry.signal.send(signal);
            }
        }
        self.wait(id).await
    }

    /// Deletes staged files of a finished session except `keep`
    ///
    /// The session stays registered while its staging directory exists and
    /// is forgotten once the directory is gone.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotFound`] - unknown id
    /// - [`SessionError::InvalidRequest`] - session still running
    pub fn cleanup(&self, id: &str, keep: &[PathBuf]) -> Result<usize, SessionError> {
        let summary = self.status(id)?;
        if !summary.is_finished() {
            return Err(SessionError::InvalidRequest {
                reason: format!("session {id} is still running"),
            });
        }

        let removed = StagingArea::cleanup_session(&summary.staging_dir, keep);
        if !summary.staging_dir.exists() {
            self.sessions.lock().remove(id);
        }
        tracing::info!("Cleaned up {} staged files of session {}", removed, id);
        Ok(removed)
    }

    /// Cancels every running session and waits for their tasks
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<SessionSummary>> = {
            let mut sessions = self.sessions.lock();
            sessions
                .values_mut()
                .filter_map(|entry| {
                    let _ = entry.signal.send(Signal::Cancel);
                    entry.task.take()
                })
                .collect()
        };

        let count = tasks.len();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!("Session task failed: {}", e);
            }
        }
        tracing::info!("Shut down {} sessions", count);
    }
}

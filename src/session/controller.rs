//! Tick-driven capture sequencing
//!
//! A [`SequenceController`] owns one session. Each [`tick`] performs at most
//! one capture, gates it against the last accepted frame and reports how
//! long to wait before the next tick. [`run`] drives ticks, sleeping between
//! them while watching for stop and cancel signals, so a signal is observed
//! at the next tick boundary.
//!
//! [`tick`]: SequenceController::tick
//! [`run`]: SequenceController::run

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Local, Utc};
use tokio::{sync::watch, time::Instant};

use crate::{
    capture::{Capturer, fingerprint},
    config::{CollisionPolicy, Config},
    error::{CaptureError, ErrorPayload, Remediable, SessionError},
    model::{CaptureFrame, CaptureTarget, PageTarget, SessionState, SessionSummary, StopReason},
    naming::{self, NamingContext},
    util::temp_files::StagingArea,
};

/// Per-session pacing and stop conditions
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// What to capture
    pub target:               CaptureTarget,
    /// How many pages to collect
    pub pages:                PageTarget,
    /// Title used for `{title}` in page names
    pub title:                Option<String>,
    /// Key sent after each accepted page; `None` leaves paging to the user
    pub navigation_key:       Option<String>,
    /// Pause after an accepted page
    pub shot_delay:           Duration,
    /// Pause after a duplicate or a retried failure
    pub poll_interval:        Duration,
    /// Longest wait for the page to change
    pub max_wait_per_page:    Duration,
    /// Longest total runtime
    pub max_session_duration: Duration,
    /// Transient failures tolerated before aborting
    pub max_capture_retries:  u32,
    /// Similarity at or above which a frame repeats the previous page
    pub duplicate_threshold:  f32,
}

impl SessionParams {
    /// Parameters with pacing taken from `config`
    pub fn from_config(target: CaptureTarget, pages: PageTarget, config: &Config) -> Self {
        Self {
            title: target.title().map(str::to_string),
            target,
            pages,
            navigation_key: config.navigation_key.clone(),
            shot_delay: config.shot_delay,
            poll_interval: config.poll_interval,
            max_wait_per_page: config.max_wait_per_page,
            max_session_duration: config.max_session_duration,
            max_capture_retries: config.max_capture_retries,
            duplicate_threshold: config.duplicate_threshold,
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Sleep this long, then tick again
    Wait(Duration),
    /// The session reached a terminal state
    Done,
}

/// Control signal delivered to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep going
    Run,
    /// Finish with the frames accepted so far
    Stop,
    /// Abort, keeping accepted frames on disk
    Cancel,
}

/// Capture state machine for one session
pub struct SequenceController {
    id:                String,
    params:            SessionParams,
    config:            Arc<Config>,
    capturer:          Capturer,
    staging_dir:       PathBuf,
    state:             SessionState,
    frames:            Vec<CaptureFrame>,
    rejected:          u32,
    degraded:          u32,
    retries:           u32,
    attempts:          u32,
    warnings:          Vec<String>,
    stop_reason:       Option<StopReason>,
    error:             Option<ErrorPayload>,
    started_at:        DateTime<Utc>,
    finished_at:       Option<DateTime<Utc>>,
    naming_now:        DateTime<Local>,
    armed_at:          Option<Instant>,
    page_wait_started: Option<Instant>,
}

impl SequenceController {
    /// Creates an idle controller writing into `staging_dir`
    pub fn new(
        id: impl Into<String>,
        params: SessionParams,
        config: Arc<Config>,
        capturer: Capturer,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            params,
            config,
            capturer,
            staging_dir,
            state: SessionState::Idle,
            frames: Vec::new(),
            rejected: 0,
            degraded: 0,
            retries: 0,
            attempts: 0,
            warnings: Vec::new(),
            stop_reason: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            naming_now: Local::now(),
            armed_at: None,
            page_wait_started: None,
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accepted frames in index order
    pub fn frames(&self) -> &[CaptureFrame] {
        &self.frames
    }

    /// Records a non-fatal problem
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!("Session {}: {}", self.id, warning);
        self.warnings.push(warning);
    }

    /// Idle → Armed; starts the session clocks
    pub fn arm(&mut self) {
        if self.state != SessionState::Idle {
            return;
        }
        let now = Instant::now();
        self.armed_at = Some(now);
        self.page_wait_started = Some(now);
        self.started_at = Utc::now();
        self.state = SessionState::Armed;
        tracing::info!(
            "Session {} armed: {} ({})",
            self.id,
            self.params.target.describe(),
            match self.params.pages.requested() {
                Some(n) => format!("{n} pages"),
                None => "until stopped".to_string(),
            }
        );
    }

    /// Snapshot for status queries
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id:                  self.id.clone(),
            state:               self.state,
            target:              self.params.target.clone(),
            requested_pages:     self.params.pages.requested(),
            frames:              self.frames.clone(),
            rejected_duplicates: self.rejected,
            degraded_frames:     self.degraded,
            capture_retries:     self.retries,
            warnings:            self.warnings.clone(),
            stop_reason:         self.stop_reason,
            error:               self.error.clone(),
            staging_dir:         self.staging_dir.clone(),
            started_at:          self.started_at,
            finished_at:         self.finished_at,
        }
    }

    /// Finishes with the frames accepted so far
    pub fn request_stop(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!("Session {} stop requested", self.id);
            self.finalize(StopReason::StopRequested);
        }
    }

    /// Aborts; accepted frames stay on disk
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!("Session {} cancelled", self.id);
            self.abort(StopReason::Cancelled, None);
        }
    }

    /// Advances the state machine by one step
    pub async fn tick(&mut self) -> Tick {
        match self.state {
            SessionState::Idle => {
                self.arm();
                return Tick::Wait(Duration::ZERO);
            }
            SessionState::Armed => self.state = SessionState::Capturing,
            SessionState::Closed | SessionState::Aborted => return Tick::Done,
            SessionState::Capturing | SessionState::Gating | SessionState::Finalizing => {}
        }

        if self.session_expired() {
            self.warn(format!(
                "session time limit of {}s reached",
                self.params.max_session_duration.as_secs()
            ));
            self.finalize(StopReason::SessionTimeout);
            return Tick::Done;
        }

        self.attempts += 1;
        let candidate = StagingArea::candidate_path(&self.staging_dir, self.attempts, self.capturer.format());
        let index = self.frames.len() as u32 + 1;

        let frame = match self.capturer.capture(&self.params.target, &candidate, index).await {
            Ok(frame) => frame,
            Err(e) => return self.on_capture_error(e),
        };

        self.state = SessionState::Gating;
        let wait = self.gate(frame).await;
        self.bounded(wait)
    }

    /// Drives ticks until the session ends, publishing every snapshot
    pub async fn run(
        mut self,
        mut signals: watch::Receiver<Signal>,
        status: watch::Sender<SessionSummary>,
    ) -> SessionSummary {
        self.arm();
        status.send_replace(self.summary());

        loop {
            match *signals.borrow_and_update() {
                Signal::Run => {}
                Signal::Stop => self.request_stop(),
                Signal::Cancel => self.cancel(),
            }
            if self.state.is_terminal() {
                break;
            }

            let tick = self.tick().await;
            status.send_replace(self.summary());

            match tick {
                Tick::Done => break,
                Tick::Wait(wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        Ok(()) = signals.changed() => {}
                    }
                }
            }
        }

        let summary = self.summary();
        status.send_replace(summary.clone());
        tracing::info!(
            "Session {} {:?}: {} pages, {} duplicates rejected, {} warnings",
            summary.id,
            summary.stop_reason,
            summary.accepted(),
            summary.rejected_duplicates,
            summary.warnings.len()
        );
        summary
    }

    fn session_expired(&self) -> bool {
        self.armed_at
            .is_some_and(|t| t.elapsed() >= self.params.max_session_duration)
    }

    /// Caps a wait so the session deadline is checked on time
    fn bounded(&self, tick: Tick) -> Tick {
        match (tick, self.armed_at) {
            (Tick::Wait(wait), Some(armed)) => {
                let remaining = self
                    .params
                    .max_session_duration
                    .saturating_sub(armed.elapsed());
                Tick::Wait(wait.min(remaining))
            }
            (tick, _) => tick,
        }
    }

    fn on_capture_error(&mut self, error: CaptureError) -> Tick {
        if error.is_recoverable() && self.retries < self.params.max_capture_retries {
            self.retries += 1;
            self.warn(format!(
                "capture failed ({}), retry {}/{}",
                error, self.retries, self.params.max_capture_retries
            ));
            self.state = SessionState::Capturing;
            return self.bounded(Tick::Wait(self.params.poll_interval));
        }

        tracing::error!("Session {} aborted: {}", self.id, error);
        self.abort(StopReason::Failed, Some(error.payload()));
        Tick::Done
    }

    async fn gate(&mut self, frame: CaptureFrame) -> Tick {
        let duplicate = self.frames.last().is_some_and(|last| {
            fingerprint::is_near_duplicate(&last.fingerprint, &frame.fingerprint, self.params.duplicate_threshold)
        });

        if duplicate {
            self.rejected += 1;
            StagingArea::discard(&frame.path);
            tracing::debug!("Session {}: shot {} repeats page {}", self.id, self.attempts, self.frames.len());

            if self.page_wait_expired() {
                self.warn(format!(
                    "page did not change within {}s",
                    self.params.max_wait_per_page.as_secs_f32()
                ));
                self.finalize(StopReason::PageWaitExpired);
                return Tick::Done;
            }

            self.state = SessionState::Capturing;
            return Tick::Wait(self.params.poll_interval);
        }

        if let Err(e) = self.accept(frame) {
            tracing::error!("Session {} aborted: {}", self.id, e);
            self.abort(StopReason::Failed, Some(e.payload()));
            return Tick::Done;
        }

        if self.params.pages.is_reached(self.frames.len()) {
            self.finalize(StopReason::PageCountReached);
            return Tick::Done;
        }

        if let Some(key) = self.params.navigation_key.clone() {
            let window = match &self.params.target {
                CaptureTarget::Window(window) => Some(window.clone()),
                CaptureTarget::FullScreen => None,
            };
            if let Err(e) = self.capturer.system().send_key(window.as_ref(), &key).await {
                self.warn(format!("could not advance page: {e}"));
            }
        }

        self.state = SessionState::Capturing;
        Tick::Wait(self.params.shot_delay)
    }

    fn page_wait_expired(&self) -> bool {
        self.page_wait_started
            .is_some_and(|t| t.elapsed() >= self.params.max_wait_per_page)
    }

    /// Moves a distinct frame into its page name and records it
    fn accept(&mut self, mut frame: CaptureFrame) -> Result<(), SessionError> {
        let index = self.frames.len() as u32 + 1;

        let ctx = NamingContext::from_config(&self.config, self.naming_now)
            .with_page(index)
            .with_title(self.params.title.as_deref())
            .with_session(self.id.as_str());
        let destination = naming::resolve_collision(
            self.staging_dir.join(naming::page_file_name(&self.config, &ctx)),
            CollisionPolicy::Suffix,
        )?;

        std::fs::rename(&frame.path, &destination).map_err(|source| {
            SessionError::Capture(CaptureError::WriteFailure {
                path: destination.clone(),
                source,
            })
        })?;

        frame.index = index;
        frame.path = destination;
        if frame.degraded {
            self.degraded += 1;
        }
        tracing::info!("Session {}: accepted page {} -> {}", self.id, index, frame.path.display());

        self.frames.push(frame);
        self.page_wait_started = Some(Instant::now());
        Ok(())
    }

    fn finalize(&mut self, reason: StopReason) {
        self.state = SessionState::Finalizing;
        if let Some(requested) = self.params.pages.requested() {
            let unmet = (requested as usize).saturating_sub(self.frames.len());
            if unmet > 0 {
                self.warn(format!("{unmet} page(s) unmet"));
            }
        }
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        self.state = SessionState::Closed;
    }

    fn abort(&mut self, reason: StopReason, error: Option<ErrorPayload>) {
        self.stop_reason = Some(reason);
        self.error = error;
        self.finished_at = Some(Utc::now());
        self.state = SessionState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capture::{MockBackend, mock::PageAdvance},
        error::WindowSystemError,
        model::ImageFormat,
    };

    struct Harness {
        controller: SequenceController,
        backend:    Arc<MockBackend>,
        _dir:       tempfile::TempDir,
    }

    fn harness(backend: MockBackend, pages: PageTarget, tweak: impl FnOnce(&mut SessionParams)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            focus_settle: Duration::ZERO,
            navigation_key: Some("Next".to_string()),
            ..Config::default()
        });
        let backend = Arc::new(backend);
        let target = CaptureTarget::Window(backend.windows()[1].clone());
        let mut params = SessionParams::from_config(target, pages, &config);
        tweak(&mut params);

        let capturer = Capturer::from_config(backend.clone(), &config);
        let controller = SequenceController::new("s1", params, config, capturer, dir.path().to_path_buf());
        Harness {
            controller,
            backend,
            _dir: dir,
        }
    }

    async fn drive(controller: &mut SequenceController) {
        controller.arm();
        while let Tick::Wait(wait) = controller.tick().await {
            tokio::time::sleep(wait).await;
        }
    }

    fn staged_files(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_requested_pages() {
        let mut h = harness(MockBackend::new().with_pages(5, PageAdvance::OnKey), PageTarget::Exactly(3), |_| {});

        drive(&mut h.controller).await;
        let summary = h.controller.summary();

        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.stop_reason, Some(StopReason::PageCountReached));
        let indices: Vec<u32> = summary.frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(summary.rejected_duplicates, 0);
        assert!(summary.warnings.is_empty());
        // No key after the last page
        assert_eq!(h.backend.sent_keys(), vec!["Next", "Next"]);
        assert_eq!(
            staged_files(&summary.staging_dir),
            vec!["page_001.png", "page_002.png", "page_003.png"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_page_times_out_with_unmet_warning() {
        let mut h = harness(MockBackend::new().with_pages(1, PageAdvance::Static), PageTarget::Exactly(3), |p| {
            p.max_wait_per_page = Duration::from_secs(3);
        });

        drive(&mut h.controller).await;
        let summary = h.controller.summary();

        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.stop_reason, Some(StopReason::PageWaitExpired));
        assert_eq!(summary.accepted(), 1);
        assert!(summary.rejected_duplicates > 0);
        assert!(summary.warnings.iter().any(|w| w == "2 page(s) unmet"));
        // Rejected shots never linger in staging
        assert_eq!(staged_files(&summary.staging_dir), vec!["page_001.png"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_rejection_is_idempotent() {
        let mut h = harness(MockBackend::new().with_pages(2, PageAdvance::EveryCapture(3)), PageTarget::Exactly(2), |p| {
            p.navigation_key = None;
        });

        drive(&mut h.controller).await;
        let summary = h.controller.summary();

        assert_eq!(summary.accepted(), 2);
        // Captures 2 and 3 repeat page 1
        assert_eq!(summary.rejected_duplicates, 2);
        assert_eq!(h.backend.capture_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let h = harness(MockBackend::new().with_pages(3, PageAdvance::OnKey), PageTarget::Exactly(2), |_| {});
        h.backend.fail_next_captures([
            WindowSystemError::Timeout { duration_ms: 5000 },
            WindowSystemError::Timeout { duration_ms: 5000 },
        ]);
        let mut controller = h.controller;

        drive(&mut controller).await;
        let summary = controller.summary();

        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.capture_retries, 2);
        assert_eq!(summary.accepted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_aborts() {
        let h = harness(MockBackend::new(), PageTarget::Exactly(2), |p| {
            p.max_capture_retries = 1;
        });
        let id = h.backend.windows()[1].id.clone();
        h.backend.close_window(&id);
        let mut controller = h.controller;

        drive(&mut controller).await;
        let summary = controller.summary();

        assert_eq!(summary.state, SessionState::Aborted);
        assert_eq!(summary.stop_reason, Some(StopReason::Failed));
        assert_eq!(summary.error.unwrap().kind, "TargetUnavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_aborts_immediately() {
        let mut h = harness(
            MockBackend::new().with_error(WindowSystemError::PermissionDenied {
                reason: "no access".to_string(),
            }),
            PageTarget::Exactly(2),
            |_| {},
        );

        drive(&mut h.controller).await;
        let summary = h.controller.summary();

        assert_eq!(summary.state, SessionState::Aborted);
        assert_eq!(summary.capture_retries, 0);
        assert!(summary.frames.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_after_first_page_aborts_and_keeps_frames() {
        let mut h = harness(MockBackend::new().with_pages(3, PageAdvance::OnKey), PageTarget::Exactly(3), |_| {});
        h.controller.arm();
        assert!(matches!(h.controller.tick().await, Tick::Wait(_)));
        assert_eq!(h.controller.frames().len(), 1);

        // A directory squatting on the next shot's name makes the write fail
        let staging = h._dir.path().to_path_buf();
        std::fs::create_dir(StagingArea::candidate_path(&staging, 2, ImageFormat::Png)).unwrap();

        while let Tick::Wait(wait) = h.controller.tick().await {
            tokio::time::sleep(wait).await;
        }
        let summary = h.controller.summary();

        assert_eq!(summary.state, SessionState::Aborted);
        assert_eq!(summary.stop_reason, Some(StopReason::Failed));
        assert_eq!(summary.error.unwrap().kind, "WriteFailure");
        assert_eq!(summary.capture_retries, 0);
        assert_eq!(summary.frames.len(), 1);
        assert!(summary.frames[0].path.exists());
        assert!(summary.frames[0].path.ends_with("page_001.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_timeout_keeps_frames() {
        let mut h = harness(MockBackend::new().with_pages(100, PageAdvance::OnKey), PageTarget::UntilStopped, |p| {
            p.max_session_duration = Duration::from_millis(3500);
        });

        drive(&mut h.controller).await;
        let summary = h.controller.summary();

        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.stop_reason, Some(StopReason::SessionTimeout));
        // Shots at t = 0, 1, 2, 3s
        assert_eq!(summary.accepted(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_is_a_warning() {
        let mut h = harness(MockBackend::new().with_pages(3, PageAdvance::EveryCapture(1)), PageTarget::Exactly(2), |p| {
            p.navigation_key = Some(String::new());
        });

        drive(&mut h.controller).await;
        let summary = h.controller.summary();

        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(summary.accepted(), 2);
        assert!(summary.warnings.iter().any(|w| w.starts_with("could not advance page")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_cancel_are_terminal() {
        let mut h = harness(MockBackend::new(), PageTarget::UntilStopped, |_| {});
        h.controller.arm();
        h.controller.tick().await;
        h.controller.request_stop();

        assert_eq!(h.controller.state(), SessionState::Closed);
        assert_eq!(h.controller.tick().await, Tick::Done);

        // Cancelling a finished session changes nothing
        h.controller.cancel();
        assert_eq!(h.controller.summary().stop_reason, Some(StopReason::StopRequested));
    }
}

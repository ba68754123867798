//! Poll session: the owned driver of repeated status checks for one job.
//!
//! [`SessionCore`] is the synchronous state machine. It does no I/O and can be
//! fed reports and errors directly. [`PollSession`] wraps it in a tokio task
//! that performs the first check immediately, then one check per interval.
//!
//! At most one of `on_complete` / `on_error` fires per session, and neither
//! fires after [`PollSession::stop`]. Both paths race for the same one-shot
//! [`TerminalLatch`]; whoever flips it first wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::models::analysis::AnalysisResult;
use crate::models::job::{JobStatus, JobStatusReport};
use crate::services::client::{AnalysisBackend, ClientError};
use crate::services::heuristic::{classify, AnalysisFailure, Classification};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_RETRY_CEILING: u32 = 3;
/// Shorter intervals are raised to this when a session starts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Consecutive transport failures tolerated; one more is terminal.
    pub retry_ceiling: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_ceiling: DEFAULT_RETRY_CEILING,
        }
    }
}

/// Receives lifecycle notifications from a session.
///
/// Called from the session's task. Implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn on_progress(&self, _job_id: &str, _status: JobStatus, _progress: u8) {}

    /// A status check failed but the retry budget is not exhausted yet.
    fn on_retry(&self, _job_id: &str, _attempt: u32, _ceiling: u32, _error: &str) {}

    fn on_complete(&self, job_id: &str, result: AnalysisResult);

    fn on_error(&self, job_id: &str, failure: AnalysisFailure);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Polling,
    /// A status check is in flight; ticks and manual wakes are no-ops.
    AwaitingResponse,
    Completed,
    Failed,
    /// Torn down by the caller. No callback was delivered.
    Stopped,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Stopped
        )
    }
}

/// One-shot flag shared between a session's task and its handle.
#[derive(Debug, Clone, Default)]
pub struct TerminalLatch(Arc<AtomicBool>);

impl TerminalLatch {
    /// Returns `true` only for the first caller.
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a finished check means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Progress { status: JobStatus, progress: u8 },
    Retrying { attempt: u32, ceiling: u32, error: String },
    Completed(AnalysisResult),
    Failed(AnalysisFailure),
    /// Arrived after the session ended, or without a matching `begin_check`.
    Ignored,
}

/// Point-in-time view of a session for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub job_id: String,
    pub phase: SessionPhase,
    pub status: JobStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub retry_ceiling: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn is_retrying(&self) -> bool {
        self.retry_count > 0 && !self.phase.is_terminal()
    }

    /// Short human-readable state, e.g. `"analyzing (40%)"` or
    /// `"Connection issue (retry 2/3)"`.
    pub fn status_line(&self) -> String {
        match self.phase {
            _ if self.is_retrying() => {
                format!("Connection issue (retry {}/{})", self.retry_count, self.retry_ceiling)
            }
            SessionPhase::Failed => self
                .last_error
                .clone()
                .unwrap_or_else(|| "Analysis failed".to_string()),
            SessionPhase::Stopped => "stopped".to_string(),
            _ => format!("{} ({}%)", self.status, self.progress),
        }
    }
}

/// The session state machine. Owned by exactly one driver.
#[derive(Debug)]
pub struct SessionCore {
    job_id: String,
    phase: SessionPhase,
    status: JobStatus,
    progress: u8,
    retry_count: u32,
    retry_ceiling: u32,
    last_error: Option<String>,
    latch: TerminalLatch,
}

impl SessionCore {
    pub fn new(job_id: impl Into<String>, retry_ceiling: u32) -> Self {
        Self::with_latch(job_id, retry_ceiling, TerminalLatch::default())
    }

    pub fn with_latch(job_id: impl Into<String>, retry_ceiling: u32, latch: TerminalLatch) -> Self {
        Self {
            job_id: job_id.into(),
            phase: SessionPhase::Idle,
            status: JobStatus::Pending,
            progress: 0,
            retry_count: 0,
            retry_ceiling,
            last_error: None,
            latch,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current phase, reporting `Stopped` once the latch was fired from outside.
    pub fn phase(&self) -> SessionPhase {
        if self.latch.is_fired() && !self.phase.is_terminal() {
            SessionPhase::Stopped
        } else {
            self.phase
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn latch(&self) -> &TerminalLatch {
        &self.latch
    }

    /// Enter `AwaitingResponse`. Returns `false` (and changes nothing) if a
    /// check is already in flight or the session has ended.
    pub fn begin_check(&mut self) -> bool {
        if self.latch.is_fired() {
            self.settle_stopped();
            return false;
        }
        match self.phase {
            SessionPhase::Idle | SessionPhase::Polling => {
                self.phase = SessionPhase::AwaitingResponse;
                true
            }
            _ => false,
        }
    }

    /// Apply the result of the check started by [`begin_check`](Self::begin_check).
    pub fn finish_check(&mut self, outcome: Result<JobStatusReport, ClientError>) -> CheckOutcome {
        if self.latch.is_fired() {
            self.settle_stopped();
            return CheckOutcome::Ignored;
        }
        if self.phase != SessionPhase::AwaitingResponse {
            return CheckOutcome::Ignored;
        }

        match outcome {
            Ok(report) => {
                self.retry_count = 0;
                self.last_error = None;
                self.apply(classify(report))
            }
            Err(e) if e.is_fatal() => self.fail(AnalysisFailure::status_check(&e)),
            Err(e) => {
                self.retry_count += 1;
                self.last_error = Some(e.to_string());
                if self.retry_count <= self.retry_ceiling {
                    self.phase = SessionPhase::Polling;
                    CheckOutcome::Retrying {
                        attempt: self.retry_count,
                        ceiling: self.retry_ceiling,
                        error: e.to_string(),
                    }
                } else {
                    self.fail(AnalysisFailure::status_check(&e))
                }
            }
        }
    }

    /// End the session without a callback. Returns `true` if this call ended it.
    pub fn stop(&mut self) -> bool {
        let fired = self.latch.fire();
        self.settle_stopped();
        fired
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            job_id: self.job_id.clone(),
            phase: self.phase(),
            status: self.status,
            progress: self.progress,
            retry_count: self.retry_count,
            retry_ceiling: self.retry_ceiling,
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        }
    }

    fn apply(&mut self, classification: Classification) -> CheckOutcome {
        match classification {
            Classification::Running { status, progress } => {
                self.phase = SessionPhase::Polling;
                self.status = status;
                self.progress = progress;
                CheckOutcome::Progress { status, progress }
            }
            Classification::Completed(result) => {
                if !self.latch.fire() {
                    self.settle_stopped();
                    return CheckOutcome::Ignored;
                }
                self.phase = SessionPhase::Completed;
                self.status = JobStatus::Completed;
                self.progress = 100;
                CheckOutcome::Completed(result)
            }
            Classification::Failed(failure) => self.fail(failure),
        }
    }

    fn fail(&mut self, failure: AnalysisFailure) -> CheckOutcome {
        if !self.latch.fire() {
            self.settle_stopped();
            return CheckOutcome::Ignored;
        }
        self.phase = SessionPhase::Failed;
        self.last_error = Some(failure.message.clone());
        CheckOutcome::Failed(failure)
    }

    fn settle_stopped(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Stopped;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Check now, then every interval until terminal.
    Continuous,
    /// Check once and end, used to refresh jobs already known to be finished.
    Once,
}

/// Handle to a running poll session. Dropping it stops the session.
pub struct PollSession {
    job_id: String,
    mode: PollMode,
    latch: TerminalLatch,
    in_flight: Arc<AtomicBool>,
    wake: Arc<Notify>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    task: JoinHandle<()>,
}

impl PollSession {
    /// Start polling `job_id`. Must be called from within a tokio runtime.
    pub fn start(
        job_id: impl Into<String>,
        backend: Arc<dyn AnalysisBackend>,
        observer: Arc<dyn SessionObserver>,
        config: PollConfig,
    ) -> Self {
        Self::spawn(job_id.into(), PollMode::Continuous, backend, observer, config)
    }

    /// Perform a single status check without arming the timer. A transport
    /// error fails the session at once, since no later check would retry it.
    pub fn refresh_once(
        job_id: impl Into<String>,
        backend: Arc<dyn AnalysisBackend>,
        observer: Arc<dyn SessionObserver>,
        config: PollConfig,
    ) -> Self {
        Self::spawn(job_id.into(), PollMode::Once, backend, observer, config)
    }

    fn spawn(
        job_id: String,
        mode: PollMode,
        backend: Arc<dyn AnalysisBackend>,
        observer: Arc<dyn SessionObserver>,
        config: PollConfig,
    ) -> Self {
        let interval = config.interval.max(MIN_POLL_INTERVAL);
        if interval != config.interval {
            tracing::warn!(
                job_id = %job_id,
                requested_ms = config.interval.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Poll interval below minimum, clamping"
            );
        }
        // A single refresh has no later check to retry on.
        let retry_ceiling = match mode {
            PollMode::Continuous => config.retry_ceiling,
            PollMode::Once => 0,
        };

        let latch = TerminalLatch::default();
        let core = SessionCore::with_latch(job_id.clone(), retry_ceiling, latch.clone());
        let (tx, _rx) = watch::channel(core.snapshot());
        let snapshot = Arc::new(tx);
        let in_flight = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        tracing::info!(
            job_id = %job_id,
            mode = ?mode,
            interval_ms = interval.as_millis() as u64,
            retry_ceiling,
            "Starting analysis poll session"
        );

        let driver = Driver {
            core,
            mode,
            interval,
            backend,
            observer,
            in_flight: in_flight.clone(),
            wake: wake.clone(),
            snapshot: snapshot.clone(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            job_id,
            mode,
            latch,
            in_flight,
            wake,
            snapshot,
            task,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    /// Cancel the timer and any in-flight check. No callback fires.
    /// Returns `true` if the session was still live.
    pub fn stop(&self) -> bool {
        let stopped = self.latch.fire();
        self.task.abort();
        if stopped {
            self.snapshot.send_modify(|s| {
                s.phase = SessionPhase::Stopped;
                s.updated_at = Utc::now();
            });
            tracing::info!(job_id = %self.job_id, "Analysis poll session stopped");
        }
        stopped
    }

    /// Wake the session for an immediate check. A no-op returning `false`
    /// while a check is in flight or after the session ended.
    pub fn check_now(&self) -> bool {
        if self.is_finished() || self.in_flight.load(Ordering::Acquire) {
            return false;
        }
        self.wake.notify_one();
        true
    }

    /// The session will issue no further checks.
    pub fn is_finished(&self) -> bool {
        self.latch.is_fired() || self.task.is_finished()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Resolves once the session reaches a terminal phase.
    pub async fn finished(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|s| s.phase.is_terminal())
            .await
            .map(|s| SessionSnapshot::clone(&s));
        // The sender lives in `self`, so the channel cannot close while we wait.
        result.unwrap_or_else(|_| self.snapshot())
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PollSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSession")
            .field("job_id", &self.job_id)
            .field("mode", &self.mode)
            .field("phase", &self.snapshot.borrow().phase)
            .finish()
    }
}

struct Driver {
    core: SessionCore,
    mode: PollMode,
    interval: Duration,
    backend: Arc<dyn AnalysisBackend>,
    observer: Arc<dyn SessionObserver>,
    in_flight: Arc<AtomicBool>,
    wake: Arc<Notify>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
}

impl Driver {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if !self.core.begin_check() {
                break;
            }

            self.in_flight.store(true, Ordering::Release);
            self.publish();
            metrics::counter!("analysis_status_checks_total").increment(1);

            let started = Instant::now();
            let result = self.backend.fetch_status(self.core.job_id()).await;
            self.in_flight.store(false, Ordering::Release);

            let outcome = self.core.finish_check(result);
            self.deliver(outcome);
            self.publish();

            if self.core.phase().is_terminal() {
                break;
            }
            if self.mode == PollMode::Once {
                self.core.stop();
                self.publish();
                tracing::debug!(job_id = %self.core.job_id(), "Single status refresh finished");
                break;
            }

            // Ticks that fell inside the request are dropped, not replayed.
            if started.elapsed() >= self.interval {
                ticker.reset();
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {
                    tracing::debug!(job_id = %self.core.job_id(), "Manual status check requested");
                    ticker.reset();
                }
            }
        }
    }

    fn deliver(&self, outcome: CheckOutcome) {
        let job_id = self.core.job_id();
        match outcome {
            CheckOutcome::Progress { status, progress } => {
                tracing::debug!(job_id = %job_id, status = %status, progress, "Analysis in progress");
                self.observer.on_progress(job_id, status, progress);
            }
            CheckOutcome::Retrying {
                attempt,
                ceiling,
                error,
            } => {
                tracing::warn!(
                    job_id = %job_id,
                    retry_count = attempt,
                    retry_ceiling = ceiling,
                    error = %error,
                    "Status check failed, will retry"
                );
                metrics::counter!("analysis_status_retries_total").increment(1);
                self.observer.on_retry(job_id, attempt, ceiling, &error);
            }
            CheckOutcome::Completed(result) => {
                tracing::info!(job_id = %job_id, "Analysis completed");
                metrics::counter!("analysis_jobs_completed_total").increment(1);
                self.observer.on_complete(job_id, result);
            }
            CheckOutcome::Failed(failure) => {
                tracing::error!(
                    job_id = %job_id,
                    kind = %failure.kind,
                    error = %failure,
                    "Analysis failed"
                );
                metrics::counter!("analysis_jobs_failed_total").increment(1);
                self.observer.on_error(job_id, failure);
            }
            CheckOutcome::Ignored => {
                tracing::debug!(job_id = %job_id, "Discarding status response for ended session");
            }
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.core.snapshot());
    }
}

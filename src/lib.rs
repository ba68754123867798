//! Analysis Job Tracker
//!
//! This library submits long-running AI document-analysis jobs, polls their
//! status on a fixed interval, and decides from a noisy status feed whether a
//! job is finished, failed, or still running. Completion and failure are
//! delivered exactly once per session through a [`SessionObserver`].

pub mod config;
pub mod models;
pub mod services;

pub use config::{ConfigError, TrackerConfig};
pub use models::analysis::{AnalysisResult, CustomAnalysisKind, CustomAnalysisRequest, SoapNote};
pub use models::job::{JobStatus, JobStatusReport};
pub use services::client::{AnalysisBackend, AnalysisClient, ClientError};
pub use services::credentials::{CredentialSource, RotatingToken, StaticToken};
pub use services::heuristic::{classify, AnalysisFailure, Classification, FailureKind};
pub use services::registry::{BindAction, PollSessionRegistry};
pub use services::session::{
    PollConfig, PollSession, SessionObserver, SessionPhase, SessionSnapshot,
};

/// Register descriptions for the counters this crate emits.
///
/// Call once after installing a `metrics` recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "analysis_status_checks_total",
        "Total analysis status checks issued"
    );
    metrics::describe_counter!(
        "analysis_status_retries_total",
        "Status checks that failed and were retried"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Analysis jobs observed as completed"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Analysis jobs observed as failed"
    );
}

//! Decides whether a status report means the job is running, done, or dead.
//!
//! The declared `status` lags behind the result the backend writes, so data
//! presence is checked first and the flag only afterwards. Rule order:
//!
//! 1. usable result with no unavailability marker -> `Completed`
//! 2. "validation failed" error plus any result field -> `Completed` (partial)
//! 3. `status == completed` -> `Completed` (result may be empty)
//! 4. `status == failed` -> `Failed`
//! 5. unavailability marker in result text -> `Failed` (configuration)
//! 6. otherwise -> `Running`

use serde::Serialize;
use strum::Display;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{JobStatus, JobStatusReport};
use crate::services::client::ClientError;

/// Placeholder phrases the backend writes into result text when its AI
/// provider is unreachable or misconfigured.
pub const UNAVAILABILITY_MARKERS: [&str; 3] =
    ["currently unavailable", "API configuration", "encountered an error"];

const VALIDATION_FAILED: &str = "validation failed";
const DEFAULT_FAILURE: &str = "Analysis failed";
const STATUS_CHECK_PREFIX: &str = "Failed to check analysis status";

const QUOTA_MESSAGE: &str = "The AI analysis quota has been exceeded. Wait a few minutes before \
     retrying, or review the analysis service plan and billing limits.";
const INVALID_KEY_MESSAGE: &str = "The AI analysis service rejected its API key. Ask an \
     administrator to update the analysis service API configuration.";
const UNAVAILABLE_MESSAGE: &str = "AI analysis is currently unavailable. Check the analysis \
     service API configuration and try again.";

/// Outcome of classifying one status report.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Running { status: JobStatus, progress: u8 },
    Completed(AnalysisResult),
    Failed(AnalysisFailure),
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Classification::Running { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Server declared the job failed.
    JobFailed,
    /// Provider rate limit or quota (`429` / `quota`).
    QuotaExceeded,
    /// Provider rejected the backend's key (`API_KEY_INVALID`).
    InvalidCredential,
    /// Result text carried a placeholder instead of analysis.
    ServiceUnavailable,
    /// The retry budget for status checks ran out.
    StatusCheckExhausted,
    /// No bearer credential was available.
    Unauthenticated,
}

/// Terminal failure handed to `on_error`. Displays as its user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AnalysisFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Status checks could not be completed.
    pub fn status_check(cause: &ClientError) -> Self {
        let kind = match cause {
            ClientError::Unauthenticated => FailureKind::Unauthenticated,
            _ => FailureKind::StatusCheckExhausted,
        };
        Self::new(kind, format!("{STATUS_CHECK_PREFIX}: {cause}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Classify a status report. First matching rule wins.
pub fn classify(report: JobStatusReport) -> Classification {
    let JobStatusReport {
        status,
        progress,
        result,
        error,
    } = report;

    if let Some(result) = result.as_ref() {
        if result.has_usable_content() && find_marker(result).is_none() {
            return Classification::Completed(result.clone());
        }
    }

    if let (Some(err), Some(result)) = (error.as_deref(), result.as_ref()) {
        if err.to_ascii_lowercase().contains(VALIDATION_FAILED) && result.has_any_field() {
            tracing::debug!(error = %err, "Accepting partial result despite validation failure");
            return Classification::Completed(result.clone());
        }
    }

    match status {
        JobStatus::Completed => {
            return Classification::Completed(result.unwrap_or_default());
        }
        JobStatus::Failed => {
            return Classification::Failed(declared_failure(error.as_deref()));
        }
        _ => {}
    }

    if let Some(marker_text) = result.as_ref().and_then(find_marker) {
        let combined = match error.as_deref() {
            Some(err) => format!("{marker_text}\n{err}"),
            None => marker_text.to_string(),
        };
        let failure = provider_failure(&combined)
            .unwrap_or_else(|| AnalysisFailure::new(FailureKind::ServiceUnavailable, UNAVAILABLE_MESSAGE));
        return Classification::Failed(failure);
    }

    Classification::Running { status, progress }
}

/// First result text that contains an unavailability marker.
fn find_marker(result: &AnalysisResult) -> Option<&str> {
    result
        .text_fields()
        .find(|text| UNAVAILABILITY_MARKERS.iter().any(|m| text.contains(m)))
}

/// Quota / key problems reported by the AI provider, picked out by substring.
fn provider_failure(text: &str) -> Option<AnalysisFailure> {
    if text.contains("429") || text.to_ascii_lowercase().contains("quota") {
        Some(AnalysisFailure::new(FailureKind::QuotaExceeded, QUOTA_MESSAGE))
    } else if text.contains("API_KEY_INVALID") {
        Some(AnalysisFailure::new(FailureKind::InvalidCredential, INVALID_KEY_MESSAGE))
    } else {
        None
    }
}

fn declared_failure(error: Option<&str>) -> AnalysisFailure {
    let error = error.map(str::trim).filter(|e| !e.is_empty());
    error
        .and_then(provider_failure)
        .unwrap_or_else(|| AnalysisFailure::new(FailureKind::JobFailed, error.unwrap_or(DEFAULT_FAILURE)))
}

//! Shared test doubles for session, registry and client tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_tracker::{
    AnalysisBackend, AnalysisFailure, AnalysisResult, ClientError, JobStatus, JobStatusReport,
    SessionObserver,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Notify;

/// One scripted reply from [`ScriptedBackend`].
pub enum Step {
    Report(JobStatusReport),
    /// Retryable failure (HTTP 503 with this message).
    Transport(&'static str),
    Unauthenticated,
    /// Hold the request open until the gate is notified, then reply.
    Gated(Arc<Notify>, JobStatusReport),
}

/// Backend that replays a script, then keeps returning `fallback`.
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    fallback: JobStatusReport,
    calls: Mutex<Vec<String>>,
    triggers: Mutex<Vec<String>>,
    fail_trigger: Mutex<bool>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>, fallback: JobStatusReport) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
            triggers: Mutex::new(Vec::new()),
            fail_trigger: Mutex::new(false),
        })
    }

    /// Always reports the job as still analyzing.
    pub fn running() -> Arc<Self> {
        Self::new(Vec::new(), running(50))
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, job_id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|id| *id == job_id).count()
    }

    pub fn triggers(&self) -> Vec<String> {
        self.triggers.lock().unwrap().clone()
    }

    pub fn fail_next_trigger(&self) {
        *self.fail_trigger.lock().unwrap() = true;
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport, ClientError> {
        self.calls.lock().unwrap().push(job_id.to_string());
        let step = self.steps.lock().unwrap().pop_front();

        match step {
            None => Ok(self.fallback.clone()),
            Some(Step::Report(report)) => Ok(report),
            Some(Step::Transport(message)) => Err(ClientError::Api {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: message.to_string(),
            }),
            Some(Step::Unauthenticated) => Err(ClientError::Unauthenticated),
            Some(Step::Gated(gate, report)) => {
                gate.notified().await;
                Ok(report)
            }
        }
    }

    async fn trigger_analysis(&self, job_id: &str) -> Result<(), ClientError> {
        if std::mem::take(&mut *self.fail_trigger.lock().unwrap()) {
            return Err(ClientError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "could not queue job".to_string(),
            });
        }
        self.triggers.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(String, JobStatus, u8),
    Retry(String, u32, u32),
    Complete(String, AnalysisResult),
    Error(String, AnalysisFailure),
}

/// Observer that records every callback in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<AnalysisResult> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Complete(_, result) => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<AnalysisFailure> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(_, failure) => Some(failure),
                _ => None,
            })
            .collect()
    }

    pub fn retries(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Retry(..)))
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.completions().len() + self.errors().len()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_progress(&self, job_id: &str, status: JobStatus, progress: u8) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Progress(job_id.to_string(), status, progress));
    }

    fn on_retry(&self, job_id: &str, attempt: u32, ceiling: u32, _error: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Retry(job_id.to_string(), attempt, ceiling));
    }

    fn on_complete(&self, job_id: &str, result: AnalysisResult) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Complete(job_id.to_string(), result));
    }

    fn on_error(&self, job_id: &str, failure: AnalysisFailure) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(job_id.to_string(), failure));
    }
}

pub fn running(progress: u8) -> JobStatusReport {
    JobStatusReport::new(JobStatus::Analyzing, progress)
}

pub fn with_summary(status: JobStatus, summary: &str) -> JobStatusReport {
    JobStatusReport::new(status, 90).with_result(AnalysisResult {
        summary: Some(summary.to_string()),
        ..Default::default()
    })
}

/// Let spawned session tasks run their pending work.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

use std::sync::Arc;

use crate::models::job::JobStatus;
use crate::services::client::{AnalysisBackend, ClientError};
use crate::services::session::{PollConfig, PollSession, SessionObserver, SessionSnapshot};

/// What [`PollSessionRegistry::bind`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindAction {
    /// Started a polling session for a running job.
    Polling,
    /// Job already terminal: issued a single refresh check.
    Refreshing,
    /// Same subject, nothing to do.
    Unchanged,
}

struct Binding {
    subject: String,
    status: JobStatus,
    session: PollSession,
}

/// Keeps at most one poll session alive, bound to the subject the caller is
/// currently looking at. The previous session is always stopped before a new
/// one starts.
pub struct PollSessionRegistry {
    backend: Arc<dyn AnalysisBackend>,
    observer: Arc<dyn SessionObserver>,
    config: PollConfig,
    current: Option<Binding>,
}

impl PollSessionRegistry {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        observer: Arc<dyn SessionObserver>,
        config: PollConfig,
    ) -> Self {
        Self {
            backend,
            observer,
            config,
            current: None,
        }
    }

    /// Bind to `subject_id` whose last known status is `initial_status`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&mut self, subject_id: &str, initial_status: JobStatus) -> BindAction {
        if let Some(binding) = &self.current {
            if binding.subject == subject_id && Self::is_same_binding(binding, initial_status) {
                tracing::debug!(
                    subject = %subject_id,
                    status = %initial_status,
                    "Subject unchanged, keeping current session"
                );
                return BindAction::Unchanged;
            }
        }

        self.unbind();

        let (session, action) = if initial_status.is_terminal() {
            let session = PollSession::refresh_once(
                subject_id,
                self.backend.clone(),
                self.observer.clone(),
                self.config,
            );
            (session, BindAction::Refreshing)
        } else {
            let session = PollSession::start(
                subject_id,
                self.backend.clone(),
                self.observer.clone(),
                self.config,
            );
            (session, BindAction::Polling)
        };

        self.current = Some(Binding {
            subject: subject_id.to_string(),
            status: initial_status,
            session,
        });
        action
    }

    /// Stop the current session, ask the backend to analyze `subject_id`
    /// again, and start a fresh session for it.
    ///
    /// On error no session is left running.
    pub async fn reanalyze(&mut self, subject_id: &str) -> Result<(), ClientError> {
        self.unbind();
        self.backend.trigger_analysis(subject_id).await?;

        let session = PollSession::start(
            subject_id,
            self.backend.clone(),
            self.observer.clone(),
            self.config,
        );
        self.current = Some(Binding {
            subject: subject_id.to_string(),
            status: JobStatus::Pending,
            session,
        });
        Ok(())
    }

    /// Stop and forget the current session without any callback.
    /// Returns the subject it was bound to.
    pub fn unbind(&mut self) -> Option<String> {
        let binding = self.current.take()?;
        binding.session.stop();
        tracing::debug!(subject = %binding.subject, "Unbound analysis poll session");
        Some(binding.subject)
    }

    /// Wake the current session early. See [`PollSession::check_now`].
    pub fn check_now(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|binding| binding.session.check_now())
    }

    pub fn subject(&self) -> Option<&str> {
        self.current.as_ref().map(|b| b.subject.as_str())
    }

    pub fn session(&self) -> Option<&PollSession> {
        self.current.as_ref().map(|b| &b.session)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session().map(PollSession::snapshot)
    }

    /// A re-bind is a no-op when the status is the one already bound, or when
    /// both are "still running" and the existing session is live.
    fn is_same_binding(binding: &Binding, status: JobStatus) -> bool {
        binding.status == status
            || (binding.status.is_running()
                && status.is_running()
                && !binding.session.is_finished())
    }
}

impl Drop for PollSessionRegistry {
    fn drop(&mut self) {
        self.unbind();
    }
}

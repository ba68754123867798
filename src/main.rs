use std::process::ExitCode;
use std::sync::Arc;

use analysis_tracker::{
    describe_metrics, AnalysisBackend, AnalysisClient, AnalysisFailure, AnalysisResult,
    BindAction, CustomAnalysisKind, CustomAnalysisRequest, JobStatus, PollSessionRegistry,
    SessionObserver, TrackerConfig,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Track an AI document-analysis job until it completes or fails.
#[derive(Debug, Parser)]
#[command(name = "analysis-tracker", version)]
struct Cli {
    /// Document / job id
    job_id: String,

    /// Submit the job for analysis before tracking it
    #[arg(long)]
    analyze: bool,

    /// Run a supplementary analysis (soap | oasis) instead of tracking
    #[arg(long)]
    custom: Option<CustomAnalysisKind>,

    /// OASIS item id to score (repeatable; only with --custom oasis)
    #[arg(long = "item")]
    items: Vec<String>,

    /// Last status known to the caller; a terminal status triggers a single refresh
    #[arg(long, default_value = "pending")]
    status: JobStatus,
}

type Outcome = Result<AnalysisResult, AnalysisFailure>;

/// Logs progress and forwards the terminal outcome to `main`.
struct CliObserver {
    done: mpsc::UnboundedSender<Outcome>,
}

impl SessionObserver for CliObserver {
    fn on_progress(&self, job_id: &str, status: JobStatus, progress: u8) {
        tracing::info!(job_id = %job_id, status = %status, progress, "Analysis progress");
    }

    fn on_retry(&self, job_id: &str, attempt: u32, ceiling: u32, _error: &str) {
        tracing::info!(job_id = %job_id, "Connection issue (retry {}/{})", attempt, ceiling);
    }

    fn on_complete(&self, job_id: &str, result: AnalysisResult) {
        self.forward(job_id, Ok(result));
    }

    fn on_error(&self, job_id: &str, failure: AnalysisFailure) {
        self.forward(job_id, Err(failure));
    }
}

impl CliObserver {
    fn forward(&self, job_id: &str, outcome: Outcome) {
        if let Err(e) = self.done.send(outcome) {
            tracing::debug!(job_id = %job_id, outcome = ?e.0, "Outcome dropped, receiver closed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Load configuration from environment
    let config = TrackerConfig::from_env()?;
    describe_metrics();

    let client = Arc::new(AnalysisClient::from_config(&config)?);

    if let Some(kind) = cli.custom {
        let request = match kind {
            CustomAnalysisKind::Soap => CustomAnalysisRequest::soap(),
            CustomAnalysisKind::Oasis => CustomAnalysisRequest::oasis(cli.items),
        };
        let result = client.custom_analysis(&cli.job_id, &request).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut status = cli.status;
    if cli.analyze {
        client.trigger_analysis(&cli.job_id).await?;
        status = JobStatus::Pending;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let backend: Arc<dyn AnalysisBackend> = client;
    let mut registry =
        PollSessionRegistry::new(backend, Arc::new(CliObserver { done: tx }), config.poll_config());

    let action = registry.bind(&cli.job_id, status);
    tracing::info!(job_id = %cli.job_id, action = ?action, "Tracking analysis job");

    let finished = async {
        match registry.session() {
            Some(session) => session.finished().await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        outcome = rx.recv() => outcome,
        snapshot = finished => {
            // Callbacks are delivered before the terminal snapshot is published.
            match rx.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    tracing::info!(
                        job_id = %cli.job_id,
                        phase = %snapshot.phase,
                        state = %snapshot.status_line(),
                        "Session ended without a terminal outcome"
                    );
                    None
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // Dropping the registry stops the session.
            tracing::info!(job_id = %cli.job_id, "Interrupted, stopping session");
            return Ok(ExitCode::from(130));
        }
    };

    let code = match outcome {
        Some(Ok(result)) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            ExitCode::SUCCESS
        }
        Some(Err(failure)) => {
            eprintln!("{failure}");
            ExitCode::FAILURE
        }
        None if action == BindAction::Refreshing => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    };

    Ok(code)
}

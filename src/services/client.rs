use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use garde::Validate;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::config::TrackerConfig;
use crate::models::analysis::{AnalysisResult, CustomAnalysisRequest};
use crate::models::job::JobStatusReport;
use crate::services::credentials::{CredentialSource, StaticToken};

const UNKNOWN_ERROR: &str = "Unknown error";

/// The slice of the analysis API a poll session depends on.
///
/// [`AnalysisClient`] is the HTTP implementation; tests substitute scripted ones.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// One status check. No retries, no caching.
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport, ClientError>;

    /// Ask the backend to (re)start analysis of a job.
    async fn trigger_analysis(&self, job_id: &str) -> Result<(), ClientError>;
}

/// HTTP client for the analysis service.
pub struct AnalysisClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CustomAnalysisResponse {
    Wrapped { result: AnalysisResult },
    Bare(AnalysisResult),
}

impl AnalysisClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("analysis-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Build a client from config, using the configured token as a fixed credential.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, ClientError> {
        Self::with_credentials(config, Arc::new(StaticToken::new(config.analysis_api_token.clone())))
    }

    pub fn with_credentials(
        config: &TrackerConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ClientError> {
        Self::new(
            config.analysis_api_url.clone(),
            credentials,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// `GET /analysis/{jobId}/status`
    pub async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport, ClientError> {
        let token = self.token()?;
        let url = self.endpoint(&format!("analysis/{}/status", check_job_id(job_id)?));

        tracing::debug!(job_id = %job_id, "Checking analysis status");

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let response = ensure_success(response).await?;

        Ok(response.json::<JobStatusReport>().await?)
    }

    /// `POST /analyze/{jobId}`. Any 2xx counts as accepted.
    pub async fn trigger_analysis(&self, job_id: &str) -> Result<(), ClientError> {
        let token = self.token()?;
        let url = self.endpoint(&format!("analyze/{}", check_job_id(job_id)?));

        tracing::info!(job_id = %job_id, "Requesting document analysis");

        let response = self.http.post(&url).bearer_auth(token).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// `POST /custom/{jobId}` with `{type, items?}`.
    pub async fn custom_analysis(
        &self,
        job_id: &str,
        request: &CustomAnalysisRequest,
    ) -> Result<AnalysisResult, ClientError> {
        request.validate()?;
        let token = self.token()?;
        let url = self.endpoint(&format!("custom/{}", check_job_id(job_id)?));

        tracing::info!(
            job_id = %job_id,
            kind = %request.kind,
            items = request.items.len(),
            "Requesting custom analysis"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body = response.text().await?;
        match serde_json::from_str::<CustomAnalysisResponse>(&body)? {
            CustomAnalysisResponse::Wrapped { result } | CustomAnalysisResponse::Bare(result) => {
                Ok(result)
            }
        }
    }

    fn token(&self) -> Result<String, ClientError> {
        self.credentials
            .bearer_token()
            .ok_or(ClientError::Unauthenticated)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl AnalysisBackend for AnalysisClient {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport, ClientError> {
        AnalysisClient::fetch_status(self, job_id).await
    }

    async fn trigger_analysis(&self, job_id: &str) -> Result<(), ClientError> {
        AnalysisClient::trigger_analysis(self, job_id).await
    }
}

fn check_job_id(job_id: &str) -> Result<&str, ClientError> {
    let trimmed = job_id.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '?', '#']) {
        return Err(ClientError::InvalidJobId(job_id.to_string()));
    }
    Ok(trimmed)
}

/// Pass 2xx responses through; turn anything else into [`ClientError::Api`],
/// reading `{message}` (or `{error}`) from the body when it decodes.
async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ApiErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message.or(body.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());

    Err(ClientError::Api { status, message })
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not authenticated: no access token available")]
    Unauthenticated,

    #[error("Invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analysis API returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("Failed to decode analysis response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid custom analysis request: {0}")]
    InvalidRequest(#[from] garde::Report),
}

impl ClientError {
    /// Errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthenticated | ClientError::InvalidJobId(_) | ClientError::InvalidRequest(_)
        )
    }
}

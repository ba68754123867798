//! AnalysisClient against a local wiremock server.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use analysis_tracker::{
    AnalysisClient, ClientError, CredentialSource, CustomAnalysisRequest, JobStatus, PollConfig,
    PollSession, RotatingToken, SessionPhase, StaticToken,
};
use helpers::RecordingObserver;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, credentials: Arc<dyn CredentialSource>) -> AnalysisClient {
    AnalysisClient::new(server.uri(), credentials, Duration::from_secs(5)).expect("client")
}

fn token(value: &str) -> Arc<dyn CredentialSource> {
    Arc::new(StaticToken::new(Some(value.to_string())))
}

#[tokio::test]
async fn test_fetch_status_sends_bearer_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/analysis/doc-1/status"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "analyzing",
            "progress": 40
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = client_for(&server, token("tok-1"))
        .fetch_status("doc-1")
        .await
        .expect("status should decode");

    assert_eq!(report.status, JobStatus::Analyzing);
    assert_eq!(report.progress, 40);
}

#[tokio::test]
async fn test_fetch_status_decodes_encoded_insights() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/analysis/doc-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "progress": 100,
            "result": {
                "summary": "Stable.",
                "clinicalInsights": "[{\"finding\":\"BP elevated\"}]",
                "soapNote": {"subjective": "s", "objective": "o", "assessment": "a", "plan": "p"},
                "oasisScores": {"M1800": {"score": 2}}
            }
        })))
        .mount(&server)
        .await;

    let report = client_for(&server, token("tok")).fetch_status("doc-1").await.unwrap();
    let result = report.result.expect("result");
    assert_eq!(result.clinical_insights, vec![json!({"finding": "BP elevated"})]);
    assert_eq!(result.soap_note.unwrap().plan.as_deref(), Some("p"));
    assert!(result.oasis_scores.contains_key("M1800"));
}

#[tokio::test]
async fn test_missing_credential_fails_before_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(StaticToken::new(None)));
    let err = client.fetch_status("doc-1").await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthenticated));

    let err = client.trigger_analysis("doc-1").await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthenticated));
}

#[tokio::test]
async fn test_error_body_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/analysis/doc-1/status"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"message": "Analysis backend overloaded"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server, token("tok")).fetch_status("doc-1").await.unwrap_err();
    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(message, "Analysis backend overloaded");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_field_is_accepted_as_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze/doc-1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "File not found"})))
        .mount(&server)
        .await;

    let err = client_for(&server, token("tok")).trigger_analysis("doc-1").await.unwrap_err();
    assert!(matches!(err, ClientError::Api { ref message, .. } if message == "File not found"));
}

#[tokio::test]
async fn test_undecodable_error_body_becomes_unknown_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server, token("tok")).fetch_status("doc-1").await.unwrap_err();
    assert!(matches!(err, ClientError::Api { ref message, .. } if message == "Unknown error"));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_trigger_analysis_accepts_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze/doc-7"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server, token("tok"))
        .trigger_analysis("doc-7")
        .await
        .expect("trigger should succeed");
}

#[tokio::test]
async fn test_custom_oasis_analysis() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/custom/doc-1"))
        .and(body_json(json!({"type": "oasis", "items": ["M1800", "M1810"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"oasisScores": {"M1800": 1, "M1810": 2}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server, token("tok"))
        .custom_analysis("doc-1", &CustomAnalysisRequest::oasis(["M1800", "M1810"]))
        .await
        .unwrap();
    assert_eq!(result.oasis_scores.len(), 2);
}

#[tokio::test]
async fn test_custom_soap_analysis_bare_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/custom/doc-1"))
        .and(body_json(json!({"type": "soap"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "soapNote": {"subjective": "Reports fatigue."}
        })))
        .mount(&server)
        .await;

    let result = client_for(&server, token("tok"))
        .custom_analysis("doc-1", &CustomAnalysisRequest::soap())
        .await
        .unwrap();
    assert_eq!(
        result.soap_note.unwrap().subjective.as_deref(),
        Some("Reports fatigue.")
    );
}

#[tokio::test]
async fn test_invalid_custom_request_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server, token("tok"))
        .custom_analysis("doc-1", &CustomAnalysisRequest::oasis([""]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_rotated_token_is_used_on_next_request() {
    let server = MockServer::start().await;
    for tok in ["old", "new"] {
        Mock::given(method("GET"))
            .and(path("/analysis/doc-1/status"))
            .and(header("authorization", format!("Bearer {tok}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "pending"})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let credentials = Arc::new(RotatingToken::new(Some("old".into())));
    let client = client_for(&server, credentials.clone());

    client.fetch_status("doc-1").await.unwrap();
    credentials.rotate("new");
    client.fetch_status("doc-1").await.unwrap();
}

#[tokio::test]
async fn test_session_completes_against_http_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/analysis/doc-9/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "processing",
            "progress": 85,
            "result": {"summary": "Patient stable."}
        })))
        .mount(&server)
        .await;

    let observer = RecordingObserver::new();
    let session = PollSession::start(
        "doc-9",
        Arc::new(client_for(&server, token("tok"))),
        observer.clone(),
        PollConfig::default(),
    );

    let snapshot = tokio::time::timeout(Duration::from_secs(5), session.finished())
        .await
        .expect("session should finish");

    assert_eq!(snapshot.phase, SessionPhase::Completed);
    let completions = observer.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].summary.as_deref(), Some("Patient stable."));
}

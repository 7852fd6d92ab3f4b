//! HTTP surface for Rusty Claims.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /process` – Multipart form with one `query` text field and any number of
//!   `documents` file fields (PDF, DOCX, EML). Returns the decision JSON
//!   (`decision`, `amount`, `justification`, `clauses`).
//! - `GET /metrics` – Observe pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Failures carry a structured body `{ "error": { "stage", "kind", "message", "raw"? } }`.

use crate::metrics::MetricsSnapshot;
use crate::processing::{Decision, DecisionApi, PipelineError, PipelineStage, UploadedFile};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

const QUERY_FIELD: &str = "query";
const DOCUMENTS_FIELD: &str = "documents";

/// Build the HTTP router exposing the adjudication API surface.
///
/// `max_upload_bytes` bounds the multipart body accepted by `POST /process`.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: DecisionApi + 'static,
{
    Router::new()
        .route(
            "/process",
            post(process_claim::<S>).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Adjudicate a claim query against uploaded evidence.
///
/// Fields other than `query` and `documents` are ignored. Documents keep the order in which
/// they appear in the form.
async fn process_claim<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<Decision>, AppError>
where
    S: DecisionApi,
{
    let mut query: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            QUERY_FIELD => query = Some(field.text().await?),
            DOCUMENTS_FIELD => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                files.push(UploadedFile::new(file_name, bytes.to_vec()));
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let query = query.ok_or(AppError::MissingQuery)?;
    tracing::debug!(files = files.len(), "Process request parsed");
    let decision = service.run_pipeline(&query, files).await?;
    Ok(Json(decision))
}

/// Return the pipeline counter snapshot.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: DecisionApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "process",
                method: "POST",
                path: "/process",
                description: "Adjudicate a free-text claim query against uploaded PDF, DOCX, or EML policy documents. Send multipart/form-data with a `query` field and `documents` file fields. Response returns { \"decision\", \"amount\", \"justification\", \"clauses\" }.",
                request_example: Some(json!({
                    "query": "46-year-old male, knee surgery in Pune, 3-month-old insurance policy",
                    "documents": ["policy.pdf", "endorsement.docx", "correspondence.eml"]
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return pipeline counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    MissingQuery,
    Multipart(MultipartError),
    Pipeline(PipelineError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingQuery => StatusCode::BAD_REQUEST,
            Self::Multipart(error) => error.status(),
            Self::Pipeline(error) => match error {
                PipelineError::InvalidQuery => StatusCode::BAD_REQUEST,
                PipelineError::MalformedExtraction { .. }
                | PipelineError::MalformedDecision { .. } => StatusCode::BAD_GATEWAY,
                PipelineError::LanguageModelUnavailable { .. }
                | PipelineError::RetrievalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::CapabilityTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::MissingQuery => json!({
                "error": {
                    "stage": PipelineStage::Received,
                    "kind": "invalid_request",
                    "message": "Multipart field `query` is required",
                }
            }),
            Self::Multipart(error) => json!({
                "error": {
                    "stage": PipelineStage::Received,
                    "kind": "invalid_request",
                    "message": error.body_text(),
                }
            }),
            Self::Pipeline(error) => {
                let mut detail = json!({
                    "stage": error.stage(),
                    "kind": error.kind(),
                    "message": error.to_string(),
                });
                if let Some(raw) = error.raw_output() {
                    detail["raw"] = json!(raw);
                }
                json!({ "error": detail })
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::Multipart(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::metrics::MetricsSnapshot;
    use crate::processing::{
        Decision, DecisionApi, DecisionOutcome, PipelineError, UploadedFile,
    };
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    const BOUNDARY: &str = "rusty-claims-boundary";

    #[tokio::test]
    async fn commands_catalog_exposes_process_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let process = commands
            .iter()
            .find(|cmd| cmd.name == "process")
            .expect("process command present");

        assert_eq!(process.method, "POST");
        assert_eq!(process.path, "/process");
        assert!(process.description.contains("multipart"));
        assert!(commands.iter().any(|cmd| cmd.path == "/metrics"));
    }

    #[tokio::test]
    async fn process_route_forwards_query_and_documents() {
        let service = Arc::new(StubDecisionService::new(Ok(approved())));
        let app = create_router(service.clone(), 1024 * 1024);

        let body = multipart_body(
            Some("46M, knee surgery in Pune, 3-month policy"),
            &[
                ("policy.pdf", b"%PDF-1.4".as_slice()),
                ("letter.eml", b"Subject: hi\r\n\r\nbody".as_slice()),
            ],
        );
        let response = app.oneshot(process_request(body)).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["decision"], "approved");
        assert_eq!(json["amount"], 200000.0);
        assert_eq!(json["clauses"][0], "Knee surgery is covered after 90 days.");

        let calls = service.calls.lock().await;
        assert_eq!(calls.len(), 1);
        let (query, files) = &calls[0];
        assert_eq!(query, "46M, knee surgery in Pune, 3-month policy");
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["policy.pdf", "letter.eml"]);
        assert_eq!(files[0].bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn missing_query_is_bad_request() {
        let service = Arc::new(StubDecisionService::new(Ok(approved())));
        let app = create_router(service.clone(), 1024 * 1024);

        let body = multipart_body(None, &[("policy.pdf", b"%PDF-1.4".as_slice())]);
        let response = app.oneshot(process_request(body)).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["kind"], "invalid_request");
        assert!(service.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_model_output_maps_to_bad_gateway_with_raw() {
        let service = Arc::new(StubDecisionService::new(Err(|| {
            PipelineError::MalformedDecision {
                raw: "approved!".into(),
                reason: "invalid JSON".into(),
            }
        })));
        let app = create_router(service, 1024 * 1024);

        let response = app
            .oneshot(process_request(multipart_body(Some("knee surgery"), &[])))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = json_body(response).await;
        assert_eq!(json["error"]["stage"], "synthesizing");
        assert_eq!(json["error"]["kind"], "malformed_decision");
        assert_eq!(json["error"]["raw"], "approved!");
        assert!(json.get("decision").is_none());
    }

    #[tokio::test]
    async fn invalid_query_maps_to_bad_request() {
        let service = Arc::new(StubDecisionService::new(Err(|| PipelineError::InvalidQuery)));
        let app = create_router(service, 1024 * 1024);

        let response = app
            .oneshot(process_request(multipart_body(Some("   "), &[])))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["kind"], "invalid_query");
        assert!(json["error"].get("raw").is_none());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let service = Arc::new(StubDecisionService::new(Ok(approved())));
        let app = create_router(service.clone(), 256);

        let large = vec![b'a'; 4096];
        let body = multipart_body(Some("knee surgery"), &[("policy.pdf", large.as_slice())]);
        let response = app.oneshot(process_request(body)).await.expect("response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(service.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn metrics_route_returns_snapshot() {
        let service = Arc::new(StubDecisionService::new(Ok(approved())));
        let app = create_router(service, 1024);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["requests"], 3);
        assert_eq!(json["failures"], 1);
    }

    fn approved() -> Decision {
        Decision {
            decision: DecisionOutcome::Approved,
            amount: Some(200000.0),
            justification: "Waiting period satisfied.".into(),
            clauses: vec!["Knee surgery is covered after 90 days.".into()],
        }
    }

    fn multipart_body(query: Option<&str>, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(query) = query {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"query\"\r\n\r\n{query}\r\n"
                )
                .as_bytes(),
            );
        }
        for (name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"documents\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn process_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/process")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    struct StubDecisionService {
        calls: Mutex<Vec<(String, Vec<UploadedFile>)>>,
        outcome: Result<Decision, fn() -> PipelineError>,
    }

    impl StubDecisionService {
        fn new(outcome: Result<Decision, fn() -> PipelineError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                outcome,
            }
        }
    }

    #[async_trait]
    impl DecisionApi for StubDecisionService {
        async fn run_pipeline(
            &self,
            raw_query: &str,
            files: Vec<UploadedFile>,
        ) -> Result<Decision, PipelineError> {
            self.calls
                .lock()
                .await
                .push((raw_query.to_string(), files));
            match &self.outcome {
                Ok(decision) => Ok(decision.clone()),
                Err(make) => Err(make()),
            }
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                requests: 3,
                decisions_completed: 2,
                failures: 1,
                ..MetricsSnapshot::default()
            }
        }
    }
}

//! HTTP ingestion endpoint.
//!
//! `POST /measurements` accepts a JSON array of measurements. Only
//! `application/json` bodies are accepted; non-POST methods get a 405.
//! The gRPC insert stream is served from the same router over HTTP/2.

use crate::core::{Measurement, TallyError, INSERT_PATH};
use crate::receiver::{IngestService, MeasurementReceiver};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// The only accepted request content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP ingestion state.
#[derive(Clone)]
pub struct HttpIngestState {
    pub receiver: Arc<MeasurementReceiver>,
}

/// Create the ingestion router.
pub fn create_http_router(receiver: Arc<MeasurementReceiver>, max_body_bytes: usize) -> Router {
    let grpc = IngestService::new(Arc::clone(&receiver));
    let state = HttpIngestState { receiver };

    Router::new()
        .route("/measurements", post(handle_measurements))
        .route("/ping", get(ping).post(ping))
        .route("/health", get(health_check))
        .route_service(INSERT_PATH, grpc)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

/// Handle a measurement batch.
async fn handle_measurements(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, HttpError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !is_json(content_type) {
        return Err(HttpError::UnsupportedMediaType(content_type.to_string()));
    }

    if !state.receiver.should_sample() {
        tracing::trace!("Discarding sampled-out request of {} bytes", body.len());
        return Ok(StatusCode::CREATED);
    }

    let measurements: Vec<Measurement> = serde_json::from_slice(&body)
        .map_err(|e| HttpError::BadRequest(format!("Error decoding JSON: {}", e)))?;

    match state.receiver.ingest(measurements).await {
        Ok(count) => {
            tracing::trace!("Accepted {} measurements", count);
            Ok(StatusCode::CREATED)
        },
        Err(TallyError::Validation(msg)) => Err(HttpError::BadRequest(msg)),
        Err(TallyError::CollectorTerminated) => Err(HttpError::Unavailable(
            "Collector has terminated".to_string(),
        )),
        Err(e) => Err(HttpError::Internal(e.to_string())),
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case(CONTENT_TYPE_JSON))
}

/// Liveness check; the body is ignored.
async fn ping() -> StatusCode {
    StatusCode::ACCEPTED
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpIngestState>) -> impl IntoResponse {
    let collector = state.receiver.collector();
    let (status, label) = if collector.is_terminated() {
        (StatusCode::SERVICE_UNAVAILABLE, "terminated")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "service": "tally",
            "version": env!("CARGO_PKG_VERSION"),
            "collector": collector.stats(),
        })),
    )
}

/// HTTP-specific error type.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    UnsupportedMediaType(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::UnsupportedMediaType(content_type) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("Media type {} unsupported", content_type),
            ),
            HttpError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!("Ingestion failed: {}", error_message);
        } else {
            tracing::debug!("Rejected ingestion request: {}", error_message);
        }

        let body = Json(serde_json::json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            HttpError::UnsupportedMediaType(ct) => write!(f, "Unsupported Media Type: {}", ct),
            HttpError::Unavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            HttpError::Internal(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Batch, Collector, FnWriter, MemoryWriter, Writer};
    use crate::core::{CollectorConfig, Scalar};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    const GOOD: &str = r#"[{
        "name": "combined",
        "ts": "2024-01-02T03:04:05Z",
        "values": {"field_float": 2.1},
        "dimensions": {"dim_string": "a", "dim_int": 1, "field_bool": true}
    }]"#;

    fn router_with(writer: Arc<dyn Writer>, sample_rate: f64) -> (Router, Collector) {
        let config = CollectorConfig {
            batch_size: 1,
            max_retries: 0,
            retry_interval: Duration::from_millis(1),
            ..Default::default()
        };
        let collector = Collector::start(config, writer);
        let receiver = Arc::new(MeasurementReceiver::new(collector.clone(), sample_rate));
        (create_http_router(receiver, 1024), collector)
    }

    fn post(content_type: &str, body: impl Into<String>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/measurements")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.into()))
            .unwrap()
    }

    async fn status_of(router: Router, request: Request<Body>) -> StatusCode {
        router.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_accepts_well_formed_request() {
        let writer = Arc::new(MemoryWriter::new());
        let (router, _collector) = router_with(writer.clone(), 1.0);

        let status = status_of(router, post(CONTENT_TYPE_JSON, GOOD)).await;
        assert_eq!(status, StatusCode::CREATED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let points = writer.take_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "combined");
        assert_eq!(points[0].fields["dim_string"], Scalar::from("a"));
    }

    #[tokio::test]
    async fn test_content_type_parameters_are_allowed() {
        let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
        let status = status_of(router, post("application/json; charset=utf-8", GOOD)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_rejects_wrong_content_type() {
        let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
        let status = status_of(router, post("somethingelse", GOOD)).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_rejects_invalid_payloads() {
        let bad = [
            "not json",
            "[]",
            r#"[{"ts": "2024-01-02T03:04:05Z", "values": {"x": 1}}]"#,
            r#"[{"name": "m", "dimensions": {"a": 1}}]"#,
            r#"[{"name": "m", "values": {}}]"#,
        ];
        for body in bad {
            let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
            let status = status_of(router, post(CONTENT_TYPE_JSON, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        }
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_accepted() {
        let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
        let body = r#"[{"name": "mymeasure", "values": {"x": 1}}]"#;
        let status = status_of(router, post(CONTENT_TYPE_JSON, body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_get_is_not_allowed() {
        let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
        let request = Request::builder()
            .method(Method::GET)
            .uri("/measurements")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(router, request).await, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
        let status = status_of(router, post(CONTENT_TYPE_JSON, "x".repeat(4096))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_sampled_out_requests_are_discarded() {
        let writer = Arc::new(MemoryWriter::new());
        let (router, collector) = router_with(writer.clone(), 0.0);

        // the body is not even decoded
        let status = status_of(router, post(CONTENT_TYPE_JSON, "not json")).await;
        assert_eq!(status, StatusCode::CREATED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(writer.batch_count(), 0);
        assert_eq!(collector.stats().received, 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let (router, _collector) = router_with(Arc::new(MemoryWriter::new()), 1.0);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ping")
            .body(Body::from("ignored"))
            .unwrap();
        assert_eq!(status_of(router, request).await, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_terminated_collector_returns_unavailable() {
        let failing = Arc::new(FnWriter(|_: &Batch| -> crate::core::Result<()> {
            Err(TallyError::write("down"))
        }));
        let (router, collector) = router_with(failing, 1.0);

        let first = status_of(router.clone(), post(CONTENT_TYPE_JSON, GOOD)).await;
        assert_eq!(first, StatusCode::CREATED);
        assert!(collector.wait(Some(Duration::from_secs(1))).await.is_some());

        let second = status_of(router.clone(), post(CONTENT_TYPE_JSON, GOOD)).await;
        assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health["status"], "terminated");
        assert_eq!(health["collector"]["failed_attempts"], 1);
    }
}

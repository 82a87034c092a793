//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::bytes::Bytes;
use tokio_util::io::{CopyToBytes, SinkWriter};
use tokio_util::sync::{CancellationToken, DropGuard, PollSender};

use crate::bridge::TtsRequest;
use crate::error::GatewayError;
use crate::health::HealthSnapshot;
use crate::service::{GatewayService, StreamStarted};

/// Largest accepted JSON body.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// Chunks buffered between the relay and the response body. A write completes only
/// once the body has room, so the relay never reads far ahead of the client.
const BODY_CHUNKS: usize = 1;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code,
            message: message.into(),
        },
    };
    (status, Json(body)).into_response()
}

/// Status line for a failure that happened before any body byte was sent.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::LimitExceeded
        | GatewayError::QueueFull
        | GatewayError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::AcquireTimeout | GatewayError::BackendTimeout(_) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        GatewayError::BackendError { .. } | GatewayError::BackendUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::Canceled => StatusCode::REQUEST_TIMEOUT,
        GatewayError::EncodingError(_) | GatewayError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn gateway_error_response(err: &GatewayError, expose_backend_errors: bool) -> Response {
    let message = match err {
        GatewayError::BackendError { .. } if !expose_backend_errors => {
            "backend returned an error".to_string()
        }
        GatewayError::BackendUnavailable(_) if !expose_backend_errors => {
            "backend unavailable".to_string()
        }
        GatewayError::BackendTimeout(_) if !expose_backend_errors => {
            "backend timed out".to_string()
        }
        other => other.to_string(),
    };
    error_response(status_for(err), err.code(), message)
}

fn rejection_response(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "request_too_large"
    } else {
        "invalid_request"
    };
    error_response(status, code, rejection.body_text())
}

async fn synthesize(
    State(service): State<Arc<GatewayService>>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(rejection),
    };

    let cancel = CancellationToken::new();
    let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(BODY_CHUNKS);
    let writer = SinkWriter::new(CopyToBytes::new(
        PollSender::new(chunk_tx)
            .sink_map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
    ));
    let (started_tx, started_rx) = oneshot::channel();

    let task = {
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        tokio::spawn(async move { service.synthesize(cancel, request, started_tx, writer).await })
    };
    // Dropping the handler or the body (client gone) cancels the relay.
    let guard = cancel.drop_guard();

    match started_rx.await {
        Ok(started) => stream_response(started, chunk_rx, task, guard),
        Err(_) => {
            let err = match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(_)) => GatewayError::internal("relay finished without starting a stream"),
                Err(e) => GatewayError::internal(format!("relay task failed: {}", e)),
            };
            gateway_error_response(&err, service.expose_backend_errors())
        }
    }
}

/// 200 response whose body is the relay's chunk channel. A relay failure after the status line
/// surfaces as a body error, which aborts the chunked response.
fn stream_response(
    started: StreamStarted,
    chunks: mpsc::Receiver<Bytes>,
    task: JoinHandle<Result<u64, GatewayError>>,
    guard: DropGuard,
) -> Response {
    let outcome = futures::stream::once(async move {
        let _guard = guard;
        match task.await {
            Ok(Ok(_)) => None::<std::io::Result<Bytes>>,
            Ok(Err(e)) => Some(Err(std::io::Error::other(e))),
            Err(e) => Some(Err(std::io::Error::other(e))),
        }
    })
    .filter_map(futures::future::ready);
    let body = ReceiverStream::new(chunks).map(Ok).chain(outcome);

    let content_type = started
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (REQUEST_ID, started.id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    #[serde(flatten)]
    pub snapshot: HealthSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_error: Option<String>,
}

async fn health_check(State(service): State<Arc<GatewayService>>) -> Json<HealthCheckResponse> {
    let snapshot = service.health();

    // Probe the backend only while accepting traffic.
    let backend_error = if snapshot.status.accepts_requests() {
        service.backend_health().await.err().map(|e| e.to_string())
    } else {
        None
    };

    Json(HealthCheckResponse {
        snapshot,
        backend_error,
    })
}

async fn metrics(State(service): State<Arc<GatewayService>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.metrics().render(),
    )
}

async fn shutdown(State(service): State<Arc<GatewayService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<GatewayService>) -> Router {
    Router::new()
        .route("/v1/tts", post(synthesize))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/shutdown", post(shutdown))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(service)
}

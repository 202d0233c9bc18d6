//! HTTP control API.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        Html,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use courier_session::LifecycleManager;
use futures::{Stream, StreamExt, future};
use tokio_stream::wrappers::BroadcastStream;

use crate::protocol::{
    HealthResponse, LogsResponse, QrResponse, ResetResponse, SendRequest, SendResponse,
};

/// Control API handler state.
#[derive(Clone)]
pub struct ControlState {
    /// Lifecycle manager owning session, logs and client.
    pub manager: Arc<LifecycleManager>,
}

impl ControlState {
    /// Create new control state.
    #[must_use]
    pub const fn new(manager: Arc<LifecycleManager>) -> Self {
        Self { manager }
    }
}

/// Create the control router.
///
/// # Example
/// ```ignore
/// let app = create_router(manager).layer(CorsLayer::permissive());
/// ```
pub fn create_router(manager: Arc<LifecycleManager>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/qr", get(qr_handler))
        .route("/logs", get(logs_handler))
        .route("/logs/stream", get(logs_stream_handler))
        .route("/send", post(send_handler))
        .route("/reset", get(reset_handler))
        .route("/health", get(health_handler))
        .with_state(ControlState::new(manager))
}

async fn index_handler(State(state): State<ControlState>) -> Html<String> {
    let snapshot = state.manager.session().snapshot();
    let qr = snapshot
        .pairing_artifact
        .map(|src| {
            format!(r#"<p><img src="{src}" alt="Pairing QR code" width="256" height="256"></p>"#)
        })
        .unwrap_or_default();

    Html(format!(
        r#"<html>
<head><title>WhatsApp Bot</title></head>
<body style="font-family: Arial; padding: 20px;">
    <h1>WhatsApp Bot Server</h1>
    <p>Status: <strong>{status}</strong></p>
    {qr}
    <p><a href="/qr">Get QR Code API</a></p>
    <p><a href="/logs">View Logs</a></p>
    <p><a href="/reset">Reset Session</a></p>
</body>
</html>
"#,
        status = snapshot.status,
    ))
}

async fn qr_handler(State(state): State<ControlState>) -> Json<QrResponse> {
    Json(state.manager.session().snapshot().into())
}

async fn logs_handler(State(state): State<ControlState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.manager.logs().formatted(),
    })
}

async fn logs_stream_handler(
    State(state): State<ControlState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.manager.logs().subscribe()).filter_map(|entry| {
        // Lagging subscribers skip what they missed.
        future::ready(entry.ok().map(|entry| Ok(Event::default().data(entry.to_string()))))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn send_handler(
    State(state): State<ControlState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> (StatusCode, Json<SendResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!("Invalid send request: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(SendResponse::error(rejection.body_text())),
            );
        }
    };

    if request.to.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SendResponse::error("Missing recipient")),
        );
    }

    match state.manager.send(&request.to, &request.text) {
        Ok(()) => (StatusCode::OK, Json(SendResponse::Success { success: true })),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SendResponse::error(e.to_string())),
        ),
    }
}

async fn reset_handler(State(state): State<ControlState>) -> Json<ResetResponse> {
    let response = match state.manager.reset().await {
        Ok(()) => ResetResponse {
            success: true,
            message: "Session reset. New QR will appear shortly.".to_string(),
        },
        Err(e) => ResetResponse {
            success: false,
            message: format!("Session reset, but stored identity could not be removed: {e}"),
        },
    };
    Json(response)
}

async fn health_handler(State(state): State<ControlState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(state.manager.session().status()))
}

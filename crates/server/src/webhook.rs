use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::error;

use voxstay_core::webhook::ResultEnvelope;
use voxstay_core::{DispatchError, InterfaceError, WebhookDispatcher};

pub fn router(dispatcher: Arc<WebhookDispatcher>) -> Router {
    Router::new()
        .route("/webhook/vapi", post(vapi_webhook))
        .route("/webhook/test", get(webhook_test))
        .with_state(dispatcher)
}

async fn vapi_webhook(State(dispatcher): State<Arc<WebhookDispatcher>>, body: Bytes) -> Response {
    match dispatcher.handle_body(&body).await {
        Ok(outcome) => {
            let status = StatusCode::from_u16(outcome.status.status_code())
                .unwrap_or(StatusCode::BAD_REQUEST);
            (status, Json(outcome.envelope)).into_response()
        }
        Err(DispatchError { error, completed }) => request_failure(&error, &completed),
    }
}

async fn webhook_test() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": "voxstay"}))
}

/// Error body for an aborted request. Calls that completed before the abort
/// are reported under `results`.
fn request_failure(failure: &InterfaceError, completed: &ResultEnvelope) -> Response {
    let status =
        StatusCode::from_u16(failure.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(
            event_name = "webhook.request_failed",
            correlation_id = failure.correlation_id(),
            error = %failure,
            "webhook request aborted"
        );
    }

    let mut body = json!({
        "error": failure.user_message(),
        "code": failure.code(),
        "correlation_id": failure.correlation_id(),
    });
    if let InterfaceError::BadRequest { message, .. } = failure {
        body["detail"] = json!(message);
    }
    if !completed.results.is_empty() {
        body["results"] = json!(completed.results);
    }
    (status, Json(body)).into_response()
}

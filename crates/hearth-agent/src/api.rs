use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_console::ConsoleError;
use hearth_process::ResourceId;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ActionBody {
    resource: ResourceId,
    ok: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    consoles: usize,
}

pub(crate) fn error_response(err: ConsoleError) -> Response {
    let (status, code) = match &err {
        ConsoleError::Attach { .. } | ConsoleError::Launch { .. } => {
            (StatusCode::BAD_GATEWAY, "launch_failed")
        }
        ConsoleError::Terminate { .. } => (StatusCode::BAD_GATEWAY, "terminate_failed"),
        ConsoleError::Persist { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "persist_failed"),
        ConsoleError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
        ConsoleError::NotAttached(_) => (StatusCode::NOT_FOUND, "not_attached"),
        ConsoleError::Closed(_) => (StatusCode::GONE, "console_closed"),
        ConsoleError::StopTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "stop_timeout"),
    };
    tracing::warn!(error = %err, code, "request failed");
    let body = ErrorBody {
        code,
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

fn action_result(id: ResourceId, res: Result<(), ConsoleError>) -> Response {
    match res {
        Ok(()) => Json(ActionBody {
            resource: id,
            ok: true,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        consoles: state.hub.attached_ids().len(),
    })
}

pub async fn start(State(state): State<AppState>, Path(id): Path<ResourceId>) -> Response {
    action_result(id, state.hub.start_resource(id).await)
}

pub async fn stop(State(state): State<AppState>, Path(id): Path<ResourceId>) -> Response {
    action_result(id, state.hub.stop_resource(id).await)
}

pub async fn restart(State(state): State<AppState>, Path(id): Path<ResourceId>) -> Response {
    action_result(id, state.hub.restart_resource(id).await)
}

pub async fn enable_integration(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Response {
    match state.hub.enable_integration(id).await {
        Ok(ok) => Json(ActionBody { resource: id, ok }).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn disable_integration(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Response {
    let ok = state.hub.disable_integration(id).await;
    Json(ActionBody { resource: id, ok }).into_response()
}

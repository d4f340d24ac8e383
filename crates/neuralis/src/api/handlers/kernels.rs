//! Kernel lifecycle and execution handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use neuralis_protocol::ExecutionResult;
use tracing::instrument;

use super::SuccessResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::execution::ExecutionRequest;
use crate::kernel::{Kernel, KernelPatch};

/// Registered kernels merged with whatever docker and conda report.
#[instrument(skip(state))]
pub async fn list_kernels(State(state): State<AppState>) -> ApiResult<Json<Vec<Kernel>>> {
    Ok(Json(state.kernels.list().await))
}

/// `POST /api/kernels/{type}` where type is `conda`, `docker` or `terminal`.
#[instrument(skip(state, body))]
pub async fn create_kernel(
    State(state): State<AppState>,
    Path(kernel_type): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<Kernel>)> {
    let kernel = state.kernels.create(&kernel_type, body).await?;
    Ok((StatusCode::CREATED, Json(kernel)))
}

#[instrument(skip(state))]
pub async fn get_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Kernel>> {
    Ok(Json(state.kernels.get(&id).await?))
}

#[instrument(skip(state))]
pub async fn update_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<KernelPatch>,
) -> ApiResult<Json<Kernel>> {
    Ok(Json(state.kernels.update(&id, patch).await?))
}

#[instrument(skip(state))]
pub async fn delete_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.kernels.remove(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[instrument(skip(state))]
pub async fn start_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Kernel>> {
    Ok(Json(state.kernels.start(&id).await?))
}

#[instrument(skip(state))]
pub async fn stop_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Kernel>> {
    Ok(Json(state.kernels.stop(&id).await?))
}

#[instrument(skip(state))]
pub async fn restart_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Kernel>> {
    Ok(Json(state.kernels.restart(&id).await?))
}

#[instrument(skip(state))]
pub async fn interrupt_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.kernels.interrupt(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// Run code on a kernel. With `sessionId` the session directory is the
/// scratch dir; otherwise the shared one is used.
#[instrument(skip(state, request), fields(execution_id = %request.execution_id))]
pub async fn execute_on_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExecutionRequest>,
) -> ApiResult<Json<ExecutionResult>> {
    let scratch_dir = match request.session_id {
        Some(ref session_id) => Some(state.sessions.session_dir(session_id).await?),
        None => None,
    };
    let result = state.kernels.execute(&id, request, scratch_dir).await?;
    Ok(Json(result))
}

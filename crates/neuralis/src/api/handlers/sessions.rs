//! Session handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use neuralis_protocol::ExecutionResult;
use tracing::{debug, instrument};

use super::SuccessResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::execution::ExecutionRequest;
use crate::session::{BindKernel, CreateSession, Session, SessionSummary};

#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    let sessions = state.sessions.list().await;
    Ok(Json(sessions.iter().map(SessionSummary::from).collect()))
}

/// Create a session, optionally bound to an existing kernel.
#[instrument(skip(state))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSession>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    if let Some(ref kernel_id) = request.kernel_id {
        state.kernels.get(kernel_id).await?;
    }
    let session = state.sessions.create(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.sessions.get(&id).await?))
}

#[instrument(skip(state))]
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.sessions.close(&id).await?;
    state.router.release(&format!("session:{id}"));
    Ok(Json(SuccessResponse::ok()))
}

#[instrument(skip(state))]
pub async fn bind_session_kernel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BindKernel>,
) -> ApiResult<Json<Session>> {
    if let Some(ref kernel_id) = request.kernel_id {
        state.kernels.get(kernel_id).await?;
    }
    Ok(Json(state.sessions.bind_kernel(&id, request.kernel_id).await?))
}

/// Run code in a session: on its bound kernel when there is one, else with
/// the session's own interpreter.
#[instrument(skip(state, request), fields(execution_id = %request.execution_id))]
pub async fn execute_in_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<ExecutionRequest>,
) -> ApiResult<Json<ExecutionResult>> {
    let session = state.sessions.get(&id).await?;
    let scratch_dir = state.sessions.session_dir(&id).await?;
    request.session_id = Some(id.clone());

    let result = match session.kernel_id {
        Some(ref kernel_id) => {
            debug!("session {id} runs on kernel {kernel_id}");
            state
                .kernels
                .execute(kernel_id, request, Some(scratch_dir))
                .await?
        }
        None => {
            state
                .router
                .execute_local(&id, &session.python_path, request, scratch_dir)
                .await?
        }
    };
    Ok(Json(result))
}

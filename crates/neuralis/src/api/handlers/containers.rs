//! Container provisioning handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::SuccessResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::container::{BuildRequest, ContainerSummary, KernelContainer};
use crate::kernel::PackageList;

/// Body of `POST /api/containers`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerRequest {
    pub python_version: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    #[serde(default)]
    pub packages: PackageList,
}

#[derive(Debug, Serialize)]
pub struct CreateContainerResponse {
    pub success: bool,
    pub output: String,
    pub container: KernelContainer,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: String,
}

#[instrument(skip(state))]
pub async fn list_containers(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ContainerSummary>>> {
    Ok(Json(state.containers.list().await?))
}

/// Build a Kernel Gateway image and start a container from it.
#[instrument(skip(state))]
pub async fn create_container(
    State(state): State<AppState>,
    Json(request): Json<CreateContainerRequest>,
) -> ApiResult<Json<CreateContainerResponse>> {
    let build = BuildRequest {
        python_version: request.python_version,
        port: request.port,
        name: request.name,
        packages: request.packages.into_validated()?,
    };
    let outcome = state.containers.build_kernel_container(build).await?;
    info!(
        "container {} serving on {}",
        outcome.container.name, outcome.container.url
    );

    Ok(Json(CreateContainerResponse {
        success: true,
        output: outcome.output,
        container: outcome.container,
    }))
}

#[instrument(skip(state))]
pub async fn delete_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.containers.stop(&name).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[instrument(skip(state))]
pub async fn restart_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.containers.restart(&name).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[instrument(skip(state))]
pub async fn container_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let logs = state.containers.logs(&name, query.tail).await?;
    Ok(Json(LogsResponse { logs }))
}

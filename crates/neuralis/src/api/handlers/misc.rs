use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct ToolCheckResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report whether the docker CLI answers.
pub async fn docker_check(State(state): State<AppState>) -> Json<ToolCheckResponse> {
    Json(ToolCheckResponse::from_result(state.containers.check().await))
}

/// Report whether the conda CLI answers.
pub async fn conda_check(State(state): State<AppState>) -> Json<ToolCheckResponse> {
    Json(ToolCheckResponse::from_result(state.kernels.conda().version().await))
}

impl ToolCheckResponse {
    fn from_result<E: std::fmt::Display>(result: Result<String, E>) -> Self {
        match result {
            Ok(version) => Self {
                available: true,
                version: Some(version),
                error: None,
            },
            Err(e) => Self {
                available: false,
                version: None,
                error: Some(e.to_string()),
            },
        }
    }
}

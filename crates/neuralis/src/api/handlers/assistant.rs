use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::assistant::AssistantStatus;

#[derive(Debug, Default, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub response: String,
}

pub async fn amazon_q_check(State(state): State<AppState>) -> Json<AssistantStatus> {
    Json(state.assistant.check().await)
}

#[instrument(skip(state, request))]
pub async fn ask_amazon_q(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<Json<AskResponse>> {
    let response = state.assistant.ask(&request.message).await?;
    Ok(Json(AskResponse { response }))
}

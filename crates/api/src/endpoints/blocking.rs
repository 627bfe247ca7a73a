//! Blocking endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use shelfmate_common::AppResult;
use shelfmate_db::entities::blocking::Model as BlockingModel;
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Block or unblock user request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BlockUserRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// List blocking request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBlockingRequest {
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub until_id: Option<String>,
}

const fn default_limit() -> u64 {
    30
}

/// Blocking response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingResponse {
    pub id: String,
    pub created_at: String,
    pub blocked_id: String,
}

impl From<BlockingModel> for BlockingResponse {
    fn from(b: BlockingModel) -> Self {
        Self {
            id: b.id,
            created_at: b.created_at.to_rfc3339(),
            blocked_id: b.blocked_id,
        }
    }
}

/// Block a user.
async fn block_user(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BlockUserRequest>,
) -> AppResult<ApiResponse<BlockingResponse>> {
    req.validate()?;
    let blocking = state.blocking_service.block(&user.id, &req.user_id).await?;
    Ok(ApiResponse::ok(blocking.into()))
}

/// Unblock a user.
async fn unblock_user(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BlockUserRequest>,
) -> AppResult<ApiResponse<()>> {
    req.validate()?;
    state
        .blocking_service
        .unblock(&user.id, &req.user_id)
        .await?;
    Ok(ApiResponse::ok(()))
}

/// Get list of blocked users.
async fn list_blocking(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListBlockingRequest>,
) -> AppResult<ApiResponse<Vec<BlockingResponse>>> {
    let blockings = state
        .blocking_service
        .list(&user.id, req.limit, req.until_id.as_deref())
        .await?;
    Ok(ApiResponse::ok(
        blockings.into_iter().map(Into::into).collect(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(block_user))
        .route("/delete", post(unblock_user))
        .route("/list", post(list_blocking))
}

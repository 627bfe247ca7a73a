//! Friends endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use shelfmate_common::AppResult;
use shelfmate_core::{BulkOutcome, Page};
use shelfmate_db::{entities::friendship, repositories::ListKind};
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Send friend request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[validate(length(min = 1, max = 64))]
    pub target_id: String,
}

/// Request naming one relationship. Either document id of the pair is accepted.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRequest {
    #[validate(length(min = 1, max = 160))]
    pub relationship_id: String,
}

/// Bulk request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub ids: Vec<String>,
}

/// List request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    /// Whose friends to list; the caller when absent.
    pub user_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub until_id: Option<String>,
}

const fn default_limit() -> u64 {
    30
}

/// Mutual friends request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MutualRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// Mutual friends response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutualResponse {
    pub count: u64,
}

/// Send a friend request.
async fn send_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> AppResult<ApiResponse<friendship::Model>> {
    req.validate()?;
    let doc = state
        .friendship_service
        .send_request(&user, &req.target_id)
        .await?;
    Ok(ApiResponse::ok(doc))
}

/// Accept a received request.
async fn accept_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RelationshipRequest>,
) -> AppResult<ApiResponse<friendship::Model>> {
    req.validate()?;
    let doc = state
        .friendship_service
        .accept_request(&user.id, &req.relationship_id)
        .await?;
    Ok(ApiResponse::ok(doc))
}

/// Reject a received request.
async fn reject_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RelationshipRequest>,
) -> AppResult<ApiResponse<()>> {
    req.validate()?;
    state
        .friendship_service
        .reject_request(&user.id, &req.relationship_id)
        .await?;
    Ok(ApiResponse::ok(()))
}

/// Cancel a sent request.
async fn cancel_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RelationshipRequest>,
) -> AppResult<ApiResponse<()>> {
    req.validate()?;
    state
        .friendship_service
        .cancel_sent_request(&user.id, &req.relationship_id)
        .await?;
    Ok(ApiResponse::ok(()))
}

/// Remove a friend.
async fn remove_friend(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RelationshipRequest>,
) -> AppResult<ApiResponse<()>> {
    req.validate()?;
    state
        .friendship_service
        .remove_relationship(&user.id, &req.relationship_id)
        .await?;
    Ok(ApiResponse::ok(()))
}

async fn accept_all(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> AppResult<ApiResponse<BulkOutcome>> {
    let outcome = state.friendship_service.accept_all(&user.id, &req.ids).await?;
    Ok(ApiResponse::ok(outcome))
}

async fn reject_all(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> AppResult<ApiResponse<BulkOutcome>> {
    let outcome = state.friendship_service.reject_all(&user.id, &req.ids).await?;
    Ok(ApiResponse::ok(outcome))
}

async fn cancel_all(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<BulkRequest>,
) -> AppResult<ApiResponse<BulkOutcome>> {
    let outcome = state
        .friendship_service
        .cancel_all_sent(&user.id, &req.ids)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

/// List friends of the caller or of another user.
async fn list_friends(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> AppResult<ApiResponse<Page<friendship::Model>>> {
    let page = match req.user_id {
        Some(ref other) if *other != user.id => {
            state
                .friendship_service
                .list_friends_of(&user.id, other, req.limit, req.until_id.as_deref())
                .await?
        }
        _ => {
            state
                .friendship_service
                .list(&user.id, ListKind::Friends, req.limit, req.until_id.as_deref())
                .await?
        }
    };
    Ok(ApiResponse::ok(page))
}

async fn list_received(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> AppResult<ApiResponse<Page<friendship::Model>>> {
    let page = state
        .friendship_service
        .list(&user.id, ListKind::Received, req.limit, req.until_id.as_deref())
        .await?;
    Ok(ApiResponse::ok(page))
}

async fn list_sent(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> AppResult<ApiResponse<Page<friendship::Model>>> {
    let page = state
        .friendship_service
        .list(&user.id, ListKind::Sent, req.limit, req.until_id.as_deref())
        .await?;
    Ok(ApiResponse::ok(page))
}

/// Count friends shared with another user.
async fn mutual(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<MutualRequest>,
) -> AppResult<ApiResponse<MutualResponse>> {
    req.validate()?;
    let count = state
        .friendship_service
        .mutual_friends_count(&user.id, &req.user_id)
        .await?;
    Ok(ApiResponse::ok(MutualResponse { count }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/request", post(send_request))
        .route("/accept", post(accept_request))
        .route("/reject", post(reject_request))
        .route("/cancel", post(cancel_request))
        .route("/remove", post(remove_friend))
        .route("/accept-all", post(accept_all))
        .route("/reject-all", post(reject_all))
        .route("/cancel-all", post(cancel_all))
        .route("/list", post(list_friends))
        .route("/received", post(list_received))
        .route("/sent", post(list_sent))
        .route("/mutual", post(mutual))
}

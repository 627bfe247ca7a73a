//! Notifications endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use shelfmate_common::AppResult;
use shelfmate_db::entities::notification::{Model as NotificationModel, NotificationType};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// List notifications request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsRequest {
    /// Maximum results (default: 10)
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Cursor for pagination (before this ID)
    pub until_id: Option<String>,
    /// Only unread notifications
    #[serde(default)]
    pub unread_only: bool,
}

const fn default_limit() -> u64 {
    10
}

/// Notification response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: String,
    pub created_at: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_avatar_url: Option<String>,
    pub friendship_id: String,
    pub is_read: bool,
}

impl From<NotificationModel> for NotificationResponse {
    fn from(n: NotificationModel) -> Self {
        Self {
            id: n.id,
            created_at: n.created_at.to_rfc3339(),
            notification_type: n.notification_type,
            actor_id: n.actor_id,
            actor_name: n.actor_name,
            actor_avatar_url: n.actor_avatar_url,
            friendship_id: n.friendship_id,
            is_read: n.is_read,
        }
    }
}

/// Mark as read request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub ids: Vec<String>,
}

/// Count response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub count: u64,
}

/// Get notifications.
async fn list_notifications(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListNotificationsRequest>,
) -> AppResult<ApiResponse<Vec<NotificationResponse>>> {
    let notifications = state
        .notification_service
        .list(&user.id, req.limit, req.until_id.as_deref(), req.unread_only)
        .await?;

    Ok(ApiResponse::ok(
        notifications.into_iter().map(Into::into).collect(),
    ))
}

/// Mark notifications as read.
async fn mark_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<MarkReadRequest>,
) -> AppResult<ApiResponse<CountResponse>> {
    let count = state
        .notification_service
        .mark_read(&user.id, &req.ids)
        .await?;
    Ok(ApiResponse::ok(CountResponse { count }))
}

/// Mark all notifications as read.
async fn mark_all_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<CountResponse>> {
    let count = state.notification_service.mark_all_read(&user.id).await?;
    Ok(ApiResponse::ok(CountResponse { count }))
}

/// Get unread count.
async fn unread_count(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<CountResponse>> {
    let count = state.notification_service.count_unread(&user.id).await?;
    Ok(ApiResponse::ok(CountResponse { count }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/list", post(list_notifications))
        .route("/mark-read", post(mark_read))
        .route("/mark-all-read", post(mark_all_read))
        .route("/unread-count", post(unread_count))
}

//! Users endpoints.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use shelfmate_common::{AppError, AppResult};
use shelfmate_core::{CreateUserInput, UpdateProfileInput};
use shelfmate_db::entities::user;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// User response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub created_at: String,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub friends_count: i32,
}

impl From<user::Model> for UserResponse {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at.to_rfc3339(),
            username: user.username,
            name: user.name,
            avatar_url: user.avatar_url,
            bio: user.bio,
            friends_count: user.friends_count,
        }
    }
}

/// The caller's own profile, with the private counters.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub pending_requests_count: i32,
    pub sent_requests_count: i32,
}

impl From<user::Model> for MeResponse {
    fn from(user: user::Model) -> Self {
        let pending_requests_count = user.pending_requests_count;
        let sent_requests_count = user.sent_requests_count;
        Self {
            user: user.into(),
            pending_requests_count,
            sent_requests_count,
        }
    }
}

/// Sign-up response carrying the new access token.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUserResponse {
    #[serde(flatten)]
    pub me: MeResponse,
    pub token: String,
}

/// Create a user.
async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserInput>,
) -> AppResult<ApiResponse<CreatedUserResponse>> {
    let user = state.user_service.create(req).await?;
    let token = user
        .token
        .clone()
        .ok_or_else(|| AppError::Internal("User created without a token".to_string()))?;
    Ok(ApiResponse::ok(CreatedUserResponse {
        me: user.into(),
        token,
    }))
}

/// Show user request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowUserRequest {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

/// Show a user by id or username.
///
/// Users on either side of a block see each other as missing.
async fn show_user(
    AuthUser(viewer): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowUserRequest>,
) -> AppResult<ApiResponse<UserResponse>> {
    let user = match (req.user_id, req.username) {
        (Some(id), _) => state.user_service.get(&id).await?,
        (None, Some(username)) => state
            .user_service
            .find_by_username(&username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User @{username}")))?,
        (None, None) => {
            return Err(AppError::Validation(
                "userId or username is required".to_string(),
            ));
        }
    };

    if user.id != viewer.id
        && state
            .blocking_service
            .is_blocked_between(&viewer.id, &user.id)
            .await?
    {
        return Err(AppError::NotFound(format!("User {}", user.id)));
    }

    Ok(ApiResponse::ok(user.into()))
}

/// Get current user.
async fn me(AuthUser(user): AuthUser) -> ApiResponse<MeResponse> {
    ApiResponse::ok(user.into())
}

/// Update the caller's profile.
async fn update_me(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UpdateProfileInput>,
) -> AppResult<ApiResponse<MeResponse>> {
    let user = state.user_service.update_profile(&user.id, req).await?;
    Ok(ApiResponse::ok(user.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_user))
        .route("/show", post(show_user))
}

pub fn me_router() -> Router<AppState> {
    Router::new()
        .route("/", post(me))
        .route("/update", post(update_me))
}

//! API integration tests.
//!
//! These tests drive the full router, including the auth middleware, against a
//! mock database.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::redundant_clone)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
};
use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};
use shelfmate_api::{
    SseBroadcaster,
    middleware::{AppState, auth_middleware},
    router as api_router,
};
use shelfmate_common::{config::FriendsConfig, relationship_id};
use shelfmate_core::{BlockingService, FriendshipService, NotificationService, UserService};
use shelfmate_db::{
    entities::user,
    repositories::{BlockingRepository, FriendshipRepository, NotificationRepository, UserRepository},
    test_utils::user_fixture,
};
use std::sync::Arc;
use tower::ServiceExt;

/// Create test app state over the given connection.
fn create_test_state(db: DatabaseConnection) -> AppState {
    let db = Arc::new(db);
    let config = FriendsConfig::default();

    let user_repo = UserRepository::new(Arc::clone(&db));
    let friendship_repo = FriendshipRepository::new(Arc::clone(&db));
    let blocking_repo = BlockingRepository::new(Arc::clone(&db));
    let notification_repo = NotificationRepository::new(Arc::clone(&db));

    AppState {
        user_service: UserService::new(user_repo.clone(), friendship_repo.clone()),
        friendship_service: FriendshipService::new(
            Arc::clone(&db),
            friendship_repo,
            user_repo.clone(),
            blocking_repo.clone(),
            config.clone(),
        ),
        blocking_service: BlockingService::new(
            Arc::clone(&db),
            blocking_repo,
            user_repo,
            config.max_page_size,
        ),
        notification_service: NotificationService::new(notification_repo, &config),
        sse_broadcaster: SseBroadcaster::new(),
    }
}

fn create_test_router(db: DatabaseConnection) -> Router {
    let state = create_test_state(db);
    Router::new()
        .nest("/api", api_router())
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

/// A router whose database answers the token lookup with `user`.
fn router_for(user: &user::Model) -> Router {
    create_test_router(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![user.clone()]])
            .into_connection(),
    )
}

fn post_json(uri: &str, token: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["error"]["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_friend_request_requires_auth() {
    let app = create_test_router(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

    let response = app
        .oneshot(post_json(
            "/api/friends/request",
            None,
            &serde_json::json!({ "targetId": "bob" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sse_stream_requires_auth() {
    let app = create_test_router(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/streaming/sse/user")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_to_self_is_bad_request() {
    let alice = user_fixture("alice", "alice");
    let app = router_for(&alice);

    let response = app
        .oneshot(post_json(
            "/api/friends/request",
            alice.token.as_deref(),
            &serde_json::json!({ "targetId": "alice" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accepting_strangers_request_is_forbidden() {
    let alice = user_fixture("alice", "alice");
    let app = router_for(&alice);

    let response = app
        .oneshot(post_json(
            "/api/friends/accept",
            alice.token.as_deref(),
            &serde_json::json!({ "relationshipId": relationship_id("bob", "carol") }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "FORBIDDEN");
}

#[tokio::test]
async fn test_empty_bulk_accept_is_rejected() {
    let alice = user_fixture("alice", "alice");
    let app = router_for(&alice);

    let response = app
        .oneshot(post_json(
            "/api/friends/accept-all",
            alice.token.as_deref(),
            &serde_json::json!({ "ids": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_signup_with_invalid_username_is_rejected() {
    let app = create_test_router(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

    let response = app
        .oneshot(post_json(
            "/api/users/create",
            None,
            &serde_json::json!({ "username": "not a handle!" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_me_returns_private_counters() {
    let mut alice = user_fixture("alice", "alice");
    alice.pending_requests_count = 2;
    let app = router_for(&alice);

    let response = app
        .oneshot(post_json("/api/i", alice.token.as_deref(), &serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["username"], "alice");
    assert_eq!(json["data"]["pendingRequestsCount"], 2);
}

#[tokio::test]
async fn test_unknown_endpoint_returns_404() {
    let app = create_test_router(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

    let response = app
        .oneshot(post_json("/api/follows/create", None, &serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

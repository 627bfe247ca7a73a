//! API middleware.

#![allow(missing_docs)]

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use shelfmate_core::{BlockingService, FriendshipService, NotificationService, UserService};

use crate::sse::SseBroadcaster;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub user_service: UserService,
    pub friendship_service: FriendshipService,
    pub blocking_service: BlockingService,
    pub notification_service: NotificationService,
    pub sse_broadcaster: SseBroadcaster,
}

/// Authentication middleware.
///
/// Resolves a bearer token to its user and stores the user in the request
/// extensions for [`AuthUser`](crate::extractors::AuthUser). Requests without a
/// valid token pass through unauthenticated.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth_header) = req.headers().get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        match state.user_service.authenticate_by_token(token).await {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(e) if e.is_server_error() => {
                tracing::error!(error = %e, "Token lookup failed");
            }
            Err(_) => {}
        }
    }

    next.run(req).await
}

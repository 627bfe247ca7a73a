//! API endpoints.

mod blocking;
mod friends;
mod notifications;
mod users;

use axum::Router;

use crate::middleware::AppState;
use crate::sse;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/users", users::router())
        .nest("/i", users::me_router())
        .nest("/friends", friends::router())
        .nest("/blocking", blocking::router())
        .nest("/notifications", notifications::router())
        .nest("/streaming/sse", sse::router())
}

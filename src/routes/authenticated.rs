use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Routes available to any caller with a valid token and an active account.
/// The `auth_middleware` layer in `create_router` guarantees every handler here
/// can extract `AuthUser` without resolving the token again.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /v1/posts
        // Creates a post owned by the caller.
        .route("/v1/posts", post(handlers::create_post))
        // GET /v1/users/{userID}
        // Public profile: username and role name.
        .route("/v1/users/{userID}", get(handlers::get_user))
        // PUT /v1/users/{userID}/deactivate
        // Self-service deactivation, or moderation by a privileged user.
        .route("/v1/users/{userID}/deactivate", put(handlers::deactivate_user))
}

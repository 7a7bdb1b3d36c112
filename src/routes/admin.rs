use crate::{AppState, handlers};
use axum::{Router, routing::patch};

/// Admin Router Module
///
/// User management. Each handler checks the caller's role level against
/// `manage_users_level` and invalidates the target's cached identity after writing.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // PATCH /v1/users/{userID}/role
        // Assigns a role by name ("user", "moderator", "admin").
        .route("/v1/users/{userID}/role", patch(handlers::update_user_role))
}

use crate::{AppState, handlers, middleware::load_post};
use axum::{
    Router,
    middleware,
    routing::{get, post},
};

/// Post Router Module
///
/// Routes addressing one post by `{postID}`. `load_post` resolves the post first, so
/// unknown ids are 404 before any permission check, and handlers receive the post
/// as an `Extension`.
pub fn post_routes(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PATCH/DELETE /v1/posts/{postID}
        // PATCH requires owner or `update_post_level` and the last-read `version`.
        // DELETE requires owner or `delete_post_level`.
        .route(
            "/v1/posts/{postID}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
        // POST /v1/posts/{postID}/comments
        .route("/v1/posts/{postID}/comments", post(handlers::create_comment))
        .route_layer(middleware::from_fn_with_state(state, load_post))
}

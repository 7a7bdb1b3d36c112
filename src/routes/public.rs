use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a bearer token. They still pass the rate limiter.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /v1/health
        // Liveness check for load balancers; reports env and version.
        .route("/v1/health", get(handlers::health_check))
        // POST /v1/authentication/token
        // Email and password in, bearer token out.
        .route("/v1/authentication/token", post(handlers::create_token))
}

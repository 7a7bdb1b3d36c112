use axum::{
    extract::{ConnectInfo, Path, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use crate::{AppState, auth::AuthUser, error::AppError, ratelimiter::LimiterState};

/// rate_limit
///
/// Admission gate applied to every route before any other processing. Keyed by the
/// peer IP address; a denied request gets 429 with `Retry-After` set to the window.
pub async fn rate_limit(
    State(limiter): State<LimiterState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(&request);
    let (allowed, retry_after) = limiter.allow(&key);
    if !allowed {
        return Err(AppError::RateLimited { retry_after });
    }
    Ok(next.run(request).await)
}

/// client_key
///
/// The peer IP (port excluded, so reconnects share a window). Requests served without
/// connect info, such as in-process router tests, share the `"unknown"` key.
pub fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// auth_middleware
///
/// Rejects the request unless `AuthUser` can be extracted. The extractor caches the
/// identity in the request extensions, so handlers that take `AuthUser` do not resolve
/// the token a second time.
pub async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// load_post
///
/// Loads the post named by `{postID}` and attaches it to the request for the handler
/// and the permission check. Unknown ids are 404.
pub async fn load_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let post = state.repo.get_post(post_id).await?.ok_or(AppError::NotFound)?;
    request.extensions_mut().insert(post);
    Ok(next.run(request).await)
}

use axum::{Router, extract::FromRef, http::HeaderName, middleware as axum_middleware};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Request admission and identity consistency.
pub mod auth;
pub mod authz;
pub mod cache;
pub mod ratelimiter;
pub mod versioning;

// Application plumbing.
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;

pub mod routes;
use routes::{admin, authenticated, posts, public};

// --- Public Re-exports ---

pub use auth::{AuthUser, IdentityResolver, JwtAuthenticator};
pub use cache::{IdentityCacheState, MemoryCache, RedisCache};
pub use config::AppConfig;
pub use error::AppError;
pub use ratelimiter::{FixedWindowRateLimiter, LimiterState};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document aggregated from the `#[utoipa::path]` handlers, served at
/// `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check, handlers::create_token, handlers::create_post, handlers::get_post,
        handlers::update_post, handlers::delete_post, handlers::create_comment,
        handlers::get_user, handlers::update_user_role, handlers::deactivate_user
    ),
    components(
        schemas(
            models::Post, models::Comment, models::Role, models::Identity,
            models::CreatePostRequest, models::UpdatePostRequest, models::CreateCommentRequest,
            models::UpdateRoleRequest, models::UserProfile, models::HealthResponse,
            models::CreateTokenRequest, models::TokenResponse,
        )
    ),
    tags(
        (name = "gopher-social", description = "Gopher Social API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The long-lived services shared by every request. Each field is cheap to clone
/// and can be swapped for an in-memory substitute in tests.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: users, posts, comments.
    pub repo: RepositoryState,
    /// Bearer token to identity, via the identity cache.
    pub identity: IdentityResolver,
    /// Per-client admission control.
    pub limiter: LimiterState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for IdentityResolver {
    fn from_ref(app_state: &AppState) -> IdentityResolver {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for LimiterState {
    fn from_ref(app_state: &AppState) -> LimiterState {
        app_state.limiter.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing structure and its layers. Request order, outermost first:
/// CORS, request id, tracing, rate limiter, then (for protected routes) identity
/// resolution and post loading.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let protected = authenticated::authenticated_routes()
        .merge(posts::post_routes(state.clone()))
        .merge(admin::admin_routes())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(protected)
        // Admission runs before routing-specific work, for every route.
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of a request carries its
/// `x-request-id`, method and URI.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

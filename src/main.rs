use gopher_social::{
    AppState, IdentityResolver, JwtAuthenticator,
    cache::{IdentityCacheState, MemoryCache, RedisCache},
    config::{AppConfig, Env},
    create_router,
    models::Identity,
    ratelimiter::FixedWindowRateLimiter,
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Initializes configuration, logging, the database pool, the identity cache and the
/// rate limiter, then serves HTTP.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing secrets).
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging. RUST_LOG wins over the crate default.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gopher_social=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(config.io_timeout)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    let repo = Arc::new(PostgresRepository::with_timeout(pool, config.io_timeout)) as RepositoryState;

    // 4. Identity cache. Redis when enabled, process memory otherwise.
    let cache: IdentityCacheState = if config.redis_enabled {
        let redis = RedisCache::<Identity>::connect(&config.redis_url, config.cache_ttl(), config.io_timeout)
            .await
            .expect("FATAL: Failed to connect to Redis. Check REDIS_URL.");
        tracing::info!("Identity cache backed by Redis at {}", config.redis_url);
        Arc::new(redis)
    } else {
        tracing::warn!("REDIS_ENABLED=false: identity cache is in-process and never expires");
        Arc::new(MemoryCache::<Identity>::new())
    };

    let authenticator = JwtAuthenticator::new(
        config.auth.secret.clone(),
        config.auth.issuer.clone(),
        config.auth.audience.clone(),
    );
    let identity = IdentityResolver::new(authenticator, cache, repo.clone());

    // 5. Rate limiter with its background sweeper.
    let limiter = Arc::new(FixedWindowRateLimiter::new(config.rate_limiter.clone()));
    if config.rate_limiter.enabled {
        let _sweeper = limiter.spawn_sweeper();
        tracing::info!(
            "Rate limiter: {} requests per {:?}",
            config.rate_limiter.requests_per_window,
            config.rate_limiter.window
        );
    }

    // 6. Unified state and server.
    let addr = config.addr.clone();
    let app_state = AppState {
        repo,
        identity,
        limiter,
        config,
    };
    let app = create_router(app_state);

    let listener = TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: Failed to bind {addr}: {e}"));

    tracing::info!("Listening on {}", addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    // Connect info supplies the peer address the rate limiter keys on.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("FATAL: HTTP server terminated unexpectedly");
}

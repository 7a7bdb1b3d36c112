use gopher_social::{
    AppError, PostgresRepository,
    models::{Post, UpdatePostRequest},
    repository::{Repository, StoreError},
    versioning::apply_update,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::net::TcpListener;

// --- Test Context and Setup ---

/// Holds the pool for tests that need a real database.
struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    /// Connects and migrates, or returns `None` when `DATABASE_URL` is unset so the
    /// suite still runs on machines without Postgres.
    async fn setup() -> Option<Self> {
        dotenv::dotenv().ok();

        let Ok(db_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping database integration test");
            return None;
        };

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        Some(DbTestContext { pool })
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_nanos();
    format!("{}-{nanos}", std::process::id())
}

/// Inserts an active user with the `user` role and returns its id and email.
async fn create_test_user(pool: &PgPool, password_hash: &str) -> (i64, String) {
    let suffix = unique_suffix();
    let email = format!("it-{suffix}@example.com");

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO users (username, email, password, is_active, role_id)
        VALUES ($1, $2, $3, TRUE, (SELECT id FROM roles WHERE name = 'user'))
        RETURNING id
        "#,
    )
    .bind(format!("it-{suffix}"))
    .bind(&email)
    .bind(password_hash.as_bytes())
    .fetch_one(pool)
    .await
    .expect("Failed to create test user");

    (id, email)
}

/// Inserts a post directly at `version`.
async fn create_test_post(pool: &PgPool, user_id: i64, version: i32) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO posts (title, content, user_id, version)
        VALUES ('original title', 'original content', $1, $2)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(version)
    .fetch_one(pool)
    .await
    .expect("Failed to create test post")
}

// --- Tests ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_against_postgres_exactly_one_wins() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = Arc::new(ctx.repository());
    let (user_id, _) = create_test_user(&ctx.pool, "unused-hash").await;
    let post_id = create_test_post(&ctx.pool, user_id, 3).await;

    let tasks: Vec<_> = ["first writer", "second writer"]
        .into_iter()
        .map(|title| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let change = UpdatePostRequest {
                    title: Some(title.to_string()),
                    content: None,
                    version: 3,
                };
                apply_update::<Post, _, _>(&*repo, post_id, 3, |p: &mut Post| change.apply_to(p))
                    .await
            })
        })
        .collect();

    let mut wins = Vec::new();
    let mut conflicts = 0;
    for task in tasks {
        match task.await.expect("update task panicked") {
            Ok(post) => wins.push(post),
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(wins.len(), 1);
    assert_eq!(conflicts, 1);
    assert_eq!(wins[0].version, 4);

    let stored = repo.get_post(post_id).await.unwrap().expect("post should exist");
    assert_eq!(stored.version, 4);
    assert_eq!(stored.title, wins[0].title);
    assert_eq!(stored.content, "original content");
    assert_eq!(stored.user_id, user_id);
}

#[tokio::test]
async fn test_stale_version_leaves_postgres_row_untouched() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let (user_id, _) = create_test_user(&ctx.pool, "unused-hash").await;
    let post_id = create_test_post(&ctx.pool, user_id, 5).await;

    let result: Result<Post, AppError> =
        apply_update(&repo, post_id, 4, |p: &mut Post| p.title = "lost".to_string()).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let stored = repo.get_post(post_id).await.unwrap().expect("post should exist");
    assert_eq!(stored.version, 5);
    assert_eq!(stored.title, "original title");
}

#[tokio::test]
async fn test_user_and_credentials_carry_the_role() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let (user_id, email) = create_test_user(&ctx.pool, "$2b$04$stored-hash").await;

    let user = repo.get_user(user_id).await.unwrap().expect("user should exist");
    assert_eq!(user.email, email);
    assert_eq!(user.role.name, "user");
    assert_eq!(user.role.level, 1);

    let credentials = repo
        .get_credentials_by_email(&email)
        .await
        .unwrap()
        .expect("credentials should exist");
    assert_eq!(credentials.user.id, user_id);
    assert_eq!(credentials.password_hash, b"$2b$04$stored-hash".to_vec());

    assert!(repo.get_credentials_by_email("absent@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unresponsive_database_times_out() {
    // Accepts connections and never completes the Postgres handshake.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect_lazy(&format!("postgres://user:pass@{addr}/social?sslmode=disable"))
        .expect("url should parse");
    let repo = PostgresRepository::with_timeout(pool, Duration::from_millis(100));

    let result = tokio::time::timeout(Duration::from_secs(5), repo.get_user(1))
        .await
        .expect("query should give up on its own");

    assert!(matches!(result, Err(StoreError::Timeout)), "got {result:?}");
    server.abort();
}

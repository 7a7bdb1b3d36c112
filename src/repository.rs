use crate::{
    models::{Comment, Post, Role, User},
    versioning::VersionedStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, error::ErrorKind};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;

/// Default bound on every query issued by `PostgresRepository`.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// StoreError
///
/// Failures surfaced by the persistence layer. A missing row on a lookup is
/// `Ok(None)`, not `NotFound`; `NotFound` is reserved for writes that reference
/// a row that does not exist.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("resource already exists: {0}")]
    Conflict(String),
    #[error("query timed out")]
    Timeout,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Credentials
///
/// A user together with the stored bcrypt hash of their password. Only the token
/// endpoint reads this; `get_user` never selects the hash.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: Vec<u8>,
}

/// Repository Trait
///
/// The persistence contract used by the identity resolver and the handlers.
/// Posts are additionally a `VersionedStore`, so every update goes through the
/// conditional write.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across
/// Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: VersionedStore<Post> + Send + Sync {
    // --- Users & Roles ---
    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;
    async fn get_credentials_by_email(&self, email: &str) -> Result<Option<Credentials>, StoreError>;
    /// Returns false when no such user exists.
    async fn set_user_role(&self, user_id: i64, role_id: i64) -> Result<bool, StoreError>;
    /// Returns false when no such user exists.
    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool, StoreError>;

    // --- Posts ---
    async fn create_post(&self, title: &str, content: &str, user_id: i64) -> Result<Post, StoreError>;
    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError>;
    /// Returns false when no such post exists.
    async fn delete_post(&self, id: i64) -> Result<bool, StoreError>;

    // --- Comments ---
    /// Fails with `NotFound` when the post does not exist.
    async fn create_comment(&self, post_id: i64, user_id: i64, content: &str) -> Result<Comment, StoreError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// Every query is bounded by `timeout`.
pub struct PostgresRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(pool, QUERY_TIMEOUT)
    }

    pub fn with_timeout(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

/// Maps constraint violations to domain errors; everything else stays a database error.
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.kind() {
            ErrorKind::UniqueViolation => {
                return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
            }
            ErrorKind::ForeignKeyViolation => return StoreError::NotFound,
            _ => {}
        }
    }
    StoreError::Database(err)
}

/// UserRow
///
/// Flat projection of `users JOIN roles`, folded into the nested `User` model.
#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    role_id: i64,
    role_name: String,
    role_level: i32,
}

#[derive(FromRow)]
struct CredentialsRow {
    #[sqlx(flatten)]
    user: UserRow,
    password: Vec<u8>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            is_active: row.is_active,
            created_at: row.created_at,
            role: Role {
                id: row.role_id,
                name: row.role_name,
                level: row.role_level,
            },
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// get_user
    ///
    /// Retrieves the identity record and its role in one query.
    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = self
            .bounded(
                sqlx::query_as::<_, UserRow>(
                    r#"
                    SELECT u.id, u.username, u.email, u.is_active, u.created_at,
                           r.id AS role_id, r.name AS role_name, r.level AS role_level
                    FROM users u
                    JOIN roles r ON u.role_id = r.id
                    WHERE u.id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(User::from))
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        self.bounded(
            sqlx::query_as::<_, Role>("SELECT id, name, level FROM roles WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn get_credentials_by_email(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        let row = self
            .bounded(
                sqlx::query_as::<_, CredentialsRow>(
                    r#"
                    SELECT u.id, u.username, u.email, u.is_active, u.created_at, u.password,
                           r.id AS role_id, r.name AS role_name, r.level AS role_level
                    FROM users u
                    JOIN roles r ON u.role_id = r.id
                    WHERE u.email = $1
                    "#,
                )
                .bind(email)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|row| Credentials {
            user: row.user.into(),
            password_hash: row.password,
        }))
    }

    async fn set_user_role(&self, user_id: i64, role_id: i64) -> Result<bool, StoreError> {
        let res = self
            .bounded(
                sqlx::query("UPDATE users SET role_id = $1 WHERE id = $2")
                    .bind(role_id)
                    .bind(user_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool, StoreError> {
        let res = self
            .bounded(
                sqlx::query("UPDATE users SET is_active = $1 WHERE id = $2")
                    .bind(active)
                    .bind(user_id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// create_post
    ///
    /// New posts start at version 0 (column default).
    async fn create_post(&self, title: &str, content: &str, user_id: i64) -> Result<Post, StoreError> {
        self.bounded(
            sqlx::query_as::<_, Post>(
                r#"
                INSERT INTO posts (title, content, user_id)
                VALUES ($1, $2, $3)
                RETURNING id, title, content, user_id, version, created_at
                "#,
            )
            .bind(title)
            .bind(content)
            .bind(user_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.bounded(
            sqlx::query_as::<_, Post>(
                "SELECT id, title, content, user_id, version, created_at FROM posts WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn delete_post(&self, id: i64) -> Result<bool, StoreError> {
        let res = self
            .bounded(
                sqlx::query("DELETE FROM posts WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn create_comment(&self, post_id: i64, user_id: i64, content: &str) -> Result<Comment, StoreError> {
        self.bounded(
            sqlx::query_as::<_, Comment>(
                r#"
                INSERT INTO comments (post_id, user_id, content)
                VALUES ($1, $2, $3)
                RETURNING id, post_id, user_id, content, created_at
                "#,
            )
            .bind(post_id)
            .bind(user_id)
            .bind(content)
            .fetch_one(&self.pool),
        )
        .await
    }
}

#[async_trait]
impl VersionedStore<Post> for PostgresRepository {
    async fn load(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.get_post(id).await
    }

    /// compare_and_swap
    ///
    /// The version check and the increment happen in the same statement, so two
    /// writers presenting the same version cannot both match a row, even across
    /// server processes.
    async fn compare_and_swap(&self, post: &Post) -> Result<Option<i32>, StoreError> {
        self.bounded(
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE posts
                SET title = $1, content = $2, version = version + 1
                WHERE id = $3 AND version = $4
                RETURNING version
                "#,
            )
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.id)
            .bind(post.version)
            .fetch_optional(&self.pool),
        )
        .await
    }
}

// --- In-memory implementation ---

#[derive(Default)]
struct Tables {
    roles: Vec<Role>,
    users: HashMap<i64, User>,
    password_hashes: HashMap<i64, Vec<u8>>,
    posts: HashMap<i64, Post>,
    comments: Vec<Comment>,
    next_post_id: i64,
    next_comment_id: i64,
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory, used by tests and for local runs.
///
/// All tables sit behind one mutex. `compare_and_swap` checks and bumps the version
/// inside a single lock acquisition, which is the storage boundary of this store.
/// `user_lookups` counts `get_user` calls so tests can tell cache hits from
/// database round trips.
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
    user_lookups: AtomicUsize,
}

impl InMemoryRepository {
    /// Creates an empty store seeded with the default roles: user (1), moderator (2), admin (3).
    pub fn new() -> Self {
        let tables = Tables {
            roles: vec![
                Role { id: 1, name: "user".to_string(), level: 1 },
                Role { id: 2, name: "moderator".to_string(), level: 2 },
                Role { id: 3, name: "admin".to_string(), level: 3 },
            ],
            next_post_id: 1,
            next_comment_id: 1,
            ..Tables::default()
        };
        Self {
            tables: Mutex::new(tables),
            user_lookups: AtomicUsize::new(0),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }

    /// Users without a stored hash cannot obtain a token.
    pub fn set_password_hash(&self, user_id: i64, hash: impl Into<Vec<u8>>) {
        self.tables().password_hashes.insert(user_id, hash.into());
    }

    /// Stores `post` as-is, keeping its id and version.
    pub fn insert_post(&self, post: Post) {
        let mut tables = self.tables();
        tables.next_post_id = tables.next_post_id.max(post.id + 1);
        tables.posts.insert(post.id, post);
    }

    pub fn role(&self, name: &str) -> Option<Role> {
        self.tables().roles.iter().find(|r| r.name == name).cloned()
    }

    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }

    pub fn comments_for(&self, post_id: i64) -> Vec<Comment> {
        self.tables()
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.role(name))
    }

    async fn get_credentials_by_email(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .users
            .values()
            .find(|u| u.email == email)
            .and_then(|user| {
                let hash = tables.password_hashes.get(&user.id)?;
                Some(Credentials {
                    user: user.clone(),
                    password_hash: hash.clone(),
                })
            }))
    }

    async fn set_user_role(&self, user_id: i64, role_id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let Some(role) = tables.roles.iter().find(|r| r.id == role_id).cloned() else {
            return Err(StoreError::NotFound);
        };
        Ok(match tables.users.get_mut(&user_id) {
            Some(user) => {
                user.role = role;
                true
            }
            None => false,
        })
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool, StoreError> {
        Ok(match self.tables().users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        })
    }

    async fn create_post(&self, title: &str, content: &str, user_id: i64) -> Result<Post, StoreError> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        let post = Post {
            id: tables.next_post_id,
            title: title.to_string(),
            content: content.to_string(),
            user_id,
            version: 0,
            created_at: Utc::now(),
        };
        tables.next_post_id += 1;
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        Ok(self.tables().posts.get(&id).cloned())
    }

    async fn delete_post(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let removed = tables.posts.remove(&id).is_some();
        if removed {
            tables.comments.retain(|c| c.post_id != id);
        }
        Ok(removed)
    }

    async fn create_comment(&self, post_id: i64, user_id: i64, content: &str) -> Result<Comment, StoreError> {
        let mut tables = self.tables();
        if !tables.posts.contains_key(&post_id) {
            return Err(StoreError::NotFound);
        }
        let comment = Comment {
            id: tables.next_comment_id,
            post_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.next_comment_id += 1;
        tables.comments.push(comment.clone());
        Ok(comment)
    }
}

#[async_trait]
impl VersionedStore<Post> for InMemoryRepository {
    async fn load(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.get_post(id).await
    }

    async fn compare_and_swap(&self, post: &Post) -> Result<Option<i32>, StoreError> {
        let mut tables = self.tables();
        match tables.posts.get_mut(&post.id) {
            Some(stored) if stored.version == post.version => {
                stored.title = post.title.clone();
                stored.content = post.content.clone();
                stored.version += 1;
                Ok(Some(stored.version))
            }
            _ => Ok(None),
        }
    }
}

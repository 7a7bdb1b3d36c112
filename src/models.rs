use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// A named privilege tier from the `roles` table. Roles are totally ordered by `level`:
/// a higher level grants more privilege ("user" = 1, "moderator" = 2, "admin" = 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub level: i32,
}

/// User
///
/// The authoritative identity record, read from `users` joined with `roles`.
/// The password hash column is never selected into this struct.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Identity
///
/// The caller's identity as attached to a request, and the snapshot stored in the
/// identity cache. A cached snapshot may lag the `users` row until it is evicted
/// or explicitly invalidated (role change, deactivation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub role: Role,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_active: user.is_active,
            role: user.role,
        }
    }
}

/// Post
///
/// A post from the `posts` table. `version` starts at 0 and is bumped by exactly one
/// on every successful update; clients must echo it back on their next write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub user_id: i64,
    pub version: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Comment
///
/// A comment from the `comments` table, attached to a post.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// CreatePostRequest
///
/// Input payload for POST /v1/posts. The owner is taken from the authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(deny_unknown_fields)]
#[ts(export)]
pub struct CreatePostRequest {
    #[schema(example = "Hello gophers")]
    pub title: String,
    pub content: String,
}

impl CreatePostRequest {
    pub const MAX_TITLE_LEN: usize = 100;

    /// Returns a human-readable reason when the payload is unacceptable.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        if self.title.chars().count() > Self::MAX_TITLE_LEN {
            return Err(format!("title must be at most {} characters", Self::MAX_TITLE_LEN));
        }
        if self.content.trim().is_empty() {
            return Err("content is required".to_string());
        }
        Ok(())
    }
}

/// UpdatePostRequest
///
/// Partial update payload for PATCH /v1/posts/{postID}.
///
/// `version` is the version the client last read. The update is rejected with 409
/// if the post has been modified since.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(deny_unknown_fields)]
#[ts(export)]
pub struct UpdatePostRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    pub version: i32,
}

impl UpdatePostRequest {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err("title must not be empty".to_string());
            }
            if title.chars().count() > CreatePostRequest::MAX_TITLE_LEN {
                return Err(format!(
                    "title must be at most {} characters",
                    CreatePostRequest::MAX_TITLE_LEN
                ));
            }
        }
        if matches!(&self.content, Some(content) if content.trim().is_empty()) {
            return Err("content must not be empty".to_string());
        }
        Ok(())
    }

    /// Applies the provided fields to `post`, leaving absent ones untouched.
    pub fn apply_to(&self, post: &mut Post) {
        if let Some(title) = &self.title {
            post.title = title.clone();
        }
        if let Some(content) = &self.content {
            post.content = content.clone();
        }
    }
}

/// CreateCommentRequest
///
/// Input payload for POST /v1/posts/{postID}/comments.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(deny_unknown_fields)]
#[ts(export)]
pub struct CreateCommentRequest {
    pub content: String,
}

/// UpdateRoleRequest
///
/// Input payload for PATCH /v1/users/{userID}/role. `role` is a role name, e.g. "moderator".
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(deny_unknown_fields)]
#[ts(export)]
pub struct UpdateRoleRequest {
    #[schema(example = "moderator")]
    pub role: String,
}

/// CreateTokenRequest
///
/// Input payload for POST /v1/authentication/token.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(deny_unknown_fields)]
#[ts(export)]
pub struct CreateTokenRequest {
    #[schema(example = "alice@example.com")]
    pub email: String,
    pub password: String,
}

impl CreateTokenRequest {
    pub const MAX_EMAIL_LEN: usize = 255;
    // bcrypt ignores everything past 72 bytes.
    pub const MAX_PASSWORD_LEN: usize = 72;

    pub fn validate(&self) -> Result<(), String> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err("a valid email is required".to_string());
        }
        if self.email.len() > Self::MAX_EMAIL_LEN {
            return Err(format!("email must be at most {} characters", Self::MAX_EMAIL_LEN));
        }
        if self.password.is_empty() {
            return Err("password is required".to_string());
        }
        if self.password.len() > Self::MAX_PASSWORD_LEN {
            return Err(format!("password must be at most {} bytes", Self::MAX_PASSWORD_LEN));
        }
        Ok(())
    }
}

// --- Output Schemas ---

/// TokenResponse
///
/// A signed bearer token for the `Authorization` header.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}


/// UserProfile
///
/// Public view of a user (GET /v1/users/{userID}). Omits the email address.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub role: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role.name,
        }
    }
}

/// HealthResponse
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub env: String,
    pub version: String,
}

/// Envelope
///
/// Every successful JSON response is wrapped as `{"data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Envelope<T> {
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

use crate::{
    AppState,
    auth::AuthUser,
    authz::{authorize, require_level},
    config::AppConfig,
    error::{AppError, AppResult},
    models::{
        Comment, CreateCommentRequest, CreatePostRequest, CreateTokenRequest, Envelope,
        HealthResponse, Post, TokenResponse, UpdatePostRequest, UpdateRoleRequest, UserProfile,
    },
    versioning::commit_update,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Service version reported by the health check.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// health_check
///
/// [Public Route] Liveness check reporting the runtime environment and version.
#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, description = "Service is up", body = Envelope<HealthResponse>))
)]
pub async fn health_check(State(config): State<AppConfig>) -> Json<Envelope<HealthResponse>> {
    Json(Envelope::new(HealthResponse {
        status: "ok".to_string(),
        env: config.env.as_str().to_string(),
        version: VERSION.to_string(),
    }))
}

// --- Authentication ---

/// create_token
///
/// [Public Route] Exchanges an email and password for a bearer token valid for
/// `auth.token_ttl`. Unknown emails, wrong passwords and inactive accounts all get
/// the same 401.
#[utoipa::path(
    post,
    path = "/v1/authentication/token",
    request_body = CreateTokenRequest,
    responses(
        (status = 201, description = "Token issued", body = Envelope<TokenResponse>),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenRequest>,
) -> AppResult<(StatusCode, Json<Envelope<TokenResponse>>)> {
    payload.validate().map_err(AppError::BadRequest)?;

    let credentials = state
        .repo
        .get_credentials_by_email(&payload.email)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    let hash = String::from_utf8(credentials.password_hash)
        .map_err(|_| AppError::Internal("stored password hash is not valid UTF-8".to_string()))?;
    let password = payload.password;

    // bcrypt is CPU-bound; run it on the blocking pool.
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password check aborted: {e}")))?
        .map_err(|e| AppError::Internal(format!("stored password hash unreadable: {e}")))?;

    let user = credentials.user;
    if !matches || !user.is_active {
        tracing::debug!(user_id = user.id, "token request rejected");
        return Err(AppError::Unauthenticated);
    }

    let token = state
        .identity
        .authenticator()
        .generate_token(user.id, state.config.auth.token_ttl)?;

    tracing::info!(user_id = user.id, "token issued");
    Ok((StatusCode::CREATED, Json(Envelope::new(TokenResponse { token }))))
}

// --- Posts ---

/// create_post
///
/// [Authenticated Route] Creates a post owned by the caller, at version 0.
#[utoipa::path(
    post,
    path = "/v1/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Created", body = Envelope<Post>),
        (status = 400, description = "Invalid payload")
    )
)]
pub async fn create_post(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<Envelope<Post>>)> {
    payload.validate().map_err(AppError::BadRequest)?;

    let post = state
        .repo
        .create_post(&payload.title, &payload.content, user.id)
        .await?;

    tracing::info!(post_id = post.id, user_id = user.id, "post created");
    Ok((StatusCode::CREATED, Json(Envelope::new(post))))
}

/// get_post
///
/// [Authenticated Route] Returns the post with its current `version`, which the client
/// must present on its next update.
#[utoipa::path(
    get,
    path = "/v1/posts/{postID}",
    params(("postID" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = Envelope<Post>),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_post(Extension(post): Extension<Post>) -> Json<Envelope<Post>> {
    Json(Envelope::new(post))
}

/// update_post
///
/// [Authenticated Route] Partially updates a post.
///
/// *Authorization*: the owner, or any caller at `update_post_level` or above.
/// *Concurrency*: the write only lands if the stored version still equals
/// `payload.version`; otherwise 409 and the client must reload.
#[utoipa::path(
    patch,
    path = "/v1/posts/{postID}",
    params(("postID" = i64, Path, description = "Post ID")),
    request_body = UpdatePostRequest,
    responses(
        (status = 200, description = "Updated", body = Envelope<Post>),
        (status = 403, description = "Not owner and insufficient role"),
        (status = 409, description = "Version conflict")
    )
)]
pub async fn update_post(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Extension(post): Extension<Post>,
    Json(payload): Json<UpdatePostRequest>,
) -> AppResult<Json<Envelope<Post>>> {
    authorize(&user, &post, state.config.permissions.update_post_level)?;
    payload.validate().map_err(AppError::BadRequest)?;

    // `load_post` already read the row; only the conditional write remains.
    let updated: Post = commit_update(&*state.repo, post, payload.version, |p: &mut Post| {
        payload.apply_to(p)
    })
    .await?;

    tracing::info!(post_id = updated.id, version = updated.version, "post updated");
    Ok(Json(Envelope::new(updated)))
}

/// delete_post
///
/// [Authenticated Route] Deletes a post and its comments.
///
/// *Authorization*: the owner, or any caller at `delete_post_level` or above.
#[utoipa::path(
    delete,
    path = "/v1/posts/{postID}",
    params(("postID" = i64, Path, description = "Post ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not owner and insufficient role"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_post(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Extension(post): Extension<Post>,
) -> AppResult<StatusCode> {
    authorize(&user, &post, state.config.permissions.delete_post_level)?;

    if state.repo.delete_post(post.id).await? {
        tracing::info!(post_id = post.id, user_id = user.id, "post deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

/// create_comment
///
/// [Authenticated Route] Comments on a post as the caller.
#[utoipa::path(
    post,
    path = "/v1/posts/{postID}/comments",
    params(("postID" = i64, Path, description = "Post ID")),
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment Added", body = Envelope<Comment>),
        (status = 404, description = "Post Not Found")
    )
)]
pub async fn create_comment(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Extension(post): Extension<Post>,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Envelope<Comment>>)> {
    if payload.content.trim().is_empty() {
        return Err(AppError::BadRequest("content is required".to_string()));
    }

    let comment = state
        .repo
        .create_comment(post.id, user.id, &payload.content)
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::new(comment))))
}

// --- Users ---

/// get_user
///
/// [Authenticated Route] Public profile of any user.
#[utoipa::path(
    get,
    path = "/v1/users/{userID}",
    params(("userID" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Profile", body = Envelope<UserProfile>),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user(
    _caller: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Envelope<UserProfile>>> {
    let user = state.repo.get_user(user_id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(Envelope::new(user.into())))
}

/// update_user_role
///
/// [Authenticated Route] Assigns a role by name. Requires `manage_users_level`.
///
/// The target's cached identity is invalidated after the write, so the new role
/// applies from their next request.
#[utoipa::path(
    patch,
    path = "/v1/users/{userID}/role",
    params(("userID" = i64, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = Envelope<UserProfile>),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Insufficient role"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user_role(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<Envelope<UserProfile>>> {
    require_level(&caller, state.config.permissions.manage_users_level)?;

    let role = state
        .repo
        .get_role_by_name(&payload.role)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("unknown role '{}'", payload.role)))?;

    if !state.repo.set_user_role(user_id, role.id).await? {
        return Err(AppError::NotFound);
    }
    state.identity.invalidate(user_id).await;

    tracing::info!(user_id, role = %role.name, changed_by = caller.id, "user role changed");

    let user = state.repo.get_user(user_id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(Envelope::new(user.into())))
}

/// deactivate_user
///
/// [Authenticated Route] Deactivates an account. Users may deactivate themselves;
/// anyone else requires `manage_users_level`. Outstanding tokens stop resolving as
/// soon as the cached identity is dropped.
#[utoipa::path(
    put,
    path = "/v1/users/{userID}/deactivate",
    params(("userID" = i64, Path, description = "User ID")),
    responses(
        (status = 204, description = "Deactivated"),
        (status = 403, description = "Insufficient role"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn deactivate_user(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<StatusCode> {
    if caller.id != user_id {
        require_level(&caller, state.config.permissions.manage_users_level)?;
    }

    if !state.repo.set_user_active(user_id, false).await? {
        return Err(AppError::NotFound);
    }
    state.identity.invalidate(user_id).await;

    tracing::info!(user_id, changed_by = caller.id, "user deactivated");
    Ok(StatusCode::NO_CONTENT)
}

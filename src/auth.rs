use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    cache::IdentityCacheState,
    error::AppError,
    models::Identity,
    repository::RepositoryState,
};

/// Tolerated clock skew, in seconds, for `exp`, `nbf` and `iat`.
const LEEWAY_SECS: u64 = 60;

/// Claims
///
/// The JWT payload issued and accepted by this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the decimal user id.
    pub sub: String,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Issued at.
    pub iat: u64,
    /// Not before.
    pub nbf: u64,
    pub iss: String,
    pub aud: String,
}

/// JwtAuthenticator
///
/// Issues and verifies HS256 tokens bound to one issuer/audience pair.
#[derive(Clone)]
pub struct JwtAuthenticator {
    secret: String,
    issuer: String,
    audience: String,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// generate_token
    ///
    /// Signs a token for `user_id`, valid from now for `ttl`.
    pub fn generate_token(&self, user_id: i64, ttl: Duration) -> Result<String, AppError> {
        let now = unix_now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl.as_secs(),
            iat: now,
            nbf: now,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    /// validate_token
    ///
    /// Checks the signature, algorithm, `exp`, `nbf`, `iss` and `aud`, then rejects
    /// tokens whose `iat` lies in the future. Every failure is `Unauthenticated`.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = LEEWAY_SECS;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            AppError::Unauthenticated
        })?;

        if data.claims.iat > unix_now() + LEEWAY_SECS {
            tracing::debug!("token rejected: issued in the future");
            return Err(AppError::Unauthenticated);
        }

        Ok(data.claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// IdentityResolver
///
/// Turns an `Authorization` header into the caller's `Identity`.
///
/// The cache is consulted first and trusted on a hit, so a role change or
/// deactivation is only seen once the entry is invalidated (`invalidate`) or expires
/// in the backing store. On a miss the repository is authoritative and the cache is
/// repopulated best-effort.
#[derive(Clone)]
pub struct IdentityResolver {
    authenticator: Arc<JwtAuthenticator>,
    cache: IdentityCacheState,
    repo: RepositoryState,
}

impl IdentityResolver {
    pub fn new(authenticator: JwtAuthenticator, cache: IdentityCacheState, repo: RepositoryState) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            cache,
            repo,
        }
    }

    pub fn authenticator(&self) -> &JwtAuthenticator {
        &self.authenticator
    }

    /// resolve
    ///
    /// Fails with `Unauthenticated` when the header is missing or not `Bearer <token>`,
    /// the token does not verify, its subject is not a user id, or the user does not
    /// exist or is inactive. Those cases are indistinguishable to the caller.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Identity, AppError> {
        let token = bearer_token(authorization).ok_or(AppError::Unauthenticated)?;
        let claims = self.authenticator.validate_token(token)?;
        let user_id: i64 = claims.sub.parse().map_err(|_| AppError::Unauthenticated)?;

        match self.cache.get(&user_id).await {
            Ok(Some(identity)) => return active(identity),
            Ok(None) => {}
            Err(e) => {
                // Degrade to the database rather than failing the request.
                tracing::warn!(user_id, error = %e, "identity cache read failed");
            }
        }

        let identity: Identity = self
            .repo
            .get_user(user_id)
            .await?
            .ok_or(AppError::Unauthenticated)?
            .into();

        if let Err(e) = self.cache.set(&identity).await {
            tracing::warn!(user_id, error = %e, "identity cache write failed");
        }

        active(identity)
    }

    /// invalidate
    ///
    /// Drops the cached snapshot for `user_id`. Called after any change to a user's
    /// role or activation so the next request re-reads the database.
    pub async fn invalidate(&self, user_id: i64) {
        if let Err(e) = self.cache.delete(&user_id).await {
            tracing::warn!(user_id, error = %e, "identity cache invalidation failed");
        }
    }
}

fn active(identity: Identity) -> Result<Identity, AppError> {
    if identity.is_active {
        Ok(identity)
    } else {
        Err(AppError::Unauthenticated)
    }
}

/// Splits `Bearer <token>`; anything else, including extra segments, is rejected.
fn bearer_token(header: Option<&str>) -> Option<&str> {
    let mut parts = header?.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// AuthUser
///
/// The resolved identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

/// AuthUser Extractor Implementation
///
/// Makes `AuthUser` usable as a handler argument. The first extraction in a request
/// runs the resolver and stores the result in the request extensions; later
/// extractions (e.g. middleware then handler) reuse it.
///
/// Rejection: `AppError::Unauthenticated` (401), or `Transient` (503) when the
/// database could not be reached.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    IdentityResolver: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let resolver = IdentityResolver::from_ref(state);
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let identity = resolver.resolve(header).await?;
        let user = AuthUser(identity);
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

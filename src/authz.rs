use crate::{
    error::AppError,
    models::{Comment, Identity, Post},
};

/// Owned
///
/// A resource with a single owning user.
pub trait Owned {
    fn owner_id(&self) -> i64;
}

impl Owned for Post {
    fn owner_id(&self) -> i64 {
        self.user_id
    }
}

impl Owned for Comment {
    fn owner_id(&self) -> i64 {
        self.user_id
    }
}

/// PermissionPolicy
///
/// Minimum role level a non-owner needs per protected operation.
/// Owners are never subject to these thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub update_post_level: i32,
    pub delete_post_level: i32,
    pub manage_users_level: i32,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            // moderator
            update_post_level: 2,
            // admin
            delete_post_level: 3,
            manage_users_level: 3,
        }
    }
}

/// check_permission
///
/// The owner is always allowed. Anyone else needs `role.level >= required_level`.
pub fn check_permission<R: Owned + ?Sized>(identity: &Identity, resource: &R, required_level: i32) -> bool {
    resource.owner_id() == identity.id || identity.role.level >= required_level
}

/// authorize
///
/// `check_permission`, with a denial turned into `AppError::Forbidden`.
pub fn authorize<R: Owned + ?Sized>(identity: &Identity, resource: &R, required_level: i32) -> Result<(), AppError> {
    if check_permission(identity, resource, required_level) {
        Ok(())
    } else {
        tracing::debug!(
            user_id = identity.id,
            owner_id = resource.owner_id(),
            level = identity.role.level,
            required_level,
            "permission denied"
        );
        Err(AppError::Forbidden)
    }
}

/// require_level
///
/// Level-only check for actions with no owning resource (e.g. managing other users).
pub fn require_level(identity: &Identity, required_level: i32) -> Result<(), AppError> {
    if identity.role.level >= required_level {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

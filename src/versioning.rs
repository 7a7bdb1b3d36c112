use async_trait::async_trait;

use crate::{error::AppError, models::Post, repository::StoreError};

/// Versioned
///
/// An entity guarded by optimistic concurrency. `version` grows by exactly one on
/// every successful write.
pub trait Versioned: Clone + Send + Sync + 'static {
    fn id(&self) -> i64;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

impl Versioned for Post {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// VersionedStore
///
/// The persistence boundary for a versioned entity.
///
/// `compare_and_swap` must be a single conditional write keyed on both id and
/// version (e.g. `UPDATE .. WHERE id = $1 AND version = $2`). It returns the new
/// version, or `None` when no row matched. Implementations must never read the
/// current version and then write in a separate step.
#[async_trait]
pub trait VersionedStore<T: Versioned>: Send + Sync {
    async fn load(&self, id: i64) -> Result<Option<T>, StoreError>;

    async fn compare_and_swap(&self, resource: &T) -> Result<Option<i32>, StoreError>;
}

/// apply_update
///
/// Loads `id`, applies `mutation` on top of the stored fields, and commits it only if
/// the stored version still equals `expected_version`. Absent ids are `NotFound`.
pub async fn apply_update<T, S, F>(
    store: &S,
    id: i64,
    expected_version: i32,
    mutation: F,
) -> Result<T, AppError>
where
    T: Versioned,
    S: VersionedStore<T> + ?Sized,
    F: FnOnce(&mut T) + Send,
{
    let resource = store.load(id).await?.ok_or(AppError::NotFound)?;
    commit_update(store, resource, expected_version, mutation).await
}

/// commit_update
///
/// The write half of `apply_update`, for a resource the caller has already loaded.
/// Issues no read: the only storage call is the conditional write.
///
/// On success the returned entity carries `expected_version + 1`. A failed
/// conditional write is a `Conflict`; whether the row vanished or moved on is not
/// distinguished here.
pub async fn commit_update<T, S, F>(
    store: &S,
    mut resource: T,
    expected_version: i32,
    mutation: F,
) -> Result<T, AppError>
where
    T: Versioned,
    S: VersionedStore<T> + ?Sized,
    F: FnOnce(&mut T) + Send,
{
    let id = resource.id();
    resource.set_version(expected_version);
    mutation(&mut resource);

    match store.compare_and_swap(&resource).await? {
        Some(new_version) => {
            resource.set_version(new_version);
            Ok(resource)
        }
        None => {
            tracing::info!(
                resource_id = id,
                expected_version,
                "optimistic update rejected: version mismatch"
            );
            Err(AppError::Conflict(
                "the resource was modified by another request; reload and retry".to_string(),
            ))
        }
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt::Display, future::Future, marker::PhantomData, sync::Arc, time::Duration};
use thiserror::Error;

use crate::models::Identity;

/// CacheError
///
/// Failures talking to the backing store. A cache miss is never an error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,
    #[error("cache transport error: {0}")]
    Transport(#[from] redis::RedisError),
    #[error("cache payload could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Cacheable
///
/// A value that can live in a `CacheStore`. The value names its own key, so `set`
/// only needs the value. Keys are rendered as `"{NAMESPACE}-{id}"`.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    type Id: Display + Send + Sync;

    const NAMESPACE: &'static str;

    fn cache_id(&self) -> Self::Id;

    fn cache_key(id: &Self::Id) -> String {
        format!("{}-{}", Self::NAMESPACE, id)
    }
}

impl Cacheable for Identity {
    type Id = i64;

    const NAMESPACE: &'static str = "user";

    fn cache_id(&self) -> i64 {
        self.id
    }
}

/// CacheStore
///
/// Cache-aside contract over an authoritative key: the caller checks the cache,
/// falls back to the source of truth on a miss, and populates the cache itself.
///
/// The store gives no freshness guarantee. Expiry, if any, belongs to the backing
/// service; explicit invalidation is `delete`.
#[async_trait]
pub trait CacheStore<V: Cacheable>: Send + Sync {
    /// `Ok(None)` on a miss.
    async fn get(&self, id: &V::Id) -> Result<Option<V>, CacheError>;

    /// Unconditionally overwrites the entry for `value.cache_id()`.
    async fn set(&self, value: &V) -> Result<(), CacheError>;

    async fn delete(&self, id: &V::Id) -> Result<(), CacheError>;
}

/// IdentityCacheState
///
/// The identity cache shared across the application state.
pub type IdentityCacheState = Arc<dyn CacheStore<Identity>>;

/// RedisCache
///
/// `CacheStore` backed by Redis. Values are stored as JSON strings. When `ttl` is set
/// entries are written with `SET .. EX`, bounding how stale a snapshot can get.
/// Every command is bounded by `timeout`.
pub struct RedisCache<V> {
    conn: ConnectionManager,
    ttl: Option<Duration>,
    timeout: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for RedisCache<V> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            ttl: self.ttl,
            timeout: self.timeout,
            _value: PhantomData,
        }
    }
}

impl<V: Cacheable> RedisCache<V> {
    /// connect
    ///
    /// Opens a managed connection that reconnects on its own after transport errors.
    pub async fn connect(
        url: &str,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = bounded(timeout, async {
            client.get_connection_manager().await.map_err(CacheError::from)
        })
        .await?;

        Ok(Self {
            conn,
            ttl,
            timeout,
            _value: PhantomData,
        })
    }
}

#[async_trait]
impl<V: Cacheable> CacheStore<V> for RedisCache<V> {
    async fn get(&self, id: &V::Id) -> Result<Option<V>, CacheError> {
        let key = V::cache_key(id);
        let mut conn = self.conn.clone();

        let raw: Option<String> = bounded(self.timeout, async move {
            conn.get::<_, Option<String>>(key).await.map_err(CacheError::from)
        })
        .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, value: &V) -> Result<(), CacheError> {
        let key = V::cache_key(&value.cache_id());
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        let ttl = self.ttl;

        bounded(self.timeout, async move {
            let written = match ttl {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1)).await,
                None => conn.set::<_, _, ()>(key, json).await,
            };
            written.map_err(CacheError::from)
        })
        .await
    }

    async fn delete(&self, id: &V::Id) -> Result<(), CacheError> {
        let key = V::cache_key(id);
        let mut conn = self.conn.clone();

        bounded(self.timeout, async move {
            conn.del::<_, ()>(key).await.map_err(CacheError::from)
        })
        .await
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CacheError::Timeout)?
}

/// MemoryCache
///
/// In-process `CacheStore`. Used by tests and by local runs without Redis.
/// Entries never expire.
pub struct MemoryCache<V> {
    entries: DashMap<String, V>,
}

impl<V: Cacheable> MemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &V::Id) -> bool {
        self.entries.contains_key(&V::cache_key(id))
    }
}

impl<V: Cacheable> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Cacheable> CacheStore<V> for MemoryCache<V> {
    async fn get(&self, id: &V::Id) -> Result<Option<V>, CacheError> {
        Ok(self
            .entries
            .get(&V::cache_key(id))
            .map(|entry| entry.value().clone()))
    }

    async fn set(&self, value: &V) -> Result<(), CacheError> {
        self.entries
            .insert(V::cache_key(&value.cache_id()), value.clone());
        Ok(())
    }

    async fn delete(&self, id: &V::Id) -> Result<(), CacheError> {
        self.entries.remove(&V::cache_key(id));
        Ok(())
    }
}

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::CanonicalError;

/// Pluggable byte-oriented key/value store backing both the semantic cache
/// and the prompt cache's exact-key tier.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CanonicalError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CanonicalError>;
    async fn delete(&self, key: &str) -> Result<(), CanonicalError>;
}

/// Bounded in-memory LRU store, used when no backing key-value store is
/// configured.
pub struct LruCacheStore {
    inner: Mutex<LruCache<String, Vec<u8>>>,
}

impl LruCacheStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1000).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for LruCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CanonicalError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CanonicalError> {
        self.inner.lock().put(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CanonicalError> {
        self.inner.lock().pop(key);
        Ok(())
    }
}

/// Redis-backed store, selecting a configurable database index so the
/// semantic cache and prompt cache can share a cluster without colliding.
pub struct RedisCacheStore {
    manager: redis::aio::ConnectionManager,
    key_prefix: &'static str,
}

impl RedisCacheStore {
    /// Connects to `redis_url`, optionally selecting `db`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Cache`] if connecting or selecting the
    /// database fails.
    pub async fn connect(
        redis_url: &str,
        db: Option<i64>,
        key_prefix: &'static str,
    ) -> Result<Self, CanonicalError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| CanonicalError::Cache(format!("invalid redis url: {err}")))?;
        let mut manager = client
            .get_connection_manager()
            .await
            .map_err(|err| CanonicalError::Cache(format!("redis connect failed: {err}")))?;

        if let Some(db) = db {
            redis::cmd("SELECT")
                .arg(db)
                .query_async::<_, ()>(&mut manager)
                .await
                .map_err(|err| CanonicalError::Cache(format!("redis SELECT failed: {err}")))?;
        }

        Ok(Self { manager, key_prefix })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CanonicalError> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|err| CanonicalError::Cache(err.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CanonicalError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| CanonicalError::Cache(err.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CanonicalError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| CanonicalError::Cache(err.to_string()))
    }
}

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::CanonicalError;
use crate::util::{str_hash, unix_now_secs};

use super::script::{RECORD_FAILURE, RECORD_SUCCESS};

/// Circuit state numeric encoding, matching the persisted representation
/// (`0=Closed, 1=Open, 2=HalfOpen`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Pluggable backing store for circuit-breaker counters.
///
/// Implementations must guarantee linearizable mutation per key: two
/// concurrent mutators must never both observe the pre-transition state.
#[async_trait::async_trait]
pub trait BreakerStore: Send + Sync {
    /// Atomically record a success; may transition `HalfOpen -> Closed`.
    async fn record_success(&self, key: &str, success_threshold: u32) -> Result<(), CanonicalError>;

    /// Atomically record a failure; may transition `Closed -> Open` or
    /// `HalfOpen -> Open`.
    async fn record_failure(&self, key: &str, failure_threshold: u32) -> Result<(), CanonicalError>;

    /// Returns whether a request may proceed, performing the
    /// `Open -> HalfOpen` transition under optimistic concurrency when the
    /// open timeout has elapsed.
    async fn can_execute(&self, key: &str, open_timeout_secs: u64) -> Result<bool, CanonicalError>;
}

// ---------------------------------------------------------------------------
// In-memory store — used when no redis_url is configured.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: u64,
    last_state_change_at: u64,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: 0,
            last_state_change_at: 0,
        }
    }
}

const SHARD_COUNT: usize = 16;

/// Sharded in-process breaker store, grounded on the teacher's
/// `RouteBreakerRegistry` sharding discipline, generalized into a
/// `BreakerStore` so the same call site works with either backend.
pub struct InMemoryBreakerStore {
    shards: Vec<Mutex<FxHashMap<String, BreakerEntry>>>,
}

impl InMemoryBreakerStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(FxHashMap::default())).collect(),
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<FxHashMap<String, BreakerEntry>> {
        let idx = (str_hash(key) as usize) % self.shards.len();
        &self.shards[idx]
    }
}

impl Default for InMemoryBreakerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BreakerStore for InMemoryBreakerStore {
    async fn record_success(&self, key: &str, success_threshold: u32) -> Result<(), CanonicalError> {
        let mut shard = self.shard_for(key).lock();
        let entry = shard.entry(key.to_string()).or_default();
        match entry.state {
            CircuitState::HalfOpen => {
                entry.success_count += 1;
                if entry.success_count >= success_threshold {
                    entry.state = CircuitState::Closed;
                    entry.failure_count = 0;
                    entry.success_count = 0;
                    entry.last_state_change_at = unix_now_secs();
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                entry.failure_count = 0;
            }
        }
        Ok(())
    }

    async fn record_failure(&self, key: &str, failure_threshold: u32) -> Result<(), CanonicalError> {
        let mut shard = self.shard_for(key).lock();
        let entry = shard.entry(key.to_string()).or_default();
        entry.last_failure_at = unix_now_secs();
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.success_count = 0;
                entry.last_state_change_at = unix_now_secs();
            }
            CircuitState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.last_state_change_at = unix_now_secs();
                }
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    async fn can_execute(&self, key: &str, open_timeout_secs: u64) -> Result<bool, CanonicalError> {
        let mut shard = self.shard_for(key).lock();
        let entry = shard.entry(key.to_string()).or_default();
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                let now = unix_now_secs();
                if now.saturating_sub(entry.last_failure_at) > open_timeout_secs {
                    entry.state = CircuitState::HalfOpen;
                    entry.success_count = 0;
                    entry.last_state_change_at = now;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Redis-backed store — shared across replicas.
// ---------------------------------------------------------------------------

/// Circuit breaker state mutated through atomic Lua scripts in Redis.
pub struct RedisBreakerStore {
    manager: redis::aio::ConnectionManager,
    record_success_script: redis::Script,
    record_failure_script: redis::Script,
    store_timeout: Duration,
}

impl RedisBreakerStore {
    /// Connects and probes the store with a bounded round trip.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Breaker`] if the initial connection or
    /// probe fails.
    pub async fn connect(redis_url: &str, store_timeout_ms: u64) -> Result<Self, CanonicalError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| CanonicalError::Breaker(format!("invalid redis url: {err}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|err| CanonicalError::Breaker(format!("redis connect failed: {err}")))?;

        let store = Self {
            manager,
            record_success_script: redis::Script::new(RECORD_SUCCESS),
            record_failure_script: redis::Script::new(RECORD_FAILURE),
            store_timeout: Duration::from_millis(store_timeout_ms),
        };

        store.probe().await?;
        Ok(store)
    }

    async fn probe(&self) -> Result<(), CanonicalError> {
        let mut conn = self.manager.clone();
        tokio::time::timeout(self.store_timeout, redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await
            .map_err(|_| CanonicalError::Breaker("redis probe timed out".to_string()))?
            .map_err(|err| CanonicalError::Breaker(format!("redis probe failed: {err}")))?;
        Ok(())
    }

    fn hash_key(key: &str) -> String {
        format!("circuit_breaker:{key}:")
    }
}

#[async_trait::async_trait]
impl BreakerStore for RedisBreakerStore {
    async fn record_success(&self, key: &str, success_threshold: u32) -> Result<(), CanonicalError> {
        let mut conn = self.manager.clone();
        let now = unix_now_secs();
        let hash_key = Self::hash_key(key);
        let result = tokio::time::timeout(
            self.store_timeout,
            self.record_success_script
                .key(hash_key)
                .arg(now)
                .arg(success_threshold)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await;

        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                tracing::warn!("circuit breaker recordSuccess failed: {err}");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("circuit breaker recordSuccess timed out");
                Ok(())
            }
        }
    }

    async fn record_failure(&self, key: &str, failure_threshold: u32) -> Result<(), CanonicalError> {
        let mut conn = self.manager.clone();
        let now = unix_now_secs();
        let hash_key = Self::hash_key(key);
        let result = tokio::time::timeout(
            self.store_timeout,
            self.record_failure_script
                .key(hash_key)
                .arg(now)
                .arg(failure_threshold)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await;

        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                tracing::warn!("circuit breaker recordFailure failed: {err}");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("circuit breaker recordFailure timed out");
                Ok(())
            }
        }
    }

    async fn can_execute(&self, key: &str, open_timeout_secs: u64) -> Result<bool, CanonicalError> {
        let hash_key = Self::hash_key(key);
        match tokio::time::timeout(self.store_timeout, self.try_can_execute(&hash_key, open_timeout_secs)).await {
            Ok(Ok(allowed)) => Ok(allowed),
            Ok(Err(err)) => {
                tracing::warn!("circuit breaker canExecute failed, failing open: {err}");
                Ok(true)
            }
            Err(_) => {
                tracing::warn!("circuit breaker canExecute timed out, failing open");
                Ok(true)
            }
        }
    }
}

impl RedisBreakerStore {
    async fn try_can_execute(&self, hash_key: &str, open_timeout_secs: u64) -> Result<bool, CanonicalError> {
        let mut conn = self.manager.clone();

        let fields: (Option<i64>, Option<i64>) = redis::pipe()
            .hget(hash_key, "state")
            .hget(hash_key, "last_failure_time")
            .query_async(&mut conn)
            .await
            .map_err(|err| CanonicalError::Breaker(err.to_string()))?;

        let state = CircuitState::from_code(fields.0.unwrap_or(0));
        let last_failure_at = fields.1.unwrap_or(0).max(0) as u64;

        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                let now = unix_now_secs();
                if now.saturating_sub(last_failure_at) <= open_timeout_secs {
                    return Ok(false);
                }
                self.attempt_half_open_transition(hash_key, now).await
            }
        }
    }

    /// Optimistic-concurrency transition to HalfOpen, retried up to 3 times
    /// on a conflicting concurrent mutator; denies on repeated conflict.
    async fn attempt_half_open_transition(&self, hash_key: &str, now: u64) -> Result<bool, CanonicalError> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut conn = self.manager.clone();

        for _ in 0..MAX_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(hash_key)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|err| CanonicalError::Breaker(err.to_string()))?;

            let current_state: Option<i64> = redis::cmd("HGET")
                .arg(hash_key)
                .arg("state")
                .query_async(&mut conn)
                .await
                .map_err(|err| CanonicalError::Breaker(err.to_string()))?;

            if CircuitState::from_code(current_state.unwrap_or(0)) != CircuitState::Open {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await.ok();
                return Ok(true);
            }

            let mut pipe = redis::pipe();
            pipe.atomic()
                .hset(hash_key, "state", 2)
                .hset(hash_key, "success_count", 0)
                .hset(hash_key, "last_state_change", now);

            let result: Option<Vec<i64>> = pipe
                .query_async(&mut conn)
                .await
                .map_err(|err| CanonicalError::Breaker(err.to_string()))?;

            if result.is_some() {
                return Ok(true);
            }
            // MULTI/EXEC aborted by a concurrent WATCH conflict; retry.
        }

        Ok(false)
    }
}

/// Shared handle over either backend.
pub type SharedBreakerStore = Arc<dyn BreakerStore>;

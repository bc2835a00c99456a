pub mod script;
pub mod store;

use std::sync::Arc;

use crate::config::CircuitBreakerConfig;
use crate::error::CanonicalError;

pub use store::{BreakerStore, CircuitState, InMemoryBreakerStore, RedisBreakerStore};

/// Key used for the model-selection service's own dedicated breaker.
pub const MODEL_SELECTION_BREAKER_KEY: &str = "__model_selection__";

/// Per-upstream circuit breaker, backed by a shared or in-process store.
///
/// Thresholds live here rather than in the store so the same store instance
/// can back breakers with different configs if ever needed; today all
/// breakers in a process share one config.
pub struct CircuitBreakerRegistry {
    store: Arc<dyn BreakerStore>,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout_secs: u64,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn BreakerStore>, config: &CircuitBreakerConfig) -> Self {
        Self {
            store,
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            open_timeout_secs: config.open_timeout_secs,
        }
    }

    /// Build a registry from config, connecting to Redis when
    /// `circuit_breaker.redis_url` is set; falls back to an in-memory store
    /// (logging a warning) if the Redis probe fails.
    pub async fn from_config(config: &CircuitBreakerConfig) -> Self {
        let store: Arc<dyn BreakerStore> = match &config.redis_url {
            Some(url) if !url.is_empty() => {
                match RedisBreakerStore::connect(url, config.store_timeout_ms).await {
                    Ok(store) => Arc::new(store),
                    Err(err) => {
                        tracing::warn!("circuit breaker redis connect failed, using in-memory store: {err}");
                        Arc::new(InMemoryBreakerStore::new())
                    }
                }
            }
            _ => Arc::new(InMemoryBreakerStore::new()),
        };
        Self::new(store, config)
    }

    /// Returns whether a request to `key` (an upstream or service name) may
    /// proceed. Store failures fail open (return `true`).
    pub async fn can_execute(&self, key: &str) -> bool {
        self.store
            .can_execute(key, self.open_timeout_secs)
            .await
            .unwrap_or(true)
    }

    /// Fire-and-forget success record.
    pub async fn record_success(&self, key: &str) {
        if let Err(err) = self.store.record_success(key, self.success_threshold).await {
            tracing::warn!("circuit breaker record_success error for {key}: {err}");
        }
    }

    /// Fire-and-forget failure record.
    pub async fn record_failure(&self, key: &str) {
        if let Err(err) = self.store.record_failure(key, self.failure_threshold).await {
            tracing::warn!("circuit breaker record_failure error for {key}: {err}");
        }
    }
}

/// Classify whether an upstream outcome should count as a circuit-breaker
/// failure, per the error taxonomy (provider-retryable == breaker failure).
#[must_use]
pub fn should_record_failure(err: &CanonicalError) -> bool {
    matches!(
        err,
        CanonicalError::Transport(_)
            | CanonicalError::Upstream { status: 429, .. }
            | CanonicalError::Upstream { status: 500..=599, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;

    fn registry() -> CircuitBreakerRegistry {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout_secs: 0,
            ..CircuitBreakerConfig::default()
        };
        CircuitBreakerRegistry::new(Arc::new(InMemoryBreakerStore::new()), &config)
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let registry = registry();
        assert!(registry.can_execute("openai").await);
        registry.record_failure("openai").await;
        registry.record_failure("openai").await;
        assert!(registry.can_execute("openai").await);
        registry.record_failure("openai").await;
        // open_timeout_secs = 0, so canExecute immediately flips to HalfOpen and allows.
        assert!(registry.can_execute("openai").await);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let registry = registry();
        registry.record_failure("anthropic").await;
        registry.record_failure("anthropic").await;
        registry.record_failure("anthropic").await;
        assert!(registry.can_execute("anthropic").await); // transitions to HalfOpen
        registry.record_success("anthropic").await;
        registry.record_success("anthropic").await;
        assert!(registry.can_execute("anthropic").await);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let registry = registry();
        registry.record_failure("gemini").await;
        registry.record_failure("gemini").await;
        registry.record_failure("gemini").await;
        assert!(registry.can_execute("gemini").await); // HalfOpen
        registry.record_failure("gemini").await; // back to Open
        assert!(registry.can_execute("gemini").await); // open_timeout 0 => HalfOpen again
    }

    #[test]
    fn classifies_failures_correctly() {
        assert!(should_record_failure(&CanonicalError::Transport("x".into())));
        assert!(should_record_failure(&CanonicalError::Upstream {
            status: 503,
            message: "x".into()
        }));
        assert!(!should_record_failure(&CanonicalError::InvalidRequest(
            "x".into()
        )));
        assert!(!should_record_failure(&CanonicalError::Upstream {
            status: 401,
            message: "x".into()
        }));
    }
}

pub mod embedding;
pub mod prompt_cache;
pub mod store;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::SemanticCacheConfig;
use crate::error::CanonicalError;
use crate::model::CachedDecision;

pub use embedding::{cosine_similarity, EmbeddingClient, HttpEmbeddingClient};
pub use store::{CacheStore, LruCacheStore, RedisCacheStore};

struct ShortlistEntry {
    prompt: String,
    embedding: Vec<f32>,
    key: String,
}

/// Two-tier prompt-keyed cache: an exact-key lookup backed by [`CacheStore`],
/// plus an embedding-similarity shortlist for near-duplicate prompts.
/// Generic over the stored value so the same machinery backs both the
/// model-router's [`SemanticCache`] (`V = CachedDecision`) and the
/// per-format prompt cache (`V = prompt_cache::CachedResponseRecord`).
///
/// If embeddings are unconfigured, exact hits still work; only the
/// similarity tier is disabled.
pub struct TwoTierCache<V> {
    store: Arc<dyn CacheStore>,
    embedding_client: Option<Arc<dyn EmbeddingClient>>,
    shortlist: Mutex<VecDeque<ShortlistEntry>>,
    shortlist_capacity: usize,
    similarity_threshold: f32,
    _value: std::marker::PhantomData<fn() -> V>,
}

impl<V> TwoTierCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        store: Arc<dyn CacheStore>,
        embedding_client: Option<Arc<dyn EmbeddingClient>>,
        shortlist_capacity: usize,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            store,
            embedding_client,
            shortlist: Mutex::new(VecDeque::with_capacity(shortlist_capacity.min(4096))),
            shortlist_capacity,
            similarity_threshold,
            _value: std::marker::PhantomData,
        }
    }

    /// Exact-key lookup, falling back to embedding-similarity search when an
    /// embedding client is configured. Synchronous on the request path.
    /// Returns `(value, exact)`.
    pub async fn lookup(&self, prompt: &str, similarity_override: Option<f32>) -> Option<(V, bool)> {
        let key = prompt_key(prompt);
        if let Ok(Some(bytes)) = self.store.get(&key).await {
            if let Ok(value) = serde_json::from_slice::<V>(&bytes) {
                return Some((value, true));
            }
        }

        let embedding_client = self.embedding_client.as_ref()?;
        let query_embedding = embedding_client.embed(prompt).await.ok()?;
        let threshold = similarity_override.unwrap_or(self.similarity_threshold);

        let best = {
            let shortlist = self.shortlist.lock();
            shortlist
                .iter()
                .map(|entry| (cosine_similarity(&query_embedding, &entry.embedding), entry.key.clone()))
                .filter(|(score, _)| *score >= threshold)
                .max_by(|a, b| a.0.total_cmp(&b.0))
        };

        let (_, matched_key) = best?;
        let bytes = self.store.get(&matched_key).await.ok().flatten()?;
        let value = serde_json::from_slice::<V>(&bytes).ok()?;
        Some((value, false))
    }

    /// Fire-and-forget write after a successful upstream call.
    pub fn store_value(self: &Arc<Self>, prompt: String, value: V) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.store_value_inner(&prompt, &value).await {
                tracing::warn!("cache write failed: {err}");
            }
        });
    }

    async fn store_value_inner(&self, prompt: &str, value: &V) -> Result<(), CanonicalError> {
        let key = prompt_key(prompt);
        let bytes = serde_json::to_vec(value).map_err(|err| CanonicalError::Cache(err.to_string()))?;
        self.store.set(&key, bytes).await?;

        if let Some(embedding_client) = &self.embedding_client {
            if let Ok(embedding) = embedding_client.embed(prompt).await {
                let mut shortlist = self.shortlist.lock();
                if shortlist.len() >= self.shortlist_capacity {
                    shortlist.pop_front();
                }
                shortlist.push_back(ShortlistEntry {
                    prompt: prompt.to_string(),
                    embedding,
                    key,
                });
            }
        }
        Ok(())
    }

    /// Fire-and-forget delete, used when a cached decision's candidates are
    /// all breaker-unavailable.
    pub fn delete(self: &Arc<Self>, prompt: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let key = prompt_key(&prompt);
            if let Err(err) = this.store.delete(&key).await {
                tracing::warn!("cache delete failed: {err}");
            }
            this.shortlist.lock().retain(|entry| entry.prompt != prompt);
        });
    }
}

fn prompt_key(prompt: &str) -> String {
    format!("{:016x}", crate::util::str_hash(prompt))
}

/// Prompt-keyed store of previous model-selection decisions — the
/// model-router's internal cache (spec.md §4.2).
pub type SemanticCache = TwoTierCache<CachedDecision>;

impl SemanticCache {
    /// Builds a semantic cache from config. Returns `None` if disabled or if
    /// no durable store can be constructed — MR runs without a cache on
    /// failure, per spec.
    pub async fn from_config(config: &SemanticCacheConfig, http_client: reqwest::Client) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let store: Arc<dyn CacheStore> = match &config.redis_url {
            Some(url) if !url.is_empty() => {
                match RedisCacheStore::connect(url, config.redis_db, "semantic_cache:").await {
                    Ok(store) => Arc::new(store),
                    Err(err) => {
                        tracing::warn!("semantic cache redis connect failed, using in-memory store: {err}");
                        Arc::new(LruCacheStore::new(config.capacity))
                    }
                }
            }
            _ => Arc::new(LruCacheStore::new(config.capacity)),
        };

        let embedding_client: Option<Arc<dyn EmbeddingClient>> = match (&config.embedding.endpoint, &config.embedding.api_key) {
            (Some(endpoint), Some(api_key)) if !endpoint.is_empty() && !api_key.is_empty() => {
                let model = config.embedding.model.clone().unwrap_or_else(|| "text-embedding-3-small".to_string());
                Some(Arc::new(HttpEmbeddingClient::new(http_client, endpoint.clone(), api_key.clone(), model)))
            }
            _ => None,
        };

        Some(Self::new(store, embedding_client, config.embedding.shortlist_size, config.similarity_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CandidateModel;

    fn decision() -> CachedDecision {
        CachedDecision {
            primary: CandidateModel::new("openai", "gpt-4o"),
            alternatives: vec![CandidateModel::new("anthropic", "claude-sonnet-4")],
        }
    }

    #[tokio::test]
    async fn exact_hit_round_trips() {
        let cache = Arc::new(SemanticCache::new(Arc::new(LruCacheStore::new(16)), None, 16, 0.9));
        cache.store_value("hello world".to_string(), decision());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let (found, exact) = cache.lookup("hello world", None).await.expect("hit");
        assert!(exact);
        assert_eq!(found.primary.model.as_ref(), "gpt-4o");
    }

    #[tokio::test]
    async fn miss_without_embedding_client_returns_none() {
        let cache = Arc::new(SemanticCache::new(Arc::new(LruCacheStore::new(16)), None, 16, 0.9));
        assert!(cache.lookup("unseen prompt", None).await.is_none());
    }
}

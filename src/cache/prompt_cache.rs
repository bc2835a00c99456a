use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PromptCacheConfig;
use crate::protocol::canonical::{CanonicalPart, CanonicalResponse, CanonicalStopReason, CanonicalUsage, IngressApi};

use super::store::{CacheStore, LruCacheStore, RedisCacheStore};
use super::TwoTierCache;

/// Response-level cache value. A simplified, serializable mirror of
/// [`CanonicalResponse`] — holds only concatenated text, stop reason, and
/// usage. `from_canonical` drops tool-call parts, so a cached record can
/// replay text-only responses; see `DESIGN.md`'s Open Questions for why
/// tool-call responses are not cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponseRecord {
    pub model: String,
    pub text: String,
    pub stop_reason_code: u8,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl CachedResponseRecord {
    #[must_use]
    pub fn from_canonical(response: &CanonicalResponse) -> Self {
        let text = response
            .content
            .iter()
            .filter_map(|part| match part {
                CanonicalPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Self {
            model: response.model.clone(),
            text,
            stop_reason_code: encode_stop_reason(response.stop_reason),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            total_tokens: response.usage.total_tokens,
        }
    }

    #[must_use]
    pub fn stop_reason(&self) -> CanonicalStopReason {
        decode_stop_reason(self.stop_reason_code)
    }

    #[must_use]
    pub fn usage(&self) -> CanonicalUsage {
        CanonicalUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

fn encode_stop_reason(reason: CanonicalStopReason) -> u8 {
    match reason {
        CanonicalStopReason::EndOfTurn => 0,
        CanonicalStopReason::ToolCalls => 1,
        CanonicalStopReason::MaxTokens => 2,
        CanonicalStopReason::ContentFilter => 3,
    }
}

fn decode_stop_reason(code: u8) -> CanonicalStopReason {
    match code {
        1 => CanonicalStopReason::ToolCalls,
        2 => CanonicalStopReason::MaxTokens,
        3 => CanonicalStopReason::ContentFilter,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

/// One [`TwoTierCache`] per wire format, as spec.md §4.3 requires ("distinct
/// store per wire format").
pub struct PromptCacheTriad {
    openai_chat: Arc<TwoTierCache<CachedResponseRecord>>,
    anthropic: Arc<TwoTierCache<CachedResponseRecord>>,
    gemini: Arc<TwoTierCache<CachedResponseRecord>>,
    pub enabled: bool,
}

impl PromptCacheTriad {
    pub async fn from_config(config: &PromptCacheConfig) -> Self {
        let make_store = |prefix: &'static str| async move {
            let store: Arc<dyn CacheStore> = match &config.redis_url {
                Some(url) if !url.is_empty() => match RedisCacheStore::connect(url, None, prefix).await {
                    Ok(store) => Arc::new(store),
                    Err(err) => {
                        tracing::warn!("prompt cache redis connect failed for {prefix}, using in-memory store: {err}");
                        Arc::new(LruCacheStore::new(config.capacity))
                    }
                },
                _ => Arc::new(LruCacheStore::new(config.capacity)),
            };
            Arc::new(TwoTierCache::<CachedResponseRecord>::new(store, None, 0, config.similarity_threshold))
        };

        Self {
            openai_chat: make_store("prompt_cache:openai_chat:").await,
            anthropic: make_store("prompt_cache:anthropic:").await,
            gemini: make_store("prompt_cache:gemini:").await,
            enabled: config.enabled,
        }
    }

    fn store_for(&self, ingress: IngressApi) -> &Arc<TwoTierCache<CachedResponseRecord>> {
        match ingress {
            IngressApi::OpenAiChat => &self.openai_chat,
            IngressApi::Anthropic => &self.anthropic,
            IngressApi::Gemini => &self.gemini,
        }
    }

    pub async fn lookup(&self, ingress: IngressApi, prompt: &str) -> Option<CachedResponseRecord> {
        if !self.enabled {
            return None;
        }
        self.store_for(ingress).lookup(prompt, None).await.map(|(record, _)| record)
    }

    pub fn store(&self, ingress: IngressApi, prompt: String, record: CachedResponseRecord) {
        if !self.enabled {
            return;
        }
        self.store_for(ingress).store_value(prompt, record);
    }
}

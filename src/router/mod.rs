pub mod selection_client;

use std::sync::Arc;

use crate::breaker::CircuitBreakerRegistry;
use crate::cache::SemanticCache;
use crate::config::ModelRouterConfig;
use crate::model::{CacheSource, CandidateModel, SelectionResult};
use crate::protocol::canonical::{CanonicalToolChoice, CanonicalToolSpec};

pub use selection_client::SelectionServiceClient;

/// Key used for the model-selection service's own dedicated breaker.
pub const MODEL_SELECTION_BREAKER_KEY: &str = crate::breaker::MODEL_SELECTION_BREAKER_KEY;

fn hardcoded_default() -> SelectionResult {
    SelectionResult {
        primary: CandidateModel::new("gemini", "gemini-2.5-flash"),
        alternatives: vec![CandidateModel::new("openai", "gpt-4o")],
    }
}

/// Consumes a prompt and a candidate model list, consults the semantic
/// cache, filters candidates via circuit breakers, calls the remote
/// selection service on miss, and returns `{primary, alternatives}`.
pub struct ModelRouter {
    semantic_cache: Option<Arc<SemanticCache>>,
    selection_client: Option<SelectionServiceClient>,
    breakers: Arc<CircuitBreakerRegistry>,
    cost_bias: f32,
}

impl ModelRouter {
    #[must_use]
    pub fn new(
        semantic_cache: Option<Arc<SemanticCache>>,
        selection_client: Option<SelectionServiceClient>,
        breakers: Arc<CircuitBreakerRegistry>,
        config: &ModelRouterConfig,
    ) -> Self {
        Self {
            semantic_cache,
            selection_client,
            breakers,
            cost_bias: config.cost_bias,
        }
    }

    /// Clones the router applying a request's merged `model_router`
    /// overrides (`cost_bias`, `selection_timeout_ms`), sharing the same
    /// semantic cache and breaker registry — used so a single request's
    /// override doesn't mutate the process-wide router.
    #[must_use]
    pub fn with_config(&self, config: &ModelRouterConfig) -> Self {
        Self {
            semantic_cache: self.semantic_cache.clone(),
            selection_client: self.selection_client.as_ref().map(|client| client.with_timeout_ms(config.selection_timeout_ms)),
            breakers: Arc::clone(&self.breakers),
            cost_bias: config.cost_bias,
        }
    }

    /// `selectModelWithCache` — spec.md §4.4.
    pub async fn select_model_with_cache(
        &self,
        prompt: &str,
        user_id: &str,
        candidates: &[CandidateModel],
        tools: &[CanonicalToolSpec],
        tool_call: Option<&CanonicalToolChoice>,
    ) -> (SelectionResult, CacheSource) {
        if let Some(cache) = &self.semantic_cache {
            if let Some((decision, exact)) = cache.lookup(prompt, None).await {
                let result: SelectionResult = decision.into();
                if let Some(available) = self.select_available_model(&result).await {
                    let source = if exact { CacheSource::SemanticExact } else { CacheSource::SemanticSimilar };
                    return (available, source);
                }
                cache.delete(prompt.to_string());
            }
        }

        let filtered = self.filter_available(candidates).await;
        if filtered.is_empty() {
            let fallback = candidates
                .first()
                .cloned()
                .map(SelectionResult::single)
                .unwrap_or_else(hardcoded_default);
            return (fallback, CacheSource::Miss);
        }

        if let Some(client) = &self.selection_client {
            if self.breakers.can_execute(MODEL_SELECTION_BREAKER_KEY).await {
                match client.select(prompt, user_id, &filtered, self.cost_bias, tools, tool_call).await {
                    Ok(result) => {
                        self.breakers.record_success(MODEL_SELECTION_BREAKER_KEY).await;
                        return (result, CacheSource::Miss);
                    }
                    Err(err) => {
                        self.breakers.record_failure(MODEL_SELECTION_BREAKER_KEY).await;
                        tracing::warn!("model selection service failed, falling back: {err}");
                    }
                }
            }
        }

        let (head, rest) = filtered.split_first().expect("checked non-empty above");
        (
            SelectionResult { primary: head.clone(), alternatives: rest.to_vec() },
            CacheSource::Miss,
        )
    }

    /// `selectAvailableModel` — walks `[primary] ++ alternatives`, returns
    /// the first whose provider's breaker permits execution, with the
    /// remainder (original order, selected index removed) as alternatives.
    pub async fn select_available_model(&self, result: &SelectionResult) -> Option<SelectionResult> {
        let all = result.all_candidates();
        for (i, candidate) in all.iter().enumerate() {
            if self.breakers.can_execute(&candidate.provider).await {
                let mut remainder: Vec<CandidateModel> = all[..i].to_vec();
                remainder.extend(all[i + 1..].iter().cloned());
                return Some(SelectionResult { primary: candidate.clone(), alternatives: remainder });
            }
        }
        None
    }

    async fn filter_available(&self, candidates: &[CandidateModel]) -> Vec<CandidateModel> {
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.breakers.can_execute(&candidate.provider).await {
                out.push(candidate.clone());
            }
        }
        out
    }

    /// Fire-and-forget semantic-cache write after a successful upstream
    /// call (`StoreSuccessfulModel`).
    pub fn store_successful_model(&self, prompt: String, result: &SelectionResult) {
        if let Some(cache) = &self.semantic_cache {
            cache.store_value(prompt, result.into());
        }
    }
}

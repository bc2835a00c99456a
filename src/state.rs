use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::breaker::CircuitBreakerRegistry;
use crate::cache::prompt_cache::PromptCacheTriad;
use crate::cache::SemanticCache;
use crate::config::{AppConfig, UpstreamServiceConfig};
use crate::error::CanonicalError;
use crate::fallback::FallbackExecutor;
use crate::protocol::canonical::IngressApi;
use crate::router::{ModelRouter, SelectionServiceClient};
use crate::transport::HttpTransport;

/// Shared application state accessible to every request handler. Ties
/// together the circuit breaker registry, model router, prompt cache, and
/// transport layer built once at startup.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub model_router: ModelRouter,
    pub prompt_cache: PromptCacheTriad,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub fallback: FallbackExecutor,
    default_upstream_for_model: FxHashMap<String, String>,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    /// Builds the full application state: circuit breaker registry
    /// (Redis-backed if configured), semantic cache, prompt cache triad,
    /// model-selection client, and HTTP transport.
    pub async fn from_config(config: AppConfig) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::from_config(&config.circuit_breaker).await);
        let http_client = reqwest::Client::new();

        let semantic_cache = SemanticCache::from_config(&config.semantic_cache, http_client.clone()).await.map(Arc::new);

        let selection_client = config.model_router.selection_service_url.as_ref().filter(|url| !url.is_empty()).map(|url| {
            SelectionServiceClient::new(http_client.clone(), url.clone(), config.model_router.jwt_secret.clone(), config.model_router.selection_timeout_ms)
        });

        let model_router = ModelRouter::new(semantic_cache, selection_client, Arc::clone(&breakers), &config.model_router);
        let prompt_cache = PromptCacheTriad::from_config(&config.prompt_cache).await;
        let transport = HttpTransport::new(&config);
        let fallback = FallbackExecutor::new(&config.fallback);
        let allowed_client_keys = build_allowed_key_set(&config);
        let default_upstream_for_model = build_model_index(&config.upstream_services);

        Self {
            config,
            transport,
            model_router,
            prompt_cache,
            breakers,
            fallback,
            default_upstream_for_model,
            allowed_client_keys,
        }
    }

    /// Authenticate an ingress request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `CanonicalError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, ingress: IngressApi, headers: &http::HeaderMap) -> Result<(), CanonicalError> {
        authenticate(ingress, headers, &self.allowed_client_keys)
    }

    /// Looks up the upstream service config that serves `provider`, i.e. the
    /// candidate model's provider name as returned by the model router.
    #[must_use]
    pub fn upstream_for_provider(&self, provider: &str) -> Option<&UpstreamServiceConfig> {
        self.transport.provider_config(provider)
    }

    /// All known `(provider, model)` candidates across configured upstreams,
    /// used to seed the model router when no manual override is given.
    #[must_use]
    pub fn known_candidates(&self) -> Vec<crate::model::CandidateModel> {
        self.config
            .upstream_services
            .iter()
            .flat_map(|upstream| upstream.models.iter().map(move |model| crate::model::CandidateModel::new(upstream.name.clone(), model.clone())))
            .collect()
    }

    #[must_use]
    pub fn known_model(&self, model: &str) -> bool {
        self.default_upstream_for_model.contains_key(model)
    }
}

fn build_model_index(upstreams: &[UpstreamServiceConfig]) -> FxHashMap<String, String> {
    let mut index = FxHashMap::default();
    for upstream in upstreams {
        for model in &upstream.models {
            index.entry(model.clone()).or_insert_with(|| upstream.name.clone());
        }
    }
    index
}

use std::sync::Arc;

use adaptive_gateway::config::{
    AppConfig, CircuitBreakerConfig, ClientAuthConfig, FallbackConfig, FeaturesConfig,
    ModelRouterConfig, PromptCacheConfig, SemanticCacheConfig, ServerConfig,
};
use adaptive_gateway::lifecycle::run_request;
use adaptive_gateway::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRequest, CanonicalRole, CanonicalToolChoice,
    GenerationParams, IngressApi,
};
use adaptive_gateway::state::AppState;

fn base_config() -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        upstream_services: Vec::new(),
        client_authentication: ClientAuthConfig { allowed_keys: vec!["test-key".to_string()] },
        circuit_breaker: CircuitBreakerConfig::default(),
        semantic_cache: SemanticCacheConfig { enabled: false, ..SemanticCacheConfig::default() },
        prompt_cache: PromptCacheConfig { enabled: false, ..PromptCacheConfig::default() },
        model_router: ModelRouterConfig::default(),
        fallback: FallbackConfig::default(),
        features: FeaturesConfig::default(),
    }
}

fn request(model: &str) -> CanonicalRequest {
    CanonicalRequest {
        request_id: uuid::Uuid::from_u128(42),
        ingress_api: IngressApi::OpenAiChat,
        model: model.to_string(),
        stream: false,
        system_prompt: None,
        messages: vec![CanonicalMessage {
            role: CanonicalRole::User,
            parts: vec![CanonicalPart::Text("hello".to_string())].into(),
            name: None,
            tool_call_id: None,
            provider_extensions: None,
        }],
        tools: Vec::<adaptive_gateway::protocol::canonical::CanonicalToolSpec>::new().into(),
        tool_choice: CanonicalToolChoice::Auto,
        generation: GenerationParams::default(),
        provider_extensions: None,
    }
}

#[tokio::test]
async fn manual_override_to_unknown_provider_returns_400() {
    let state = Arc::new(AppState::from_config(base_config()).await);

    let response = run_request(state, IngressApi::OpenAiChat, request("nonexistent-provider:some-model")).await;

    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn no_candidates_configured_fails_gracefully() {
    let state = Arc::new(AppState::from_config(base_config()).await);

    // No manual override and no upstream_services configured means the
    // router's known-candidate list is empty; the fallback executor must
    // reject rather than panic.
    let response = run_request(state, IngressApi::OpenAiChat, request("gpt-4o")).await;

    assert!(response.status().is_client_error() || response.status().is_server_error());
}

use adaptive_gateway::auth::{authenticate, build_allowed_key_set};
use adaptive_gateway::config::{
    AppConfig, CircuitBreakerConfig, ClientAuthConfig, FallbackConfig, FeaturesConfig,
    ModelRouterConfig, PromptCacheConfig, SemanticCacheConfig, ServerConfig,
};
use adaptive_gateway::error::CanonicalError;
use adaptive_gateway::protocol::canonical::IngressApi;
use http::HeaderMap;

fn config_with_keys(keys: Vec<&str>) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        upstream_services: Vec::new(),
        client_authentication: ClientAuthConfig {
            allowed_keys: keys.into_iter().map(ToString::to_string).collect(),
        },
        circuit_breaker: CircuitBreakerConfig::default(),
        semantic_cache: SemanticCacheConfig::default(),
        prompt_cache: PromptCacheConfig::default(),
        model_router: ModelRouterConfig::default(),
        fallback: FallbackConfig::default(),
        features: FeaturesConfig::default(),
    }
}

#[test]
fn openai_bearer_auth_succeeds() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["client-key"]));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer client-key".parse().unwrap());
    assert!(authenticate(IngressApi::OpenAiChat, &headers, &allowed).is_ok());
}

#[test]
fn anthropic_x_api_key_succeeds() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["client-key"]));
    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", "client-key".parse().unwrap());
    assert!(authenticate(IngressApi::Anthropic, &headers, &allowed).is_ok());
}

#[test]
fn gemini_prefers_x_goog_api_key_over_bearer() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["good-key", "other-key"]));
    let mut headers = HeaderMap::new();
    headers.insert("x-goog-api-key", "good-key".parse().unwrap());
    headers.insert("authorization", "Bearer other-key".parse().unwrap());
    assert!(authenticate(IngressApi::Gemini, &headers, &allowed).is_ok());
}

#[test]
fn wrong_key_is_rejected() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["client-key"]));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer wrong-key".parse().unwrap());
    let err = authenticate(IngressApi::OpenAiChat, &headers, &allowed).unwrap_err();
    assert!(matches!(err, CanonicalError::Auth(_)));
}

#[test]
fn missing_key_is_rejected() {
    let allowed = build_allowed_key_set(&config_with_keys(vec!["client-key"]));
    let headers = HeaderMap::new();
    let err = authenticate(IngressApi::OpenAiChat, &headers, &allowed).unwrap_err();
    assert!(matches!(err, CanonicalError::Auth(_)));
}

#[test]
fn empty_allow_list_rejects_everything() {
    let allowed = build_allowed_key_set(&config_with_keys(vec![]));
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer anything".parse().unwrap());
    assert!(authenticate(IngressApi::OpenAiChat, &headers, &allowed).is_err());
}

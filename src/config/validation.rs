use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    validate_upstream_services(config)?;
    validate_log_level(config)?;
    validate_circuit_breaker(config)?;
    validate_semantic_cache(config)?;
    validate_prompt_cache(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    if config.client_authentication.allowed_keys.is_empty() {
        return Err(validation_err("allowed_keys cannot be empty"));
    }
    for key in &config.client_authentication.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
    }
    Ok(())
}

const VALID_PROVIDERS: &[&str] = &["openai", "anthropic", "gemini"];

fn validate_upstream_services(config: &AppConfig) -> Result<(), ConfigError> {
    if config.upstream_services.is_empty() {
        return Err(validation_err("upstream_services cannot be empty"));
    }

    for svc in &config.upstream_services {
        if !svc.base_url.starts_with("http://") && !svc.base_url.starts_with("https://") {
            return Err(validation_err(format!(
                "Service '{}': base_url must start with http:// or https://",
                svc.name
            )));
        }
        if svc.api_key.trim().is_empty() {
            return Err(validation_err(format!(
                "Service '{}': api_key cannot be empty",
                svc.name
            )));
        }
        if !VALID_PROVIDERS.contains(&svc.provider.as_str()) {
            return Err(validation_err(format!(
                "Service '{}': unknown provider '{}'. Must be one of: {}",
                svc.name,
                svc.provider,
                VALID_PROVIDERS.join(", ")
            )));
        }
        if svc.models.is_empty() {
            return Err(validation_err(format!(
                "Service '{}' must have at least one model",
                svc.name
            )));
        }
    }

    // Multiple upstreams may expose the same model/alias for failover; only
    // duplicates within the same service are rejected.
    let mut regular_models = HashSet::new();
    let mut all_aliases = HashSet::new();

    for svc in &config.upstream_services {
        let mut service_entries = HashSet::new();
        for model in &svc.models {
            if model.trim().is_empty() {
                return Err(validation_err(format!(
                    "Service '{}': model name cannot be empty",
                    svc.name
                )));
            }
            if !service_entries.insert(model.clone()) {
                return Err(validation_err(format!(
                    "Service '{}': duplicate model entry '{model}'",
                    svc.name
                )));
            }
            if let Some(colon_pos) = model.find(':') {
                let alias = &model[..colon_pos];
                let real_model = &model[colon_pos + 1..];
                if alias.trim().is_empty() || real_model.trim().is_empty() {
                    return Err(validation_err(format!(
                        "Invalid alias format in '{model}'. Both parts must not be empty."
                    )));
                }
                all_aliases.insert(alias.to_string());
            } else {
                regular_models.insert(model.clone());
            }
        }
    }

    for alias in &all_aliases {
        if regular_models.contains(alias) {
            return Err(validation_err(format!(
                "Alias name '{alias}' conflicts with a regular model name"
            )));
        }
    }

    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_circuit_breaker(config: &AppConfig) -> Result<(), ConfigError> {
    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        return Err(validation_err(
            "circuit_breaker.failure_threshold must be greater than 0",
        ));
    }
    if cb.success_threshold == 0 {
        return Err(validation_err(
            "circuit_breaker.success_threshold must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_threshold(name: &str, value: f32) -> Result<(), ConfigError> {
    if value <= 0.0 || value > 1.0 {
        return Err(validation_err(format!(
            "{name} must be in (0, 1], got {value}"
        )));
    }
    Ok(())
}

fn validate_semantic_cache(config: &AppConfig) -> Result<(), ConfigError> {
    validate_threshold(
        "semantic_cache.similarity_threshold",
        config.semantic_cache.similarity_threshold,
    )?;
    if config.semantic_cache.capacity == 0 {
        return Err(validation_err("semantic_cache.capacity must be > 0"));
    }
    Ok(())
}

fn validate_prompt_cache(config: &AppConfig) -> Result<(), ConfigError> {
    validate_threshold(
        "prompt_cache.similarity_threshold",
        config.prompt_cache.similarity_threshold,
    )?;
    if config.prompt_cache.replay_chunk_delay_min_ms > config.prompt_cache.replay_chunk_delay_max_ms
    {
        return Err(validation_err(
            "prompt_cache.replay_chunk_delay_min_ms must be <= replay_chunk_delay_max_ms",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            upstream_services: vec![UpstreamServiceConfig {
                name: "openai".to_string(),
                provider: "openai".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: "sk-test".to_string(),
                models: vec!["gpt-4o".to_string()],
                description: String::new(),
                is_default: true,
                timeout_ms: 180_000,
                rate_limit_rpm: None,
                auth_type: None,
                headers: Default::default(),
            }],
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["sk-client-key".to_string()],
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
    fn test_valid_config() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_allowed_keys() {
        let mut config = make_valid_config();
        config.client_authentication.allowed_keys = vec![];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_model() {
        let mut config = make_valid_config();
        let mut svc2 = config.upstream_services[0].clone();
        svc2.name = "second".to_string();
        svc2.is_default = false;
        svc2.models = vec!["gpt-4o".to_string()];
        config.upstream_services.push(svc2);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_model_within_same_service() {
        let mut config = make_valid_config();
        config.upstream_services[0].models.push("gpt-4o".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_alias_conflicts_with_model() {
        let mut config = make_valid_config();
        config.upstream_services[0]
            .models
            .push("gpt-4o:gpt-4-turbo".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.upstream_services[0].base_url = "ftp://bad.url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.upstream_services[0].api_key = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = make_valid_config();
        config.upstream_services[0].provider = "unknown-provider".to_string();
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown provider"));
    }

    #[test]
    fn test_valid_providers() {
        for provider in &["openai", "anthropic", "gemini"] {
            let mut config = make_valid_config();
            config.upstream_services[0].provider = (*provider).to_string();
            assert!(
                validate_config(&config).is_ok(),
                "Provider '{provider}' should be valid"
            );
        }
    }

    #[test]
    fn test_invalid_similarity_threshold() {
        let mut config = make_valid_config();
        config.semantic_cache.similarity_threshold = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_similarity_threshold_invalid() {
        let mut config = make_valid_config();
        config.semantic_cache.similarity_threshold = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_prompt_cache_delay_ordering() {
        let mut config = make_valid_config();
        config.prompt_cache.replay_chunk_delay_min_ms = 20;
        config.prompt_cache.replay_chunk_delay_max_ms = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_failure_threshold_invalid() {
        let mut config = make_valid_config();
        config.circuit_breaker.failure_threshold = 0;
        assert!(validate_config(&config).is_err());
    }
}

pub mod env_subst;
pub mod overrides;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server-level listener and transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
        }
    }
}

/// Upstream provider/service entry. Forms both the candidate model list and
/// the `ProviderConfig` the client cache keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServiceConfig {
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_timeout_ms() -> u64 {
    180_000
}

/// Client authentication configuration (simple allow-list only; full
/// credit/usage ledgering is out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    pub allowed_keys: Vec<String>,
}

/// Circuit breaker backing-store and threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default = "default_reset_after_secs")]
    pub reset_after_secs: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    3
}
fn default_open_timeout_secs() -> u64 {
    30
}
fn default_reset_after_secs() -> u64 {
    120
}
fn default_store_timeout_ms() -> u64 {
    1500
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_secs: default_open_timeout_secs(),
            reset_after_secs: default_reset_after_secs(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Embedding service used to compute similarity-search vectors for both SC
/// and PC.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_shortlist_size")]
    pub shortlist_size: usize,
}

fn default_shortlist_size() -> usize {
    256
}

/// Semantic cache (model-selection decision cache) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_db: Option<i64>,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

fn default_cache_capacity() -> usize {
    1000
}
fn default_similarity_threshold() -> f32 {
    0.9
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            redis_db: None,
            capacity: default_cache_capacity(),
            similarity_threshold: default_similarity_threshold(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Prompt (response-replay) cache configuration — one logical store per
/// wire format, sharing these settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_chunk_delay_min_ms")]
    pub replay_chunk_delay_min_ms: u64,
    #[serde(default = "default_chunk_delay_max_ms")]
    pub replay_chunk_delay_max_ms: u64,
}

fn default_chunk_delay_min_ms() -> u64 {
    10
}
fn default_chunk_delay_max_ms() -> u64 {
    15
}

impl Default for PromptCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            capacity: default_cache_capacity(),
            similarity_threshold: default_similarity_threshold(),
            replay_chunk_delay_min_ms: default_chunk_delay_min_ms(),
            replay_chunk_delay_max_ms: default_chunk_delay_max_ms(),
        }
    }
}

/// Remote model-selection service client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRouterConfig {
    #[serde(default)]
    pub selection_service_url: Option<String>,
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default)]
    pub cost_bias: f32,
    #[serde(default = "default_selection_timeout_ms")]
    pub selection_timeout_ms: u64,
}

fn default_jwt_secret() -> String {
    String::new()
}
fn default_selection_timeout_ms() -> u64 {
    5000
}

impl Default for ModelRouterConfig {
    fn default() -> Self {
        Self {
            selection_service_url: None,
            jwt_secret: default_jwt_secret(),
            cost_bias: 0.0,
            selection_timeout_ms: default_selection_timeout_ms(),
        }
    }
}

/// Fallback executor defaults (request bodies may override per spec's
/// `merge_overrides` rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default = "default_fallback_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_fallback_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            mode: String::new(),
            timeout_ms: default_fallback_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Feature flags and cross-cutting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream_services: Vec<UpstreamServiceConfig>,
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub semantic_cache: SemanticCacheConfig,
    #[serde(default)]
    pub prompt_cache: PromptCacheConfig,
    #[serde(default)]
    pub model_router: ModelRouterConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file, apply `${VAR[:-default]}`
/// environment substitution, and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let substituted = env_subst::substitute(&raw);
    let mut config: AppConfig = serde_yaml::from_str(&substituted)?;
    for upstream in &mut config.upstream_services {
        upstream.provider = upstream.provider.to_lowercase();
    }
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert!(config.upstream_services.len() >= 2);
        assert_eq!(config.client_authentication.allowed_keys.len(), 2);
    }

    #[test]
    fn test_provider_lowercased_on_load() {
        std::env::set_var("ADAPTIVE_GW_TEST_KEY", "sk-test");
        let yaml = r#"
upstream_services:
  - name: openai
    provider: OpenAI
    base_url: https://api.openai.com/v1
    api_key: ${ADAPTIVE_GW_TEST_KEY}
    models: [gpt-4o]
    is_default: true
client_authentication:
  allowed_keys: [client-key]
"#;
        let path = std::env::temp_dir().join("adaptive_gw_test_config.yaml");
        std::fs::write(&path, yaml).unwrap();
        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.upstream_services[0].provider, "openai");
        assert_eq!(config.upstream_services[0].api_key, "sk-test");
        std::fs::remove_file(&path).ok();
        std::env::remove_var("ADAPTIVE_GW_TEST_KEY");
    }
}

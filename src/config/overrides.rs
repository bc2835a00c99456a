use std::collections::BTreeMap;

use serde::Deserialize;

use super::{AppConfig, FallbackConfig, ModelRouterConfig, PromptCacheConfig, UpstreamServiceConfig};

/// Request-level override blocks parsed from a wire request's unrecognized
/// top-level fields (`provider_configs`, `fallback`, `model_router`,
/// `prompt_cache`). Any block left out of the request body is `None` and
/// leaves the corresponding section of the base config untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestOverrides {
    #[serde(default)]
    pub provider_configs: Option<BTreeMap<String, ProviderConfigOverride>>,
    #[serde(default)]
    pub fallback: Option<FallbackOverride>,
    #[serde(default)]
    pub model_router: Option<ModelRouterOverride>,
    #[serde(default)]
    pub prompt_cache: Option<PromptCacheOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfigOverride {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub models: Option<Vec<String>>,
    pub timeout_ms: Option<u64>,
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackOverride {
    pub mode: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelRouterOverride {
    pub cost_bias: Option<f32>,
    pub selection_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptCacheOverride {
    pub enabled: Option<bool>,
}

/// Parses override blocks out of a decoded request's flattened extra
/// fields. A block that fails to deserialize (wrong shape) is dropped
/// silently rather than failing the whole request — the override is
/// best-effort, not validated input.
#[must_use]
pub fn parse_request_overrides(extra: &serde_json::Map<String, serde_json::Value>) -> RequestOverrides {
    RequestOverrides {
        provider_configs: extra.get("provider_configs").and_then(|value| serde_json::from_value(value.clone()).ok()),
        fallback: extra.get("fallback").and_then(|value| serde_json::from_value(value.clone()).ok()),
        model_router: extra.get("model_router").and_then(|value| serde_json::from_value(value.clone()).ok()),
        prompt_cache: extra.get("prompt_cache").and_then(|value| serde_json::from_value(value.clone()).ok()),
    }
}

/// Merges request-level overrides onto the YAML base configuration.
/// Scalar values override only when non-zero/non-empty; maps deep-merge
/// (only named keys change, everything else in the base entry survives);
/// lists replace wholesale rather than appending.
#[must_use]
pub fn merge_overrides(base: &AppConfig, overrides: &RequestOverrides) -> AppConfig {
    let mut merged = base.clone();

    if let Some(fallback) = &overrides.fallback {
        merge_fallback(&mut merged.fallback, fallback);
    }
    if let Some(model_router) = &overrides.model_router {
        merge_model_router(&mut merged.model_router, model_router);
    }
    if let Some(prompt_cache) = &overrides.prompt_cache {
        merge_prompt_cache(&mut merged.prompt_cache, prompt_cache);
    }
    if let Some(provider_configs) = &overrides.provider_configs {
        merge_provider_configs(&mut merged.upstream_services, provider_configs);
    }

    merged
}

fn merge_fallback(base: &mut FallbackConfig, over: &FallbackOverride) {
    if let Some(mode) = &over.mode {
        if !mode.is_empty() {
            base.mode = mode.clone();
        }
    }
    if let Some(timeout_ms) = over.timeout_ms {
        if timeout_ms != 0 {
            base.timeout_ms = timeout_ms;
        }
    }
    if let Some(max_retries) = over.max_retries {
        if max_retries != 0 {
            base.max_retries = max_retries;
        }
    }
}

fn merge_model_router(base: &mut ModelRouterConfig, over: &ModelRouterOverride) {
    if let Some(cost_bias) = over.cost_bias {
        if cost_bias != 0.0 {
            base.cost_bias = cost_bias;
        }
    }
    if let Some(selection_timeout_ms) = over.selection_timeout_ms {
        if selection_timeout_ms != 0 {
            base.selection_timeout_ms = selection_timeout_ms;
        }
    }
}

fn merge_prompt_cache(base: &mut PromptCacheConfig, over: &PromptCacheOverride) {
    // `enabled` is a bool, not a number/string, so the "non-zero/non-empty"
    // scalar rule doesn't apply the same way — presence in the request is
    // already an explicit, unambiguous intent to override.
    if let Some(enabled) = over.enabled {
        base.enabled = enabled;
    }
}

/// Applies per-provider overrides by service name; a name the base config
/// doesn't already define is skipped; manual override requires the
/// provider to be pre-registered, so there is no ad hoc upstream creation
/// path here.
fn merge_provider_configs(base: &mut [UpstreamServiceConfig], overrides: &BTreeMap<String, ProviderConfigOverride>) {
    for service in base.iter_mut() {
        let Some(over) = overrides.get(&service.name) else { continue };

        if let Some(base_url) = &over.base_url {
            if !base_url.is_empty() {
                service.base_url = base_url.clone();
            }
        }
        if let Some(api_key) = &over.api_key {
            if !api_key.is_empty() {
                service.api_key = api_key.clone();
            }
        }
        if let Some(timeout_ms) = over.timeout_ms {
            if timeout_ms != 0 {
                service.timeout_ms = timeout_ms;
            }
        }
        if let Some(models) = &over.models {
            if !models.is_empty() {
                service.models = models.clone();
            }
        }
        if let Some(headers) = &over.headers {
            for (key, value) in headers {
                service.headers.insert(key.clone(), value.clone());
            }
        }
    }
}

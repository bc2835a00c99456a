use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::config::{AppConfig, UpstreamServiceConfig};
use crate::error::CanonicalError;
use crate::protocol::canonical::ProviderKind;
use crate::util::bytes_hash;

use super::client_cache::ClientCache;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) fn provider_kind(provider: &str) -> Option<ProviderKind> {
    match provider {
        "openai" => Some(ProviderKind::OpenAi),
        "anthropic" => Some(ProviderKind::Anthropic),
        "gemini" => Some(ProviderKind::Gemini),
        _ => None,
    }
}

fn provider_config_hash(config: &UpstreamServiceConfig) -> u64 {
    let mut buf = String::with_capacity(128);
    buf.push_str(&config.name);
    buf.push('\0');
    buf.push_str(&config.provider);
    buf.push('\0');
    buf.push_str(&config.base_url);
    buf.push('\0');
    buf.push_str(&config.api_key);
    buf.push('\0');
    buf.push_str(&config.timeout_ms.to_string());
    bytes_hash(buf.as_bytes())
}

/// Builds the outbound upstream URL for `provider`/`model`, per each
/// incumbent provider's real wire convention.
#[must_use]
pub fn build_upstream_url(config: &UpstreamServiceConfig, model: &str, streaming: bool) -> String {
    let base = config.base_url.trim_end_matches('/');
    match provider_kind(&config.provider) {
        Some(ProviderKind::OpenAi) => format!("{base}/chat/completions"),
        Some(ProviderKind::Anthropic) => format!("{base}/messages"),
        Some(ProviderKind::Gemini) => {
            let suffix = if streaming { "streamGenerateContent" } else { "generateContent" };
            format!("{base}/models/{model}:{suffix}")
        }
        None => format!("{base}/{model}"),
    }
}

fn apply_auth_headers(builder: reqwest::RequestBuilder, config: &UpstreamServiceConfig) -> reqwest::RequestBuilder {
    match provider_kind(&config.provider) {
        Some(ProviderKind::OpenAi) => builder.bearer_auth(&config.api_key),
        Some(ProviderKind::Anthropic) => builder.header("x-api-key", &config.api_key).header("anthropic-version", ANTHROPIC_VERSION),
        Some(ProviderKind::Gemini) => builder.header("x-goog-api-key", &config.api_key),
        None => builder,
    }
}

/// Owns one pooled [`reqwest::Client`] per `(provider_config, is_streaming)`
/// pair, built lazily and single-flight-cached (spec §5's client cache).
/// Streaming clients carry no request timeout since the transport is held
/// open for the lifetime of the SSE stream; non-streaming clients apply the
/// provider's configured `timeoutMs`.
pub struct HttpTransport {
    providers: FxHashMap<String, UpstreamServiceConfig>,
    clients: ClientCache<(u64, bool), reqwest::Client>,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Duration,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let providers = config.upstream_services.iter().map(|upstream| (upstream.name.clone(), upstream.clone())).collect();
        Self {
            providers,
            clients: ClientCache::new(),
            pool_max_idle_per_host: config.server.http_pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_secs(config.server.http_pool_idle_timeout_secs),
        }
    }

    #[must_use]
    pub fn provider_config(&self, name: &str) -> Option<&UpstreamServiceConfig> {
        self.providers.get(name)
    }

    async fn client_for(&self, config: &UpstreamServiceConfig, streaming: bool) -> reqwest::Client {
        let key = (provider_config_hash(config), streaming);
        let pool_max_idle_per_host = self.pool_max_idle_per_host;
        let pool_idle_timeout = self.pool_idle_timeout;
        let timeout_ms = config.timeout_ms;
        self.clients
            .get_or_init(key, || async move {
                let mut builder = reqwest::Client::builder()
                    .pool_max_idle_per_host(pool_max_idle_per_host)
                    .pool_idle_timeout(pool_idle_timeout)
                    .tcp_nodelay(true)
                    .connect_timeout(Duration::from_secs(5));
                if !streaming {
                    builder = builder.timeout(Duration::from_millis(timeout_ms));
                }
                builder.build().unwrap_or_else(|_| reqwest::Client::new())
            })
            .await
    }

    /// Sends a unary request and returns the raw upstream JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Transport`] on connection failure and
    /// [`CanonicalError::Upstream`] on a non-2xx response.
    pub async fn send_unary(&self, config: &UpstreamServiceConfig, model: &str, body: &serde_json::Value) -> Result<serde_json::Value, CanonicalError> {
        let client = self.client_for(config, false).await;
        let url = build_upstream_url(config, model, false);
        let mut builder = client.post(url).header("content-type", "application/json");
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        builder = apply_auth_headers(builder, config);

        let response = builder.json(body).send().await.map_err(|err| CanonicalError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CanonicalError::Upstream { status, message });
        }

        response.json().await.map_err(|err| CanonicalError::Translation(format!("invalid upstream JSON: {err}")))
    }

    /// Opens a streaming request and returns the raw byte stream, still
    /// wrapped by [`crate::stream::reader::UpstreamReader`] at the call
    /// site so the first-chunk prevalidation property holds.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Transport`] on connection failure and
    /// [`CanonicalError::Upstream`] on a non-2xx response.
    pub async fn send_streaming(
        &self,
        config: &UpstreamServiceConfig,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>>, CanonicalError> {
        let client = self.client_for(config, true).await;
        let url = build_upstream_url(config, model, true);
        let mut builder = client.post(url).header("content-type", "application/json").header("accept", "text/event-stream");
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        builder = apply_auth_headers(builder, config);

        let response = builder.json(body).send().await.map_err(|err| CanonicalError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(CanonicalError::Upstream { status, message });
        }

        Ok(response.bytes_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(provider: &str) -> UpstreamServiceConfig {
        UpstreamServiceConfig {
            name: "test".to_string(),
            provider: provider.to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            api_key: "sk-test".to_string(),
            models: vec![],
            description: String::new(),
            is_default: false,
            timeout_ms: 30_000,
            rate_limit_rpm: None,
            auth_type: None,
            headers: Default::default(),
        }
    }

    #[test]
    fn openai_url_is_chat_completions() {
        assert_eq!(build_upstream_url(&upstream("openai"), "gpt-4o", false), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn anthropic_url_is_messages() {
        assert_eq!(build_upstream_url(&upstream("anthropic"), "claude-sonnet-4", false), "https://api.example.com/v1/messages");
    }

    #[test]
    fn gemini_url_picks_suffix_from_streaming_flag() {
        let config = upstream("gemini");
        assert_eq!(build_upstream_url(&config, "gemini-2.5-flash", false), "https://api.example.com/v1/models/gemini-2.5-flash:generateContent");
        assert_eq!(build_upstream_url(&config, "gemini-2.5-flash", true), "https://api.example.com/v1/models/gemini-2.5-flash:streamGenerateContent");
    }

    #[test]
    fn provider_config_hash_is_stable() {
        let a = upstream("openai");
        let b = upstream("openai");
        assert_eq!(provider_config_hash(&a), provider_config_hash(&b));
    }
}

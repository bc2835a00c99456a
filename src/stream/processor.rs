use bytes::Bytes;

use crate::error::CanonicalError;
use crate::protocol::anthropic::stream as anthropic_stream;
use crate::protocol::anthropic::AnthropicStreamEvent;
use crate::protocol::canonical::{CanonicalStreamEvent, IngressApi, ProviderKind};
use crate::protocol::gemini::stream as gemini_stream;
use crate::protocol::openai_chat::stream as openai_stream;

use super::sse::SseParser;
use super::SseEvent;

/// Provider-specific stream transform: parses raw upstream bytes, converts
/// to canonical events, and re-serializes into the target ingress API's SSE
/// framing. Empty input yields empty output (the orchestrator skips it).
#[async_trait::async_trait]
pub trait Processor: Send {
    async fn process(&mut self, chunk: Bytes) -> Result<Bytes, CanonicalError>;
    fn provider(&self) -> &str;
}

/// Decodes `upstream`-framed SSE bytes into canonical events and re-encodes
/// them in `ingress`'s wire framing. Used whenever the upstream provider
/// differs from the client's ingress API, or the client requested a
/// different model than what was actually routed.
pub struct TranscodingProcessor {
    upstream: ProviderKind,
    parser: SseParser,
    encoder: CanonicalEventEncoder,
}

impl TranscodingProcessor {
    #[must_use]
    pub fn new(upstream: ProviderKind, ingress: IngressApi, model: String, response_id: String) -> Self {
        Self {
            upstream,
            parser: SseParser::new(),
            encoder: CanonicalEventEncoder::new(ingress, model, response_id),
        }
    }

    fn decode(&self, event: &SseEvent) -> Vec<CanonicalStreamEvent> {
        match self.upstream {
            ProviderKind::OpenAi => openai_stream::parse_openai_sse_line(&event.data)
                .map(openai_stream::decode_openai_stream_chunk)
                .unwrap_or_default(),
            ProviderKind::Anthropic => {
                let event_type = event.event.as_deref().unwrap_or_default();
                parse_anthropic_event(event_type, &event.data)
                    .map(|parsed| anthropic_stream::decode_anthropic_stream_event(&parsed))
                    .unwrap_or_default()
            }
            ProviderKind::Gemini => gemini_stream::parse_gemini_sse_line(&event.data)
                .as_ref()
                .map(gemini_stream::decode_gemini_stream_chunk)
                .unwrap_or_default(),
        }
    }
}

fn parse_anthropic_event(event_type: &str, data: &str) -> Option<AnthropicStreamEvent> {
    anthropic_stream::parse_anthropic_sse(event_type, data)
}

/// Encodes canonical stream events into one ingress API's SSE framing.
/// Shared between [`TranscodingProcessor`] (live upstream traffic) and the
/// prompt-cache [`super::StreamSimulator`] (replayed traffic), so cached and
/// live responses are byte-for-byte indistinguishable in framing.
pub struct CanonicalEventEncoder {
    ingress: IngressApi,
    created: u64,
    model: String,
    response_id: String,
    anthropic_pairs: Vec<(&'static str, String)>,
}

impl CanonicalEventEncoder {
    #[must_use]
    pub fn new(ingress: IngressApi, model: String, response_id: String) -> Self {
        Self {
            ingress,
            created: crate::util::unix_now_secs(),
            model,
            response_id,
            anthropic_pairs: Vec::with_capacity(2),
        }
    }

    pub fn encode(&mut self, event: &CanonicalStreamEvent, out: &mut String) {
        match self.ingress {
            IngressApi::OpenAiChat => {
                if let Some(frame) = openai_stream::encode_canonical_event_to_openai_sse_with_created(
                    event,
                    &self.model,
                    &self.response_id,
                    self.created,
                ) {
                    out.push_str(&frame);
                }
            }
            IngressApi::Anthropic => {
                anthropic_stream::encode_canonical_event_to_anthropic_sse_into(
                    event,
                    &self.model,
                    &self.response_id,
                    &mut self.anthropic_pairs,
                );
                for (name, json) in &self.anthropic_pairs {
                    out.push_str(&super::sse::anthropic_sse_frame(name, json));
                }
            }
            IngressApi::Gemini => {
                if let Some(frame) = gemini_stream::encode_canonical_event_to_gemini_sse(event) {
                    out.push_str(&frame);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Processor for TranscodingProcessor {
    async fn process(&mut self, chunk: Bytes) -> Result<Bytes, CanonicalError> {
        if chunk.is_empty() {
            return Ok(Bytes::new());
        }
        let text = std::str::from_utf8(&chunk)
            .map_err(|err| CanonicalError::Translation(format!("non-utf8 stream chunk: {err}")))?;

        let events = self.parser.feed(text);
        let mut out = String::new();
        for sse_event in &events {
            for canonical in self.decode(sse_event) {
                self.encoder.encode(&canonical, &mut out);
            }
        }
        Ok(Bytes::from(out.into_bytes()))
    }

    fn provider(&self) -> &str {
        match self.upstream {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }
}

/// Forwards upstream bytes unchanged — the manual-override fast path when
/// the upstream provider's wire format already matches the client's ingress
/// API.
pub struct PassthroughProcessor {
    provider: ProviderKind,
}

impl PassthroughProcessor {
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Processor for PassthroughProcessor {
    async fn process(&mut self, chunk: Bytes) -> Result<Bytes, CanonicalError> {
        Ok(chunk)
    }

    fn provider(&self) -> &str {
        match self.provider {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }
}

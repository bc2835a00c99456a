use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::breaker::should_record_failure;
use crate::cache::prompt_cache::CachedResponseRecord;
use crate::error::CanonicalError;
use crate::fallback::{ExecutionError, ExecutionFn};
use crate::model::{CandidateModel, SelectionResult};
use crate::protocol::anthropic::{
    decode_anthropic_response, encode_anthropic_request, AnthropicRequest, AnthropicResponse,
};
use crate::protocol::canonical::{CanonicalRequest, CanonicalResponse, IngressApi, ProviderKind};
use crate::protocol::gemini::{
    decode_gemini_response, encode_gemini_request, GeminiRequest, GeminiResponse,
};
use crate::protocol::openai_chat::{
    decode_openai_chat_response, encode_openai_chat_request, OpenAiChatRequest,
    OpenAiChatResponse,
};
use crate::state::AppState;
use crate::stream::{
    ChunkedWriter, ConnectionState, PassthroughProcessor, Processor, TranscodingProcessor,
};
use crate::transport::http_transport::provider_kind;
use crate::util::synthetic_id;

/// `IngressApi`'s corresponding wire-provider kind, used to decide when the
/// upstream's own framing can be forwarded unchanged (manual override onto a
/// same-kind upstream).
fn ingress_provider_kind(ingress: IngressApi) -> ProviderKind {
    match ingress {
        IngressApi::OpenAiChat => ProviderKind::OpenAi,
        IngressApi::Anthropic => ProviderKind::Anthropic,
        IngressApi::Gemini => ProviderKind::Gemini,
    }
}

fn encode_upstream_request(
    kind: ProviderKind,
    request: &CanonicalRequest,
    candidate_model: &str,
) -> Result<serde_json::Value, CanonicalError> {
    let mut request = request.clone();
    request.model = candidate_model.to_string();

    match kind {
        ProviderKind::OpenAi => {
            let wire: OpenAiChatRequest = encode_openai_chat_request(&request)?;
            serde_json::to_value(wire).map_err(|err| CanonicalError::Translation(format!("encode openai request: {err}")))
        }
        ProviderKind::Anthropic => {
            let wire: AnthropicRequest = encode_anthropic_request(&request)?;
            serde_json::to_value(wire).map_err(|err| CanonicalError::Translation(format!("encode anthropic request: {err}")))
        }
        ProviderKind::Gemini => {
            let wire: GeminiRequest = encode_gemini_request(&request)?;
            serde_json::to_value(wire).map_err(|err| CanonicalError::Translation(format!("encode gemini request: {err}")))
        }
    }
}

fn decode_upstream_response(
    kind: ProviderKind,
    body: serde_json::Value,
    candidate_model: &str,
) -> Result<CanonicalResponse, CanonicalError> {
    match kind {
        ProviderKind::OpenAi => {
            let wire: OpenAiChatResponse = serde_json::from_value(body).map_err(|err| CanonicalError::Translation(format!("invalid openai response: {err}")))?;
            decode_openai_chat_response(&wire)
        }
        ProviderKind::Anthropic => {
            let wire: AnthropicResponse = serde_json::from_value(body).map_err(|err| CanonicalError::Translation(format!("invalid anthropic response: {err}")))?;
            decode_anthropic_response(&wire)
        }
        ProviderKind::Gemini => {
            let wire: GeminiResponse = serde_json::from_value(body).map_err(|err| CanonicalError::Translation(format!("invalid gemini response: {err}")))?;
            decode_gemini_response(&wire, candidate_model)
        }
    }
}

/// Shared execution context for one inbound request, fed to the fallback
/// executor as an [`ExecutionFn`]. Holds no payload channel of its own for
/// unary calls — `call()` returns `Result<(), ExecutionError>`, so the
/// decoded response is stashed in `unary_result` for the caller to collect
/// once the executor resolves. The streaming path instead drives the shared
/// writer directly and signals `commit` the moment the upstream stream is
/// proven readable.
pub struct CandidateContext {
    state: Arc<AppState>,
    request: Arc<CanonicalRequest>,
    ingress: IngressApi,
    prompt: String,
    all_candidates: Vec<CandidateModel>,
    manual_override: bool,
    /// Per-request merged upstream service configs (YAML base +
    /// `provider_configs` request override). Resolved against instead of
    /// `state.upstream_for_provider` so a request-scoped override never
    /// mutates process-wide state.
    upstream_services: Vec<crate::config::UpstreamServiceConfig>,
    /// Per-request merged `prompt_cache.enabled` (YAML base + request
    /// override), checked instead of `state.prompt_cache.enabled` so an
    /// override never mutates the process-wide prompt cache setting.
    prompt_cache_enabled: bool,
    unary_result: Mutex<Option<CanonicalResponse>>,
    stream_tx: Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
    commit_tx: Mutex<Option<oneshot::Sender<()>>>,
    connection: ConnectionState,
    send_done: bool,
}

impl CandidateContext {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new_unary(
        state: Arc<AppState>,
        request: Arc<CanonicalRequest>,
        ingress: IngressApi,
        prompt: String,
        all_candidates: Vec<CandidateModel>,
        manual_override: bool,
        upstream_services: Vec<crate::config::UpstreamServiceConfig>,
        prompt_cache_enabled: bool,
    ) -> Self {
        Self {
            state,
            request,
            ingress,
            prompt,
            all_candidates,
            manual_override,
            upstream_services,
            prompt_cache_enabled,
            unary_result: Mutex::new(None),
            stream_tx: None,
            commit_tx: Mutex::new(None),
            connection: ConnectionState::new(),
            send_done: false,
        }
    }

    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new_streaming(
        state: Arc<AppState>,
        request: Arc<CanonicalRequest>,
        ingress: IngressApi,
        prompt: String,
        all_candidates: Vec<CandidateModel>,
        manual_override: bool,
        upstream_services: Vec<crate::config::UpstreamServiceConfig>,
        prompt_cache_enabled: bool,
        stream_tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
        commit_tx: oneshot::Sender<()>,
    ) -> Self {
        let send_done = !matches!(ingress, IngressApi::Gemini);
        Self {
            state,
            request,
            ingress,
            prompt,
            all_candidates,
            manual_override,
            upstream_services,
            prompt_cache_enabled,
            unary_result: Mutex::new(None),
            stream_tx: Some(stream_tx),
            commit_tx: Mutex::new(Some(commit_tx)),
            connection: ConnectionState::new(),
            send_done,
        }
    }

    /// Takes the decoded response stashed by a successful unary `call()`.
    pub fn take_unary_result(&self) -> Option<CanonicalResponse> {
        self.unary_result.lock().take()
    }

    fn store_selection_success(&self, winner: &CandidateModel) {
        let alternatives: Vec<CandidateModel> = self
            .all_candidates
            .iter()
            .filter(|candidate| *candidate != winner)
            .cloned()
            .collect();
        let result = SelectionResult { primary: winner.clone(), alternatives };
        self.state.model_router.store_successful_model(self.prompt.clone(), &result);
    }

    async fn resolve(&self, candidate: &CandidateModel) -> Result<(ProviderKind, &crate::config::UpstreamServiceConfig), ExecutionError> {
        if !self.state.breakers.can_execute(&candidate.provider).await {
            return Err(ExecutionError::retryable(CanonicalError::Breaker(format!(
                "circuit open for provider '{}'",
                candidate.provider
            ))));
        }
        let config = self
            .upstream_services
            .iter()
            .find(|service| service.name.as_str() == candidate.provider.as_ref())
            .ok_or_else(|| ExecutionError::non_retryable(CanonicalError::Config(format!("unknown provider '{}'", candidate.provider))))?;
        let kind = provider_kind(&config.provider)
            .ok_or_else(|| ExecutionError::non_retryable(CanonicalError::Config(format!("unsupported provider kind '{}'", config.provider))))?;
        Ok((kind, config))
    }

    async fn call_unary(&self, candidate: &CandidateModel, _req_id: &str) -> Result<(), ExecutionError> {
        let (kind, config) = self.resolve(candidate).await?;

        let body = encode_upstream_request(kind, &self.request, &candidate.model).map_err(ExecutionError::non_retryable)?;

        let raw = match self.state.transport.send_unary(config, &candidate.model, &body).await {
            Ok(value) => value,
            Err(err) => {
                let retryable = should_record_failure(&err);
                if retryable {
                    self.state.breakers.record_failure(&candidate.provider).await;
                }
                return Err(ExecutionError { error: err, retryable });
            }
        };

        let canonical = decode_upstream_response(kind, raw, &candidate.model).map_err(ExecutionError::non_retryable)?;

        self.state.breakers.record_success(&candidate.provider).await;
        self.store_selection_success(candidate);

        if self.prompt_cache_enabled {
            let record = CachedResponseRecord::from_canonical(&canonical);
            self.state.prompt_cache.store(self.ingress, self.prompt.clone(), record);
        }

        *self.unary_result.lock() = Some(canonical);
        Ok(())
    }

    async fn call_streaming(&self, candidate: &CandidateModel, req_id: &str) -> Result<(), ExecutionError> {
        let (kind, config) = self.resolve(candidate).await?;

        let body = encode_upstream_request(kind, &self.request, &candidate.model).map_err(ExecutionError::non_retryable)?;

        let byte_stream = match self.state.transport.send_streaming(config, &candidate.model, &body).await {
            Ok(stream) => stream,
            Err(err) => {
                let retryable = should_record_failure(&err);
                if retryable {
                    self.state.breakers.record_failure(&candidate.provider).await;
                }
                return Err(ExecutionError { error: err, retryable });
            }
        };

        let reader = match crate::stream::UpstreamReader::new(Box::pin(byte_stream)).await {
            Ok(reader) => reader,
            Err(err) => {
                self.state.breakers.record_failure(&candidate.provider).await;
                return Err(ExecutionError::retryable(err));
            }
        };

        // Commit point: the upstream stream is proven readable, so the
        // handler can return its response headers now.
        if let Some(commit) = self.commit_tx.lock().take() {
            let _ = commit.send(());
        }

        let sender = self.stream_tx.clone().expect("streaming context has a writer channel");
        let writer = Box::new(ChunkedWriter::new(sender, self.connection.clone(), self.send_done));

        let same_wire_format = self.manual_override && kind == ingress_provider_kind(self.ingress);
        let processor: Box<dyn Processor> = if same_wire_format {
            Box::new(PassthroughProcessor::new(kind))
        } else {
            let response_id = synthetic_id("resp");
            Box::new(TranscodingProcessor::new(kind, self.ingress, candidate.model.to_string(), response_id))
        };

        let outcome = crate::stream::run_pipeline(Box::new(reader), processor, writer).await;

        match outcome {
            crate::stream::PipelineOutcome::Complete => {
                self.state.breakers.record_success(&candidate.provider).await;
                self.store_selection_success(candidate);
            }
            crate::stream::PipelineOutcome::ClientDisconnected => {
                // Client left mid-stream; the upstream itself was fine, so
                // neither a breaker verdict nor a cache write is warranted.
            }
            crate::stream::PipelineOutcome::Failed(err) => {
                self.state.breakers.record_failure(&candidate.provider).await;
                tracing::warn!(request_id = req_id, "stream pipeline failed after commit: {err}");
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionFn for CandidateContext {
    async fn call(&self, candidate: &CandidateModel, req_id: &str) -> Result<(), ExecutionError> {
        if self.request.stream {
            self.call_streaming(candidate, req_id).await
        } else {
            self.call_unary(candidate, req_id).await
        }
    }
}

pub mod context;

use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::Stream;
use http::StatusCode;
use tokio::sync::{mpsc, oneshot};

use crate::config::overrides::{merge_overrides, parse_request_overrides};
use crate::error::{into_axum_response, CanonicalError};
use crate::fallback::{run_streaming_race, ExecutionFn, FallbackExecutor, FallbackMode};
use crate::model::CandidateModel;
use crate::protocol::anthropic::encode_anthropic_response;
use crate::protocol::canonical::{
    CanonicalPart, CanonicalRequest, CanonicalResponse, CanonicalRole, IngressApi,
};
use crate::protocol::gemini::encode_gemini_response;
use crate::protocol::openai_chat::encode_openai_chat_response;
use crate::state::AppState;
use crate::stream::{ChunkedWriter, ConnectionState, StreamSimulator};
use crate::util::synthetic_id;

use context::CandidateContext;

const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Extracts the last user message's text parts, joined — the prompt/cache
/// key used by both the semantic cache and the prompt cache so the two
/// stay key-coherent.
///
/// On a mixed text+image Anthropic message this keeps only the text parts,
/// which can be lossy for multimodal routing; see `DESIGN.md`.
#[must_use]
pub fn extract_prompt(request: &CanonicalRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == CanonicalRole::User)
        .map(|message| {
            message
                .parts
                .iter()
                .filter_map(|part| match part {
                    CanonicalPart::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Parses a `provider:model` manual override. Strict: exactly one colon,
/// both halves non-empty after trim. Any deviation returns `None`, and the
/// caller falls through to intelligent routing.
#[must_use]
pub fn parse_manual_override(model: &str) -> Option<(String, String)> {
    let (provider, rest) = model.split_once(':')?;
    if rest.contains(':') {
        return None;
    }
    let provider = provider.trim();
    let model_name = rest.trim();
    if provider.is_empty() || model_name.is_empty() {
        return None;
    }
    Some((provider.to_string(), model_name.to_string()))
}

fn mpsc_to_body_stream(
    rx: mpsc::Receiver<Result<Bytes, std::io::Error>>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

fn sse_response(rx: mpsc::Receiver<Result<Bytes, std::io::Error>>) -> Response {
    let body = Body::from_stream(mpsc_to_body_stream(rx));
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn encode_client_response(ingress: IngressApi, canonical: &CanonicalResponse) -> Result<serde_json::Value, CanonicalError> {
    match ingress {
        IngressApi::OpenAiChat => {
            let wire = encode_openai_chat_response(canonical, &canonical.model)?;
            serde_json::to_value(wire).map_err(|err| CanonicalError::Translation(format!("encode openai response: {err}")))
        }
        IngressApi::Anthropic => {
            let wire = encode_anthropic_response(canonical, &canonical.model)?;
            serde_json::to_value(wire).map_err(|err| CanonicalError::Translation(format!("encode anthropic response: {err}")))
        }
        IngressApi::Gemini => {
            let wire = encode_gemini_response(canonical)?;
            serde_json::to_value(wire).map_err(|err| CanonicalError::Translation(format!("encode gemini response: {err}")))
        }
    }
}

/// Shared request-lifecycle driver: prompt-cache consult, manual-override
/// vs. model-router candidate selection, and unary/streaming dispatch
/// through the fallback executor. Each ingress handler decodes its wire
/// body into a [`CanonicalRequest`] and hands it here.
pub async fn run_request(state: Arc<AppState>, ingress: IngressApi, request: CanonicalRequest) -> Response {
    let prompt = extract_prompt(&request);

    let overrides = parse_request_overrides(request.provider_extensions_ref());
    let merged_config = merge_overrides(&state.config, &overrides);

    if merged_config.prompt_cache.enabled {
        if let Some(record) = state.prompt_cache.lookup(ingress, &prompt).await {
            return replay_cached(
                ingress,
                &request,
                record,
                merged_config.prompt_cache.replay_chunk_delay_min_ms,
                merged_config.prompt_cache.replay_chunk_delay_max_ms,
            )
            .await;
        }
    }

    let manual_override = parse_manual_override(&request.model);

    let (candidates, is_manual) = if let Some((provider, model)) = manual_override {
        if !merged_config.upstream_services.iter().any(|service| service.name == provider) {
            return into_axum_response(&CanonicalError::InvalidRequest(format!("unknown provider '{provider}'")), ingress);
        }
        (vec![CandidateModel::new(provider, model)], true)
    } else {
        let known: Vec<CandidateModel> = merged_config
            .upstream_services
            .iter()
            .flat_map(|upstream| upstream.models.iter().map(move |model| CandidateModel::new(upstream.name.clone(), model.clone())))
            .collect();
        let model_router = state.model_router.with_config(&merged_config.model_router);
        let (selection, _source) = model_router.select_model_with_cache(&prompt, "", &known, &request.tools, Some(&request.tool_choice)).await;
        (selection.all_candidates(), false)
    };

    let fallback = FallbackExecutor::new(&merged_config.fallback);
    let fallback_mode = FallbackMode::from_config(&merged_config.fallback.mode);
    let upstream_services = merged_config.upstream_services.clone();
    let prompt_cache_enabled = merged_config.prompt_cache.enabled;

    let stream = request.stream;
    let request = Arc::new(request);

    if stream {
        run_streaming(state, ingress, request, prompt, candidates, is_manual, upstream_services, prompt_cache_enabled, fallback, fallback_mode).await
    } else {
        run_unary(state, ingress, request, prompt, candidates, is_manual, upstream_services, prompt_cache_enabled, fallback).await
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_unary(
    state: Arc<AppState>,
    ingress: IngressApi,
    request: Arc<CanonicalRequest>,
    prompt: String,
    candidates: Vec<CandidateModel>,
    manual_override: bool,
    upstream_services: Vec<crate::config::UpstreamServiceConfig>,
    prompt_cache_enabled: bool,
    fallback: FallbackExecutor,
) -> Response {
    let req_id = request.request_id.to_string();
    let ctx = CandidateContext::new_unary(Arc::clone(&state), request, ingress, prompt, candidates.clone(), manual_override, upstream_services, prompt_cache_enabled);

    match fallback.run(&candidates, &ctx, &req_id).await {
        Ok(_winner) => match ctx.take_unary_result() {
            Some(response) => match encode_client_response(ingress, &response) {
                Ok(value) => (StatusCode::OK, Json(value)).into_response(),
                Err(err) => into_axum_response(&err, ingress),
            },
            None => into_axum_response(&CanonicalError::Internal("execution reported success with no response".to_string()), ingress),
        },
        Err(errors) => {
            let err = errors.into_iter().last().unwrap_or_else(|| CanonicalError::Internal("no candidates available".to_string()));
            into_axum_response(&err, ingress)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_streaming(
    state: Arc<AppState>,
    ingress: IngressApi,
    request: Arc<CanonicalRequest>,
    prompt: String,
    candidates: Vec<CandidateModel>,
    manual_override: bool,
    upstream_services: Vec<crate::config::UpstreamServiceConfig>,
    prompt_cache_enabled: bool,
    fallback: FallbackExecutor,
    fallback_mode: FallbackMode,
) -> Response {
    let req_id = request.request_id.to_string();
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_CHANNEL_CAPACITY);
    let (commit_tx, commit_rx) = oneshot::channel();

    let ctx = Arc::new(CandidateContext::new_streaming(
        Arc::clone(&state),
        Arc::clone(&request),
        ingress,
        prompt,
        candidates.clone(),
        manual_override,
        upstream_services,
        prompt_cache_enabled,
        body_tx,
        commit_tx,
    ));
    let exec = Arc::clone(&ctx) as Arc<dyn ExecutionFn>;
    let use_race = !manual_override && fallback_mode == FallbackMode::Race && candidates.len() > 1;

    let join = tokio::spawn(async move {
        if use_race {
            run_streaming_race(&candidates, exec, &req_id).await
        } else {
            fallback.run(&candidates, exec.as_ref(), &req_id).await
        }
    });

    tokio::select! {
        _ = commit_rx => sse_response(body_rx),
        result = join => match result {
            Ok(Ok(_winner)) => sse_response(body_rx),
            Ok(Err(errors)) => {
                let err = errors.into_iter().last().unwrap_or_else(|| CanonicalError::Internal("no candidates available".to_string()));
                into_axum_response(&err, ingress)
            }
            Err(join_err) => into_axum_response(&CanonicalError::Internal(format!("execution task panicked: {join_err}")), ingress),
        },
    }
}

async fn replay_cached(
    ingress: IngressApi,
    request: &CanonicalRequest,
    record: crate::cache::prompt_cache::CachedResponseRecord,
    delay_min_ms: u64,
    delay_max_ms: u64,
) -> Response {
    if request.stream {
        let send_done = !matches!(ingress, IngressApi::Gemini);
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_CHANNEL_CAPACITY);
        let connection = ConnectionState::new();
        let model = record.model.clone();
        let stop_reason = record.stop_reason();
        let usage = record.usage();
        let text = record.text.clone();
        let response_id = synthetic_id("resp");

        tokio::spawn(async move {
            let simulator = StreamSimulator::new(ingress, model, response_id, delay_min_ms, delay_max_ms);
            let mut writer = ChunkedWriter::new(tx, connection, send_done);
            if let Err(err) = simulator.run(&text, stop_reason, usage, &mut writer).await {
                tracing::warn!("prompt cache replay failed: {err}");
            }
            writer.close().await;
        });

        sse_response(rx)
    } else {
        let canonical = CanonicalResponse {
            id: synthetic_id("resp"),
            model: record.model.clone(),
            content: vec![CanonicalPart::Text(record.text.clone())],
            stop_reason: record.stop_reason(),
            usage: record.usage(),
            provider_extensions: serde_json::Map::new(),
        };

        match encode_client_response(ingress, &canonical) {
            Ok(value) => (StatusCode::OK, Json(value)).into_response(),
            Err(err) => into_axum_response(&err, ingress),
        }
    }
}

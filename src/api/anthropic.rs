use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use http::HeaderMap;

use crate::error::into_axum_response;
use crate::lifecycle;
use crate::protocol::anthropic::{decode_anthropic_request, AnthropicRequest};
use crate::protocol::canonical::IngressApi;
use crate::state::AppState;

pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<AnthropicRequest>) -> Response {
    if let Err(err) = state.authenticate(IngressApi::Anthropic, &headers) {
        return into_axum_response(&err, IngressApi::Anthropic);
    }

    let request = match decode_anthropic_request(&body, uuid::Uuid::new_v4()) {
        Ok(request) => request,
        Err(err) => return into_axum_response(&err, IngressApi::Anthropic),
    };

    lifecycle::run_request(state, IngressApi::Anthropic, request).await
}

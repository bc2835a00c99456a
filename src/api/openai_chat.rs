use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use http::HeaderMap;

use crate::error::into_axum_response;
use crate::lifecycle;
use crate::protocol::canonical::IngressApi;
use crate::protocol::openai_chat::{decode_openai_chat_request, OpenAiChatRequest};
use crate::state::AppState;

pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<OpenAiChatRequest>) -> Response {
    if let Err(err) = state.authenticate(IngressApi::OpenAiChat, &headers) {
        return into_axum_response(&err, IngressApi::OpenAiChat);
    }

    let request = match decode_openai_chat_request(&body, uuid::Uuid::new_v4()) {
        Ok(request) => request,
        Err(err) => return into_axum_response(&err, IngressApi::OpenAiChat),
    };

    lifecycle::run_request(state, IngressApi::OpenAiChat, request).await
}

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use http::HeaderMap;

use crate::error::{into_axum_response, CanonicalError};
use crate::lifecycle;
use crate::protocol::canonical::IngressApi;
use crate::protocol::gemini::{decode_gemini_request, GeminiRequest};
use crate::state::AppState;

/// `model_action` is the raw `{model}:{generateContent|streamGenerateContent}`
/// path segment — Gemini's action rides in the URL, not the body, so the
/// decoder's own `stream: false` default is overridden here from the suffix.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<GeminiRequest>,
) -> Response {
    if let Err(err) = state.authenticate(IngressApi::Gemini, &headers) {
        return into_axum_response(&err, IngressApi::Gemini);
    }

    let Some((model, action)) = model_action.rsplit_once(':') else {
        return into_axum_response(&CanonicalError::InvalidRequest(format!("malformed model action '{model_action}'")), IngressApi::Gemini);
    };

    let mut request = match decode_gemini_request(&body, model, uuid::Uuid::new_v4()) {
        Ok(request) => request,
        Err(err) => return into_axum_response(&err, IngressApi::Gemini),
    };
    request.stream = action == "streamGenerateContent";

    lifecycle::run_request(state, IngressApi::Gemini, request).await
}

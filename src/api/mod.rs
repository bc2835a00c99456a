pub mod anthropic;
pub mod gemini;
pub mod openai_chat;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;

use crate::state::AppState;

/// Builds the full axum router: one POST route per ingress API.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat::handle))
        .route("/v1/messages", post(anthropic::handle))
        .route("/v1/models/{model_action}", post(gemini::handle))
        .with_state(state)
}

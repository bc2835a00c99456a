use adaptive_gateway::protocol::anthropic::{decode_anthropic_request, encode_anthropic_response, AnthropicRequest};
use adaptive_gateway::protocol::canonical::{
    CanonicalPart, CanonicalResponse, CanonicalRole, CanonicalStopReason, CanonicalUsage,
};
use adaptive_gateway::protocol::gemini::{decode_gemini_request, encode_gemini_response, GeminiRequest};
use adaptive_gateway::protocol::openai_chat::{decode_openai_chat_request, encode_openai_chat_response, OpenAiChatRequest};
use serde_json::json;
use uuid::Uuid;

fn sample_response(model: &str) -> CanonicalResponse {
    CanonicalResponse {
        id: "resp-1".to_string(),
        model: model.to_string(),
        content: vec![CanonicalPart::Text("hello there".to_string())],
        stop_reason: CanonicalStopReason::EndOfTurn,
        usage: CanonicalUsage { input_tokens: Some(10), output_tokens: Some(4), total_tokens: Some(14) },
        provider_extensions: serde_json::Map::new(),
    }
}

#[test]
fn openai_chat_request_decodes_system_and_user_messages() {
    let wire: OpenAiChatRequest = serde_json::from_value(json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "be concise"},
            {"role": "user", "content": "what's 2+2?"}
        ]
    }))
    .unwrap();

    let canonical = decode_openai_chat_request(&wire, Uuid::from_u128(1)).unwrap();
    assert_eq!(canonical.system_prompt.as_deref(), Some("be concise"));
    assert_eq!(canonical.messages.len(), 1);
    assert_eq!(canonical.messages[0].role, CanonicalRole::User);
    assert!(!canonical.stream);
}

#[test]
fn openai_chat_response_encodes_text_content() {
    let wire = encode_openai_chat_response(&sample_response("gpt-4o"), "gpt-4o").unwrap();
    assert_eq!(wire.choices.len(), 1);
    assert_eq!(wire.model, "gpt-4o");
}

#[test]
fn anthropic_request_decodes_messages_and_max_tokens() {
    let wire: AnthropicRequest = serde_json::from_value(json!({
        "model": "claude-sonnet-4",
        "max_tokens": 512,
        "messages": [{"role": "user", "content": "hi"}]
    }))
    .unwrap();

    let canonical = decode_anthropic_request(&wire, Uuid::from_u128(2)).unwrap();
    assert_eq!(canonical.generation.max_tokens, Some(512));
    assert_eq!(canonical.messages.len(), 1);
}

#[test]
fn anthropic_response_id_is_generated_with_msg_prefix() {
    let wire = encode_anthropic_response(&sample_response("claude-sonnet-4"), "claude-sonnet-4").unwrap();
    assert!(wire.id.starts_with("msg"));
    assert_eq!(wire.model, "claude-sonnet-4");
}

#[test]
fn gemini_request_takes_model_from_url_not_body() {
    let wire: GeminiRequest = serde_json::from_value(json!({
        "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
    }))
    .unwrap();

    let canonical = decode_gemini_request(&wire, "gemini-2.5-flash", Uuid::from_u128(3)).unwrap();
    assert_eq!(canonical.model, "gemini-2.5-flash");
    assert!(!canonical.stream, "decoder always defaults to non-streaming; caller sets it from the URL suffix");
}

#[test]
fn gemini_response_requires_at_least_one_candidate() {
    let wire: adaptive_gateway::protocol::gemini::GeminiResponse = serde_json::from_value(json!({
        "candidates": []
    }))
    .unwrap();
    let err = adaptive_gateway::protocol::gemini::decode_gemini_response(&wire, "gemini-2.5-flash").unwrap_err();
    assert!(matches!(err, adaptive_gateway::error::CanonicalError::Translation(_)));
}

#[test]
fn gemini_response_encoder_has_no_model_field_to_set() {
    let wire = encode_gemini_response(&sample_response("gemini-2.5-flash")).unwrap();
    assert_eq!(wire.candidates.as_ref().map(Vec::len), Some(1));
}

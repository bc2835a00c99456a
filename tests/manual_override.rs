use adaptive_gateway::lifecycle::{extract_prompt, parse_manual_override};
use adaptive_gateway::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRequest, CanonicalRole, CanonicalToolChoice,
    GenerationParams, IngressApi,
};

fn message(role: CanonicalRole, text: &str) -> CanonicalMessage {
    CanonicalMessage {
        role,
        parts: vec![CanonicalPart::Text(text.to_string())].into(),
        name: None,
        tool_call_id: None,
        provider_extensions: None,
    }
}

fn request(messages: Vec<CanonicalMessage>) -> CanonicalRequest {
    CanonicalRequest {
        request_id: uuid::Uuid::from_u128(1),
        ingress_api: IngressApi::OpenAiChat,
        model: "gpt-4o".to_string(),
        stream: false,
        system_prompt: None,
        messages,
        tools: Vec::<adaptive_gateway::protocol::canonical::CanonicalToolSpec>::new().into(),
        tool_choice: CanonicalToolChoice::Auto,
        generation: GenerationParams::default(),
        provider_extensions: None,
    }
}

#[test]
fn parses_well_formed_override() {
    assert_eq!(
        parse_manual_override("openai:gpt-4o"),
        Some(("openai".to_string(), "gpt-4o".to_string()))
    );
}

#[test]
fn trims_whitespace_around_halves() {
    assert_eq!(
        parse_manual_override(" openai : gpt-4o "),
        Some(("openai".to_string(), "gpt-4o".to_string()))
    );
}

#[test]
fn rejects_missing_colon() {
    assert_eq!(parse_manual_override("gpt-4o"), None);
}

#[test]
fn rejects_second_colon() {
    assert_eq!(parse_manual_override("openai:gpt-4o:extra"), None);
}

#[test]
fn rejects_empty_halves() {
    assert_eq!(parse_manual_override(":gpt-4o"), None);
    assert_eq!(parse_manual_override("openai:"), None);
    assert_eq!(parse_manual_override(":"), None);
}

#[test]
fn extract_prompt_takes_last_user_message() {
    let req = request(vec![
        message(CanonicalRole::System, "be helpful"),
        message(CanonicalRole::User, "first question"),
        message(CanonicalRole::Assistant, "first answer"),
        message(CanonicalRole::User, "second question"),
    ]);
    assert_eq!(extract_prompt(&req), "second question");
}

#[test]
fn extract_prompt_ignores_non_text_parts() {
    let mut req = request(vec![CanonicalMessage {
        role: CanonicalRole::User,
        parts: vec![
            CanonicalPart::Text("describe this".to_string()),
            CanonicalPart::ImageUrl { url: "https://example.com/a.png".to_string(), detail: None },
        ]
        .into(),
        name: None,
        tool_call_id: None,
        provider_extensions: None,
    }]);
    req.messages.truncate(1);
    assert_eq!(extract_prompt(&req), "describe this");
}

#[test]
fn extract_prompt_empty_when_no_user_message() {
    let req = request(vec![message(CanonicalRole::System, "be helpful")]);
    assert_eq!(extract_prompt(&req), "");
}

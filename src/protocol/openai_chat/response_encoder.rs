use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CanonicalError;
use crate::protocol::canonical::{CanonicalPart, CanonicalResponse};
use crate::protocol::mapping::canonical_stop_to_openai;

use super::{
    OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiToolCall, OpenAiToolCallFunction,
    OpenAiUsage,
};

/// Encode a canonical response into the `OpenAI` Chat Completions wire format.
///
/// # Errors
///
/// Returns [`CanonicalError`] when required timestamps cannot be computed.
pub fn encode_openai_chat_response(
    canonical: &CanonicalResponse,
    model: &str,
) -> Result<OpenAiChatResponse, CanonicalError> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
    let mut refusal: Option<String> = None;

    for part in &canonical.content {
        match part {
            CanonicalPart::Text(t) => text_parts.push(t.clone()),
            CanonicalPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    type_: "function".to_string(),
                    function: OpenAiToolCallFunction {
                        name: name.clone(),
                        arguments: arguments.get().to_string(),
                    },
                });
            }
            CanonicalPart::Refusal(r) => {
                refusal = Some(r.clone());
            }
            _ => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(serde_json::Value::String(text_parts.join("")))
    };

    let tool_calls_field = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };

    let finish_reason = canonical_stop_to_openai(canonical.stop_reason).to_string();

    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let usage = OpenAiUsage {
        prompt_tokens: canonical.usage.input_tokens.unwrap_or(0),
        completion_tokens: canonical.usage.output_tokens.unwrap_or(0),
        total_tokens: canonical.usage.total_tokens.unwrap_or(0),
    };

    Ok(OpenAiChatResponse {
        id: canonical.id.clone(),
        object: "chat.completion".to_string(),
        created: Some(created),
        model: model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content,
                name: None,
                tool_calls: tool_calls_field,
                tool_call_id: None,
                refusal,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(usage),
    })
}

use super::canonical::{CanonicalRole, CanonicalStopReason, CanonicalUsage};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_role_to_openai(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System => "system",
        CanonicalRole::User => "user",
        CanonicalRole::Assistant => "assistant",
        CanonicalRole::Tool => "tool",
    }
}

#[must_use]
pub fn openai_role_to_canonical(s: &str) -> CanonicalRole {
    match s {
        "system" | "developer" => CanonicalRole::System,
        "assistant" => CanonicalRole::Assistant,
        "tool" => CanonicalRole::Tool,
        _ => CanonicalRole::User, // fallback
    }
}

#[must_use]
pub fn canonical_role_to_anthropic(role: CanonicalRole) -> &'static str {
    match role {
        // Anthropic has no system role in messages; system is top-level.
        CanonicalRole::System | CanonicalRole::User | CanonicalRole::Tool => "user", // system messages are handled separately; tool results are user messages in Anthropic
        CanonicalRole::Assistant => "assistant",
    }
}

#[must_use]
pub fn anthropic_role_to_canonical(s: &str) -> CanonicalRole {
    match s {
        "assistant" => CanonicalRole::Assistant,
        _ => CanonicalRole::User,
    }
}

#[must_use]
pub fn canonical_role_to_gemini(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System | CanonicalRole::User => "user", // system is handled via systemInstruction
        CanonicalRole::Assistant => "model",
        CanonicalRole::Tool => "function", // tool results use "function" role
    }
}

#[must_use]
pub fn gemini_role_to_canonical(s: &str) -> CanonicalRole {
    match s {
        "model" => CanonicalRole::Assistant,
        "function" => CanonicalRole::Tool,
        _ => CanonicalRole::User,
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_stop_to_openai(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn => "stop",
        CanonicalStopReason::ToolCalls => "tool_calls",
        CanonicalStopReason::MaxTokens => "length",
        CanonicalStopReason::ContentFilter => "content_filter",
    }
}

#[must_use]
pub fn openai_stop_to_canonical(s: &str) -> CanonicalStopReason {
    match s {
        "tool_calls" => CanonicalStopReason::ToolCalls,
        "length" => CanonicalStopReason::MaxTokens,
        "content_filter" => CanonicalStopReason::ContentFilter,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

#[must_use]
pub fn canonical_stop_to_anthropic(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn | CanonicalStopReason::ContentFilter => "end_turn", // Anthropic has no content_filter reason
        CanonicalStopReason::ToolCalls => "tool_use",
        CanonicalStopReason::MaxTokens => "max_tokens",
    }
}

#[must_use]
pub fn anthropic_stop_to_canonical(s: &str) -> CanonicalStopReason {
    match s {
        "tool_use" => CanonicalStopReason::ToolCalls,
        "max_tokens" => CanonicalStopReason::MaxTokens,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

#[must_use]
pub fn canonical_stop_to_gemini(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn | CanonicalStopReason::ToolCalls => "STOP", // Gemini uses STOP even for tool calls
        CanonicalStopReason::MaxTokens => "MAX_TOKENS",
        CanonicalStopReason::ContentFilter => "SAFETY",
    }
}

#[must_use]
pub fn gemini_stop_to_canonical(s: &str) -> CanonicalStopReason {
    match s {
        "MAX_TOKENS" => CanonicalStopReason::MaxTokens,
        "SAFETY" | "RECITATION" => CanonicalStopReason::ContentFilter,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

// ---------------------------------------------------------------------------
// Usage mappings
// ---------------------------------------------------------------------------

/// Convert canonical usage to OpenAI-style usage fields.
#[must_use]
pub fn canonical_usage_to_openai(usage: &CanonicalUsage) -> serde_json::Value {
    serde_json::json!({
        "prompt_tokens": usage.input_tokens.unwrap_or(0),
        "completion_tokens": usage.output_tokens.unwrap_or(0),
        "total_tokens": usage.total_tokens.unwrap_or(0),
    })
}

/// Convert OpenAI-style usage JSON to canonical usage.
#[must_use]
pub fn openai_usage_to_canonical(val: &serde_json::Value) -> CanonicalUsage {
    CanonicalUsage {
        input_tokens: val.get("prompt_tokens").and_then(serde_json::Value::as_u64),
        output_tokens: val
            .get("completion_tokens")
            .and_then(serde_json::Value::as_u64),
        total_tokens: val.get("total_tokens").and_then(serde_json::Value::as_u64),
    }
}

/// Convert canonical usage to Anthropic-style usage fields.
#[must_use]
pub fn canonical_usage_to_anthropic(usage: &CanonicalUsage) -> serde_json::Value {
    serde_json::json!({
        "input_tokens": usage.input_tokens.unwrap_or(0),
        "output_tokens": usage.output_tokens.unwrap_or(0),
    })
}

/// Convert Anthropic-style usage JSON to canonical usage.
#[must_use]
pub fn anthropic_usage_to_canonical(val: &serde_json::Value) -> CanonicalUsage {
    let input = val.get("input_tokens").and_then(serde_json::Value::as_u64);
    let output = val.get("output_tokens").and_then(serde_json::Value::as_u64);
    CanonicalUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: match (input, output) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        },
    }
}

/// Convert canonical usage to Gemini-style usage fields.
#[must_use]
pub fn canonical_usage_to_gemini(usage: &CanonicalUsage) -> serde_json::Value {
    serde_json::json!({
        "promptTokenCount": usage.input_tokens.unwrap_or(0),
        "candidatesTokenCount": usage.output_tokens.unwrap_or(0),
        "totalTokenCount": usage.total_tokens.unwrap_or(0),
    })
}

/// Convert Gemini-style usage JSON to canonical usage.
#[must_use]
pub fn gemini_usage_to_canonical(val: &serde_json::Value) -> CanonicalUsage {
    CanonicalUsage {
        input_tokens: val
            .get("promptTokenCount")
            .and_then(serde_json::Value::as_u64),
        output_tokens: val
            .get("candidatesTokenCount")
            .and_then(serde_json::Value::as_u64),
        total_tokens: val
            .get("totalTokenCount")
            .and_then(serde_json::Value::as_u64),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

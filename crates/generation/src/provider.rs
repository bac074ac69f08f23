//! Model provider seam: request shape, token stream and error mapping.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::prompt::PromptPair;
use crate::request::{Attachment, ResolvedRequest};

/// Asynchronous sequence of text fragments, in provider emission order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Used when nothing readable can be pulled out of a provider failure.
pub const GENERIC_PROVIDER_MESSAGE: &str = "The model provider failed to generate a response";

const MAX_ERROR_DEPTH: usize = 8;
const MAX_RAW_BODY_CHARS: usize = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Message suitable for an `error` frame.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Timeout => "The model took too long to respond".to_string(),
            ProviderError::Network(_) => "Could not reach the model provider".to_string(),
            ProviderError::RateLimited(msg) if !msg.trim().is_empty() => msg.clone(),
            ProviderError::RateLimited(_) => "The model provider is rate limiting requests".to_string(),
            ProviderError::MalformedResponse(_) => GENERIC_PROVIDER_MESSAGE.to_string(),
            ProviderError::Api { message, .. } | ProviderError::Other(message) => {
                if message.trim().is_empty() {
                    GENERIC_PROVIDER_MESSAGE.to_string()
                } else {
                    message.clone()
                }
            }
        }
    }
}

/// Conversation role.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    Image { media_type: String, data_base64: String },
    File { media_type: String, data_base64: String },
}

impl MessagePart {
    pub fn from_attachment(attachment: &Attachment) -> Self {
        let media_type = attachment.media_type.clone();
        let data_base64 = attachment.data_base64.clone();
        if attachment.is_image() {
            MessagePart::Image { media_type, data_base64 }
        } else {
            MessagePart::File { media_type, data_base64 }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Per-call sampling limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Generation-wide deadline, not per chunk.
    pub timeout: Duration,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 16_000,
            temperature: 0.7,
            timeout: Duration::from_secs(300),
        }
    }
}

/// `{systemPrompt, messages, modelId, maxTokens, temperature, timeout}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionRequest {
    /// Single user turn for a generation.
    ///
    /// With an empty prompt pair (custom mode) the subject is sent verbatim
    /// and no system message is added. An attachment rides along as an extra
    /// image or file part of the same user message.
    pub fn for_generation(
        request: &ResolvedRequest,
        prompt: &PromptPair,
        model_id: impl Into<String>,
        params: CompletionParams,
    ) -> Self {
        let text = if prompt.user.is_empty() {
            request.subject.clone()
        } else {
            prompt.user.clone()
        };

        let mut parts = vec![MessagePart::Text(text)];
        if let Some(attachment) = &request.attachment {
            parts.push(MessagePart::from_attachment(attachment));
        }

        Self {
            model_id: model_id.into(),
            system_prompt: Some(prompt.system.clone()).filter(|s| !s.is_empty()),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                parts,
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            timeout: params.timeout,
        }
    }

    /// Same request against another model.
    pub fn with_model(&self, model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..self.clone()
        }
    }
}

/// Streaming text-completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a completion stream. Errors returned here happen before any
    /// fragment was produced.
    async fn stream_completion(&self, request: CompletionRequest) -> Result<TextStream, ProviderError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Error description
// ─────────────────────────────────────────────────────────────────────────────

/// Best-effort readable message from a provider error payload.
///
/// Looks in a fixed order: `lastError.data.error.message`, `errors[]`
/// (newest first), `data.error.message`, `error` (string or `{message}`),
/// `message`, then the `cause` chain, then anything under `lastError`.
pub fn describe_provider_error(value: &JsonValue) -> String {
    find_message(value, 0).unwrap_or_else(|| GENERIC_PROVIDER_MESSAGE.to_string())
}

/// Same as [`describe_provider_error`] for a raw HTTP body. Non-JSON bodies
/// are used directly when short enough.
pub fn describe_error_body(body: &str) -> String {
    let body = body.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(body) {
        return describe_provider_error(&value);
    }
    if body.is_empty() || body.chars().count() > MAX_RAW_BODY_CHARS {
        GENERIC_PROVIDER_MESSAGE.to_string()
    } else {
        body.to_string()
    }
}

fn find_message(value: &JsonValue, depth: usize) -> Option<String> {
    if depth > MAX_ERROR_DEPTH {
        return None;
    }
    if let Some(s) = non_blank(value) {
        return (depth > 0).then_some(s);
    }
    if !value.is_object() {
        return None;
    }

    if let Some(msg) = pointer_str(value, "/lastError/data/error/message") {
        return Some(msg);
    }
    if let Some(errors) = value.get("errors").and_then(JsonValue::as_array) {
        if let Some(msg) = errors.iter().rev().find_map(|e| find_message(e, depth + 1)) {
            return Some(msg);
        }
    }
    if let Some(msg) = pointer_str(value, "/data/error/message") {
        return Some(msg);
    }
    if let Some(error) = value.get("error") {
        if let Some(msg) = non_blank(error).or_else(|| pointer_str(error, "/message")) {
            return Some(msg);
        }
    }
    if let Some(msg) = value.get("message").and_then(non_blank) {
        return Some(msg);
    }
    if let Some(msg) = value.get("cause").and_then(|c| find_message(c, depth + 1)) {
        return Some(msg);
    }
    value.get("lastError").and_then(|e| find_message(e, depth + 1))
}

fn pointer_str(value: &JsonValue, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(non_blank)
}

fn non_blank(value: &JsonValue) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::build_prompt;
    use crate::request::{AttachmentInput, GenerationRequest, PromptMode};
    use serde_json::json;

    #[test]
    fn last_error_data_wins() {
        let payload = json!({
            "lastError": { "data": { "error": { "message": "model overloaded" } } },
            "errors": [{ "message": "older" }],
            "message": "top level",
        });
        assert_eq!(describe_provider_error(&payload), "model overloaded");
    }

    #[test]
    fn errors_array_newest_first() {
        let payload = json!({ "errors": [{ "message": "first" }, { "data": { "error": { "message": "second" } } }] });
        assert_eq!(describe_provider_error(&payload), "second");
    }

    #[test]
    fn data_error_then_error_shapes() {
        assert_eq!(
            describe_provider_error(&json!({ "data": { "error": { "message": "bad key" } } })),
            "bad key"
        );
        assert_eq!(describe_provider_error(&json!({ "error": "quota exceeded" })), "quota exceeded");
        assert_eq!(
            describe_provider_error(&json!({ "error": { "message": "invalid model", "code": 400 } })),
            "invalid model"
        );
    }

    #[test]
    fn cause_chain_is_followed() {
        let payload = json!({ "name": "Error", "cause": { "cause": { "message": "socket hang up" } } });
        assert_eq!(describe_provider_error(&payload), "socket hang up");
    }

    #[test]
    fn unknown_shapes_fall_back_to_generic() {
        for payload in [json!(null), json!({}), json!({ "code": 500 }), json!("plain"), json!({ "message": "  " })] {
            assert_eq!(describe_provider_error(&payload), GENERIC_PROVIDER_MESSAGE);
        }
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut payload = json!({ "message": "too deep" });
        for _ in 0..20 {
            payload = json!({ "cause": payload });
        }
        assert_eq!(describe_provider_error(&payload), GENERIC_PROVIDER_MESSAGE);
    }

    #[test]
    fn raw_bodies() {
        assert_eq!(describe_error_body(r#"{"error":{"message":"nope"}}"#), "nope");
        assert_eq!(describe_error_body("Bad Gateway"), "Bad Gateway");
        assert_eq!(describe_error_body(""), GENERIC_PROVIDER_MESSAGE);
    }

    #[test]
    fn default_mode_request_carries_system_prompt() {
        let resolved = GenerationRequest::new("owl").resolve().unwrap();
        let prompt = build_prompt(resolved.prompt_mode, &resolved.subject, None, 800, 800);
        let request = CompletionRequest::for_generation(&resolved, &prompt, "m", CompletionParams::default());

        assert_eq!(request.system_prompt.as_deref(), Some(prompt.system.as_str()));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].text(), prompt.user);
        assert_eq!(request.with_model("fallback").model_id, "fallback");
    }

    #[test]
    fn custom_mode_sends_subject_verbatim_with_attachment() {
        let resolved = GenerationRequest::new("  draw exactly this  ")
            .with_mode(PromptMode::Custom)
            .with_attachment(AttachmentInput::DataUri("data:application/pdf;base64,aGk=".into()))
            .resolve()
            .unwrap();
        let prompt = build_prompt(PromptMode::Custom, &resolved.subject, None, 800, 800);
        let request = CompletionRequest::for_generation(&resolved, &prompt, "m", CompletionParams::default());

        assert!(request.system_prompt.is_none());
        let parts = &request.messages[0].parts;
        assert_eq!(parts[0], MessagePart::Text("draw exactly this".into()));
        assert!(matches!(parts[1], MessagePart::File { ref media_type, .. } if media_type == "application/pdf"));
    }

    #[test]
    fn user_messages_never_blank() {
        assert_eq!(ProviderError::Api { status: 500, message: " ".into() }.user_message(), GENERIC_PROVIDER_MESSAGE);
        assert_eq!(ProviderError::Timeout.user_message(), "The model took too long to respond");
    }
}

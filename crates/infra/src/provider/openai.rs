//! OpenAI-compatible `/chat/completions` provider with `stream: true`.

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use vectorsmith_generation::{
    ChatMessage, ChatRole, CompletionRequest, MessagePart, ModelProvider, ProviderError, TextStream, describe_error_body,
    describe_provider_error,
};

#[derive(Serialize, Debug)]
struct RequestBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FilePayload },
}

#[derive(Serialize, Debug, PartialEq)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct FilePayload {
    filename: String,
    file_data: String,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDelta {
    content: Option<String>,
}

fn to_wire(message: &ChatMessage) -> WireMessage {
    let content = match message.parts.as_slice() {
        [MessagePart::Text(text)] => WireContent::Text(text.clone()),
        parts => WireContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text(text) => WirePart::Text { text: text.clone() },
                    MessagePart::Image {
                        media_type,
                        data_base64,
                    } => WirePart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{media_type};base64,{data_base64}"),
                        },
                    },
                    MessagePart::File {
                        media_type,
                        data_base64,
                    } => WirePart::File {
                        file: FilePayload {
                            filename: attachment_filename(media_type),
                            file_data: format!("data:{media_type};base64,{data_base64}"),
                        },
                    },
                })
                .collect(),
        ),
    };
    WireMessage {
        role: message.role.as_str(),
        content,
    }
}

fn attachment_filename(media_type: &str) -> String {
    let ext = media_type
        .split_once('/')
        .map(|(_, sub)| sub.split(['+', ';']).next().unwrap_or(sub))
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin");
    format!("attachment.{ext}")
}

fn build_messages(request: &CompletionRequest) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system_prompt {
        messages.push(WireMessage {
            role: ChatRole::System.as_str(),
            content: WireContent::Text(system.clone()),
        });
    }
    messages.extend(request.messages.iter().map(to_wire));
    messages
}

/// Interpret one SSE `data:` payload.
///
/// `Ok(None)` for frames that carry no text (`[DONE]`, pings, role-only
/// deltas); an error object inside the stream becomes a provider error.
pub fn parse_stream_data(data: &str) -> Result<Option<String>, ProviderError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let value: JsonValue = serde_json::from_str(data)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid stream chunk: {e}")))?;

    if value.get("type").and_then(JsonValue::as_str) == Some("ping") {
        return Ok(None);
    }
    if value.get("error").is_some() {
        return Err(ProviderError::Other(describe_provider_error(&value)));
    }

    let chunk: StreamChunk = serde_json::from_value(value)
        .map_err(|e| ProviderError::MalformedResponse(format!("unexpected stream chunk: {e}")))?;
    Ok(chunk.choices.into_iter().next().and_then(|c| c.delta.content))
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ProviderError::Network(err.to_string())
    } else if err.is_decode() {
        ProviderError::MalformedResponse(err.to_string())
    } else {
        ProviderError::Other(err.to_string())
    }
}

fn map_stream_error(err: EventStreamError<reqwest::Error>) -> ProviderError {
    match err {
        EventStreamError::Transport(e) => map_reqwest_error(e),
        other => ProviderError::MalformedResponse(other.to_string()),
    }
}

/// Streaming client for any endpoint speaking the OpenAI chat-completions
/// protocol (OpenAI, OpenRouter, local gateways).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn stream_completion(&self, request: CompletionRequest) -> Result<TextStream, ProviderError> {
        let body = RequestBody {
            model: &request.model_id,
            messages: build_messages(&request),
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        tracing::debug!(model = %request.model_id, url = %self.completions_url(), "opening completion stream");

        let mut builder = self
            .client
            .post(self.completions_url())
            .timeout(request.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = describe_error_body(&error_body);
            tracing::warn!(status = status.as_u16(), %message, "completion request rejected");
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                ProviderError::RateLimited(message)
            } else {
                ProviderError::Api {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let fragments = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_stream_data(&event.data),
                Err(e) => Err(map_stream_error(e)),
            })
            .filter_map(|result| async move { result.transpose() });

        Ok(Box::pin(fragments))
    }
}

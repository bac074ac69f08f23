//! Caller-supplied generation request and its resolved form.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use vectorsmith_core::{AspectRatio, Canvas, DomainError, DomainResult};

/// Upper bound on subject length accepted from callers.
pub const MAX_SUBJECT_CHARS: usize = 4_000;

/// Upper bound on decoded attachment size.
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// Whether the canned system prompt is used.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    Default,
    Custom,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::Default => "default",
            PromptMode::Custom => "custom",
        }
    }
}

/// Attachment as it arrives on the wire: a `data:` URI, or an explicit
/// media type with base64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AttachmentInput {
    DataUri(String),
    Inline {
        #[serde(alias = "mediaType")]
        media_type: String,
        data: String,
    },
}

/// Normalised attachment: media type plus base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub media_type: String,
    pub data_base64: String,
}

impl Attachment {
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> DomainResult<Self> {
        if bytes.is_empty() {
            return Err(DomainError::validation("attachment is empty"));
        }
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(DomainError::validation("attachment exceeds size limit"));
        }
        Ok(Self {
            media_type: normalise_media_type(media_type.into())?,
            data_base64: BASE64.encode(bytes),
        })
    }

    /// Parse `data:<mime>;base64,<payload>`.
    pub fn from_data_uri(uri: &str) -> DomainResult<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| DomainError::validation("attachment must be a data URI"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| DomainError::validation("data URI has no payload"))?;
        let media_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| DomainError::validation("data URI must be base64 encoded"))?;
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| DomainError::validation(format!("invalid base64 payload: {e}")))?;
        Self::from_bytes(media_type, &bytes)
    }

    pub fn from_input(input: &AttachmentInput) -> DomainResult<Self> {
        match input {
            AttachmentInput::DataUri(uri) => Self::from_data_uri(uri),
            AttachmentInput::Inline { media_type, data } => {
                let bytes = BASE64
                    .decode(data.trim())
                    .map_err(|e| DomainError::validation(format!("invalid base64 payload: {e}")))?;
                Self::from_bytes(media_type.as_str(), &bytes)
            }
        }
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data_base64)
    }
}

fn normalise_media_type(raw: String) -> DomainResult<String> {
    let media_type = raw.trim().to_ascii_lowercase();
    if media_type.is_empty() || !media_type.contains('/') {
        return Err(DomainError::validation(format!("invalid media type '{raw}'")));
    }
    Ok(media_type)
}

/// Ephemeral request as received from the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub subject: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    #[serde(default)]
    pub attachment: Option<AttachmentInput>,
    #[serde(default)]
    pub thinking: bool,
}

impl GenerationRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            style: None,
            aspect_ratio: None,
            prompt_mode: PromptMode::Default,
            attachment: None,
            thinking: false,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(ratio.into());
        self
    }

    pub fn with_mode(mut self, mode: PromptMode) -> Self {
        self.prompt_mode = mode;
        self
    }

    pub fn with_attachment(mut self, attachment: AttachmentInput) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    /// Validate and resolve canvas, style and attachment once; everything
    /// downstream works from the resolved form.
    pub fn resolve(&self) -> DomainResult<ResolvedRequest> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(DomainError::validation("subject is required"));
        }
        if subject.chars().count() > MAX_SUBJECT_CHARS {
            return Err(DomainError::validation(format!(
                "subject exceeds {MAX_SUBJECT_CHARS} characters"
            )));
        }

        let style = self
            .style
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let (aspect_ratio, canvas) = match self.aspect_ratio.as_deref().and_then(AspectRatio::parse) {
            Some(ratio) => (
                self.aspect_ratio.as_deref().unwrap_or_default().trim().to_string(),
                Canvas::from_ratio(ratio),
            ),
            None => ("1:1".to_string(), Canvas::default()),
        };

        let attachment = self.attachment.as_ref().map(Attachment::from_input).transpose()?;

        Ok(ResolvedRequest {
            subject: subject.to_string(),
            style,
            aspect_ratio,
            canvas,
            prompt_mode: self.prompt_mode,
            attachment,
            thinking: self.thinking,
        })
    }
}

/// A validated request with its canvas computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub subject: String,
    pub style: Option<String>,
    pub aspect_ratio: String,
    pub canvas: Canvas,
    pub prompt_mode: PromptMode,
    pub attachment: Option<Attachment>,
    pub thinking: bool,
}

impl ResolvedRequest {
    /// Free-form configuration blob stored with the generation.
    pub fn config_blob(&self) -> JsonValue {
        let mut config = json!({
            "width": self.canvas.width,
            "height": self.canvas.height,
            "thinking": self.thinking,
            "promptMode": self.prompt_mode.as_str(),
        });
        if let (Some(attachment), Some(obj)) = (&self.attachment, config.as_object_mut()) {
            obj.insert(
                "attachment".to_string(),
                json!({
                    "mediaType": attachment.media_type,
                    "data": attachment.to_data_uri(),
                }),
            );
        }
        config
    }
}

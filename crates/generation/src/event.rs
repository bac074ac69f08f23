//! Frames sent to the caller over the outbound stream.

use serde::{Deserialize, Serialize};

use vectorsmith_core::GenerationId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Started,
    Streaming,
    Completed,
    Error,
}

/// `{status, id?, chunk?, message?}`.
///
/// Per request: exactly one `started` (unless rejected before the stream
/// opened), any number of `streaming`, then exactly one of `completed` or
/// `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub status: StreamStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<GenerationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamEvent {
    pub fn started(id: GenerationId) -> Self {
        Self {
            status: StreamStatus::Started,
            id: Some(id),
            chunk: None,
            message: None,
        }
    }

    pub fn streaming(id: GenerationId, chunk: impl Into<String>) -> Self {
        Self {
            status: StreamStatus::Streaming,
            id: Some(id),
            chunk: Some(chunk.into()),
            message: None,
        }
    }

    pub fn completed(id: GenerationId) -> Self {
        Self {
            status: StreamStatus::Completed,
            id: Some(id),
            chunk: None,
            message: None,
        }
    }

    pub fn error(id: Option<GenerationId>, message: impl Into<String>) -> Self {
        Self {
            status: StreamStatus::Error,
            id,
            chunk: None,
            message: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StreamStatus::Completed | StreamStatus::Error)
    }

    /// JSON body of the frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","message":"failed to encode event"}"#.to_string()
        })
    }
}

//! Generation pipeline: the streaming orchestrator and its synchronous
//! sibling, sharing model selection, fallback and deadline handling.

mod orchestrator;
mod service;

pub use orchestrator::{StreamOutcome, StreamState, StreamingOrchestrator};
pub use service::{GenerationService, ListScope, ServiceError};

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, timeout_at};

use vectorsmith_generation::{CompletionParams, CompletionRequest, ModelProvider, ProviderError, TextStream};

/// Longest generation-wide deadline accepted from configuration.
pub const MAX_GENERATION_TIMEOUT: Duration = Duration::from_secs(3600);

/// `timeout` from now, capped at [`MAX_GENERATION_TIMEOUT`].
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_GENERATION_TIMEOUT)).unwrap_or(now)
}

/// Model selection and sampling limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub standard_model: String,
    /// Used when the caller sets the thinking flag.
    pub reasoning_model: String,
    /// Tried once when the primary fails before producing any text.
    pub fallback_model: Option<String>,
    pub params: CompletionParams,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            standard_model: "anthropic/claude-sonnet-4".to_string(),
            reasoning_model: "anthropic/claude-sonnet-4:thinking".to_string(),
            fallback_model: None,
            params: CompletionParams::default(),
        }
    }
}

impl GenerationSettings {
    pub fn model_for(&self, thinking: bool) -> &str {
        if thinking {
            &self.reasoning_model
        } else {
            &self.standard_model
        }
    }

    /// The fallback, unless it is the model that just failed.
    pub fn fallback_for(&self, primary: &str) -> Option<&str> {
        self.fallback_model.as_deref().filter(|m| *m != primary)
    }
}

/// One request's provider calls: the primary, plus at most one fallback, all
/// under a single generation-wide deadline.
pub(crate) struct ModelAttempts {
    provider: Arc<dyn ModelProvider>,
    request: CompletionRequest,
    fallback: Option<String>,
    deadline: Instant,
    models: Vec<String>,
}

impl ModelAttempts {
    pub(crate) fn new(
        provider: Arc<dyn ModelProvider>,
        request: CompletionRequest,
        fallback: Option<&str>,
        deadline: Instant,
    ) -> Self {
        Self {
            provider,
            request,
            fallback: fallback.map(str::to_string),
            deadline,
            models: Vec::new(),
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Every model id actually invoked, in order.
    pub(crate) fn models(&self) -> &[String] {
        &self.models
    }

    pub(crate) async fn open(&mut self) -> Result<TextStream, ProviderError> {
        let request = self.request.clone();
        match self.open_model(request).await {
            Ok(stream) => Ok(stream),
            Err(err) => self.fall_back(err).await,
        }
    }

    /// Switch to the fallback after a failure that produced no text. Gives
    /// back `cause` when there is no fallback left or the deadline has passed.
    pub(crate) async fn fall_back(&mut self, cause: ProviderError) -> Result<TextStream, ProviderError> {
        if matches!(cause, ProviderError::Timeout) && Instant::now() >= self.deadline {
            return Err(cause);
        }
        let Some(model) = self.fallback.take() else {
            return Err(cause);
        };
        tracing::warn!(
            primary = %self.request.model_id,
            fallback = %model,
            error = %cause,
            "primary model failed before output; trying fallback"
        );
        let request = self.request.with_model(model);
        self.open_model(request).await
    }

    async fn open_model(&mut self, request: CompletionRequest) -> Result<TextStream, ProviderError> {
        self.models.push(request.model_id.clone());
        timeout_at(self.deadline, self.provider.stream_completion(request))
            .await
            .map_err(|_| ProviderError::Timeout)?
    }

    /// Drain the whole completion into one string.
    pub(crate) async fn collect_text(&mut self) -> Result<String, ProviderError> {
        let mut stream = self.open().await?;
        let mut text = String::new();
        loop {
            match timeout_at(self.deadline, stream.next()).await {
                Err(_) => return Err(ProviderError::Timeout),
                Ok(None) => return Ok(text),
                Ok(Some(Ok(fragment))) => text.push_str(&fragment),
                Ok(Some(Err(err))) if text.is_empty() => stream = self.fall_back(err).await?,
                Ok(Some(Err(err))) => return Err(err),
            }
        }
    }
}

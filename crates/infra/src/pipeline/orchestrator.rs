//! Streaming generation: validate, pre-check credit, persist a placeholder,
//! forward model text as it arrives, then sanitize, store and charge.
//!
//! Frames written to the outbound channel, in order:
//!
//! | Frame       | When                                                    |
//! |-------------|---------------------------------------------------------|
//! | `started`   | once, right after the placeholder version is stored     |
//! | `streaming` | once per non-empty model fragment                       |
//! | `completed` | once, after the sanitized content is stored             |
//! | `error`     | at most once, instead of `completed`; then the stream ends |
//!
//! A request rejected before the placeholder exists gets a single `error`
//! frame with no id. Credit is decremented only on the `completed` path.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{sleep_until, timeout, timeout_at};

use vectorsmith_core::{Actor, Canvas, EditEntry, GenerationId, UserId, VersionId};
use vectorsmith_generation::{
    CompletionRequest, GenerationRequest, ModelProvider, NewGeneration, ProviderError, Sanitizer, StreamEvent,
    build_prompt, generating_placeholder,
};

use super::{GenerationSettings, ModelAttempts, deadline_after};
use crate::channel::{ChannelError, OutboundChannel};
use crate::ledger::{CreditLedger, LedgerError, Reservation};
use crate::store::{GenerationStore, VersionEdit};

const STORAGE_MESSAGE: &str = "Could not start the generation, please try again";
const SAVE_FAILED_MESSAGE: &str = "The generated image could not be saved";
const INTERRUPTED_MESSAGE: &str = "The generation was interrupted";

/// Upper bound on how long a terminal error frame may wait for buffer space.
const TERMINAL_SEND_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one streamed request. Every transition is logged at debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Authorizing,
    PlaceholderCreated,
    StreamOpened,
    Prompting,
    Forwarding,
    Finalizing,
    Errored,
    Closed,
}

/// How a streamed request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Content stored and `completed` sent. `balance` is `None` when the
    /// charge lost a race for the last credit.
    Completed {
        generation_id: GenerationId,
        balance: Option<i64>,
    },
    /// Refused before anything was stored.
    Rejected { reason: String },
    /// Failed after the placeholder was stored; the placeholder stays.
    Failed {
        generation_id: GenerationId,
        reason: String,
    },
    /// The caller went away; nothing was finalized or charged.
    Disconnected { generation_id: GenerationId },
}

enum ForwardError {
    Provider(ProviderError),
    Disconnected,
}

impl From<ProviderError> for ForwardError {
    fn from(err: ProviderError) -> Self {
        ForwardError::Provider(err)
    }
}

struct StateTracker {
    state: StreamState,
    user_id: UserId,
    generation_id: Option<GenerationId>,
}

impl StateTracker {
    fn new(user_id: UserId) -> Self {
        Self {
            state: StreamState::Init,
            user_id,
            generation_id: None,
        }
    }

    fn advance(&mut self, next: StreamState) {
        tracing::debug!(
            user_id = %self.user_id,
            generation_id = ?self.generation_id.map(|id| id.get()),
            from = ?self.state,
            to = ?next,
            "stream state transition"
        );
        self.state = next;
    }
}

/// Owns the outbound channel for one request. Closes it exactly once and, if
/// the request unwinds without a terminal frame, makes a last non-blocking
/// attempt to tell the caller.
struct ChannelGuard {
    channel: Arc<dyn OutboundChannel>,
    generation_id: Option<GenerationId>,
    terminal_sent: bool,
    closed: bool,
}

impl ChannelGuard {
    fn new(channel: Arc<dyn OutboundChannel>) -> Self {
        Self {
            channel,
            generation_id: None,
            terminal_sent: false,
            closed: false,
        }
    }

    fn channel(&self) -> Arc<dyn OutboundChannel> {
        Arc::clone(&self.channel)
    }

    async fn emit(&mut self, event: StreamEvent) -> Result<(), ChannelError> {
        if event.is_terminal() {
            self.terminal_sent = true;
        }
        self.channel.send(event).await?;
        self.channel.flush().await
    }

    async fn fail(&mut self, message: impl Into<String>) {
        let event = StreamEvent::error(self.generation_id, message);
        if timeout(TERMINAL_SEND_GRACE, self.emit(event)).await.is_err() {
            tracing::warn!(generation_id = ?self.generation_id.map(|id| id.get()), "error frame not delivered");
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.channel.close();
        }
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if !self.terminal_sent && !self.channel.is_closed() {
            let _ = self
                .channel
                .try_send(StreamEvent::error(self.generation_id, INTERRUPTED_MESSAGE));
        }
        self.close();
    }
}

fn ledger_message(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::UserNotFound => "User not found",
        LedgerError::InsufficientCredit => "Insufficient credits",
        LedgerError::Storage(_) => "Could not verify credit balance",
    }
}

/// Drives streamed generations. Cheap to clone; one `run` per request.
#[derive(Clone)]
pub struct StreamingOrchestrator {
    store: Arc<dyn GenerationStore>,
    ledger: Arc<dyn CreditLedger>,
    provider: Arc<dyn ModelProvider>,
    settings: GenerationSettings,
}

impl StreamingOrchestrator {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        ledger: Arc<dyn CreditLedger>,
        provider: Arc<dyn ModelProvider>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            provider,
            settings,
        }
    }

    /// Run one request to completion, writing frames to `channel`. The
    /// channel is closed when this returns.
    pub async fn run(
        &self,
        actor: Actor,
        request: GenerationRequest,
        channel: Arc<dyn OutboundChannel>,
    ) -> StreamOutcome {
        let mut guard = ChannelGuard::new(channel);
        let mut tracker = StateTracker::new(actor.user_id());

        let outcome = self.drive(&actor, &request, &mut guard, &mut tracker).await;

        match &outcome {
            StreamOutcome::Completed { generation_id, balance } => {
                tracing::info!(user_id = %actor.user_id(), generation_id = generation_id.get(), ?balance, "generation completed");
            }
            StreamOutcome::Rejected { reason } => {
                tracing::info!(user_id = %actor.user_id(), %reason, "generation rejected");
            }
            StreamOutcome::Failed { generation_id, reason } => {
                tracing::warn!(user_id = %actor.user_id(), generation_id = generation_id.get(), %reason, "generation failed");
            }
            StreamOutcome::Disconnected { generation_id } => {
                tracing::info!(user_id = %actor.user_id(), generation_id = generation_id.get(), "caller disconnected");
            }
        }

        guard.close();
        tracker.advance(StreamState::Closed);
        outcome
    }

    async fn drive(
        &self,
        actor: &Actor,
        request: &GenerationRequest,
        guard: &mut ChannelGuard,
        tracker: &mut StateTracker,
    ) -> StreamOutcome {
        let user_id = actor.user_id();
        tracker.advance(StreamState::Authorizing);

        let resolved = match request.resolve() {
            Ok(resolved) => resolved,
            Err(err) => return reject(guard, tracker, err.to_string()).await,
        };

        let reservation = match self.ledger.reserve(user_id).await {
            Ok(reservation) => reservation,
            Err(err) => {
                if let LedgerError::Storage(cause) = &err {
                    tracing::error!(user_id = %user_id, %cause, "credit check failed");
                }
                return reject(guard, tracker, ledger_message(&err)).await;
            }
        };

        let canvas = resolved.canvas;
        let (generation, placeholder) = match self
            .store
            .create_placeholder(NewGeneration::from_request(user_id, &resolved), generating_placeholder(canvas))
            .await
        {
            Ok(created) => created,
            Err(err) => {
                tracing::error!(user_id = %user_id, error = %err, "placeholder insert failed");
                return reject(guard, tracker, STORAGE_MESSAGE).await;
            }
        };
        let generation_id = generation.id;
        tracker.generation_id = Some(generation_id);
        guard.generation_id = Some(generation_id);
        tracker.advance(StreamState::PlaceholderCreated);

        if guard.emit(StreamEvent::started(generation_id)).await.is_err() {
            return StreamOutcome::Disconnected { generation_id };
        }
        tracker.advance(StreamState::StreamOpened);

        tracker.advance(StreamState::Prompting);
        let prompt = build_prompt(
            resolved.prompt_mode,
            &resolved.subject,
            resolved.style.as_deref(),
            canvas.width,
            canvas.height,
        );
        let primary = self.settings.model_for(resolved.thinking);
        let completion = CompletionRequest::for_generation(&resolved, &prompt, primary, self.settings.params);
        let mut attempts = ModelAttempts::new(
            Arc::clone(&self.provider),
            completion,
            self.settings.fallback_for(primary),
            deadline_after(self.settings.params.timeout),
        );

        tracker.advance(StreamState::Forwarding);
        let forwarded = forward(&mut attempts, guard, generation_id).await;

        if !matches!(forwarded, Err(ForwardError::Disconnected)) {
            if let Err(err) = self.store.record_models(generation_id, attempts.models()).await {
                tracing::warn!(generation_id = generation_id.get(), error = %err, "model ids not recorded");
            }
        }

        match forwarded {
            Err(ForwardError::Disconnected) => StreamOutcome::Disconnected { generation_id },
            Err(ForwardError::Provider(err)) => {
                tracker.advance(StreamState::Errored);
                let reason = err.user_message();
                guard.fail(reason.clone()).await;
                StreamOutcome::Failed { generation_id, reason }
            }
            Ok(raw) => {
                self.finalize(guard, tracker, generation.user_id, placeholder.id, canvas, raw, reservation)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        guard: &mut ChannelGuard,
        tracker: &mut StateTracker,
        owner: UserId,
        version_id: VersionId,
        canvas: Canvas,
        raw: String,
        reservation: Reservation,
    ) -> StreamOutcome {
        tracker.advance(StreamState::Finalizing);
        let Some(generation_id) = tracker.generation_id else {
            return reject(guard, tracker, STORAGE_MESSAGE).await;
        };

        let edit = VersionEdit {
            content: Sanitizer::new(canvas).clean(&raw),
            entry: EditEntry::new(raw, Some(owner)),
            ai_generated: true,
        };
        if let Err(err) = self.store.update_version(version_id, edit).await {
            tracing::error!(generation_id = generation_id.get(), error = %err, "final content not stored");
            tracker.advance(StreamState::Errored);
            guard.fail(SAVE_FAILED_MESSAGE).await;
            return StreamOutcome::Failed {
                generation_id,
                reason: SAVE_FAILED_MESSAGE.to_string(),
            };
        }

        if guard.emit(StreamEvent::completed(generation_id)).await.is_err() {
            tracing::debug!(generation_id = generation_id.get(), "completed frame not delivered");
        }

        let balance = match self.ledger.commit(reservation).await {
            Ok(balance) => Some(balance),
            Err(err) => {
                tracing::warn!(generation_id = generation_id.get(), user_id = %owner, error = %err, "credit not charged");
                None
            }
        };

        StreamOutcome::Completed { generation_id, balance }
    }
}

async fn reject(guard: &mut ChannelGuard, tracker: &mut StateTracker, reason: impl Into<String>) -> StreamOutcome {
    let reason = reason.into();
    tracker.advance(StreamState::Errored);
    guard.fail(reason.clone()).await;
    StreamOutcome::Rejected { reason }
}

/// Relay fragments until the model finishes. Returns the full raw text.
async fn forward(
    attempts: &mut ModelAttempts,
    guard: &mut ChannelGuard,
    generation_id: GenerationId,
) -> Result<String, ForwardError> {
    let channel = guard.channel();
    let deadline = attempts.deadline();

    let mut stream = tokio::select! {
        biased;
        _ = channel.closed() => return Err(ForwardError::Disconnected),
        opened = attempts.open() => opened?,
    };

    let mut text = String::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = channel.closed() => return Err(ForwardError::Disconnected),
            _ = sleep_until(deadline) => return Err(ProviderError::Timeout.into()),
            next = stream.next() => next,
        };

        match next {
            None => return Ok(text),
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                text.push_str(&fragment);
                match timeout_at(deadline, guard.emit(StreamEvent::streaming(generation_id, fragment))).await {
                    Err(_) => return Err(ProviderError::Timeout.into()),
                    Ok(Err(_)) => return Err(ForwardError::Disconnected),
                    Ok(Ok(())) => {}
                }
            }
            Some(Err(err)) if text.is_empty() => {
                stream = tokio::select! {
                    biased;
                    _ = channel.closed() => return Err(ForwardError::Disconnected),
                    reopened = attempts.fall_back(err) => reopened?,
                };
            }
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

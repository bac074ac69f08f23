//! Request-scoped generation operations outside the streaming path: the
//! synchronous generate, record reads and owner edits.

use std::sync::Arc;

use thiserror::Error;

use vectorsmith_core::{Actor, DomainError, EditEntry, EditHistory, GenerationId, VersionId};
use vectorsmith_generation::{
    CompletionRequest, Generation, GenerationDetail, GenerationFilter, GenerationRequest, GenerationSummary,
    ModelProvider, NewGeneration, NewVersion, PageRequest, Paginated, ProviderError, Sanitizer, Version, build_prompt,
};

use super::{GenerationSettings, ModelAttempts, deadline_after};
use crate::ledger::{CreditLedger, LedgerError};
use crate::store::{GenerationStore, StoreError, VersionEdit};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("model provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ServiceError::Domain(DomainError::NotFound),
            StoreError::Conflict(msg) => ServiceError::Domain(DomainError::conflict(msg)),
            StoreError::UserNotFound => ServiceError::Domain(DomainError::UserNotFound),
            StoreError::InsufficientCredit => ServiceError::Domain(DomainError::InsufficientCredit),
            StoreError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UserNotFound => ServiceError::Domain(DomainError::UserNotFound),
            LedgerError::InsufficientCredit => ServiceError::Domain(DomainError::InsufficientCredit),
            LedgerError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Which generations a listing covers.
///
/// `mine` restricts to the actor's own records. Without it, admins see
/// everything and everyone else sees public records only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListScope {
    pub mine: bool,
    pub public_only: bool,
}

impl ListScope {
    fn filter_for(&self, actor: &Actor) -> GenerationFilter {
        if self.mine {
            GenerationFilter {
                owner: Some(actor.user_id()),
                public_only: self.public_only,
            }
        } else if actor.is_admin() {
            GenerationFilter {
                owner: None,
                public_only: self.public_only,
            }
        } else {
            GenerationFilter::public()
        }
    }
}

#[derive(Clone)]
pub struct GenerationService {
    store: Arc<dyn GenerationStore>,
    ledger: Arc<dyn CreditLedger>,
    provider: Arc<dyn ModelProvider>,
    settings: GenerationSettings,
}

impl GenerationService {
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

    /// Non-streaming generation. Nothing is stored and nothing is charged
    /// unless the model call and the final write both succeed.
    #[tracing::instrument(skip(self, request), fields(user_id = %actor.user_id()), err)]
    pub async fn generate(&self, actor: &Actor, request: &GenerationRequest) -> ServiceResult<GenerationDetail> {
        let user_id = actor.user_id();
        let resolved = request.resolve()?;
        let reservation = self.ledger.reserve(user_id).await?;
        tracing::debug!(balance = reservation.balance_at_check(), "credit pre-check passed");

        let canvas = resolved.canvas;
        let prompt = build_prompt(
            resolved.prompt_mode,
            &resolved.subject,
            resolved.style.as_deref(),
            canvas.width,
            canvas.height,
        );
        let primary = self.settings.model_for(resolved.thinking);
        let mut attempts = ModelAttempts::new(
            Arc::clone(&self.provider),
            CompletionRequest::for_generation(&resolved, &prompt, primary, self.settings.params),
            self.settings.fallback_for(primary),
            deadline_after(self.settings.params.timeout),
        );
        let raw = attempts.collect_text().await?;

        let content = Sanitizer::new(canvas).clean(&raw);
        let history = EditHistory::from_entries(vec![EditEntry::new(raw, Some(user_id))]);
        let generation = NewGeneration::from_request(user_id, &resolved).with_model_ids(attempts.models().to_vec());
        let version = NewVersion::new(content).ai_generated().with_history(history);

        let (generation, version) = self.store.create_charged(generation, version).await?;
        tracing::info!(generation_id = generation.id.get(), "generation stored");
        Ok(GenerationDetail {
            generation,
            versions: vec![version],
        })
    }

    /// Public records are readable by anyone; private ones by owner or admin.
    pub async fn get(&self, actor: &Actor, generation_id: GenerationId) -> ServiceResult<GenerationDetail> {
        let detail = self.store.get_generation(generation_id).await?;
        if detail.generation.is_public || actor.may_modify(detail.generation.user_id) {
            Ok(detail)
        } else {
            Err(DomainError::Unauthorized.into())
        }
    }

    pub async fn list(
        &self,
        actor: &Actor,
        scope: ListScope,
        page: PageRequest,
    ) -> ServiceResult<Paginated<GenerationSummary>> {
        Ok(self.store.list_paginated(scope.filter_for(actor), page).await?)
    }

    /// Add a user-authored version. `version_number` defaults to the next
    /// free number.
    #[tracing::instrument(skip(self, content), fields(user_id = %actor.user_id(), generation_id = generation_id.get()), err)]
    pub async fn append_version(
        &self,
        actor: &Actor,
        generation_id: GenerationId,
        content: String,
        version_number: Option<i32>,
    ) -> ServiceResult<Version> {
        if content.trim().is_empty() {
            return Err(DomainError::validation("content is required").into());
        }
        self.owned_generation(actor, generation_id).await?;

        let history = EditHistory::from_entries(vec![EditEntry::new(content.clone(), Some(actor.user_id()))]);
        let mut version = NewVersion::new(content).with_history(history);
        if let Some(number) = version_number {
            version = version.numbered(number);
        }
        Ok(self.store.append_version(generation_id, version).await?)
    }

    /// Replace a version's content, recording the edit in its history.
    #[tracing::instrument(skip(self, content), fields(user_id = %actor.user_id(), version_id = version_id.get()), err)]
    pub async fn update_version(&self, actor: &Actor, version_id: VersionId, content: String) -> ServiceResult<Version> {
        if content.trim().is_empty() {
            return Err(DomainError::validation("content is required").into());
        }
        let current = self.store.get_version(version_id).await?;
        self.owned_generation(actor, current.generation_id).await?;

        let edit = VersionEdit {
            entry: EditEntry::new(content.clone(), Some(actor.user_id())),
            content,
            ai_generated: false,
        };
        Ok(self.store.update_version(version_id, edit).await?)
    }

    pub async fn set_visibility(
        &self,
        actor: &Actor,
        generation_id: GenerationId,
        is_public: bool,
    ) -> ServiceResult<Generation> {
        self.owned_generation(actor, generation_id).await?;
        Ok(self.store.set_visibility(generation_id, is_public).await?)
    }

    pub async fn balance(&self, actor: &Actor) -> ServiceResult<i64> {
        Ok(self.ledger.balance(actor.user_id()).await?)
    }

    async fn owned_generation(&self, actor: &Actor, generation_id: GenerationId) -> ServiceResult<Generation> {
        let detail = self.store.get_generation(generation_id).await?;
        if actor.may_modify(detail.generation.user_id) {
            Ok(detail.generation)
        } else {
            Err(DomainError::Unauthorized.into())
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use vectorsmith_core::{EditEntry, GenerationId, VersionId};
use vectorsmith_generation::{
    Generation, GenerationDetail, GenerationFilter, GenerationSummary, NewGeneration, NewVersion, PageRequest,
    Paginated, Version,
};

/// Generation record store operation error.
///
/// Infrastructure-facing; services translate these at the boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique `(generation_id, version_number)` violated, or similar.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("user not found")]
    UserNotFound,

    #[error("insufficient credit")]
    InsufficientCredit,

    #[error("storage error: {0}")]
    Storage(String),
}

/// One edit applied to an existing version.
///
/// `content` replaces the stored document; `entry` goes to the head of the
/// bounded edit history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEdit {
    pub content: String,
    pub entry: EditEntry,
    pub ai_generated: bool,
}

/// Durable storage for generations and their versions.
///
/// Implementations must:
/// - keep `(generation_id, version_number)` unique
/// - create a generation together with its version 1, never one without the other
/// - bound every edit history to the most recent entries, newest first
/// - list newest-first, annotating each item with its highest version number
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Insert the generation and a placeholder version 1.
    async fn create_placeholder(
        &self,
        generation: NewGeneration,
        placeholder: String,
    ) -> Result<(Generation, Version), StoreError>;

    /// Charge one credit and insert the generation with its version 1, all in
    /// one atomic unit. Nothing is written when the charge fails.
    async fn create_charged(
        &self,
        generation: NewGeneration,
        version: NewVersion,
    ) -> Result<(Generation, Version), StoreError>;

    /// Append a version; the number is `max + 1` unless given explicitly.
    async fn append_version(&self, generation_id: GenerationId, version: NewVersion) -> Result<Version, StoreError>;

    async fn update_version(&self, version_id: VersionId, edit: VersionEdit) -> Result<Version, StoreError>;

    /// Replace the list of model ids invoked for a generation.
    async fn record_models(&self, generation_id: GenerationId, model_ids: &[String]) -> Result<(), StoreError>;

    async fn set_visibility(&self, generation_id: GenerationId, is_public: bool) -> Result<Generation, StoreError>;

    /// The generation with every version, ascending by version number.
    async fn get_generation(&self, generation_id: GenerationId) -> Result<GenerationDetail, StoreError>;

    async fn get_version(&self, version_id: VersionId) -> Result<Version, StoreError>;

    async fn list_paginated(
        &self,
        filter: GenerationFilter,
        page: PageRequest,
    ) -> Result<Paginated<GenerationSummary>, StoreError>;
}

#[async_trait]
impl<S> GenerationStore for Arc<S>
where
    S: GenerationStore + ?Sized,
{
    async fn create_placeholder(
        &self,
        generation: NewGeneration,
        placeholder: String,
    ) -> Result<(Generation, Version), StoreError> {
        (**self).create_placeholder(generation, placeholder).await
    }

    async fn create_charged(
        &self,
        generation: NewGeneration,
        version: NewVersion,
    ) -> Result<(Generation, Version), StoreError> {
        (**self).create_charged(generation, version).await
    }

    async fn append_version(&self, generation_id: GenerationId, version: NewVersion) -> Result<Version, StoreError> {
        (**self).append_version(generation_id, version).await
    }

    async fn update_version(&self, version_id: VersionId, edit: VersionEdit) -> Result<Version, StoreError> {
        (**self).update_version(version_id, edit).await
    }

    async fn record_models(&self, generation_id: GenerationId, model_ids: &[String]) -> Result<(), StoreError> {
        (**self).record_models(generation_id, model_ids).await
    }

    async fn set_visibility(&self, generation_id: GenerationId, is_public: bool) -> Result<Generation, StoreError> {
        (**self).set_visibility(generation_id, is_public).await
    }

    async fn get_generation(&self, generation_id: GenerationId) -> Result<GenerationDetail, StoreError> {
        (**self).get_generation(generation_id).await
    }

    async fn get_version(&self, version_id: VersionId) -> Result<Version, StoreError> {
        (**self).get_version(version_id).await
    }

    async fn list_paginated(
        &self,
        filter: GenerationFilter,
        page: PageRequest,
    ) -> Result<Paginated<GenerationSummary>, StoreError> {
        (**self).list_paginated(filter, page).await
    }
}

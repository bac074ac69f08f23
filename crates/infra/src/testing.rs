//! Test doubles shared by the infra test modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use vectorsmith_core::{GenerationId, VersionId};
use vectorsmith_generation::{
    CompletionRequest, Generation, GenerationDetail, GenerationFilter, GenerationSummary, ModelProvider,
    NewGeneration, NewVersion, PageRequest, Paginated, ProviderError, TextStream, Version,
};

use crate::store::{GenerationStore, InMemoryStore, StoreError, VersionEdit};

/// What a scripted model does when invoked.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Yield the fragments, then finish.
    Chunks(Vec<String>),
    /// Yield the fragments, then fail mid-stream.
    ChunksThenError(Vec<String>, ProviderError),
    /// Yield the fragments, then never produce anything again.
    ChunksThenHang(Vec<String>),
    /// Refuse to open the stream.
    Fail(ProviderError),
    /// Never answer the open call.
    Stall,
}

impl Script {
    pub(crate) fn chunks(chunks: &[&str]) -> Self {
        Script::Chunks(owned(chunks))
    }

    pub(crate) fn then_error(chunks: &[&str], err: ProviderError) -> Self {
        Script::ChunksThenError(owned(chunks), err)
    }

    pub(crate) fn then_hang(chunks: &[&str]) -> Self {
        Script::ChunksThenHang(owned(chunks))
    }

    pub(crate) fn fail(err: ProviderError) -> Self {
        Script::Fail(err)
    }

    pub(crate) fn stall() -> Self {
        Script::Stall
    }
}

fn owned(chunks: &[&str]) -> Vec<String> {
    chunks.iter().map(|c| c.to_string()).collect()
}

pub(crate) type CallLog = Arc<Mutex<Vec<CompletionRequest>>>;

/// Provider answering per model id from a fixed script and recording every
/// request it receives. Unknown models fail with a 404.
#[derive(Debug, Default)]
pub(crate) struct ScriptedProvider {
    scripts: HashMap<String, Script>,
    calls: CallLog,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, model_id: &str, script: Script) -> Self {
        self.scripts.insert(model_id.to_string(), script);
        self
    }

    pub(crate) fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(&self, request: CompletionRequest) -> Result<TextStream, ProviderError> {
        let script = self.scripts.get(&request.model_id).cloned();
        self.calls.lock().unwrap().push(request);

        let fragments = |chunks: Vec<String>| stream::iter(chunks.into_iter().map(Ok::<String, ProviderError>));
        match script {
            None => Err(ProviderError::Api {
                status: 404,
                message: "unknown model".into(),
            }),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Stall) => futures::future::pending().await,
            Some(Script::Chunks(chunks)) => Ok(fragments(chunks).boxed()),
            Some(Script::ChunksThenError(chunks, err)) => {
                Ok(fragments(chunks).chain(stream::once(async move { Err(err) })).boxed())
            }
            Some(Script::ChunksThenHang(chunks)) => Ok(fragments(chunks).chain(stream::pending()).boxed()),
        }
    }
}

/// Store that behaves like the wrapped in-memory store except that every
/// version edit fails.
pub(crate) struct FailingEditStore(pub(crate) Arc<InMemoryStore>);

#[async_trait]
impl GenerationStore for FailingEditStore {
    async fn create_placeholder(
        &self,
        generation: NewGeneration,
        placeholder: String,
    ) -> Result<(Generation, Version), StoreError> {
        self.0.create_placeholder(generation, placeholder).await
    }

    async fn create_charged(
        &self,
        generation: NewGeneration,
        version: NewVersion,
    ) -> Result<(Generation, Version), StoreError> {
        self.0.create_charged(generation, version).await
    }

    async fn append_version(&self, generation_id: GenerationId, version: NewVersion) -> Result<Version, StoreError> {
        self.0.append_version(generation_id, version).await
    }

    async fn update_version(&self, _version_id: VersionId, _edit: VersionEdit) -> Result<Version, StoreError> {
        Err(StoreError::Storage("disk full".into()))
    }

    async fn record_models(&self, generation_id: GenerationId, model_ids: &[String]) -> Result<(), StoreError> {
        self.0.record_models(generation_id, model_ids).await
    }

    async fn set_visibility(&self, generation_id: GenerationId, is_public: bool) -> Result<Generation, StoreError> {
        self.0.set_visibility(generation_id, is_public).await
    }

    async fn get_generation(&self, generation_id: GenerationId) -> Result<GenerationDetail, StoreError> {
        self.0.get_generation(generation_id).await
    }

    async fn get_version(&self, version_id: VersionId) -> Result<Version, StoreError> {
        self.0.get_version(version_id).await
    }

    async fn list_paginated(
        &self,
        filter: GenerationFilter,
        page: PageRequest,
    ) -> Result<Paginated<GenerationSummary>, StoreError> {
        self.0.list_paginated(filter, page).await
    }
}

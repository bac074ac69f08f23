use std::sync::Arc;

use anyhow::Context;

use vectorsmith_generation::ModelProvider;
use vectorsmith_infra::{
    config::Settings,
    ledger::CreditLedger,
    pipeline::{GenerationService, StreamingOrchestrator},
    provider::OpenAiCompatibleProvider,
    store::{GenerationStore, InMemoryStore, PostgresStore},
};

/// Pipeline wired over one storage backend.
///
/// The in-memory backend keeps everything in process and is what tests use;
/// users are seeded on the store before it is handed over. The persistent
/// backend runs against Postgres.
pub struct AppServices {
    orchestrator: StreamingOrchestrator,
    generations: GenerationService,
    stream_channel_capacity: usize,
}

impl AppServices {
    pub fn in_memory(store: Arc<InMemoryStore>, provider: Arc<dyn ModelProvider>, settings: &Settings) -> Self {
        Self::wire(store.clone(), store, provider, settings)
    }

    pub fn persistent(store: Arc<PostgresStore>, provider: Arc<dyn ModelProvider>, settings: &Settings) -> Self {
        Self::wire(store.clone(), store, provider, settings)
    }

    fn wire(
        store: Arc<dyn GenerationStore>,
        ledger: Arc<dyn CreditLedger>,
        provider: Arc<dyn ModelProvider>,
        settings: &Settings,
    ) -> Self {
        let orchestrator = StreamingOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&provider),
            settings.generation.clone(),
        );
        let generations = GenerationService::new(store, ledger, provider, settings.generation.clone());
        Self {
            orchestrator,
            generations,
            stream_channel_capacity: settings.stream_channel_capacity,
        }
    }

    pub fn orchestrator(&self) -> &StreamingOrchestrator {
        &self.orchestrator
    }

    pub fn generations(&self) -> &GenerationService {
        &self.generations
    }

    pub fn stream_channel_capacity(&self) -> usize {
        self.stream_channel_capacity
    }
}

/// Wire services from configuration: Postgres when `DATABASE_URL` is set,
/// otherwise in-memory.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    if settings.provider_api_key.is_none() {
        tracing::warn!("PROVIDER_API_KEY not set; provider calls are unauthenticated");
    }
    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiCompatibleProvider::new(
        settings.provider_base_url.clone(),
        settings.provider_api_key.clone(),
    ));

    match &settings.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, settings.database_max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            tracing::info!("using Postgres generation store");
            Ok(AppServices::persistent(Arc::new(store), provider, settings))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store with no users");
            Ok(AppServices::in_memory(Arc::new(InMemoryStore::new()), provider, settings))
        }
    }
}

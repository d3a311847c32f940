//! Shared components of every session: one generation client, one
//! embedder, one store and one summary sink, wired from a [`Config`].

use std::sync::Arc;

use cm_domain::config::Config;
use cm_domain::error::Result;
use cm_domain::retry::RetryPolicy;
use cm_providers::{create_embedder, Embedder, LlmProvider, OpenAiCompatProvider, StructuredClient};
use cm_store::{create_store, create_summary_sink, MemoryStore, SummarySink};

use crate::augment::QueryAugmenter;
use crate::compaction::Compactor;
use crate::reconcile::StateReconciler;

pub struct MemoryEngine {
    config: Config,
    client: Arc<StructuredClient>,
    store: Arc<dyn MemoryStore>,
    sink: Arc<dyn SummarySink>,
    augmenter: QueryAugmenter,
    compactor: Compactor,
    reconciler: StateReconciler,
}

impl MemoryEngine {
    /// Build the OpenAI-compatible provider, the configured embedder, store
    /// and summary sink.
    pub async fn from_config(config: Config) -> Result<Self> {
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::from_config(&config.llm)?);
        let embedder = create_embedder(&config)?;
        let store = create_store(&config).await?;
        let sink = create_summary_sink(&config);
        tracing::info!(
            provider = %provider.provider_id(),
            model = %config.llm.model,
            store = %store.backend(),
            sink = %sink.name(),
            "memory engine ready"
        );
        Ok(Self::from_parts(config, provider, embedder, store, sink))
    }

    /// Wire already-built components. Used by tests with fake providers.
    pub fn from_parts(
        config: Config,
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn MemoryStore>,
        sink: Arc<dyn SummarySink>,
    ) -> Self {
        let client = Arc::new(StructuredClient::new(provider, &config.llm, &config.retry));
        let write_policy = RetryPolicy::from_config(&config.retry);

        let augmenter = QueryAugmenter::new(
            client.clone(),
            embedder.clone(),
            store.clone(),
            config.retrieval.clone(),
        );
        let compactor = Compactor::new(
            client.clone(),
            embedder,
            sink.clone(),
            store.clone(),
            config.compaction.clone(),
            write_policy.clone(),
        );
        let reconciler = StateReconciler::new(
            store.clone(),
            config.window.cost_budget,
            config.session.reload,
            write_policy,
        );

        Self {
            config,
            client,
            store,
            sink,
            augmenter,
            compactor,
            reconciler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &StructuredClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn SummarySink> {
        &self.sink
    }

    pub fn augmenter(&self) -> &QueryAugmenter {
        &self.augmenter
    }

    pub fn compactor(&self) -> &Compactor {
        &self.compactor
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }
}

//! Collaborator wiring shared by both controllers.
//!
//! [`Services`] bundles the trait objects a turn talks to. The CLI and the
//! server build one from [`Config`] with [`Services::from_config`]; tests
//! assemble one from stubs.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use research_harness_core::error::{ResearchError, ResearchResult};
use research_harness_core::links::{interleave_ranked, remove_duplicates_keep_order, FetchOutcome};
use research_harness_core::state::{read_state, write_state};
use research_harness_core::store::{CollectionStore, IngestDoc, Metadata};
use research_harness_core::traits::{BatchFetcher, ChatModel, WebSearch};

use crate::collections::create_collection_for_query;
use crate::config::Config;
use crate::fetch::HttpFetcher;
use crate::llm::OpenAiChat;
use crate::progress::{NoProgress, ProgressReporter, ResearchProgressEvent};
use crate::sqlite_store::SqliteCollectionStore;
use crate::websearch::create_search;

/// Service name used in upstream errors from web search.
pub const SEARCH_SERVICE: &str = "web search";

#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn ChatModel>,
    pub search: Arc<dyn WebSearch>,
    pub fetcher: Arc<dyn BatchFetcher>,
    pub store: Arc<dyn CollectionStore>,
    pub progress: Arc<dyn ProgressReporter>,
}

impl Services {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn BatchFetcher>,
        store: Arc<dyn CollectionStore>,
    ) -> Self {
        Self {
            llm,
            search,
            fetcher,
            store,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Build the production collaborators: OpenAI-compatible chat, the
    /// configured search provider, the HTTP fetcher and the SQLite store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let llm = OpenAiChat::new(&config.llm).context("failed to set up the chat model")?;
        let search = create_search(&config.search).context("failed to set up web search")?;
        let fetcher = HttpFetcher::new(&config.fetch).context("failed to set up the fetcher")?;
        let store = SqliteCollectionStore::open(config).await?;
        Ok(Self::new(
            Arc::new(llm),
            Arc::from(search),
            Arc::new(fetcher),
            Arc::new(store),
        ))
    }

    pub(crate) fn progress(&self, event: ResearchProgressEvent) {
        self.progress.report(event);
    }

    /// The fetcher, reporting each batch to the progress reporter.
    pub(crate) fn fetcher(&self) -> ReportingFetcher<'_> {
        ReportingFetcher {
            inner: self.fetcher.as_ref(),
            progress: self.progress.as_ref(),
        }
    }

    /// Run every query and merge the results by rank, dropping repeats.
    pub(crate) async fn search_links(
        &self,
        queries: &[String],
        num_results: usize,
    ) -> ResearchResult<Vec<String>> {
        self.progress(ResearchProgressEvent::Searching {
            num_queries: queries.len(),
        });
        let mut ranked = Vec::with_capacity(queries.len());
        for query in queries {
            let hits = self
                .search
                .search(query, num_results)
                .await
                .map_err(|e| ResearchError::upstream(SEARCH_SERVICE, e))?;
            tracing::debug!(query = %query, hits = hits.len(), "search results");
            ranked.push(hits.into_iter().map(|h| h.link).collect::<Vec<_>>());
        }
        Ok(remove_duplicates_keep_order(interleave_ranked(&ranked)))
    }

    /// Load the state stored under `key` in `collection`, if any.
    pub(crate) async fn load_state<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> ResearchResult<Option<T>> {
        if !self.store.exists(collection).await.map_err(ResearchError::store)? {
            return Ok(None);
        }
        let metadata = self
            .store
            .get_metadata(collection)
            .await
            .map_err(ResearchError::store)?;
        read_state(&metadata, key)
    }

    /// Write `state` under `key`, keeping any other metadata fields.
    pub(crate) async fn save_state<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        state: &T,
    ) -> ResearchResult<()> {
        let mut metadata = self
            .store
            .get_metadata(collection)
            .await
            .map_err(ResearchError::store)?;
        write_state(&mut metadata, key, state)?;
        self.store
            .save_metadata(collection, &metadata)
            .await
            .map_err(ResearchError::store)
    }

    /// Store a fresh session state: in `collection` if it exists, else in a
    /// new collection named after `query`.
    pub(crate) async fn open_collection<T: Serialize + Sync>(
        &self,
        collection: Option<&str>,
        query: &str,
        prefix: &str,
        key: &str,
        state: &T,
    ) -> ResearchResult<String> {
        if let Some(name) = collection {
            if self.store.exists(name).await.map_err(ResearchError::store)? {
                tracing::info!(collection = name, key, "reusing collection for new session");
                self.save_state(name, key, state).await?;
                return Ok(name.to_string());
            }
        }
        let mut metadata = Metadata::new();
        write_state(&mut metadata, key, state)?;
        let name = create_collection_for_query(query, prefix, self.store.as_ref(), &metadata)
            .await
            .map_err(ResearchError::store)?;
        tracing::info!(collection = %name, key, "created collection");
        Ok(name)
    }

    /// Add fetched pages to a collection.
    pub(crate) async fn ingest(&self, collection: &str, docs: &[IngestDoc]) -> ResearchResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let chunks = self
            .store
            .ingest(collection, docs)
            .await
            .map_err(ResearchError::store)?;
        tracing::info!(collection, docs = docs.len(), chunks, "ingested sources");
        Ok(())
    }
}

/// [`BatchFetcher`] adapter that emits a progress event per batch.
pub(crate) struct ReportingFetcher<'a> {
    inner: &'a dyn BatchFetcher,
    progress: &'a dyn ProgressReporter,
}

#[async_trait]
impl BatchFetcher for ReportingFetcher<'_> {
    async fn fetch_batch(&self, urls: &[String]) -> Vec<FetchOutcome> {
        self.progress.report(ResearchProgressEvent::FetchingBatch {
            num_urls: urls.len(),
        });
        self.inner.fetch_batch(urls).await
    }
}

/// Result of one user turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reply {
    /// Text shown to the user.
    pub text: String,
    /// Collection the turn acted on (newly created for NEW / a new heatseek).
    pub collection: Option<String>,
    /// Source links used by this turn.
    pub links: Vec<String>,
}

impl Reply {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn in_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

impl From<ResearchError> for Reply {
    fn from(err: ResearchError) -> Self {
        Reply::message(err.user_message())
    }
}

//! Interfaces to the external collaborators a research turn depends on.
//!
//! | Trait | Collaborator |
//! |-------|--------------|
//! | [`ChatModel`] | LLM completion endpoint |
//! | [`WebSearch`] | Web search engine |
//! | [`BatchFetcher`] | Page fetcher (HTTP or headless browser) |
//!
//! The collection store lives in [`crate::store`].
//!
//! Implementations report transport failures as `anyhow` errors; the
//! controllers wrap them into [`ResearchError::Upstream`](crate::error::ResearchError).
//! [`BatchFetcher`] is the exception: it never fails as a whole, each URL
//! gets its own outcome.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::links::FetchOutcome;

/// Callback receiving streamed completion text.
pub type TokenSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// A text-in, text-out language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a single-turn completion.
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Run a completion, feeding text to `sink` as it arrives.
    ///
    /// The default delivers the whole completion in one call.
    async fn invoke_streaming(&self, prompt: &str, sink: TokenSink<'_>) -> Result<String> {
        let out = self.invoke(prompt).await?;
        sink(&out);
        Ok(out)
    }
}

/// One ranked web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// A web search engine.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Return up to `num_results` hits in rank order.
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>>;
}

/// Fetches page text for a batch of URLs.
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    /// Return exactly one outcome per URL, in input order.
    async fn fetch_batch(&self, urls: &[String]) -> Vec<FetchOutcome>;
}

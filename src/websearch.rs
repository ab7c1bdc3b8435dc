//! Web search via the Google Custom Search JSON API.
//!
//! The API returns at most 10 results per request, so larger requests are
//! paged with the `start` parameter. Credentials come from the environment
//! variables named in `[search]`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use research_harness_core::traits::{SearchHit, WebSearch};

use crate::config::SearchConfig;
use crate::http::send_with_retry;

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const PAGE_SIZE: usize = 10;
const MAX_RESULTS: usize = 100;

pub struct GoogleSearch {
    client: reqwest::Client,
    api_key: String,
    engine_id: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    link: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

impl GoogleSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let engine_id = std::env::var(&config.engine_id_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.engine_id_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            engine_id,
        })
    }
}

#[async_trait]
impl WebSearch for GoogleSearch {
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>> {
        let wanted = num_results.min(MAX_RESULTS);
        let mut hits = Vec::with_capacity(wanted);
        while hits.len() < wanted {
            let start = hits.len() + 1;
            let num = (wanted - hits.len()).min(PAGE_SIZE).to_string();
            let start = start.to_string();
            let response = send_with_retry("web search", 2, || {
                self.client.get(ENDPOINT).query(&[
                    ("key", self.api_key.as_str()),
                    ("cx", self.engine_id.as_str()),
                    ("q", query),
                    ("num", num.as_str()),
                    ("start", start.as_str()),
                ])
            })
            .await?;
            let page: SearchResponse = response.json().await?;
            if page.items.is_empty() {
                break;
            }
            hits.extend(page.items.into_iter().map(|item| SearchHit {
                link: item.link,
                title: item.title,
                snippet: item.snippet,
            }));
        }
        hits.truncate(wanted);
        tracing::debug!(query, results = hits.len(), "web search");
        Ok(hits)
    }
}

/// Search backend used when `[search] provider = "disabled"`.
pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(&self, _query: &str, _num_results: usize) -> Result<Vec<SearchHit>> {
        bail!("web search is disabled in the configuration")
    }
}

pub fn create_search(config: &SearchConfig) -> Result<Box<dyn WebSearch>> {
    match config.provider.as_str() {
        "google" => Ok(Box::new(GoogleSearch::new(config)?)),
        "disabled" => Ok(Box::new(DisabledSearch)),
        other => bail!("Unknown search provider: {}", other),
    }
}

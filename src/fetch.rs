//! Concurrent page fetcher.
//!
//! [`HttpFetcher`] implements [`BatchFetcher`]: every URL in a batch is
//! fetched concurrently and the batch completes when all have finished.
//! Each URL gets its own timeout and up to `max_attempts` attempts with
//! exponential backoff. Failures never abort the batch; they come back as
//! error strings that become `LinkRecord::error`.
//!
//! An optional semaphore caps how many fetches run at once (used for
//! heavyweight fetch backends; plain HTTP runs unbounded by default).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;

use research_harness_core::links::FetchOutcome;
use research_harness_core::traits::BatchFetcher;

use crate::config::FetchConfig;
use crate::extract::extract_text;
use crate::http::{backoff_delay, is_retryable, is_transient};

pub struct HttpFetcher {
    client: reqwest::Client,
    max_attempts: u32,
    gate: Option<Arc<Semaphore>>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            gate: config.max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        })
    }

    async fn fetch_one(&self, url: &str) -> FetchOutcome {
        let _permit = match &self.gate {
            Some(gate) => Some(
                gate.acquire()
                    .await
                    .map_err(|e| format!("fetch gate closed: {}", e))?,
            ),
            None => None,
        };

        let mut last_err = String::from("not attempted");
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        last_err = format!("HTTP {}", status);
                        if is_retryable(status) {
                            continue;
                        }
                        return Err(last_err);
                    }
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let body = match response.bytes().await {
                        Ok(b) => b,
                        Err(e) => {
                            last_err = format!("failed to read body: {}", e);
                            continue;
                        }
                    };
                    return convert(body.to_vec(), content_type).await;
                }
                Err(e) if e.is_timeout() => last_err = "timed out".to_string(),
                Err(e) if is_transient(&e) => last_err = e.to_string(),
                Err(e) => return Err(e.to_string()),
            }
        }
        Err(last_err)
    }
}

/// Run extraction off the async threads; a panicking extractor becomes an error.
async fn convert(body: Vec<u8>, content_type: String) -> FetchOutcome {
    tokio::task::spawn_blocking(move || extract_text(&body, &content_type))
        .await
        .map_err(|e| format!("extraction aborted: {}", e))?
        .map_err(|e| e.to_string())
}

#[async_trait]
impl BatchFetcher for HttpFetcher {
    async fn fetch_batch(&self, urls: &[String]) -> Vec<FetchOutcome> {
        tracing::debug!(count = urls.len(), "fetching batch");
        let outcomes = join_all(urls.iter().map(|url| self.fetch_one(url))).await;
        let ok = outcomes.iter().filter(|o| o.is_ok()).count();
        tracing::info!(requested = urls.len(), ok, "batch fetched");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_urls_become_errors() {
        let fetcher = HttpFetcher::new(&FetchConfig {
            max_attempts: 1,
            ..FetchConfig::default()
        })
        .unwrap();
        let urls = vec!["not a url".to_string(), "ftp://example.invalid/x".to_string()];
        let outcomes = fetcher.fetch_batch(&urls).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_err()));
    }

    #[tokio::test]
    async fn test_malformed_urls_fail_without_backoff() {
        let fetcher = HttpFetcher::new(&FetchConfig {
            max_attempts: 4,
            ..FetchConfig::default()
        })
        .unwrap();
        let urls = vec!["not a url".to_string(), "http://".to_string()];
        let started = std::time::Instant::now();
        let outcomes = fetcher.fetch_batch(&urls).await;
        assert!(outcomes.iter().all(|o| o.is_err()));
        assert!(started.elapsed() < backoff_delay(1));
    }

    #[tokio::test]
    async fn test_convert_html() {
        let out = convert(b"<p>hello there</p>".to_vec(), "text/html".into()).await.unwrap();
        assert!(out.contains("hello there"));
        assert!(convert(vec![0, 1], "image/png".into()).await.is_err());
    }
}

//! Ordered URL backlog with top-up fetching.
//!
//! # Top-up algorithm
//!
//! [`fetch_with_top_up`] walks a URL list in batches until `min_ok_urls`
//! pages have been retrieved successfully or the list is exhausted:
//!
//! 1. `extras = max(2, init_batch_size - min_ok_urls)` is the allowance for
//!    expected failures.
//! 2. Each batch takes `min(init_batch_size, remaining, needed + extras)`
//!    URLs from the untried suffix, where `needed = min_ok_urls - ok_so_far`.
//! 3. The batch is fetched concurrently by the [`BatchFetcher`]; every URL
//!    yields a [`LinkRecord`], successes count toward the quota.
//! 4. Failed URLs are never retried. Running out of URLs is not an error:
//!    the caller gets whatever succeeded.
//!
//! [`UrlConveyer`] wraps the algorithm with persistent cursors:
//! `first_not_consumed <= first_untried <= urls.len()`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ResearchError, ResearchResult};
use crate::links::{remove_duplicates_keep_order, LinkRecord, DEFAULT_MIN_OK_WORDS};
use crate::traits::BatchFetcher;

/// Outcome of one [`fetch_with_top_up`] call.
#[derive(Debug, Clone, Default)]
pub struct UrlRetrievalData {
    /// Records for every URL tried, in list order.
    pub records: Vec<(String, LinkRecord)>,
    /// Number of records without an error.
    pub num_ok: usize,
    /// Number of fetch batches issued.
    pub num_batches: usize,
}

impl UrlRetrievalData {
    pub fn num_tried(&self) -> usize {
        self.records.len()
    }
}

/// Size of the next batch.
pub fn next_batch_size(
    init_batch_size: usize,
    num_remaining: usize,
    min_ok_urls: usize,
    num_ok_so_far: usize,
) -> usize {
    let extras = 2.max(init_batch_size.saturating_sub(min_ok_urls));
    let needed = min_ok_urls.saturating_sub(num_ok_so_far);
    init_batch_size.max(1).min(num_remaining).min(needed + extras)
}

/// Fetch URLs from the front of `urls` in batches until `min_ok_urls` succeed
/// or the list runs out.
pub async fn fetch_with_top_up(
    urls: &[String],
    min_ok_urls: usize,
    init_batch_size: usize,
    min_ok_words: usize,
    fetcher: &dyn BatchFetcher,
) -> UrlRetrievalData {
    let mut data = UrlRetrievalData::default();
    while data.num_ok < min_ok_urls && data.num_tried() < urls.len() {
        let start = data.num_tried();
        let size = next_batch_size(init_batch_size, urls.len() - start, min_ok_urls, data.num_ok);
        let batch = &urls[start..start + size];

        let mut outcomes = fetcher.fetch_batch(batch).await.into_iter();
        data.num_batches += 1;
        for url in batch {
            let outcome = outcomes
                .next()
                .unwrap_or_else(|| Err("fetcher returned no result".to_string()));
            let record = LinkRecord::from_fetch(outcome, min_ok_words);
            if record.is_ok() {
                data.num_ok += 1;
            }
            data.records.push((url.clone(), record));
        }
    }
    data
}

/// Persistent URL backlog with tried/consumed cursors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlConveyer {
    urls: Vec<String>,
    link_data: HashMap<String, LinkRecord>,
    first_untried: usize,
    first_not_consumed: usize,
    /// Value of `first_untried` at the last [`refresh_urls`](Self::refresh_urls).
    refresh_mark: usize,
    num_batch_retrievals: usize,
    min_ok_words: usize,
}

impl Default for UrlConveyer {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_MIN_OK_WORDS)
    }
}

impl UrlConveyer {
    pub fn new(urls: Vec<String>, min_ok_words: usize) -> Self {
        Self {
            urls: remove_duplicates_keep_order(urls),
            link_data: HashMap::new(),
            first_untried: 0,
            first_not_consumed: 0,
            refresh_mark: 0,
            num_batch_retrievals: 0,
            min_ok_words,
        }
    }

    /// Fetch untried URLs until `min_ok_urls` new pages succeed or the backlog is exhausted.
    ///
    /// Returns the number of successful pages obtained by this call.
    pub async fn fetch_more(
        &mut self,
        min_ok_urls: usize,
        init_batch_size: usize,
        fetcher: &dyn BatchFetcher,
    ) -> usize {
        let data = fetch_with_top_up(
            &self.urls[self.first_untried..],
            min_ok_urls,
            init_batch_size,
            self.min_ok_words,
            fetcher,
        )
        .await;
        self.first_untried += data.num_tried();
        self.num_batch_retrievals += data.num_batches;
        for (url, record) in data.records {
            self.link_data.insert(url, record);
        }
        data.num_ok
    }

    /// Hand over every fetched-but-unconsumed URL with its record.
    pub fn take_fetched(&mut self) -> Vec<(String, LinkRecord)> {
        let taken = self.urls[self.first_not_consumed..self.first_untried]
            .iter()
            .map(|url| {
                let record = self.link_data.get(url).cloned().unwrap_or_default();
                (url.clone(), record)
            })
            .collect();
        self.first_not_consumed = self.first_untried;
        taken
    }

    /// Append new candidate URLs, skipping any already in the backlog.
    ///
    /// Cursors do not move, so tried URLs stay tried. Returns the number of
    /// URLs actually added.
    pub fn refresh_urls(&mut self, new_urls: Vec<String>) -> usize {
        let before = self.urls.len();
        let merged = remove_duplicates_keep_order(self.urls.drain(..).chain(new_urls));
        self.urls = merged;
        self.refresh_mark = self.first_untried;
        self.urls.len() - before
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn link(&self, url: &str) -> Option<&LinkRecord> {
        self.link_data.get(url)
    }

    pub fn first_untried(&self) -> usize {
        self.first_untried
    }

    pub fn first_not_consumed(&self) -> usize {
        self.first_not_consumed
    }

    pub fn num_untried(&self) -> usize {
        self.urls.len() - self.first_untried
    }

    pub fn num_tried_since_refresh(&self) -> usize {
        self.first_untried - self.refresh_mark
    }

    pub fn num_batch_retrievals(&self) -> usize {
        self.num_batch_retrievals
    }

    pub fn is_exhausted(&self) -> bool {
        self.first_untried >= self.urls.len()
    }

    /// Verify cursor ordering and that every tried URL has a record.
    pub fn check_invariants(&self) -> ResearchResult<()> {
        if !(self.first_not_consumed <= self.first_untried && self.first_untried <= self.urls.len())
        {
            return Err(ResearchError::Invariant(format!(
                "url conveyer cursors out of order: consumed={} untried={} len={}",
                self.first_not_consumed,
                self.first_untried,
                self.urls.len()
            )));
        }
        if let Some(url) = self.urls[..self.first_untried]
            .iter()
            .find(|u| !self.link_data.contains_key(*u))
        {
            return Err(ResearchError::Invariant(format!(
                "tried url has no link record: {}",
                url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::FetchOutcome;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails every URL listed in `bad`, records batch sizes.
    struct PatternFetcher {
        bad: HashSet<String>,
        batches: Mutex<Vec<usize>>,
    }

    impl PatternFetcher {
        fn new(bad: &[&str]) -> Self {
            Self {
                bad: bad.iter().map(|s| s.to_string()).collect(),
                batches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BatchFetcher for PatternFetcher {
        async fn fetch_batch(&self, urls: &[String]) -> Vec<FetchOutcome> {
            self.batches.lock().unwrap().push(urls.len());
            urls.iter()
                .map(|u| {
                    if self.bad.contains(u) {
                        Err(format!("Error: could not reach {}", u))
                    } else {
                        Ok(format!("{} ", u).repeat(100))
                    }
                })
                .collect()
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://site{}.test/page", i)).collect()
    }

    #[test]
    fn test_batch_size_formula() {
        // extras = max(2, 10 - 7) = 3 → min(10, 20, 7 + 3)
        assert_eq!(next_batch_size(10, 20, 7, 0), 10);
        // 5 more needed → min(10, 20, 5 + 3)
        assert_eq!(next_batch_size(10, 20, 7, 2), 8);
        // limited by remaining
        assert_eq!(next_batch_size(10, 4, 7, 0), 4);
        // extras floor of 2
        assert_eq!(next_batch_size(2, 20, 2, 1), 2);
        assert_eq!(next_batch_size(5, 20, 5, 4), 3);
    }

    #[tokio::test]
    async fn test_top_up_stops_at_quota() {
        let list = urls(20);
        let fetcher = PatternFetcher::new(&[]);
        let data = fetch_with_top_up(&list, 3, 3, 80, &fetcher).await;
        assert_eq!(data.num_ok, 3);
        assert_eq!(data.num_tried(), 3);
        assert_eq!(*fetcher.batches.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_top_up_fetches_more_after_failures() {
        let list = urls(20);
        let bad: Vec<String> = list[..4].to_vec();
        let bad_refs: Vec<&str> = bad.iter().map(|s| s.as_str()).collect();
        let fetcher = PatternFetcher::new(&bad_refs);
        let data = fetch_with_top_up(&list, 3, 5, 80, &fetcher).await;
        assert!(data.num_ok >= 3);
        assert_eq!(data.num_batches, 2);
        // first batch min(5, 20, 3 + 2) = 5 → 1 ok; second min(5, 15, 2 + 2) = 4
        assert_eq!(*fetcher.batches.lock().unwrap(), vec![5, 4]);
    }

    #[tokio::test]
    async fn test_top_up_exhausts_list_without_error() {
        let list = urls(6);
        let all: Vec<&str> = list.iter().map(|s| s.as_str()).collect();
        let fetcher = PatternFetcher::new(&all[..5]);
        let data = fetch_with_top_up(&list, 4, 3, 80, &fetcher).await;
        assert_eq!(data.num_ok, 1);
        assert_eq!(data.num_tried(), 6);
    }

    #[tokio::test]
    async fn test_top_up_never_exceeds_list_for_any_pattern() {
        let list = urls(9);
        for mask in 0u32..(1 << 9) {
            let bad: Vec<&str> = list
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, s)| s.as_str())
                .collect();
            let fetcher = PatternFetcher::new(&bad);
            for min_ok in 1..=list.len() {
                let data = fetch_with_top_up(&list, min_ok, 4, 80, &fetcher).await;
                assert!(data.num_tried() <= list.len());
                assert!(data.num_ok >= min_ok || data.num_tried() == list.len());
            }
        }
    }

    #[tokio::test]
    async fn test_conveyer_cursors() {
        let mut conveyer = UrlConveyer::new(urls(10), 80);
        let fetcher = PatternFetcher::new(&[]);
        let ok = conveyer.fetch_more(2, 2, &fetcher).await;
        assert_eq!(ok, 2);
        assert_eq!(conveyer.first_untried(), 2);
        assert_eq!(conveyer.first_not_consumed(), 0);
        conveyer.check_invariants().unwrap();

        let taken = conveyer.take_fetched();
        assert_eq!(taken.len(), 2);
        assert!(taken.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(conveyer.first_not_consumed(), 2);
        assert!(conveyer.take_fetched().is_empty());
        assert_eq!(conveyer.num_untried(), 8);
        assert_eq!(conveyer.num_batch_retrievals(), 1);
    }

    #[tokio::test]
    async fn test_refresh_keeps_tried_state() {
        let mut conveyer = UrlConveyer::new(urls(3), 80);
        let fetcher = PatternFetcher::new(&[]);
        conveyer.fetch_more(3, 3, &fetcher).await;
        assert!(conveyer.is_exhausted());
        assert_eq!(conveyer.num_tried_since_refresh(), 3);

        let mut fresh = urls(2);
        fresh.push("https://new.test/a".to_string());
        let added = conveyer.refresh_urls(fresh);
        assert_eq!(added, 1);
        assert_eq!(conveyer.num_untried(), 1);
        assert_eq!(conveyer.first_untried(), 3);
        assert_eq!(conveyer.num_tried_since_refresh(), 0);
        conveyer.check_invariants().unwrap();
    }

    #[test]
    fn test_conveyer_dedups_initial_list() {
        let conveyer = UrlConveyer::new(
            vec!["a".to_string(), "b".to_string(), "a".to_string()],
            80,
        );
        assert_eq!(conveyer.urls(), &["a".to_string(), "b".to_string()]);
    }
}

//! Scripted collaborators shared by the controller integration tests.
//!
//! - [`ScriptedLlm`] recognizes each prompt by its first line and answers
//!   in the shape the controllers parse.
//! - [`StubSearch`] returns fixed links, optionally per query.
//! - [`StubFetcher`] fails URLs containing `bad` and serves 100+ words for
//!   everything else. A page containing `MARK:<GRADE>` makes the scripted
//!   model answer from it and grade the answer `<GRADE>`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use research_harness::config::Config;
use research_harness::heatseek::HeatseekController;
use research_harness::prompts::{
    COMBINE_REPORTS, HEATSEEK_ANSWER, HEATSEEK_EVALUATE, HEATSEEK_REQUERY, ITERATE_REPORT,
    SEARCH_QUERIES, WRITE_REPORT,
};
use research_harness::research::ResearchController;
use research_harness::services::Services;
use research_harness_core::links::FetchOutcome;
use research_harness_core::prompt::PromptTemplate;
use research_harness_core::state::{
    read_state, HeatseekState, ResearchState, HEATSEEK_STATE_KEY, RESEARCH_STATE_KEY,
};
use research_harness_core::store::memory::InMemoryCollectionStore;
use research_harness_core::store::CollectionStore;
use research_harness_core::traits::{BatchFetcher, ChatModel, SearchHit, WebSearch};

// ─── LLM ────────────────────────────────────────────────────────────

pub struct ScriptedLlm {
    pub plan_queries: Vec<String>,
    pub requery_queries: Vec<String>,
    counter: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(plan_queries: &[&str]) -> Self {
        Self {
            plan_queries: plan_queries.iter().map(|q| q.to_string()).collect(),
            requery_queries: vec!["refined query".to_string()],
            counter: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Number of prompts built from `template`.
    pub fn count(&self, template: &PromptTemplate) -> usize {
        self.prompts()
            .iter()
            .filter(|p| is_prompt(p, template))
            .count()
    }

    fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn is_prompt(prompt: &str, template: &PromptTemplate) -> bool {
    let first_line = template.0.lines().next().unwrap_or_default();
    prompt.starts_with(first_line)
}

/// Grade word following `MARK:` in `text`.
fn marker_grade(text: &str) -> Option<String> {
    let pos = text.find("MARK:")?;
    let grade: String = text[pos + 5..]
        .chars()
        .take_while(|c| c.is_ascii_uppercase())
        .collect();
    (!grade.is_empty()).then_some(grade)
}

#[async_trait]
impl ChatModel for ScriptedLlm {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if is_prompt(prompt, &SEARCH_QUERIES) {
            let json = serde_json::json!({
                "queries": self.plan_queries,
                "report_type": "a ranked list",
            });
            return Ok(format!("```json\n{}\n```", json));
        }
        if is_prompt(prompt, &WRITE_REPORT) {
            let n = self.next();
            return Ok(format!(
                "Report text {}.\n\nREPORT ASSESSMENT: covers the sources well",
                n
            ));
        }
        if is_prompt(prompt, &ITERATE_REPORT) {
            let n = self.next();
            return Ok(format!(
                "REPORT ASSESSMENT: thin on detail\nACTION ITEMS: add specifics\nNEW REPORT: Improved report {}.",
                n
            ));
        }
        if is_prompt(prompt, &COMBINE_REPORTS) {
            let n = self.next();
            return Ok(format!("Combined report {}.", n));
        }
        if is_prompt(prompt, &HEATSEEK_ANSWER) {
            // The question itself is not marked, so only page content matches.
            return Ok(match marker_grade(prompt) {
                Some(grade) => format!("The answer is in this page (MARK:{}).", grade),
                None => "Content does not contain needed information.".to_string(),
            });
        }
        if is_prompt(prompt, &HEATSEEK_EVALUATE) {
            let grade = marker_grade(prompt).unwrap_or_else(|| "MEDIUM".to_string());
            return Ok(format!("The answer addresses the question.\nGRADE: {}", grade));
        }
        if is_prompt(prompt, &HEATSEEK_REQUERY) {
            return Ok(serde_json::json!({ "queries": self.requery_queries }).to_string());
        }
        Err(anyhow!("unexpected prompt: {}", prompt.lines().next().unwrap_or_default()))
    }
}

// ─── Search ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubSearch {
    default_links: Mutex<Vec<String>>,
    by_query: Mutex<HashMap<String, Vec<String>>>,
    queries: Mutex<Vec<String>>,
}

impl StubSearch {
    pub fn new(links: &[&str]) -> Self {
        let search = Self::default();
        search.set_default(links);
        search
    }

    pub fn set_default(&self, links: &[&str]) {
        *self.default_links.lock().unwrap() = links.iter().map(|l| l.to_string()).collect();
    }

    pub fn set_for_query(&self, query: &str, links: &[&str]) {
        self.by_query
            .lock()
            .unwrap()
            .insert(query.to_string(), links.iter().map(|l| l.to_string()).collect());
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for StubSearch {
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        let links = self
            .by_query
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default_links.lock().unwrap().clone());
        Ok(links
            .into_iter()
            .take(num_results)
            .map(|link| SearchHit {
                link,
                title: None,
                snippet: None,
            })
            .collect())
    }
}

/// Search that always fails, for upstream error paths.
pub struct DownSearch;

#[async_trait]
impl WebSearch for DownSearch {
    async fn search(&self, _query: &str, _num_results: usize) -> Result<Vec<SearchHit>> {
        Err(anyhow!("HTTP 503 Service Unavailable"))
    }
}

// ─── Fetcher ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubFetcher {
    pages: Mutex<HashMap<String, String>>,
    fetched: Mutex<Vec<String>>,
}

impl StubFetcher {
    /// Serve `text` (padded to 100+ words) for `url`.
    pub fn set_page(&self, url: &str, text: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), format!("{} {}", text, filler(url)));
    }

    /// Every URL fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

fn filler(url: &str) -> String {
    format!("Page {} says {}", url, "lorem ipsum ".repeat(50).trim_end())
}

#[async_trait]
impl BatchFetcher for StubFetcher {
    async fn fetch_batch(&self, urls: &[String]) -> Vec<FetchOutcome> {
        self.fetched.lock().unwrap().extend(urls.iter().cloned());
        let pages = self.pages.lock().unwrap();
        urls.iter()
            .map(|url| {
                if url.contains("bad") {
                    Err("HTTP 404 Not Found".to_string())
                } else {
                    Ok(pages.get(url).cloned().unwrap_or_else(|| filler(url)))
                }
            })
            .collect()
    }
}

// ─── Harness ────────────────────────────────────────────────────────

pub struct Harness {
    pub llm: Arc<ScriptedLlm>,
    pub search: Arc<StubSearch>,
    pub fetcher: Arc<StubFetcher>,
    pub store: Arc<InMemoryCollectionStore>,
    pub config: Config,
}

impl Harness {
    pub fn new(plan_queries: &[&str], links: &[&str]) -> Self {
        let mut config = Config::minimal("unused.sqlite");
        // stub link lists are returned whole
        config.search.num_results = 100;
        Self {
            llm: Arc::new(ScriptedLlm::new(plan_queries)),
            search: Arc::new(StubSearch::new(links)),
            fetcher: Arc::new(StubFetcher::default()),
            store: Arc::new(InMemoryCollectionStore::new()),
            config,
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            self.llm.clone(),
            self.search.clone(),
            self.fetcher.clone(),
            self.store.clone(),
        )
    }

    pub fn research(&self) -> ResearchController {
        ResearchController::new(self.services(), &self.config)
    }

    pub fn heatseek(&self) -> HeatseekController {
        HeatseekController::new(self.services(), &self.config)
    }

    pub async fn research_state(&self, collection: &str) -> ResearchState {
        let metadata = self.store.get_metadata(collection).await.unwrap();
        read_state(&metadata, RESEARCH_STATE_KEY).unwrap().unwrap()
    }

    pub async fn heatseek_state(&self, collection: &str) -> HeatseekState {
        let metadata = self.store.get_metadata(collection).await.unwrap();
        read_state(&metadata, HEATSEEK_STATE_KEY).unwrap().unwrap()
    }
}

/// `n` links on `host`; indices in `bad` get a failing URL.
pub fn links(host: &str, n: usize, bad: &[usize]) -> Vec<String> {
    (1..=n)
        .map(|i| {
            if bad.contains(&i) {
                format!("https://bad.{}/{}", host, i)
            } else {
                format!("https://{}/{}", host, i)
            }
        })
        .collect()
}

pub fn as_strs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

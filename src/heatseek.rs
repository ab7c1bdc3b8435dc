//! Heatseek controller: look for one good answer, one source at a time.
//!
//! Each turn runs up to `max_sub_iterations` sub-iterations. A sub-iteration
//! takes the next document from the [`DocConveyer`](research_harness_core::doc_conveyer::DocConveyer) (topping it up from the
//! [`UrlConveyer`] when empty, at most `max_url_retrievals` times per turn),
//! asks the model to answer from that document alone, and grades the answer:
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | "content does not contain needed information" or BAD | added to the current "checked but insufficient" group |
//! | MEDIUM / GOOD | appended to the reply and recorded for requery |
//! | EXCELLENT | appended, recorded, `is_answer_found` set, turn ends |
//!
//! When the URL backlog runs low (or many URLs were tried since the last
//! refresh) the model proposes new search queries, at most once per turn.

use std::sync::Arc;

use research_harness_core::doc_conveyer::ConveyedDoc;
use research_harness_core::error::ResearchResult;
use research_harness_core::parse::{is_insufficient_answer, parse_grade, Grade};
use research_harness_core::prompt::{invoke_json, invoke_text};
use research_harness_core::state::{HeatseekState, HEATSEEK_STATE_KEY};
use research_harness_core::store::IngestDoc;
use research_harness_core::tokens::{HeuristicTokenCounter, TokenCounter};
use research_harness_core::url_conveyer::UrlConveyer;

use crate::config::{Config, HeatseekSettings};
use crate::progress::ResearchProgressEvent;
use crate::prompts::{
    RequeryPlan, HEATSEEK_ANSWER, HEATSEEK_EVALUATE, HEATSEEK_REQUERY, NUM_SEARCH_QUERIES,
};
use crate::research::{clean_queries, plan_search_queries};
use crate::services::{Reply, Services};

pub const NO_HEATSEEK_MSG: &str = "There is no heatseek session in this collection. \
Start one with /research heatseek <your question>.";
pub const ANSWER_ALREADY_FOUND_MSG: &str = "An excellent answer was already found in this session. \
Start a new one with /research heatseek <your question>.";
pub const INSUFFICIENT_HEADER: &str = "Checked but insufficient:";
pub const KEEP_LOOKING_MSG: &str =
    "I didn't find a complete answer this round. Run /research heatseek again to keep looking.";
pub const OUT_OF_SOURCES_MSG: &str =
    "I've run out of sources to check. Start a new heatseek with a rephrased question.";

/// (answer, evaluation) pairs shown to the requery prompt.
const RECENT_ANSWERS_FOR_REQUERY: usize = 5;

pub struct HeatseekController {
    services: Services,
    settings: HeatseekSettings,
    min_ok_words: usize,
    format_retries: u32,
    num_search_results: usize,
    counter: Arc<dyn TokenCounter>,
}

/// Reply being assembled during a turn.
#[derive(Default)]
struct TurnLog {
    parts: Vec<String>,
    /// Labels of the current run of insufficient sources.
    insufficient: Vec<String>,
    links: Vec<String>,
}

impl TurnLog {
    fn insufficient(&mut self, label: String) {
        self.insufficient.push(label);
    }

    fn answer(&mut self, label: String, grade: Grade, answer: &str) {
        self.flush();
        self.parts
            .push(format!("**{}** ({}):\n{}", label, grade, answer.trim()));
    }

    fn flush(&mut self) {
        if self.insufficient.is_empty() {
            return;
        }
        let list = self
            .insufficient
            .drain(..)
            .map(|l| format!("- {}", l))
            .collect::<Vec<_>>()
            .join("\n");
        self.parts.push(format!("{}\n{}", INSUFFICIENT_HEADER, list));
    }

    fn finish(mut self, closing: &str) -> (String, Vec<String>) {
        self.flush();
        if !closing.is_empty() {
            self.parts.push(closing.to_string());
        }
        (self.parts.join("\n\n"), self.links)
    }
}

impl HeatseekController {
    pub fn new(services: Services, config: &Config) -> Self {
        Self {
            services,
            settings: config.heatseek.clone(),
            min_ok_words: config.fetch.min_words,
            format_retries: config.llm.format_retries,
            num_search_results: config.search.num_results,
            counter: Arc::new(HeuristicTokenCounter),
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Start a session (with a query) or continue the one in `collection`.
    pub async fn handle(&self, collection: Option<&str>, query: Option<String>) -> ResearchResult<Reply> {
        tracing::info!(
            collection = collection.unwrap_or("-"),
            new = query.is_some(),
            "heatseek turn"
        );
        match query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => self.start(collection, query).await,
            None => {
                let Some(name) = collection else {
                    return Ok(Reply::message(NO_HEATSEEK_MSG));
                };
                let Some(mut state) = self
                    .services
                    .load_state::<HeatseekState>(name, HEATSEEK_STATE_KEY)
                    .await?
                else {
                    return Ok(Reply::message(NO_HEATSEEK_MSG).in_collection(name));
                };
                if state.is_answer_found {
                    return Ok(Reply::message(ANSWER_ALREADY_FOUND_MSG).in_collection(name));
                }
                let reply = self.run_turn(name, &mut state).await?;
                Ok(reply.in_collection(name))
            }
        }
    }

    async fn start(&self, collection: Option<&str>, query: &str) -> ResearchResult<Reply> {
        let plan = plan_search_queries(self.services.llm.as_ref(), query, self.format_retries).await?;
        let links = self
            .services
            .search_links(&plan.queries, self.num_search_results)
            .await?;
        tracing::info!(queries = plan.queries.len(), links = links.len(), "heatseek search complete");

        let conveyer = UrlConveyer::new(links, self.min_ok_words);
        let mut state = HeatseekState::new(query, plan.queries, conveyer);
        let name = self
            .services
            .open_collection(
                collection,
                query,
                &self.settings.collection_prefix,
                HEATSEEK_STATE_KEY,
                &state,
            )
            .await?;
        let reply = self.run_turn(&name, &mut state).await?;
        Ok(reply.in_collection(name))
    }

    async fn save(&self, name: &str, state: &HeatseekState) -> ResearchResult<()> {
        self.services.save_state(name, HEATSEEK_STATE_KEY, state).await
    }

    async fn run_turn(&self, name: &str, state: &mut HeatseekState) -> ResearchResult<Reply> {
        let mut log = TurnLog::default();
        let mut retrievals = 0;
        let mut requeried = false;
        let mut out_of_sources = false;

        'turn: for _ in 0..self.settings.max_sub_iterations {
            if state.doc_conveyer.is_empty() {
                if !requeried && self.needs_requery(state) {
                    requeried = true;
                    self.requery(state).await?;
                }
                if state.url_conveyer.is_exhausted() {
                    out_of_sources = true;
                    break;
                }
                if retrievals >= self.settings.max_url_retrievals {
                    break;
                }
                retrievals += 1;
                self.retrieve(name, state).await?;
                self.save(name, state).await?;
                continue;
            }

            let docs = state.doc_conveyer.get_next_docs(
                self.settings.tokens_per_source,
                1,
                self.counter.as_ref(),
            );
            for doc in docs {
                let found = self.check_source(state, &doc, &mut log).await?;
                self.save(name, state).await?;
                if found {
                    break 'turn;
                }
            }
        }

        state.url_conveyer.check_invariants()?;
        self.save(name, state).await?;

        let closing = if state.is_answer_found {
            ""
        } else if out_of_sources && state.doc_conveyer.is_empty() {
            OUT_OF_SOURCES_MSG
        } else {
            KEEP_LOOKING_MSG
        };
        let (text, links) = log.finish(closing);
        Ok(Reply {
            text,
            collection: None,
            links,
        })
    }

    /// Fetch more pages and queue the usable ones.
    async fn retrieve(&self, name: &str, state: &mut HeatseekState) -> ResearchResult<()> {
        let num_ok = state
            .url_conveyer
            .fetch_more(
                self.settings.docs_per_retrieval,
                self.settings.init_batch_size,
                &self.services.fetcher(),
            )
            .await;
        let docs: Vec<(String, String)> = state
            .url_conveyer
            .take_fetched()
            .into_iter()
            .filter(|(_, record)| record.is_ok())
            .filter_map(|(url, record)| Some((url, record.text?)))
            .collect();
        tracing::debug!(num_ok, queued = docs.len(), "heatseek retrieval");

        let ingest: Vec<IngestDoc> = docs
            .iter()
            .map(|(url, text)| IngestDoc::new(url.clone(), text.clone()))
            .collect();
        self.services.ingest(name, &ingest).await?;
        state.doc_conveyer.add_docs(docs, self.counter.as_ref());
        Ok(())
    }

    /// Answer from one document and grade it. Returns true on an excellent answer.
    async fn check_source(
        &self,
        state: &mut HeatseekState,
        doc: &ConveyedDoc,
        log: &mut TurnLog,
    ) -> ResearchResult<bool> {
        let label = doc.label();
        state.num_sources_checked += 1;
        self.services.progress(ResearchProgressEvent::EvaluatingSource {
            source: label.clone(),
        });

        let prompt = HEATSEEK_ANSWER.render(&[
            ("query", state.query.as_str()),
            ("source", label.as_str()),
            ("content", doc.text.as_str()),
        ]);
        let answer = invoke_text(self.services.llm.as_ref(), &prompt).await?;
        if is_insufficient_answer(&answer) {
            tracing::debug!(source = %label, "source lacks the answer");
            log.insufficient(label);
            return Ok(false);
        }

        let prompt = HEATSEEK_EVALUATE.render(&[
            ("query", state.query.as_str()),
            ("answer", answer.trim()),
        ]);
        let evaluation = invoke_text(self.services.llm.as_ref(), &prompt).await?;
        let grade = parse_grade(&evaluation).unwrap_or_else(|| {
            tracing::warn!(source = %label, "could not parse a grade; treating as MEDIUM");
            Grade::Medium
        });
        tracing::info!(source = %label, grade = %grade, "source graded");
        if !grade.is_usable() {
            log.insufficient(label);
            return Ok(false);
        }

        log.links.push(doc.source.clone());
        log.answer(label, grade, &answer);
        state.record_answer(answer.trim(), format!("{}: {}", grade, evaluation.trim()));
        if grade == Grade::Excellent {
            state.is_answer_found = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn needs_requery(&self, state: &HeatseekState) -> bool {
        let urls = &state.url_conveyer;
        let tried = urls.num_tried_since_refresh();
        tried >= self.settings.requery_tried_high_water
            || (tried > 0 && urls.num_untried() < self.settings.requery_untried_low_water)
    }

    /// Ask for new search queries and append their results to the backlog.
    async fn requery(&self, state: &mut HeatseekState) -> ResearchResult<()> {
        let recent = state.recent_answers(RECENT_ANSWERS_FOR_REQUERY);
        let recent_text = if recent.is_empty() {
            "(no usable answers yet)".to_string()
        } else {
            recent
                .iter()
                .map(|(a, e)| format!("Answer: {}\nEvaluation: {}", a, e))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        let past = state
            .past_search_queries
            .iter()
            .map(|q| format!("- {}", q))
            .collect::<Vec<_>>()
            .join("\n");
        let num_queries = NUM_SEARCH_QUERIES.to_string();
        let prompt = HEATSEEK_REQUERY.render(&[
            ("query", state.query.as_str()),
            ("past_queries", past.as_str()),
            ("recent_answers", recent_text.as_str()),
            ("num_queries", num_queries.as_str()),
        ]);
        let plan: RequeryPlan =
            invoke_json(self.services.llm.as_ref(), &prompt, self.format_retries).await?;
        let mut queries = clean_queries(&plan.queries);
        queries.truncate(NUM_SEARCH_QUERIES);
        if queries.is_empty() {
            tracing::warn!("requery produced no queries");
            return Ok(());
        }

        let links = self
            .services
            .search_links(&queries, self.num_search_results)
            .await?;
        let added = state.url_conveyer.refresh_urls(links);
        tracing::info!(queries = queries.len(), added, "heatseek requeried");
        state.replace_search_queries(queries);
        Ok(())
    }
}

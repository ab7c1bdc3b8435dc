//! Iterative research controller.
//!
//! One [`ResearchController::handle`] call is one user turn. The persisted
//! [`ResearchState`] in the collection's metadata is the only memory between
//! turns: every step reloads it, mutates it and writes it back.
//!
//! | Command | Effect |
//! |---------|--------|
//! | NEW | search, fetch the first sources, write base report 0, create the collection |
//! | MORE | fetch new sources, append an independent base report |
//! | ITERATE | fetch a few new sources, rewrite the active base report in place |
//! | COMBINE | merge the oldest childless pair at the deepest level |
//! | AUTO | COMBINE if a pair exists, otherwise MORE |
//! | DEEPER | AUTO until a new top combination level appears |
//! | VIEW | read-only rendering of reports and counts |
//! | SET_* | edit query, report type or search queries |
//!
//! "Nothing to do" conditions come back as reply text; only upstream,
//! format, store and invariant failures are errors.

use std::sync::Arc;

use research_harness_core::command::{ResearchCommand, ViewTarget, USAGE};
use research_harness_core::error::{ResearchError, ResearchResult};
use research_harness_core::links::remove_duplicates_keep_order;
use research_harness_core::parse::parse_report_and_evaluation;
use research_harness_core::prompt::{invoke_json, invoke_text};
use research_harness_core::report::{Report, ReportId};
use research_harness_core::state::{ResearchState, RESEARCH_STATE_KEY};
use research_harness_core::store::IngestDoc;
use research_harness_core::traits::ChatModel;
use research_harness_core::tokens::{limit_tokens_in_texts, HeuristicTokenCounter, TokenCounter};

use crate::config::{Config, ResearchSettings};
use crate::progress::ResearchProgressEvent;
use crate::prompts::{
    format_sources, QueryPlan, COMBINE_REPORTS, ITERATE_REPORT, NUM_SEARCH_QUERIES,
    SEARCH_QUERIES, WRITE_REPORT,
};
use crate::services::{Reply, Services};

pub const NO_REPORT_MSG: &str =
    "There is no research report in this collection yet. Start one with /research <your query>.";
pub const NO_MORE_SOURCES_MSG: &str =
    "There are no more usable sources to incorporate into the report";
pub const NO_NEW_SOURCES_MSG: &str = "There are no more usable sources to write a new report from. \
Use /research set-search-queries to search for more.";
pub const NO_INITIAL_SOURCES_MSG: &str = "I could not retrieve any usable sources for this query. \
Use /research set-search-queries to try different searches, then /research more.";
pub const INVALID_COMBINE_MSG: &str = "There are not enough uncombined reports to combine. \
Generate another report with /research more first.";

/// Prefix for a reply whose requested step count exceeded the per-turn cap.
pub fn capped_steps_note(requested: usize, cap: usize) -> String {
    format!(
        "Running {} of the {} requested steps; a turn runs at most {}.",
        cap, requested, cap
    )
}

const DEFAULT_REPORT_TYPE: &str =
    "a detailed report that directly answers the request, with specifics and examples";
/// Floor for the source budget when an existing report fills most of the context.
const MIN_SOURCE_TOKENS: usize = 1000;

/// Outcome of one step within a turn.
enum Step {
    Done { text: String, links: Vec<String> },
    /// Nothing could be done; the text tells the user why.
    Guidance(String),
}

#[derive(Debug, Clone, Copy)]
enum StepKind {
    More,
    Iterate,
    Combine,
    Auto,
}

pub struct ResearchController {
    services: Services,
    settings: ResearchSettings,
    min_ok_words: usize,
    format_retries: u32,
    num_search_results: usize,
    counter: Arc<dyn TokenCounter>,
}

impl ResearchController {
    pub fn new(services: Services, config: &Config) -> Self {
        Self {
            services,
            settings: config.research.clone(),
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

    /// Run one turn against `collection` (absent for a fresh NEW).
    pub async fn handle(
        &self,
        collection: Option<&str>,
        command: ResearchCommand,
    ) -> ResearchResult<Reply> {
        tracing::info!(
            command = %command,
            collection = collection.unwrap_or("-"),
            "research turn"
        );
        match command {
            ResearchCommand::New { query, report_type } => {
                self.start(collection, &query, report_type).await
            }
            ResearchCommand::None => Ok(Reply::message(USAGE)),
            other => {
                let Some(name) = collection else {
                    return Ok(Reply::message(NO_REPORT_MSG));
                };
                if self.load(name).await?.is_none() {
                    return Ok(Reply::message(NO_REPORT_MSG).in_collection(name));
                }
                let reply = self.continue_session(name, other).await?;
                Ok(reply.in_collection(name))
            }
        }
    }

    async fn continue_session(&self, name: &str, command: ResearchCommand) -> ResearchResult<Reply> {
        let requested = command.num_iterations();
        let kind = match command {
            ResearchCommand::More { .. } => StepKind::More,
            ResearchCommand::Iterate { .. } => StepKind::Iterate,
            ResearchCommand::Combine { .. } => StepKind::Combine,
            ResearchCommand::Auto { .. } => StepKind::Auto,
            other => return self.run_single(name, other).await,
        };
        let n = requested.min(self.settings.max_auto_iterations);
        if n < requested {
            tracing::warn!(requested, cap = n, "step count capped");
        }
        let mut reply = self.run_steps(name, kind, n).await?;
        if n < requested {
            reply.text = format!("{}\n\n{}", capped_steps_note(requested, n), reply.text);
        }
        Ok(reply)
    }

    async fn run_single(&self, name: &str, command: ResearchCommand) -> ResearchResult<Reply> {
        match command {
            ResearchCommand::Deeper => self.deeper(name).await,
            ResearchCommand::View { target } => self.view(name, target).await,
            ResearchCommand::SetQuery { query } => {
                let mut state = self.load_required(name).await?;
                state.query = query.trim().to_string();
                self.save(name, &state).await?;
                Ok(Reply::message(format!("Research query set to: {}", state.query)))
            }
            ResearchCommand::SetReportType { report_type } => {
                let mut state = self.load_required(name).await?;
                state.report_type = report_type.trim().to_string();
                self.save(name, &state).await?;
                Ok(Reply::message(format!("Report type set to: {}", state.report_type)))
            }
            ResearchCommand::SetSearchQueries { queries } => {
                self.set_search_queries(name, queries).await
            }
            ResearchCommand::New { .. }
            | ResearchCommand::None
            | ResearchCommand::More { .. }
            | ResearchCommand::Iterate { .. }
            | ResearchCommand::Combine { .. }
            | ResearchCommand::Auto { .. } => Ok(Reply::message(USAGE)),
        }
    }

    // ============ State I/O ============

    async fn load(&self, name: &str) -> ResearchResult<Option<ResearchState>> {
        self.services.load_state(name, RESEARCH_STATE_KEY).await
    }

    async fn load_required(&self, name: &str) -> ResearchResult<ResearchState> {
        self.load(name).await?.ok_or_else(|| {
            ResearchError::Invariant(format!("research state disappeared from '{}'", name))
        })
    }

    async fn save(&self, name: &str, state: &ResearchState) -> ResearchResult<()> {
        self.services.save_state(name, RESEARCH_STATE_KEY, state).await
    }

    // ============ NEW ============

    async fn start(
        &self,
        collection: Option<&str>,
        query: &str,
        report_type: Option<String>,
    ) -> ResearchResult<Reply> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Reply::message(USAGE));
        }

        let plan = plan_search_queries(self.services.llm.as_ref(), query, self.format_retries).await?;
        let queries = plan.queries;
        let report_type = report_type
            .or(plan.report_type)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_REPORT_TYPE.to_string());

        let links = self
            .services
            .search_links(&queries, self.num_search_results)
            .await?;
        tracing::info!(queries = queries.len(), links = links.len(), "search complete");

        let mut state = ResearchState::new(
            query,
            queries,
            report_type,
            links,
            self.settings.context_token_budget,
        );
        let sources = self.take_sources(&mut state, self.settings.num_ok_links()).await?;
        if sources.is_empty() {
            let name = self.open_collection(collection, &state).await?;
            return Ok(Reply::message(NO_INITIAL_SOURCES_MSG).in_collection(name));
        }

        let report = self.write_report(&state, &sources).await?;
        let id = state.add_base_report(report);
        let name = self.open_collection(collection, &state).await?;
        self.ingest(&name, &state, &sources).await?;
        Ok(Reply {
            text: render_report(&state, id)?,
            collection: Some(name),
            links: sources,
        })
    }

    async fn open_collection(
        &self,
        collection: Option<&str>,
        state: &ResearchState,
    ) -> ResearchResult<String> {
        self.services
            .open_collection(
                collection,
                &state.query,
                &self.settings.collection_prefix,
                RESEARCH_STATE_KEY,
                state,
            )
            .await
    }

    // ============ Steps ============

    async fn run_steps(&self, name: &str, kind: StepKind, n: usize) -> ResearchResult<Reply> {
        let mut texts = Vec::new();
        let mut links = Vec::new();
        for i in 0..n {
            let mut state = self.load_required(name).await?;
            match self.step(name, &mut state, kind).await? {
                Step::Done { text, links: l } => {
                    texts.push(text);
                    links.extend(l);
                }
                Step::Guidance(msg) => {
                    tracing::info!(step = i + 1, ?kind, "stopping early: {}", msg);
                    texts.push(msg);
                    break;
                }
            }
        }
        Ok(Reply {
            text: texts.join("\n\n"),
            collection: None,
            links,
        })
    }

    /// One step on freshly loaded state; the state is saved afterwards.
    async fn step(&self, name: &str, state: &mut ResearchState, kind: StepKind) -> ResearchResult<Step> {
        let step = match kind {
            StepKind::More => self.more_step(name, state).await?,
            StepKind::Iterate => self.iterate_step(name, state).await?,
            StepKind::Combine => self.combine_step(state).await?,
            StepKind::Auto => {
                if state.find_ids_to_combine()?.is_some() {
                    self.combine_step(state).await?
                } else {
                    self.more_step(name, state).await?
                }
            }
        };
        self.save(name, state).await?;
        Ok(step)
    }

    async fn more_step(&self, name: &str, state: &mut ResearchState) -> ResearchResult<Step> {
        let sources = self.take_sources(state, self.settings.num_ok_links()).await?;
        if sources.is_empty() {
            return Ok(Step::Guidance(NO_NEW_SOURCES_MSG.to_string()));
        }
        let report = self.write_report(state, &sources).await?;
        let id = state.add_base_report(report);
        self.ingest(name, state, &sources).await?;
        Ok(Step::Done {
            text: render_report(state, id)?,
            links: sources,
        })
    }

    async fn iterate_step(&self, name: &str, state: &mut ResearchState) -> ResearchResult<Step> {
        let Some(active) = state.active_base_report else {
            return Ok(Step::Guidance(NO_REPORT_MSG.to_string()));
        };
        let sources = self.take_sources(state, self.settings.num_iterate_links).await?;
        if sources.is_empty() {
            return Ok(Step::Guidance(NO_MORE_SOURCES_MSG.to_string()));
        }

        let current = state.report(ReportId::Base(active))?.text.clone();
        let budget = state
            .context_token_budget
            .saturating_sub(self.counter.count(&current))
            .max(MIN_SOURCE_TOKENS);
        let texts = self.source_texts(state, &sources, budget);
        self.services.progress(ResearchProgressEvent::GeneratingReport {
            num_sources: sources.len(),
        });
        let prompt = ITERATE_REPORT.render(&[
            ("query", state.query.as_str()),
            ("report_type", state.report_type.as_str()),
            ("report", current.as_str()),
            ("texts", texts.as_str()),
        ]);
        let output = invoke_text(self.services.llm.as_ref(), &prompt).await?;
        let parsed = parse_report_and_evaluation(&output);
        let id = state.update_active_report(parsed.report, parsed.evaluation, &sources)?;
        self.ingest(name, state, &sources).await?;
        Ok(Step::Done {
            text: render_report(state, id)?,
            links: sources,
        })
    }

    async fn combine_step(&self, state: &mut ResearchState) -> ResearchResult<Step> {
        let Some(plan) = state.find_ids_to_combine()? else {
            return Ok(Step::Guidance(INVALID_COMBINE_MSG.to_string()));
        };
        let parent_texts = plan
            .parent_ids
            .iter()
            .map(|id| state.report(*id).map(|r| r.text.clone()))
            .collect::<ResearchResult<Vec<_>>>()?;
        let parent_texts =
            limit_tokens_in_texts(&parent_texts, state.context_token_budget, self.counter.as_ref());
        let [first, second] = parent_texts.as_slice() else {
            return Err(ResearchError::Invariant(format!(
                "expected a pair of reports to combine, got {}",
                parent_texts.len()
            )));
        };

        let parents = plan
            .parent_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" + ");
        self.services.progress(ResearchProgressEvent::Combining {
            parents: parents.clone(),
        });
        let prompt = COMBINE_REPORTS.render(&[
            ("query", state.query.as_str()),
            ("report_type", state.report_type.as_str()),
            ("report_1", first.as_str()),
            ("report_2", second.as_str()),
        ]);
        let output = invoke_text(self.services.llm.as_ref(), &prompt).await?;
        let parsed = parse_report_and_evaluation(&output);
        let (id, new_level) = state.add_combined_report(&plan, parsed.report, parsed.evaluation)?;
        tracing::info!(report = %id, parents = %parents, new_level, "combined reports");

        let mut text = render_report(state, id)?;
        if new_level {
            text = format!(
                "Combined reports {} into report {}, now the main report.\n\n{}",
                parents, id, text
            );
        }
        Ok(Step::Done {
            links: state.sources(id)?,
            text,
        })
    }

    async fn deeper(&self, name: &str) -> ResearchResult<Reply> {
        let start_levels = self.load_required(name).await?.num_levels();
        let mut links = Vec::new();
        for steps in 1..=self.settings.max_auto_iterations {
            let mut state = self.load_required(name).await?;
            match self.step(name, &mut state, StepKind::Auto).await? {
                Step::Done { text, links: l } => {
                    links.extend(l);
                    if state.num_levels() > start_levels {
                        return Ok(Reply {
                            text: format!(
                                "Reached combination level {} after {} steps.\n\n{}",
                                state.num_levels(),
                                steps,
                                text
                            ),
                            collection: None,
                            links,
                        });
                    }
                }
                Step::Guidance(msg) => {
                    return Ok(Reply {
                        text: format!("Stopped after {} steps. {}", steps, msg),
                        collection: None,
                        links,
                    });
                }
            }
        }
        Ok(Reply {
            text: format!(
                "No new combination level after {} steps. Run /research deeper again to continue.",
                self.settings.max_auto_iterations
            ),
            collection: None,
            links,
        })
    }

    // ============ Read-only and setters ============

    async fn view(&self, name: &str, target: ViewTarget) -> ResearchResult<Reply> {
        let state = self.load_required(name).await?;
        let mut sections = vec![stats_text(&state)];
        match target {
            ViewTarget::Stats => {}
            ViewTarget::Main => match state.main_report() {
                Some((id, _)) => sections.push(render_report(&state, id)?),
                None => sections.push("No reports yet.".to_string()),
            },
            ViewTarget::Base => {
                for i in 0..state.base_reports.len() {
                    sections.push(render_report(&state, ReportId::Base(i))?);
                }
            }
            ViewTarget::Combined => {
                if state.combined_reports.is_empty() {
                    sections.push("No combined reports yet.".to_string());
                }
                for i in 0..state.combined_reports.len() {
                    sections.push(render_report(&state, ReportId::Combined(i))?);
                }
            }
        }
        Ok(Reply::message(sections.join("\n\n")))
    }

    async fn set_search_queries(&self, name: &str, queries: Vec<String>) -> ResearchResult<Reply> {
        let queries = clean_queries(&queries);
        if queries.is_empty() {
            return Ok(Reply::message(format!("Give at least one search query. {}", USAGE)));
        }
        let links = self
            .services
            .search_links(&queries, self.num_search_results)
            .await?;
        let mut state = self.load_required(name).await?;
        let added = state.add_unprocessed_links(links);
        state.search_queries = queries;
        self.save(name, &state).await?;
        Ok(Reply::message(format!(
            "Ran {} search queries and added {} new links ({} waiting to be processed).",
            state.search_queries.len(),
            added,
            state.unprocessed_links.len()
        )))
    }

    // ============ Helpers ============

    async fn take_sources(&self, state: &mut ResearchState, num_ok: usize) -> ResearchResult<Vec<String>> {
        let sources = state
            .get_new_sources(
                num_ok,
                self.settings.init_batch_size,
                self.min_ok_words,
                &self.services.fetcher(),
            )
            .await?;
        tracing::debug!(wanted = num_ok, got = sources.len(), "new sources");
        Ok(sources)
    }

    /// Source texts cut to fit `budget` tokens, formatted for a prompt.
    fn source_texts(&self, state: &ResearchState, sources: &[String], budget: usize) -> String {
        let texts: Vec<String> = sources
            .iter()
            .map(|s| {
                state
                    .link_data
                    .get(s)
                    .map(|r| r.text_or_empty().to_string())
                    .unwrap_or_default()
            })
            .collect();
        let texts = limit_tokens_in_texts(&texts, budget, self.counter.as_ref());
        let pairs: Vec<(String, String)> = sources.iter().cloned().zip(texts).collect();
        format_sources(&pairs)
    }

    async fn write_report(&self, state: &ResearchState, sources: &[String]) -> ResearchResult<Report> {
        let texts = self.source_texts(state, sources, state.context_token_budget);
        self.services.progress(ResearchProgressEvent::GeneratingReport {
            num_sources: sources.len(),
        });
        let prompt = WRITE_REPORT.render(&[
            ("query", state.query.as_str()),
            ("report_type", state.report_type.as_str()),
            ("texts", texts.as_str()),
        ]);
        let output = invoke_text(self.services.llm.as_ref(), &prompt).await?;
        let parsed = parse_report_and_evaluation(&output);
        Ok(Report {
            evaluation: parsed.evaluation,
            ..Report::base(parsed.report, sources.to_vec())
        })
    }

    /// Add the fetched pages behind `sources` to the collection.
    async fn ingest(&self, name: &str, state: &ResearchState, sources: &[String]) -> ResearchResult<()> {
        let docs: Vec<IngestDoc> = sources
            .iter()
            .filter_map(|s| {
                let text = state.link_data.get(s)?.text.as_deref()?;
                Some(IngestDoc::new(s.clone(), text))
            })
            .collect();
        self.services.ingest(name, &docs).await
    }
}

/// Ask the model for search queries (and a report type) for `query`.
///
/// Queries are trimmed, deduplicated and capped; the query itself is used if
/// none survive.
pub(crate) async fn plan_search_queries(
    llm: &dyn ChatModel,
    query: &str,
    format_retries: u32,
) -> ResearchResult<QueryPlan> {
    let num_queries = NUM_SEARCH_QUERIES.to_string();
    let prompt = SEARCH_QUERIES.render(&[("query", query), ("num_queries", num_queries.as_str())]);
    let plan: QueryPlan = invoke_json(llm, &prompt, format_retries).await?;
    let mut queries = clean_queries(&plan.queries);
    queries.truncate(NUM_SEARCH_QUERIES);
    if queries.is_empty() {
        queries.push(query.to_string());
    }
    Ok(QueryPlan {
        queries,
        report_type: plan.report_type,
    })
}

/// Trim, then drop empties and repeats.
pub(crate) fn clean_queries(queries: &[String]) -> Vec<String> {
    remove_duplicates_keep_order(queries.iter().map(|q| q.trim()).filter(|q| !q.is_empty()))
}

/// A report with its full (own and inherited) source list.
pub fn render_report(state: &ResearchState, id: ReportId) -> ResearchResult<String> {
    let report = state.report(id)?;
    let mut out = format!("## Report {}\n\n{}\n", id, report.text.trim());
    let sources = state.sources(id)?;
    if !sources.is_empty() {
        out.push_str("\n### Sources\n");
        for source in sources {
            out.push_str(&format!("- {}\n", source));
        }
    }
    Ok(out)
}

/// Counts for VIEW.
pub fn stats_text(state: &ResearchState) -> String {
    let main = state
        .main_report_id
        .map_or_else(|| "none".to_string(), |id| id.to_string());
    format!(
        "Query: {}\nReport type: {}\nSearch queries: {}\nBase reports: {}\n\
Combined reports: {} in {} levels\nMain report: {}\n\
Links processed: {}, waiting: {} ({} already fetched)",
        state.query,
        state.report_type,
        state.search_queries.join("; "),
        state.base_reports.len(),
        state.combined_reports.len(),
        state.num_levels(),
        main,
        state.processed_links.len(),
        state.unprocessed_links.len(),
        state.num_obtained_unprocessed_links,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_combined_report_lists_inherited_sources() {
        let mut st = ResearchState::new("q", vec![], "t", vec![], 1000);
        st.add_base_report(Report::base("alpha", vec!["https://a.test".into()]));
        st.add_base_report(Report::base("beta", vec!["https://b.test".into()]));
        let plan = st.find_ids_to_combine().unwrap().unwrap();
        let (id, _) = st.add_combined_report(&plan, "gamma".into(), None).unwrap();
        let out = render_report(&st, id).unwrap();
        assert!(out.starts_with("## Report c0\n\ngamma"));
        assert!(out.contains("- https://a.test\n- https://b.test"));
    }

    #[test]
    fn test_stats_text_counts() {
        let mut st = ResearchState::new("q", vec!["s1".into(), "s2".into()], "t", vec!["u".into()], 1000);
        st.add_base_report(Report::base("alpha", vec![]));
        let stats = stats_text(&st);
        assert!(stats.contains("Search queries: s1; s2"));
        assert!(stats.contains("Base reports: 1"));
        assert!(stats.contains("Main report: 0"));
        assert!(stats.contains("waiting: 1"));
    }
}

//! Persisted per-collection state for both research modes.
//!
//! A collection's metadata holds at most one of:
//!
//! | Key | Value |
//! |-----|-------|
//! | [`RESEARCH_STATE_KEY`] | JSON-encoded [`ResearchState`] |
//! | [`HEATSEEK_STATE_KEY`] | JSON-encoded [`HeatseekState`] |
//!
//! The JSON is stored as a string value. Controllers reload it at the start
//! of every step and write it back after every mutation; nothing is kept in
//! memory between steps.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::doc_conveyer::DocConveyer;
use crate::error::{ResearchError, ResearchResult};
use crate::links::LinkRecord;
use crate::report::{get_ids_to_combine, get_report_by_id, get_report_by_id_mut, get_sources, Report, ReportId};
use crate::store::Metadata;
use crate::traits::BatchFetcher;
use crate::url_conveyer::{fetch_with_top_up, UrlConveyer};

pub const RESEARCH_STATE_KEY: &str = "rr_data";
pub const HEATSEEK_STATE_KEY: &str = "hs";

/// Read a state object stored under `key`, if present.
pub fn read_state<T: DeserializeOwned>(metadata: &Metadata, key: &str) -> ResearchResult<Option<T>> {
    match metadata.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(serde_json::from_str(s)?)),
        Some(other) => Ok(Some(serde_json::from_value(other.clone())?)),
    }
}

/// Store a state object under `key`, removing the other mode's state.
pub fn write_state<T: Serialize>(metadata: &mut Metadata, key: &str, state: &T) -> ResearchResult<()> {
    let json = serde_json::to_string(state)?;
    for other in [RESEARCH_STATE_KEY, HEATSEEK_STATE_KEY] {
        if other != key {
            metadata.remove(other);
        }
    }
    metadata.insert(key.to_string(), serde_json::Value::String(json));
    Ok(())
}

// ============ Iterative research ============

/// Where a pending combination will go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinePlan {
    /// Level holding the parents; `None` for base reports.
    pub parent_level: Option<usize>,
    pub parent_ids: Vec<ReportId>,
}

/// State of an iterative research session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResearchState {
    pub query: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub report_type: String,
    /// Candidate links not yet used in any report, in rank order.
    #[serde(default)]
    pub unprocessed_links: Vec<String>,
    /// Links handed to a report step, successful or not.
    #[serde(default)]
    pub processed_links: Vec<String>,
    #[serde(default)]
    pub link_data: HashMap<String, LinkRecord>,
    /// Length of the already-fetched prefix of `unprocessed_links`.
    #[serde(default)]
    pub num_obtained_unprocessed_links: usize,
    /// Successful links within that prefix.
    #[serde(default)]
    pub num_obtained_unprocessed_ok_links: usize,
    pub context_token_budget: usize,
    #[serde(default)]
    pub base_reports: Vec<Report>,
    #[serde(default)]
    pub combined_reports: Vec<Report>,
    /// Level 0 combines base reports; level k combines level k-1 reports.
    #[serde(default)]
    pub combined_report_id_levels: Vec<Vec<ReportId>>,
    #[serde(default)]
    pub main_report_id: Option<ReportId>,
    /// Base report that ITERATE improves.
    #[serde(default)]
    pub active_base_report: Option<usize>,
}

impl ResearchState {
    pub fn new(
        query: impl Into<String>,
        search_queries: Vec<String>,
        report_type: impl Into<String>,
        unprocessed_links: Vec<String>,
        context_token_budget: usize,
    ) -> Self {
        Self {
            query: query.into(),
            search_queries,
            report_type: report_type.into(),
            unprocessed_links,
            context_token_budget,
            ..Default::default()
        }
    }

    pub fn report(&self, id: ReportId) -> ResearchResult<&Report> {
        get_report_by_id(&self.base_reports, &self.combined_reports, id)
    }

    pub fn is_report_childless(&self, id: ReportId) -> ResearchResult<bool> {
        Ok(self.report(id)?.child_id.is_none())
    }

    /// Own and inherited sources of a report.
    pub fn sources(&self, id: ReportId) -> ResearchResult<Vec<String>> {
        get_sources(&self.base_reports, &self.combined_reports, id)
    }

    pub fn main_report(&self) -> Option<(ReportId, &Report)> {
        let id = self.main_report_id?;
        self.report(id).ok().map(|r| (id, r))
    }

    /// Verify the fetched-prefix bookkeeping against `link_data`.
    pub fn sanity_check(&self) -> ResearchResult<()> {
        if self.num_obtained_unprocessed_links > self.unprocessed_links.len() {
            return Err(ResearchError::Invariant(format!(
                "{} obtained links recorded but only {} unprocessed",
                self.num_obtained_unprocessed_links,
                self.unprocessed_links.len()
            )));
        }
        let prefix = &self.unprocessed_links[..self.num_obtained_unprocessed_links];
        let mut num_ok = 0;
        for link in prefix {
            match self.link_data.get(link) {
                Some(rec) if rec.is_ok() => num_ok += 1,
                Some(_) => {}
                None => {
                    return Err(ResearchError::Invariant(format!(
                        "obtained link '{}' has no fetch record",
                        link
                    )))
                }
            }
        }
        if num_ok != self.num_obtained_unprocessed_ok_links {
            return Err(ResearchError::Invariant(format!(
                "expected {} obtained good unprocessed links, found {}",
                self.num_obtained_unprocessed_ok_links, num_ok
            )));
        }
        Ok(())
    }

    /// Move the next `num_ok` successful links (plus any failures before
    /// them) from unprocessed to processed, fetching as needed.
    ///
    /// Returns the successful links, in order. Fewer than `num_ok` are
    /// returned when the backlog runs out.
    pub async fn get_new_sources(
        &mut self,
        num_ok: usize,
        init_batch_size: usize,
        min_ok_words: usize,
        fetcher: &dyn BatchFetcher,
    ) -> ResearchResult<Vec<String>> {
        self.sanity_check()?;

        let needed = num_ok.saturating_sub(self.num_obtained_unprocessed_ok_links);
        if needed > 0 {
            let data = fetch_with_top_up(
                &self.unprocessed_links[self.num_obtained_unprocessed_links..],
                needed,
                init_batch_size,
                min_ok_words,
                fetcher,
            )
            .await;
            self.num_obtained_unprocessed_links += data.num_tried();
            self.num_obtained_unprocessed_ok_links += data.num_ok;
            for (url, record) in data.records {
                self.link_data.insert(url, record);
            }
        }

        let mut taken_ok = Vec::new();
        let mut prefix_len = 0;
        for link in &self.unprocessed_links[..self.num_obtained_unprocessed_links] {
            if taken_ok.len() == num_ok {
                break;
            }
            prefix_len += 1;
            if self.link_data.get(link).is_some_and(LinkRecord::is_ok) {
                taken_ok.push(link.clone());
            }
        }
        self.processed_links
            .extend(self.unprocessed_links.drain(..prefix_len));
        self.num_obtained_unprocessed_links -= prefix_len;
        self.num_obtained_unprocessed_ok_links -= taken_ok.len();

        self.sanity_check()?;
        Ok(taken_ok)
    }

    /// Append links never seen before to the unprocessed backlog.
    pub fn add_unprocessed_links(&mut self, links: Vec<String>) -> usize {
        let mut added = 0;
        for link in links {
            if !self.unprocessed_links.contains(&link) && !self.processed_links.contains(&link) {
                self.unprocessed_links.push(link);
                added += 1;
            }
        }
        added
    }

    /// Append a base report and make it active. The first one becomes main.
    pub fn add_base_report(&mut self, report: Report) -> ReportId {
        let index = self.base_reports.len();
        self.base_reports.push(report);
        self.active_base_report = Some(index);
        if self.main_report_id.is_none() {
            self.main_report_id = Some(ReportId::Base(index));
        }
        ReportId::Base(index)
    }

    /// Replace the active base report's text and merge in new sources.
    pub fn update_active_report(
        &mut self,
        text: String,
        evaluation: Option<String>,
        new_sources: &[String],
    ) -> ResearchResult<ReportId> {
        let index = self
            .active_base_report
            .ok_or_else(|| ResearchError::Invariant("no active base report".into()))?;
        let id = ReportId::Base(index);
        let report = get_report_by_id_mut(&mut self.base_reports, &mut self.combined_reports, id)?;
        report.text = text;
        report.evaluation = evaluation;
        for src in new_sources {
            if !report.sources.contains(src) {
                report.sources.push(src.clone());
            }
        }
        Ok(id)
    }

    /// Find the pair to combine next: deepest level first, then base reports.
    pub fn find_ids_to_combine(&self) -> ResearchResult<Option<CombinePlan>> {
        for (k, level) in self.combined_report_id_levels.iter().enumerate().rev() {
            if let Some(parent_ids) =
                get_ids_to_combine(&self.base_reports, &self.combined_reports, level)?
            {
                return Ok(Some(CombinePlan {
                    parent_level: Some(k),
                    parent_ids,
                }));
            }
        }
        let base_level: Vec<ReportId> = (0..self.base_reports.len()).map(ReportId::Base).collect();
        Ok(
            get_ids_to_combine(&self.base_reports, &self.combined_reports, &base_level)?.map(
                |parent_ids| CombinePlan {
                    parent_level: None,
                    parent_ids,
                },
            ),
        )
    }

    /// Record a combined report for `plan`.
    ///
    /// Returns the new id and whether it opened a new top level (in which
    /// case it became the main report).
    pub fn add_combined_report(
        &mut self,
        plan: &CombinePlan,
        text: String,
        evaluation: Option<String>,
    ) -> ResearchResult<(ReportId, bool)> {
        let target_level = plan.parent_level.map_or(0, |k| k + 1);
        if target_level > self.combined_report_id_levels.len() {
            return Err(ResearchError::Invariant(format!(
                "combination level {} skips past {} existing levels",
                target_level,
                self.combined_report_id_levels.len()
            )));
        }
        for parent in &plan.parent_ids {
            if !self.is_report_childless(*parent)? {
                return Err(ResearchError::Invariant(format!(
                    "report {} was already combined",
                    parent
                )));
            }
        }

        let id = ReportId::Combined(self.combined_reports.len());
        self.combined_reports.push(Report {
            text,
            sources: Vec::new(),
            parent_ids: plan.parent_ids.clone(),
            child_id: None,
            evaluation,
        });
        for parent in &plan.parent_ids {
            get_report_by_id_mut(&mut self.base_reports, &mut self.combined_reports, *parent)?
                .child_id = Some(id);
        }

        let new_level = target_level == self.combined_report_id_levels.len();
        if new_level {
            self.combined_report_id_levels.push(vec![id]);
            self.main_report_id = Some(id);
        } else {
            self.combined_report_id_levels[target_level].push(id);
        }
        Ok((id, new_level))
    }

    /// Number of combination levels built so far.
    pub fn num_levels(&self) -> usize {
        self.combined_report_id_levels.len()
    }
}

// ============ Heatseek ============

/// State of a heatseek session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeatseekState {
    pub query: String,
    pub search_queries: Vec<String>,
    /// Every query set used so far, oldest first.
    #[serde(default)]
    pub past_search_queries: Vec<String>,
    pub url_conveyer: UrlConveyer,
    pub doc_conveyer: DocConveyer,
    #[serde(default)]
    pub is_answer_found: bool,
    /// Recorded answers, parallel to `evaluations`.
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub evaluations: Vec<String>,
    #[serde(default)]
    pub num_sources_checked: usize,
}

impl HeatseekState {
    pub fn new(query: impl Into<String>, search_queries: Vec<String>, url_conveyer: UrlConveyer) -> Self {
        Self {
            query: query.into(),
            past_search_queries: search_queries.clone(),
            search_queries,
            url_conveyer,
            ..Default::default()
        }
    }

    pub fn record_answer(&mut self, answer: impl Into<String>, evaluation: impl Into<String>) {
        self.answers.push(answer.into());
        self.evaluations.push(evaluation.into());
    }

    /// The latest `n` (answer, evaluation) pairs, oldest first.
    pub fn recent_answers(&self, n: usize) -> Vec<(&str, &str)> {
        let start = self.answers.len().saturating_sub(n);
        self.answers[start..]
            .iter()
            .zip(&self.evaluations[start..])
            .map(|(a, e)| (a.as_str(), e.as_str()))
            .collect()
    }

    /// Switch to a new set of search queries.
    pub fn replace_search_queries(&mut self, queries: Vec<String>) {
        self.past_search_queries.extend(queries.iter().cloned());
        self.search_queries = queries;
    }
}

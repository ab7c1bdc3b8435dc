//! Prompt templates for both controllers.
//!
//! Every template opens with a distinct first line; the output conventions
//! (markers, JSON shapes) match what `research_harness_core::parse` and
//! [`QueryPlan`]/[`RequeryPlan`] expect.

use research_harness_core::prompt::PromptTemplate;
use serde::Deserialize;

/// Number of search queries requested for a new session.
pub const NUM_SEARCH_QUERIES: usize = 4;

pub const SEARCH_QUERIES: PromptTemplate = PromptTemplate(
    "You are generating web search queries for a research task.

Research request: {query}

Write {num_queries} Google search queries that together will surface the most useful \
sources for this request, and describe the kind of report that would best answer it \
(for example \"a detailed comparison\" or \"a step-by-step guide\").

Reply with JSON only, in this shape:
{\"queries\": [\"...\"], \"report_type\": \"...\"}",
);

/// LLM reply to [`SEARCH_QUERIES`].
#[derive(Debug, Deserialize)]
pub struct QueryPlan {
    pub queries: Vec<String>,
    #[serde(default)]
    pub report_type: Option<String>,
}

pub const WRITE_REPORT: PromptTemplate = PromptTemplate(
    "You are writing a research report from web sources.

Research request: {query}
Report type: {report_type}

Sources:
{texts}

Write the report in Markdown using only facts found in the sources, citing them by URL \
where relevant. After the report, add a line starting with \"REPORT ASSESSMENT:\" \
followed by a short, honest assessment of how complete the report is and what is missing.",
);

pub const ITERATE_REPORT: PromptTemplate = PromptTemplate(
    "You are improving an existing research report with new sources.

Research request: {query}
Report type: {report_type}

Current report:
{report}

New sources:
{texts}

First write \"REPORT ASSESSMENT:\" followed by an assessment of the current report. \
Then write \"ACTION ITEMS:\" followed by the changes the new sources justify. \
Finally write \"NEW REPORT:\" followed by the complete improved report in Markdown.",
);

pub const COMBINE_REPORTS: PromptTemplate = PromptTemplate(
    "You are combining two research reports into one.

Research request: {query}
Report type: {report_type}

Report 1:
{report_1}

Report 2:
{report_2}

Write a single Markdown report that merges the information of both, removing \
repetition and resolving contradictions in favor of the better-supported claim. After the \
report, add a line starting with \"REPORT ASSESSMENT:\" followed by a short assessment.",
);

pub const HEATSEEK_ANSWER: PromptTemplate = PromptTemplate(
    "Answer the question using only the content below.

Question: {query}

Content (from {source}):
{content}

If the content does not answer the question, reply exactly: \
\"Content does not contain needed information.\" Otherwise give a concise answer \
that quotes or paraphrases the content.",
);

pub const HEATSEEK_EVALUATE: PromptTemplate = PromptTemplate(
    "You are grading an answer to a question.

Question: {query}

Answer:
{answer}

Judge how completely and specifically the answer addresses the question. \
Write a one-sentence justification, then a final line \"GRADE: <grade>\" where \
<grade> is one of EXCELLENT, GOOD, MEDIUM, BAD.",
);

pub const HEATSEEK_REQUERY: PromptTemplate = PromptTemplate(
    "You are refining web search queries for a question that has not been answered yet.

Question: {query}

Queries used so far:
{past_queries}

Recent answers and their grades:
{recent_answers}

Propose {num_queries} new Google search queries that are likely to find a complete \
answer, avoiding approaches that already failed.

Reply with JSON only, in this shape:
{\"queries\": [\"...\"]}",
);

/// LLM reply to [`HEATSEEK_REQUERY`].
#[derive(Debug, Deserialize)]
pub struct RequeryPlan {
    pub queries: Vec<String>,
}

/// Format sources for a prompt as numbered blocks headed by their URL.
pub fn format_sources(sources: &[(String, String)]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, (url, text))| format!("[{}] {}\n{}", i + 1, url, text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_have_distinct_first_lines() {
        let firsts: Vec<&str> = [
            SEARCH_QUERIES,
            WRITE_REPORT,
            ITERATE_REPORT,
            COMBINE_REPORTS,
            HEATSEEK_ANSWER,
            HEATSEEK_EVALUATE,
            HEATSEEK_REQUERY,
        ]
        .iter()
        .map(|t| t.0.lines().next().unwrap())
        .collect();
        let mut unique = firsts.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), firsts.len());
    }

    #[test]
    fn test_search_prompt_keeps_json_braces() {
        let p = SEARCH_QUERIES.render(&[("query", "hiking"), ("num_queries", "4")]);
        assert!(p.contains("Research request: hiking"));
        assert!(p.contains("{\"queries\": [\"...\"], \"report_type\": \"...\"}"));
    }

    #[test]
    fn test_format_sources() {
        let out = format_sources(&[
            ("https://a.test".into(), " alpha ".into()),
            ("https://b.test".into(), "beta".into()),
        ]);
        assert!(out.starts_with("[1] https://a.test\nalpha"));
        assert!(out.contains("[2] https://b.test\nbeta"));
    }
}

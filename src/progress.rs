//! Turn progress reporting.
//!
//! A research or heatseek turn can take minutes (searching, fetching dozens
//! of pages, several LLM calls). Reporters let the CLI show what is happening.
//! Progress is emitted on **stderr** so stdout keeps only the reply text.

use std::io::Write;

/// A single progress event within a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResearchProgressEvent {
    /// Running web searches.
    Searching { num_queries: usize },
    /// Fetching a batch of pages.
    FetchingBatch { num_urls: usize },
    /// Writing or improving a report from `num_sources` sources.
    GeneratingReport { num_sources: usize },
    /// Combining two reports.
    Combining { parents: String },
    /// Heatseek: answering from one source.
    EvaluatingSource { source: String },
}

/// Reports turn progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ResearchProgressEvent);
}

/// Human-friendly progress on stderr: "research  fetching  10 pages".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ResearchProgressEvent) {
        let line = match &event {
            ResearchProgressEvent::Searching { num_queries } => {
                format!("research  searching  {} {}\n", num_queries, plural(*num_queries, "query", "queries"))
            }
            ResearchProgressEvent::FetchingBatch { num_urls } => {
                format!("research  fetching  {} {}\n", num_urls, plural(*num_urls, "page", "pages"))
            }
            ResearchProgressEvent::GeneratingReport { num_sources } => format!(
                "research  writing report from {} {}\n",
                num_sources,
                plural(*num_sources, "source", "sources")
            ),
            ResearchProgressEvent::Combining { parents } => {
                format!("research  combining reports {}\n", parents)
            }
            ResearchProgressEvent::EvaluatingSource { source } => {
                format!("heatseek  checking {}\n", source)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ResearchProgressEvent) {
        let obj = match &event {
            ResearchProgressEvent::Searching { num_queries } => serde_json::json!({
                "event": "progress",
                "phase": "searching",
                "n": num_queries
            }),
            ResearchProgressEvent::FetchingBatch { num_urls } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "n": num_urls
            }),
            ResearchProgressEvent::GeneratingReport { num_sources } => serde_json::json!({
                "event": "progress",
                "phase": "generating_report",
                "n": num_sources
            }),
            ResearchProgressEvent::Combining { parents } => serde_json::json!({
                "event": "progress",
                "phase": "combining",
                "parents": parents
            }),
            ResearchProgressEvent::EvaluatingSource { source } => serde_json::json!({
                "event": "progress",
                "phase": "evaluating_source",
                "source": source
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ResearchProgressEvent) {}
}

fn plural(n: usize, one: &'static str, many: &'static str) -> &'static str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse a `--progress` value.
    pub fn from_flag(value: &str) -> anyhow::Result<Self> {
        match value {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode '{}'. Use off, human or json.", other),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

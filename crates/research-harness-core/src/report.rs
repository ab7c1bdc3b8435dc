//! The report tree.
//!
//! Base reports are written from sources; combined reports merge exactly
//! [`NUM_REPORTS_TO_COMBINE`] reports. A report becomes a parent at most
//! once, so the structure is a forest whose roots are the childless reports.
//!
//! Ids are positional: `Base(i)` indexes `base_reports`, `Combined(i)`
//! indexes `combined_reports`. They render as `"3"` and `"c3"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ResearchError, ResearchResult};

/// Number of reports merged by one combine step.
pub const NUM_REPORTS_TO_COMBINE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportId {
    Base(usize),
    Combined(usize),
}

impl ReportId {
    pub fn is_base(&self) -> bool {
        matches!(self, ReportId::Base(_))
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportId::Base(i) => write!(f, "{}", i),
            ReportId::Combined(i) => write!(f, "c{}", i),
        }
    }
}

impl FromStr for ReportId {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ResearchError::Invariant(format!("malformed report id '{}'", s));
        match s.strip_prefix('c') {
            Some(rest) => rest.parse().map(ReportId::Combined).map_err(|_| bad()),
            None => s.parse().map(ReportId::Base).map_err(|_| bad()),
        }
    }
}

impl Serialize for ReportId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One report in the tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub text: String,
    /// Links this report was written from directly (base reports only).
    #[serde(default)]
    pub sources: Vec<String>,
    /// The reports merged into this one (combined reports only).
    #[serde(default)]
    pub parent_ids: Vec<ReportId>,
    /// The combined report this one was merged into, if any.
    #[serde(default)]
    pub child_id: Option<ReportId>,
    /// The model's self-evaluation of the latest revision.
    #[serde(default)]
    pub evaluation: Option<String>,
}

impl Report {
    pub fn base(text: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            text: text.into(),
            sources,
            ..Default::default()
        }
    }
}

/// Look up a report by id.
pub fn get_report_by_id<'a>(
    base_reports: &'a [Report],
    combined_reports: &'a [Report],
    id: ReportId,
) -> ResearchResult<&'a Report> {
    let found = match id {
        ReportId::Base(i) => base_reports.get(i),
        ReportId::Combined(i) => combined_reports.get(i),
    };
    found.ok_or_else(|| ResearchError::Invariant(format!("no report with id {}", id)))
}

pub fn get_report_by_id_mut<'a>(
    base_reports: &'a mut [Report],
    combined_reports: &'a mut [Report],
    id: ReportId,
) -> ResearchResult<&'a mut Report> {
    let found = match id {
        ReportId::Base(i) => base_reports.get_mut(i),
        ReportId::Combined(i) => combined_reports.get_mut(i),
    };
    found.ok_or_else(|| ResearchError::Invariant(format!("no report with id {}", id)))
}

/// Pick the reports to merge next from one level of the tree.
///
/// Takes the trailing run of childless reports in `level`; if it holds at
/// least [`NUM_REPORTS_TO_COMBINE`] reports, returns the first of them.
pub fn get_ids_to_combine(
    base_reports: &[Report],
    combined_reports: &[Report],
    level: &[ReportId],
) -> ResearchResult<Option<Vec<ReportId>>> {
    let mut run_start = level.len();
    for (pos, id) in level.iter().enumerate().rev() {
        if get_report_by_id(base_reports, combined_reports, *id)?.child_id.is_some() {
            break;
        }
        run_start = pos;
    }
    let run = &level[run_start..];
    if run.len() >= NUM_REPORTS_TO_COMBINE {
        Ok(Some(run[..NUM_REPORTS_TO_COMBINE].to_vec()))
    } else {
        Ok(None)
    }
}

/// All links a report draws on: its own sources, then those of its
/// ancestors (depth-first, in parent order).
pub fn get_sources(
    base_reports: &[Report],
    combined_reports: &[Report],
    id: ReportId,
) -> ResearchResult<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        let report = get_report_by_id(base_reports, combined_reports, current)?;
        out.extend(report.sources.iter().cloned());
        stack.extend(report.parent_ids.iter().rev().copied());
    }
    Ok(out)
}

//! Parsing of free-text LLM output.
//!
//! Every place the controllers read structure out of model text goes
//! through this module, so the marker conventions can change (or give way
//! to structured output) without touching controller code. Each parser has
//! a defined fallback instead of failing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker preceding the rewritten report in improvement/combination output.
pub const NEW_REPORT_MARKER: &str = "NEW REPORT:";
/// Marker preceding the model's assessment of a report.
pub const ASSESSMENT_MARKER: &str = "REPORT ASSESSMENT:";
/// Marker preceding the model's list of planned changes.
pub const ACTION_ITEMS_MARKER: &str = "ACTION ITEMS:";
/// Phrase the answer prompt asks for when a source is useless.
pub const INSUFFICIENT_PHRASE: &str = "content does not contain needed information";

/// A report split from its self-evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReport {
    pub report: String,
    pub evaluation: Option<String>,
}

/// Split model output into report text and evaluation.
///
/// - `... NEW REPORT: <report>`: everything before the marker is the
///   evaluation (assessment and action items).
/// - `<report> REPORT ASSESSMENT: <evaluation>`: trailing assessment.
/// - Anything else: the whole text is the report and there is no evaluation.
pub fn parse_report_and_evaluation(text: &str) -> ParsedReport {
    let fallback = || ParsedReport {
        report: text.trim().to_string(),
        evaluation: None,
    };

    if let Some(pos) = text.rfind(NEW_REPORT_MARKER) {
        let report = text[pos + NEW_REPORT_MARKER.len()..].trim();
        if report.is_empty() {
            return fallback();
        }
        let before = text[..pos].trim();
        let before = before.strip_prefix(ASSESSMENT_MARKER).unwrap_or(before).trim();
        return ParsedReport {
            report: report.to_string(),
            evaluation: (!before.is_empty()).then(|| before.to_string()),
        };
    }

    if let Some(pos) = text.rfind(ASSESSMENT_MARKER) {
        let report = text[..pos].trim();
        if report.is_empty() {
            return fallback();
        }
        let evaluation = text[pos + ASSESSMENT_MARKER.len()..].trim();
        return ParsedReport {
            report: report.to_string(),
            evaluation: (!evaluation.is_empty()).then(|| evaluation.to_string()),
        };
    }

    fallback()
}

/// True if an answer says the source could not answer the question.
pub fn is_insufficient_answer(answer: &str) -> bool {
    answer.to_lowercase().contains(INSUFFICIENT_PHRASE)
}

/// Quality grade of a heatseek answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Bad,
    Medium,
    Good,
    Excellent,
}

impl Grade {
    const ALL: [(Grade, &'static str); 4] = [
        (Grade::Excellent, "EXCELLENT"),
        (Grade::Good, "GOOD"),
        (Grade::Medium, "MEDIUM"),
        (Grade::Bad, "BAD"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Excellent => "EXCELLENT",
            Grade::Good => "GOOD",
            Grade::Medium => "MEDIUM",
            Grade::Bad => "BAD",
        }
    }

    /// Whether an answer with this grade goes into the reply.
    pub fn is_usable(&self) -> bool {
        *self != Grade::Bad
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Find the grade in an evaluation.
///
/// A `GRADE:` label wins; otherwise the earliest standalone grade word is
/// used. Returns `None` when no grade word appears.
pub fn parse_grade(evaluation: &str) -> Option<Grade> {
    let upper = evaluation.to_uppercase();
    let haystack = match upper.rfind("GRADE:") {
        Some(pos) => &upper[pos + "GRADE:".len()..],
        None => upper.as_str(),
    };
    Grade::ALL
        .iter()
        .filter_map(|(grade, word)| find_word(haystack, word).map(|pos| (pos, *grade)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, grade)| grade)
}

/// Byte position of `word` in `text` as a whole word.
fn find_word(text: &str, word: &str) -> Option<usize> {
    text.match_indices(word).map(|(pos, _)| pos).find(|&pos| {
        let before = text[..pos].chars().next_back();
        let after = text[pos + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Extract the first JSON object or array from model output.
///
/// Tolerates code fences and surrounding prose. Brackets inside JSON
/// strings are ignored when matching.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

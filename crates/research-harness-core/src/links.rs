//! Per-URL fetch results.
//!
//! A [`LinkRecord`] is created once per fetched URL and never changes except
//! for the lazily computed token count. A record with `error` set is unusable
//! and never counts toward a success quota.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::tokens::TokenCounter;

/// Pages with fewer words than this are treated as failed retrievals.
pub const DEFAULT_MIN_OK_WORDS: usize = 80;

/// What the fetcher produced for one URL: page text, or an error description.
pub type FetchOutcome = Result<String, String>;

/// Structured result of fetching one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinkRecord {
    pub text: Option<String>,
    pub error: Option<String>,
    pub num_tokens: Option<usize>,
}

impl LinkRecord {
    /// Successful record holding `text`.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            error: None,
            num_tokens: None,
        }
    }

    /// Failed record.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            text: None,
            error: Some(error.into()),
            num_tokens: None,
        }
    }

    /// Convert a raw fetch outcome, rejecting pages that are too short to be useful.
    pub fn from_fetch(outcome: FetchOutcome, min_words: usize) -> Self {
        match outcome {
            Err(e) => Self::failed(e),
            Ok(text) => {
                let words = text.split_whitespace().count();
                if words < min_words {
                    Self::failed(format!(
                        "Too little text ({} words, need at least {})",
                        words, min_words
                    ))
                } else {
                    Self::ok(text)
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.text.is_some()
    }

    /// Text of a successful record, empty for failures.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Token count, computing and caching it on first use.
    pub fn tokens(&mut self, counter: &dyn TokenCounter) -> usize {
        if let Some(n) = self.num_tokens {
            return n;
        }
        let n = counter.count(self.text_or_empty());
        self.num_tokens = Some(n);
        n
    }
}

/// Drop repeated strings, keeping the first occurrence of each.
pub fn remove_duplicates_keep_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(Into::into)
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Interleave ranked result lists: all first results, then all second results, and so on.
pub fn interleave_ranked(lists: &[Vec<String>]) -> Vec<String> {
    let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::new();
    for rank in 0..longest {
        for list in lists {
            if let Some(link) = list.get(rank) {
                out.push(link.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::HeuristicTokenCounter;

    #[test]
    fn test_short_page_is_error() {
        let rec = LinkRecord::from_fetch(Ok("only a few words".into()), 80);
        assert!(!rec.is_ok());
        assert!(rec.error.unwrap().contains("Too little text"));
    }

    #[test]
    fn test_long_page_is_ok() {
        let rec = LinkRecord::from_fetch(Ok("word ".repeat(80)), 80);
        assert!(rec.is_ok());
    }

    #[test]
    fn test_fetch_error_kept() {
        let rec = LinkRecord::from_fetch(Err("timed out".into()), 80);
        assert_eq!(rec.error.as_deref(), Some("timed out"));
        assert!(rec.text.is_none());
    }

    #[test]
    fn test_tokens_backfilled_once() {
        let mut rec = LinkRecord::ok("abcdefgh");
        assert_eq!(rec.num_tokens, None);
        assert_eq!(rec.tokens(&HeuristicTokenCounter), 2);
        assert_eq!(rec.num_tokens, Some(2));
    }

    #[test]
    fn test_dedup_keeps_first() {
        let out = remove_duplicates_keep_order(["a", "b", "a", "c", "b"]);
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_interleave() {
        let lists = vec![
            vec!["a1".to_string(), "a2".to_string()],
            vec!["b1".to_string()],
            vec!["c1".to_string(), "c2".to_string(), "c3".to_string()],
        ];
        assert_eq!(
            interleave_ranked(&lists),
            vec!["a1", "b1", "c1", "a2", "c2", "c3"]
        );
    }
}

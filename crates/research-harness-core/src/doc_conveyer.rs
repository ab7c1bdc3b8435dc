//! Token-bounded delivery of fetched documents.
//!
//! The [`DocConveyer`] queues source documents and hands them out in order,
//! honoring a per-call token budget. A document larger than the budget is
//! split into ordered parts ([`split_text_by_tokens`]) that share a stem id
//! and record their byte offset into the original text, so consumers can tell
//! which parts belong together and in what order.
//!
//! # Guarantees
//!
//! - Parts of one document are delivered in original order, never interleaved
//!   with other documents.
//! - Concatenating the parts of a split document reproduces its text exactly.
//! - A document within budget is delivered unchanged as a single item.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::tokens::{initial_target, shrink_target, snap_to_char_boundary, TokenCounter};

/// Position of a piece within a split source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocPart {
    /// Shared by every part cut from the same source document.
    pub stem: String,
    /// Unique id: `"{stem}-{n}"`, or `"{parent}.{n}"` for parts split again.
    pub part_id: String,
    /// 1-based index within the split that produced this part.
    pub index: usize,
    /// Byte offset of this part in the original document.
    pub start_index: usize,
    /// True for the final part of the source document.
    pub is_last: bool,
}

/// A document (or document part) waiting for or returned by the conveyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConveyedDoc {
    pub source: String,
    pub text: String,
    pub num_tokens: usize,
    #[serde(default)]
    pub part: Option<DocPart>,
}

impl ConveyedDoc {
    /// True if this item completes its source document.
    pub fn completes_source(&self) -> bool {
        self.part.as_ref().map_or(true, |p| p.is_last)
    }

    /// Label for display, e.g. `https://a.test (part 2)`.
    pub fn label(&self) -> String {
        match &self.part {
            Some(p) => format!("{} (part {})", self.source, p.part_id.trim_start_matches(&format!("{}-", p.stem))),
            None => self.source.clone(),
        }
    }
}

/// Split `text` into consecutive pieces of at most `max_tokens` each.
///
/// Returns `(byte_offset, piece)` pairs. Cuts prefer whitespace in the second
/// half of a piece. Each retry strictly shrinks the cut, and a single
/// character is always accepted, so splitting terminates for any counter.
pub fn split_text_by_tokens(
    text: &str,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<(usize, String)> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let rest = &text[start..];
        let rest_tokens = counter.count(rest);
        if rest_tokens <= max_tokens {
            parts.push((start, rest.to_string()));
            break;
        }
        let min_cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        let mut target = initial_target(rest, rest_tokens, max_tokens);
        let cut = loop {
            let mut cut = snap_to_char_boundary(rest, target);
            if cut < min_cut {
                cut = min_cut;
            } else if let Some(ws_end) = rest[..cut]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
            {
                if ws_end > cut / 2 {
                    cut = ws_end;
                }
            }
            let tokens = counter.count(&rest[..cut]);
            if tokens <= max_tokens || cut == min_cut {
                break cut;
            }
            target = shrink_target(cut, tokens, max_tokens);
        };
        parts.push((start, rest[..cut].to_string()));
        start += cut;
    }
    parts
}

/// Queue of documents not yet delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocConveyer {
    pending: VecDeque<ConveyedDoc>,
    next_stem: u64,
    num_delivered: usize,
}

impl DocConveyer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `(source, text)` documents behind anything already pending.
    pub fn add_docs<I>(&mut self, docs: I, counter: &dyn TokenCounter)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (source, text) in docs {
            let num_tokens = counter.count(&text);
            self.pending.push_back(ConveyedDoc {
                source,
                text,
                num_tokens,
                part: None,
            });
        }
    }

    /// Dequeue documents until `max_full_docs` source documents are complete
    /// or the next item would push the total past `max_tokens`.
    ///
    /// The first item is always delivered (split first if needed). A piece
    /// that cannot be split any further is delivered over budget.
    pub fn get_next_docs(
        &mut self,
        max_tokens: usize,
        max_full_docs: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<ConveyedDoc> {
        let mut out = Vec::new();
        let mut used = 0;
        let mut full_docs = 0;
        while full_docs < max_full_docs {
            let Some(front_tokens) = self.pending.front().map(|d| d.num_tokens) else {
                break;
            };
            if front_tokens > max_tokens && self.split_front(max_tokens, counter) {
                continue;
            }
            if !out.is_empty() && used + front_tokens > max_tokens {
                break;
            }
            let Some(doc) = self.pending.pop_front() else {
                break;
            };
            used += doc.num_tokens;
            if doc.completes_source() {
                full_docs += 1;
            }
            out.push(doc);
        }
        self.num_delivered += out.len();
        out
    }

    /// Replace the front document with its parts. Returns false, leaving the
    /// queue untouched, when the text does not split into more than one piece.
    fn split_front(&mut self, max_tokens: usize, counter: &dyn TokenCounter) -> bool {
        let Some(doc) = self.pending.pop_front() else {
            return false;
        };
        let pieces = split_text_by_tokens(&doc.text, max_tokens, counter);
        let count = pieces.len();
        if count < 2 {
            self.pending.push_front(doc);
            return false;
        }

        let (stem, id_prefix, base_offset, parent_is_last) = match &doc.part {
            Some(p) => (p.stem.clone(), format!("{}.", p.part_id), p.start_index, p.is_last),
            None => {
                self.next_stem += 1;
                let stem = format!("doc{}", self.next_stem);
                let prefix = format!("{}-", stem);
                (stem, prefix, 0, true)
            }
        };

        for (i, (offset, text)) in pieces.into_iter().enumerate().rev() {
            let num_tokens = counter.count(&text);
            self.pending.push_front(ConveyedDoc {
                source: doc.source.clone(),
                text,
                num_tokens,
                part: Some(DocPart {
                    stem: stem.clone(),
                    part_id: format!("{}{}", id_prefix, i + 1),
                    index: i + 1,
                    start_index: base_offset + offset,
                    is_last: parent_is_last && i + 1 == count,
                }),
            });
        }
        true
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn num_delivered(&self) -> usize {
        self.num_delivered
    }
}

//! Token counting and token-budget truncation.
//!
//! All budgeting in the crate goes through the [`TokenCounter`] trait so a
//! real tokenizer can be plugged in. The default [`HeuristicTokenCounter`]
//! uses the same 4 chars ≈ 1 token ratio as the ingestion chunker.
//!
//! Truncation never assumes the counter is linear in text length: a cut is
//! re-counted and, if still too long, the target length shrinks in
//! proportion to the overshoot (never by less than one byte and never by more
//! than half per round), so every loop terminates.

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Counts tokens in text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `ceil(chars / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
pub fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Next target length after a cut of `target` bytes came out at `actual`
/// tokens against a limit of `max_tokens`.
pub(crate) fn shrink_target(target: usize, actual: usize, max_tokens: usize) -> usize {
    let proportional = (target as u128 * max_tokens as u128 / actual.max(1) as u128) as usize;
    proportional.max(target / 2).min(target.saturating_sub(1))
}

/// Initial byte-length estimate for a prefix of `text` holding `max_tokens`.
pub(crate) fn initial_target(text: &str, total_tokens: usize, max_tokens: usize) -> usize {
    (text.len() as u128 * max_tokens as u128 / total_tokens.max(1) as u128) as usize
}

/// Return the longest prefix of `text` found that fits in `max_tokens`.
pub fn limit_tokens_in_text<'a>(
    text: &'a str,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> &'a str {
    let total = counter.count(text);
    if total <= max_tokens {
        return text;
    }
    let mut target = initial_target(text, total, max_tokens);
    loop {
        let cut = snap_to_char_boundary(text, target);
        let piece = &text[..cut];
        let tokens = counter.count(piece);
        if tokens <= max_tokens || cut == 0 {
            return piece;
        }
        target = shrink_target(cut, tokens, max_tokens);
    }
}

/// Truncate a set of texts so their total fits in `max_total_tokens`.
///
/// Texts shorter than an equal share are kept whole and the budget they leave
/// unused is redistributed among the longer ones, which are cut to the final
/// share. Order is preserved.
pub fn limit_tokens_in_texts(
    texts: &[String],
    max_total_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<String> {
    let counts: Vec<usize> = texts.iter().map(|t| counter.count(t)).collect();
    if counts.iter().sum::<usize>() <= max_total_tokens {
        return texts.to_vec();
    }

    let mut budget = max_total_tokens;
    let mut unresolved: Vec<usize> = (0..texts.len()).collect();
    let share = loop {
        if unresolved.is_empty() {
            break 0;
        }
        let share = budget / unresolved.len();
        let (small, large): (Vec<usize>, Vec<usize>) =
            unresolved.iter().partition(|&&i| counts[i] <= share);
        if small.is_empty() {
            break share;
        }
        budget -= small.iter().map(|&i| counts[i]).sum::<usize>();
        unresolved = large;
    };

    texts
        .iter()
        .enumerate()
        .map(|(i, t)| {
            if unresolved.contains(&i) {
                limit_tokens_in_text(t, share, counter).to_string()
            } else {
                t.clone()
            }
        })
        .collect()
}

//! Prompt templates and LLM invocation helpers.
//!
//! Templates use `{name}` placeholders and are rendered in a single pass, so
//! braces that appear inside substituted page text are never re-expanded.
//! [`invoke_json`] is the enforced-format call: it retries until the output
//! deserializes, then gives up with [`ResearchError::Format`].

use serde::de::DeserializeOwned;

use crate::error::{ResearchError, ResearchResult};
use crate::parse::extract_json;
use crate::traits::{ChatModel, TokenSink};

/// Service name used in upstream errors from the language model.
pub const LLM_SERVICE: &str = "language model";

/// A prompt with `{name}` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate(pub &'static str);

impl PromptTemplate {
    /// Substitute placeholders. Unknown placeholders are left as written.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let template = self.0;
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}');
            let name = close.map(|c| &after[..c]);
            match name.and_then(|n| vars.iter().find(|(k, _)| *k == n)) {
                Some((k, v)) => {
                    out.push_str(v);
                    rest = &after[k.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Run a completion, wrapping transport failures.
pub async fn invoke_text(model: &dyn ChatModel, prompt: &str) -> ResearchResult<String> {
    model
        .invoke(prompt)
        .await
        .map_err(|e| ResearchError::upstream(LLM_SERVICE, e))
}

/// Run a streaming completion, wrapping transport failures.
pub async fn invoke_text_streaming(
    model: &dyn ChatModel,
    prompt: &str,
    sink: TokenSink<'_>,
) -> ResearchResult<String> {
    model
        .invoke_streaming(prompt, sink)
        .await
        .map_err(|e| ResearchError::upstream(LLM_SERVICE, e))
}

/// Run a completion whose output must deserialize into `T`.
///
/// Makes up to `max_attempts` calls (at least one). From the second call on,
/// the prompt carries a reminder to answer with JSON only.
pub async fn invoke_json<T: DeserializeOwned>(
    model: &dyn ChatModel,
    prompt: &str,
    max_attempts: u32,
) -> ResearchResult<T> {
    let attempts = max_attempts.max(1);
    let retry_prompt = format!(
        "{}\n\nYour previous reply could not be parsed. Reply with valid JSON only, no commentary.",
        prompt
    );
    let mut last_output = String::new();
    for attempt in 1..=attempts {
        let p = if attempt == 1 { prompt } else { retry_prompt.as_str() };
        let output = invoke_text(model, p).await?;
        if let Some(json) = extract_json(&output) {
            if let Ok(value) = serde_json::from_str::<T>(json) {
                return Ok(value);
            }
        }
        tracing::debug!(attempt, "LLM output did not parse as JSON");
        last_output = output;
    }
    Err(ResearchError::Format {
        attempts,
        last_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl ChatModel for Scripted {
        async fn invoke(&self, _prompt: &str) -> anyhow::Result<String> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                anyhow::bail!("out of replies");
            }
            Ok(replies.remove(0).to_string())
        }
    }

    #[test]
    fn test_render_single_pass() {
        let t = PromptTemplate("Q: {query}\nText: {text}\nKeep {unknown} and {");
        let out = t.render(&[("query", "hiking"), ("text", "literal {query} here")]);
        assert_eq!(out, "Q: hiking\nText: literal {query} here\nKeep {unknown} and {");
    }

    #[tokio::test]
    async fn test_invoke_json_retries_until_parse() {
        let model = Scripted(Mutex::new(vec!["not json", "```json\n[\"a\",\"b\"]\n```"]));
        let out: Vec<String> = invoke_json(&model, "give queries", 3).await.unwrap();
        assert_eq!(out, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invoke_json_format_error_keeps_last_output() {
        let model = Scripted(Mutex::new(vec!["nope", "still nope"]));
        let err = invoke_json::<Vec<String>>(&model, "p", 2).await.unwrap_err();
        match err {
            ResearchError::Format {
                attempts,
                last_output,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_output, "still nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_upstream() {
        let model = Scripted(Mutex::new(vec![]));
        let err = invoke_text(&model, "p").await.unwrap_err();
        assert!(matches!(err, ResearchError::Upstream { service: LLM_SERVICE, .. }));
    }
}

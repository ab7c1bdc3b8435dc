//! Error taxonomy for research turns.
//!
//! Only failures that must stop a turn live here. Per-URL fetch failures are
//! data ([`LinkRecord::error`](crate::links::LinkRecord)), and user-input
//! problems (no report yet, nothing to combine) are returned as reply text.

use thiserror::Error;

/// Result alias for controller and conveyer operations.
pub type ResearchResult<T> = Result<T, ResearchError>;

/// Errors that abort a research or heatseek turn.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// An upstream API (web search, LLM) failed. Shown to the user as an apology;
    /// the cause is kept for logs.
    #[error("trouble with {service}: {source}")]
    Upstream {
        /// Human-readable service name, e.g. `"web search"`.
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The LLM never produced output in the required format.
    #[error("LLM output did not match the expected format after {attempts} attempts")]
    Format {
        /// Number of attempts made.
        attempts: u32,
        /// Raw text of the final attempt, for diagnosis.
        last_output: String,
    },

    /// Persisted bookkeeping no longer adds up. Never recovered.
    #[error("internal state invariant violated: {0}")]
    Invariant(String),

    /// The collection store failed.
    #[error("collection store error: {0}")]
    Store(#[source] anyhow::Error),

    /// Persisted state could not be (de)serialized.
    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ResearchError {
    /// Wrap an upstream failure.
    pub fn upstream(service: &'static str, source: impl Into<anyhow::Error>) -> Self {
        ResearchError::Upstream {
            service,
            source: source.into(),
        }
    }

    /// Wrap a store failure.
    pub fn store(source: impl Into<anyhow::Error>) -> Self {
        ResearchError::Store(source.into())
    }

    /// Text suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            ResearchError::Upstream { service, .. } => format!(
                "Apologies, I ran into some trouble with the {}. Please try again in a moment.",
                service
            ),
            ResearchError::Format { .. } => {
                "Apologies, the language model returned a response I could not understand. Please try again."
                    .to_string()
            }
            ResearchError::Invariant(_) | ResearchError::Store(_) | ResearchError::Serde(_) => {
                "Apologies, an internal error occurred while processing your request.".to_string()
            }
        }
    }

    /// True for failures that indicate corrupted state rather than a transient problem.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResearchError::Invariant(_) | ResearchError::Serde(_))
    }
}

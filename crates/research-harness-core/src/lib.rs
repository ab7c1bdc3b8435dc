//! # Research Harness Core
//!
//! Runtime-free logic for iterative web research: the URL and document
//! conveyers, token budgeting, the report tree, persisted session state,
//! command parsing and LLM-output parsing.
//!
//! This crate has no tokio, sqlx or network dependencies. Everything that
//! talks to the outside world is reached through the traits in [`traits`]
//! and [`store`], which the `research-harness` crate implements.

pub mod chunk;
pub mod command;
pub mod doc_conveyer;
pub mod error;
pub mod links;
pub mod parse;
pub mod prompt;
pub mod report;
pub mod state;
pub mod store;
pub mod tokens;
pub mod traits;
pub mod url_conveyer;

pub use error::{ResearchError, ResearchResult};

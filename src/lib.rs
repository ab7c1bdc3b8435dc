//! # Research Harness
//!
//! An iterative web research assistant. Given a query it searches the web,
//! fetches pages, writes a report with an LLM, and on later turns folds in
//! more sources, refines reports and merges them into higher-level reports.
//! A second mode, heatseek, hunts for one specific answer source by source.
//!
//! Session state lives in the metadata of a per-session collection; fetched
//! pages are chunked into the same collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Search   │──▶│ URL / doc   │──▶│  LLM prompts │
//! │ + Fetch  │   │ conveyers   │   │ report/grade │
//! └──────────┘   └─────────────┘   └──────┬───────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!               ┌──────────┐        ┌──────────┐
//!               │   CLI    │        │   HTTP   │
//!               │   (rh)   │        │  server  │
//!               └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rh init
//! rh research new "best hiking trails in Colorado"
//! rh --collection rr-best-hiking-trails-in-colorado research auto 3
//! rh --collection rr-best-hiking-trails-in-colorado research view
//! rh heatseek "who designed the first transistor radio"
//! rh serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite collection store |
//! | [`collections`] | Collection naming for new sessions |
//! | [`embedding`] | Optional chunk embeddings |
//! | [`http`] | Shared HTTP retry helpers |
//! | [`llm`] | OpenAI-compatible chat model |
//! | [`websearch`] | Web search providers |
//! | [`fetch`] | Concurrent page fetcher |
//! | [`extract`] | HTML / PDF text extraction |
//! | [`prompts`] | Prompt templates |
//! | [`progress`] | Progress reporting on stderr |
//! | [`services`] | Collaborator wiring and turn replies |
//! | [`research`] | Research mode controller |
//! | [`heatseek`] | Heatseek mode controller |
//! | [`server`] | HTTP server |

pub mod collections;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod fetch;
pub mod heatseek;
pub mod http;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod prompts;
pub mod research;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod websearch;

pub use services::{Reply, Services};

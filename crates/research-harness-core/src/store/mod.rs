//! Collection storage abstraction.
//!
//! A collection is a named bucket of ingested source chunks plus a metadata
//! dictionary. The metadata is the only place research and heatseek state
//! live between turns (see [`crate::state`]).
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`exists`](CollectionStore::exists) | Check whether a name is taken |
//! | [`create`](CollectionStore::create) | Create a collection with initial metadata |
//! | [`get_metadata`](CollectionStore::get_metadata) | Read the metadata dictionary |
//! | [`save_metadata`](CollectionStore::save_metadata) | Replace the metadata dictionary |
//! | [`ingest`](CollectionStore::ingest) | Chunk and store source documents |
//! | [`list`](CollectionStore::list) | Enumerate collections |
//!
//! Implementations must be `Send + Sync`. Names are validated with
//! [`validate_collection_name`] before anything is created.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Metadata dictionary attached to a collection.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Shortest accepted collection name.
pub const MIN_NAME_LEN: usize = 3;
/// Longest accepted collection name.
pub const MAX_NAME_LEN: usize = 63;

/// A source document to ingest into a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestDoc {
    pub source: String,
    pub text: String,
}

impl IngestDoc {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// One row of [`CollectionStore::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub created_at: i64,
    pub num_chunks: usize,
    /// `"research"`, `"heatseek"` or `"empty"`, derived from the metadata keys.
    pub kind: String,
}

/// Check a collection name: 3-63 chars of `[a-z0-9-]`, alphanumeric at both ends.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let len = name.len();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        bail!(
            "collection name '{}' must be {}-{} characters",
            name,
            MIN_NAME_LEN,
            MAX_NAME_LEN
        );
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        bail!(
            "collection name '{}' may only contain lowercase letters, digits and '-'",
            name
        );
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(name.as_bytes()[0]) || !alnum(name.as_bytes()[len - 1]) {
        bail!("collection name '{}' must start and end with a letter or digit", name);
    }
    Ok(())
}

/// Classify a collection by which state key its metadata carries.
pub fn collection_kind(metadata: &Metadata) -> &'static str {
    if metadata.contains_key(crate::state::RESEARCH_STATE_KEY) {
        "research"
    } else if metadata.contains_key(crate::state::HEATSEEK_STATE_KEY) {
        "heatseek"
    } else {
        "empty"
    }
}

/// Abstract collection backend.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Create a collection. Fails if the name is invalid or taken.
    async fn create(&self, name: &str, metadata: &Metadata) -> Result<()>;

    /// Fails if the collection does not exist.
    async fn get_metadata(&self, name: &str) -> Result<Metadata>;

    async fn save_metadata(&self, name: &str, metadata: &Metadata) -> Result<()>;

    /// Chunk and store documents; returns the number of chunks written.
    async fn ingest(&self, name: &str, docs: &[IngestDoc]) -> Result<usize>;

    async fn list(&self) -> Result<Vec<CollectionSummary>>;
}

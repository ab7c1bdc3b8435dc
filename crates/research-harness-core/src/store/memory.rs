//! In-memory [`CollectionStore`] for tests and embedding into other hosts.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Ingested
//! documents are chunked exactly like the SQLite store does, but no vectors
//! are computed.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{
    collection_kind, validate_collection_name, CollectionStore, CollectionSummary, IngestDoc,
    Metadata,
};
use crate::chunk::{chunk_text, Chunk};

struct StoredCollection {
    metadata: Metadata,
    created_at: i64,
    chunks: Vec<Chunk>,
}

/// In-memory collection store.
pub struct InMemoryCollectionStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
    chunk_max_tokens: usize,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::with_chunk_tokens(700)
    }

    pub fn with_chunk_tokens(chunk_max_tokens: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            chunk_max_tokens,
        }
    }

    /// Stored chunks of a collection, in ingestion order.
    pub fn chunks(&self, name: &str) -> Result<Vec<Chunk>> {
        let guard = self.read()?;
        let coll = guard
            .get(name)
            .ok_or_else(|| anyhow!("collection '{}' does not exist", name))?;
        Ok(coll.chunks.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredCollection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("collection store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredCollection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("collection store lock poisoned"))
    }
}

impl Default for InMemoryCollectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn create(&self, name: &str, metadata: &Metadata) -> Result<()> {
        validate_collection_name(name)?;
        let mut guard = self.write()?;
        if guard.contains_key(name) {
            bail!("collection '{}' already exists", name);
        }
        guard.insert(
            name.to_string(),
            StoredCollection {
                metadata: metadata.clone(),
                created_at: chrono::Utc::now().timestamp(),
                chunks: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        self.read()?
            .get(name)
            .map(|c| c.metadata.clone())
            .ok_or_else(|| anyhow!("collection '{}' does not exist", name))
    }

    async fn save_metadata(&self, name: &str, metadata: &Metadata) -> Result<()> {
        let mut guard = self.write()?;
        let coll = guard
            .get_mut(name)
            .ok_or_else(|| anyhow!("collection '{}' does not exist", name))?;
        coll.metadata = metadata.clone();
        Ok(())
    }

    async fn ingest(&self, name: &str, docs: &[IngestDoc]) -> Result<usize> {
        let chunks: Vec<Chunk> = docs
            .iter()
            .flat_map(|d| chunk_text(&d.source, &d.text, self.chunk_max_tokens))
            .collect();
        let count = chunks.len();
        let mut guard = self.write()?;
        let coll = guard
            .get_mut(name)
            .ok_or_else(|| anyhow!("collection '{}' does not exist", name))?;
        coll.chunks.extend(chunks);
        Ok(count)
    }

    async fn list(&self) -> Result<Vec<CollectionSummary>> {
        let guard = self.read()?;
        let mut out: Vec<CollectionSummary> = guard
            .iter()
            .map(|(name, c)| CollectionSummary {
                name: name.clone(),
                created_at: c.created_at,
                num_chunks: c.chunks.len(),
                kind: collection_kind(&c.metadata).to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_metadata_roundtrip() {
        let store = InMemoryCollectionStore::new();
        assert!(!store.exists("rr-test").await.unwrap());
        store.create("rr-test", &Metadata::new()).await.unwrap();
        assert!(store.exists("rr-test").await.unwrap());

        let mut md = Metadata::new();
        md.insert("rr_data".into(), serde_json::Value::String("{}".into()));
        store.save_metadata("rr-test", &md).await.unwrap();
        assert_eq!(store.get_metadata("rr-test").await.unwrap(), md);

        let list = store.list().await.unwrap();
        assert_eq!(list[0].kind, "research");
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_names() {
        let store = InMemoryCollectionStore::new();
        store.create("abc", &Metadata::new()).await.unwrap();
        assert!(store.create("abc", &Metadata::new()).await.is_err());
        assert!(store.create("A!", &Metadata::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_chunks_documents() {
        let store = InMemoryCollectionStore::with_chunk_tokens(5);
        store.create("abc", &Metadata::new()).await.unwrap();
        let n = store
            .ingest(
                "abc",
                &[IngestDoc::new("u1", "one two three four five six seven eight")],
            )
            .await
            .unwrap();
        assert!(n > 1);
        assert_eq!(store.chunks("abc").unwrap().len(), n);
        assert!(store.ingest("missing", &[]).await.is_err());
    }
}

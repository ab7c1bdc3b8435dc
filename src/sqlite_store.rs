//! SQLite-backed [`CollectionStore`].
//!
//! Collections are rows of `collections`; metadata is kept as a JSON text
//! column and replaced wholesale on save. Ingesting a source replaces any
//! chunks previously stored for that source in the same collection.
//! When an embedding provider is configured, new chunks are embedded in
//! batches after the insert commits; embedding failures are logged and do
//! not fail the ingest.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use research_harness_core::chunk::{chunk_text, Chunk};
use research_harness_core::store::{
    collection_kind, validate_collection_name, CollectionStore, CollectionSummary, IngestDoc,
    Metadata,
};

use crate::config::Config;
use crate::embedding::{create_provider, vec_to_blob, EmbeddingProvider};

pub struct SqliteCollectionStore {
    pool: SqlitePool,
    chunk_max_tokens: usize,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    embed_batch_size: usize,
}

impl SqliteCollectionStore {
    pub fn new(pool: SqlitePool, chunk_max_tokens: usize) -> Self {
        Self {
            pool,
            chunk_max_tokens,
            embedder: None,
            embed_batch_size: 64,
        }
    }

    /// Connect, migrate and wire the configured embedding provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::migrate_pool(&pool).await?;
        let mut store = Self::new(pool, config.chunking.max_tokens);
        if config.embedding.is_enabled() {
            store.embedder = Some(create_provider(&config.embedding)?);
            store.embed_batch_size = config.embedding.batch_size.max(1);
        }
        Ok(store)
    }

    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        self.embedder = Some(embedder);
        self.embed_batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Chunks of one collection in `(source, chunk_index)` order.
    pub async fn chunks(&self, name: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, source, chunk_index, text, hash FROM chunks WHERE collection = ? ORDER BY source, chunk_index",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| Chunk {
                id: row.get("id"),
                source: row.get("source"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }

    async fn embed_chunks(&self, name: &str, embedder: &dyn EmbeddingProvider, chunks: &[Chunk]) -> Result<usize> {
        let mut written = 0;
        for batch in chunks.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            for (chunk, vector) in batch.iter().zip(&vectors) {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, collection, model, dims, embedding)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(chunk_id) DO UPDATE SET
                        model = excluded.model,
                        dims = excluded.dims,
                        embedding = excluded.embedding
                    "#,
                )
                .bind(&chunk.id)
                .bind(name)
                .bind(embedder.model_name())
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .execute(&self.pool)
                .await?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl CollectionStore for SqliteCollectionStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT name FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn create(&self, name: &str, metadata: &Metadata) -> Result<()> {
        validate_collection_name(name)?;
        let json = serde_json::to_string(metadata)?;
        let result = sqlx::query(
            "INSERT INTO collections (name, metadata_json, created_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("collection '{}' already exists", name);
        }
        Ok(())
    }

    async fn get_metadata(&self, name: &str) -> Result<Metadata> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT metadata_json FROM collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        let json = json.ok_or_else(|| anyhow!("collection '{}' does not exist", name))?;
        serde_json::from_str(&json)
            .with_context(|| format!("corrupt metadata for collection '{}'", name))
    }

    async fn save_metadata(&self, name: &str, metadata: &Metadata) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        let result = sqlx::query("UPDATE collections SET metadata_json = ? WHERE name = ?")
            .bind(json)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("collection '{}' does not exist", name);
        }
        Ok(())
    }

    async fn ingest(&self, name: &str, docs: &[IngestDoc]) -> Result<usize> {
        if !self.exists(name).await? {
            bail!("collection '{}' does not exist", name);
        }

        let mut tx = self.pool.begin().await?;
        let mut new_chunks = Vec::new();
        for doc in docs {
            sqlx::query(
                "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE collection = ? AND source = ?)",
            )
            .bind(name)
            .bind(&doc.source)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM chunks WHERE collection = ? AND source = ?")
                .bind(name)
                .bind(&doc.source)
                .execute(&mut *tx)
                .await?;

            for chunk in chunk_text(&doc.source, &doc.text, self.chunk_max_tokens) {
                sqlx::query(
                    "INSERT INTO chunks (id, collection, source, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(name)
                .bind(&chunk.source)
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(&chunk.hash)
                .execute(&mut *tx)
                .await?;
                new_chunks.push(chunk);
            }
        }
        tx.commit().await?;
        tracing::debug!(collection = name, docs = docs.len(), chunks = new_chunks.len(), "ingested documents");

        if let Some(embedder) = &self.embedder {
            match self.embed_chunks(name, embedder.as_ref(), &new_chunks).await {
                Ok(n) => tracing::debug!(collection = name, vectors = n, "embedded chunks"),
                Err(e) => tracing::warn!(collection = name, error = %e, "embedding failed; chunks kept without vectors"),
            }
        }
        Ok(new_chunks.len())
    }

    async fn list(&self) -> Result<Vec<CollectionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name, c.metadata_json, c.created_at,
                   (SELECT COUNT(*) FROM chunks k WHERE k.collection = c.name) AS num_chunks
            FROM collections c
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            let num_chunks: i64 = row.get("num_chunks");
            out.push(CollectionSummary {
                name: row.get("name"),
                created_at: row.get("created_at"),
                num_chunks: num_chunks as usize,
                kind: collection_kind(&metadata).to_string(),
            });
        }
        Ok(out)
    }
}

//! Collection naming for new sessions.
//!
//! A new research or heatseek session gets its own collection named from
//! the query: `{prefix}{slug}`, then `-2`, `-3`, ... until the name is free.
//! If the store still refuses the name, one retry uses a random 8-hex
//! suffix.

use anyhow::{Context, Result};
use uuid::Uuid;

use research_harness_core::store::{CollectionStore, Metadata, MAX_NAME_LEN};

/// Words of the query used in the slug.
const SLUG_WORDS: usize = 6;
/// Room left for a `-NNN` or `-xxxxxxxx` suffix.
const SUFFIX_RESERVE: usize = 9;
/// Numeric suffixes tried before giving up on readable names.
const MAX_NUMERIC_SUFFIX: usize = 999;

/// Lowercase `[a-z0-9-]` slug of the first words of `query`, at most `max_len` bytes.
pub fn slugify(query: &str, max_len: usize) -> String {
    let mut slug = String::new();
    for word in query.split_whitespace().take(SLUG_WORDS) {
        for c in word.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug: String = slug.chars().take(max_len).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.trim_start_matches('-').to_string()
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Pick a free collection name for `query`.
pub async fn collection_name_for_query(
    query: &str,
    prefix: &str,
    store: &dyn CollectionStore,
) -> Result<String> {
    let room = MAX_NAME_LEN.saturating_sub(prefix.len() + SUFFIX_RESERVE);
    let slug = slugify(query, room);
    let base = if slug.is_empty() {
        format!("{}query", prefix)
    } else {
        format!("{}{}", prefix, slug)
    };

    if !store.exists(&base).await? {
        return Ok(base);
    }
    for n in 2..=MAX_NUMERIC_SUFFIX {
        let candidate = format!("{}-{}", base, n);
        if !store.exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Ok(format!("{}-{}", base, random_suffix()))
}

/// Create a collection for `query`, falling back to a random suffix if the
/// store rejects the generated name.
pub async fn create_collection_for_query(
    query: &str,
    prefix: &str,
    store: &dyn CollectionStore,
    metadata: &Metadata,
) -> Result<String> {
    let name = collection_name_for_query(query, prefix, store).await?;
    match store.create(&name, metadata).await {
        Ok(()) => Ok(name),
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "collection name rejected; using random suffix");
            let fallback = format!("{}{}", prefix, random_suffix());
            store
                .create(&fallback, metadata)
                .await
                .with_context(|| format!("failed to create collection '{}'", fallback))?;
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_harness_core::store::memory::InMemoryCollectionStore;
    use research_harness_core::store::validate_collection_name;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Best hiking trails, Colorado!", 50), "best-hiking-trails-colorado");
        assert_eq!(slugify("  ¿Qué?  ", 50), "qu");
        assert_eq!(slugify("!!!", 50), "");
        assert_eq!(slugify("one two three four five six seven", 100), "one-two-three-four-five-six");
        assert_eq!(slugify("abcdef ghi", 7), "abcdef");
    }

    #[tokio::test]
    async fn test_numeric_suffixes() {
        let store = InMemoryCollectionStore::new();
        let md = Metadata::new();
        let a = create_collection_for_query("hiking trails", "rr-", &store, &md).await.unwrap();
        let b = create_collection_for_query("hiking trails", "rr-", &store, &md).await.unwrap();
        let c = create_collection_for_query("hiking trails", "rr-", &store, &md).await.unwrap();
        assert_eq!(a, "rr-hiking-trails");
        assert_eq!(b, "rr-hiking-trails-2");
        assert_eq!(c, "rr-hiking-trails-3");
    }

    #[tokio::test]
    async fn test_long_and_empty_queries_are_valid_names() {
        let store = InMemoryCollectionStore::new();
        let md = Metadata::new();
        let long = "x".repeat(300);
        let name = create_collection_for_query(&long, "hs-", &store, &md).await.unwrap();
        validate_collection_name(&name).unwrap();
        let name = create_collection_for_query("???", "hs-", &store, &md).await.unwrap();
        assert_eq!(name, "hs-query");
    }

    /// Refuses any name containing "trails".
    struct PickyStore(InMemoryCollectionStore);

    #[async_trait::async_trait]
    impl CollectionStore for PickyStore {
        async fn exists(&self, name: &str) -> Result<bool> {
            self.0.exists(name).await
        }
        async fn create(&self, name: &str, metadata: &Metadata) -> Result<()> {
            if name.contains("trails") {
                anyhow::bail!("name rejected");
            }
            self.0.create(name, metadata).await
        }
        async fn get_metadata(&self, name: &str) -> Result<Metadata> {
            self.0.get_metadata(name).await
        }
        async fn save_metadata(&self, name: &str, metadata: &Metadata) -> Result<()> {
            self.0.save_metadata(name, metadata).await
        }
        async fn ingest(
            &self,
            name: &str,
            docs: &[research_harness_core::store::IngestDoc],
        ) -> Result<usize> {
            self.0.ingest(name, docs).await
        }
        async fn list(&self) -> Result<Vec<research_harness_core::store::CollectionSummary>> {
            self.0.list().await
        }
    }

    #[tokio::test]
    async fn test_rejected_name_falls_back_to_random() {
        let store = PickyStore(InMemoryCollectionStore::new());
        let name = create_collection_for_query("hiking trails", "rr-", &store, &Metadata::new())
            .await
            .unwrap();
        assert!(name.starts_with("rr-"));
        assert_eq!(name.len(), 11);
        assert!(store.exists(&name).await.unwrap());
    }
}

//! TOML configuration.
//!
//! Every tunable has a `#[serde(default = ...)]` function, so a config file
//! only needs the sections it changes. [`load_config`] parses and validates;
//! [`Config::minimal`] gives an all-defaults config for tests and `rh init`.
//!
//! ```toml
//! [db]
//! path = "./data/research.sqlite"
//!
//! [llm]
//! model = "gpt-4o-mini"
//!
//! [search]
//! provider = "google"
//!
//! [research]
//! context_token_budget = 12000
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub research: ResearchSettings,
    #[serde(default)]
    pub heatseek: HeatseekSettings,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// All defaults, with the database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            fetch: FetchConfig::default(),
            research: ResearchSettings::default(),
            heatseek: HeatseekSettings::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/research.sqlite")
}

// ============ LLM ============

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Attempts for calls whose output must parse as JSON.
    #[serde(default = "default_format_retries")]
    pub format_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
            format_retries: default_format_retries(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}
fn default_format_retries() -> u32 {
    3
}

// ============ Web search ============

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_engine_env")]
    pub engine_id_env: String,
    #[serde(default = "default_num_results")]
    pub num_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key_env: default_search_api_key_env(),
            engine_id_env: default_search_engine_env(),
            num_results: default_num_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_search_provider() -> String {
    "google".to_string()
}
fn default_search_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_search_engine_env() -> String {
    "GOOGLE_CSE_ID".to_string()
}
fn default_num_results() -> usize {
    10
}
fn default_search_timeout() -> u64 {
    15
}

// ============ Fetching ============

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,
    /// Cap on simultaneous fetches; unbounded when unset.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_attempts: default_fetch_attempts(),
            max_concurrent: None,
            min_words: default_min_words(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    10
}
fn default_fetch_attempts() -> u32 {
    3
}
fn default_min_words() -> usize {
    research_harness_core::links::DEFAULT_MIN_OK_WORDS
}
fn default_user_agent() -> String {
    format!("research-harness/{}", env!("CARGO_PKG_VERSION"))
}

// ============ Controllers ============

/// Budgets and batch sizes for iterative research.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResearchSettings {
    #[serde(default = "default_context_budget")]
    pub context_token_budget: usize,
    /// Budget share per source used to size a report's source count.
    #[serde(default = "default_tokens_per_source")]
    pub tokens_per_source: usize,
    #[serde(default = "default_max_sources")]
    pub max_sources_per_report: usize,
    #[serde(default = "default_init_batch")]
    pub init_batch_size: usize,
    #[serde(default = "default_iterate_links")]
    pub num_iterate_links: usize,
    /// Cap on steps per turn (AUTO/DEEPER and `num_iterations`).
    #[serde(default = "default_max_auto")]
    pub max_auto_iterations: usize,
    #[serde(default = "default_research_prefix")]
    pub collection_prefix: String,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            context_token_budget: default_context_budget(),
            tokens_per_source: default_tokens_per_source(),
            max_sources_per_report: default_max_sources(),
            init_batch_size: default_init_batch(),
            num_iterate_links: default_iterate_links(),
            max_auto_iterations: default_max_auto(),
            collection_prefix: default_research_prefix(),
        }
    }
}

impl ResearchSettings {
    /// Sources per report: `min(max_sources_per_report, budget / tokens_per_source)`, at least 1.
    pub fn num_ok_links(&self) -> usize {
        (self.context_token_budget / self.tokens_per_source.max(1))
            .min(self.max_sources_per_report)
            .max(1)
    }
}

fn default_context_budget() -> usize {
    12000
}
fn default_tokens_per_source() -> usize {
    1600
}
fn default_max_sources() -> usize {
    7
}
fn default_init_batch() -> usize {
    10
}
fn default_iterate_links() -> usize {
    2
}
fn default_max_auto() -> usize {
    20
}
fn default_research_prefix() -> String {
    "rr-".to_string()
}

/// Limits and thresholds for heatseek.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HeatseekSettings {
    #[serde(default = "default_sub_iterations")]
    pub max_sub_iterations: usize,
    #[serde(default = "default_url_retrievals")]
    pub max_url_retrievals: usize,
    /// Successful pages requested per URL top-up.
    #[serde(default = "default_docs_per_retrieval")]
    pub docs_per_retrieval: usize,
    #[serde(default = "default_init_batch")]
    pub init_batch_size: usize,
    #[serde(default = "default_hs_tokens_per_source")]
    pub tokens_per_source: usize,
    #[serde(default = "default_tried_high_water")]
    pub requery_tried_high_water: usize,
    #[serde(default = "default_untried_low_water")]
    pub requery_untried_low_water: usize,
    #[serde(default = "default_heatseek_prefix")]
    pub collection_prefix: String,
}

impl Default for HeatseekSettings {
    fn default() -> Self {
        Self {
            max_sub_iterations: default_sub_iterations(),
            max_url_retrievals: default_url_retrievals(),
            docs_per_retrieval: default_docs_per_retrieval(),
            init_batch_size: default_init_batch(),
            tokens_per_source: default_hs_tokens_per_source(),
            requery_tried_high_water: default_tried_high_water(),
            requery_untried_low_water: default_untried_low_water(),
            collection_prefix: default_heatseek_prefix(),
        }
    }
}

fn default_sub_iterations() -> usize {
    12
}
fn default_url_retrievals() -> usize {
    3
}
fn default_docs_per_retrieval() -> usize {
    4
}
fn default_hs_tokens_per_source() -> usize {
    6000
}
fn default_tried_high_water() -> usize {
    70
}
fn default_untried_low_water() -> usize {
    12
}
fn default_heatseek_prefix() -> String {
    "hs-".to_string()
}

// ============ Embedding / chunking / server ============

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7332".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    let r = &config.research;
    if r.context_token_budget == 0 || r.tokens_per_source == 0 {
        bail!("research.context_token_budget and research.tokens_per_source must be > 0");
    }
    if r.max_sources_per_report == 0 || r.init_batch_size == 0 || r.num_iterate_links == 0 {
        bail!("research.max_sources_per_report, init_batch_size and num_iterate_links must be >= 1");
    }
    if r.max_auto_iterations == 0 {
        bail!("research.max_auto_iterations must be >= 1");
    }

    let h = &config.heatseek;
    if h.max_sub_iterations == 0 || h.docs_per_retrieval == 0 || h.init_batch_size == 0 {
        bail!("heatseek.max_sub_iterations, docs_per_retrieval and init_batch_size must be >= 1");
    }
    if h.tokens_per_source == 0 {
        bail!("heatseek.tokens_per_source must be > 0");
    }

    for prefix in [&r.collection_prefix, &h.collection_prefix] {
        if prefix.is_empty()
            || prefix.len() > 20
            || !prefix
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            || !prefix.as_bytes()[0].is_ascii_alphanumeric()
        {
            bail!(
                "collection prefix '{}' must be 1-20 chars of [a-z0-9-] starting with a letter or digit",
                prefix
            );
        }
    }

    if config.fetch.max_attempts == 0 {
        bail!("fetch.max_attempts must be >= 1");
    }
    if config.fetch.max_concurrent == Some(0) {
        bail!("fetch.max_concurrent must be >= 1 when set");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.format_retries == 0 {
        bail!("llm.format_retries must be >= 1");
    }

    match config.search.provider.as_str() {
        "google" | "disabled" => {}
        other => bail!(
            "Unknown search provider: '{}'. Must be google or disabled.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_empty_file_gets_defaults() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.research.context_token_budget, 12000);
        assert_eq!(config.research.num_ok_links(), 7);
        assert_eq!(config.heatseek.requery_tried_high_water, 70);
        assert_eq!(config.heatseek.requery_untried_low_water, 12);
        assert_eq!(config.fetch.min_words, 80);
        assert_eq!(config.search.num_results, 10);
    }

    #[test]
    fn test_num_ok_links_scales_with_budget() {
        let mut s = ResearchSettings::default();
        s.context_token_budget = 4000;
        assert_eq!(s.num_ok_links(), 2);
        s.context_token_budget = 100;
        assert_eq!(s.num_ok_links(), 1);
    }

    #[test]
    fn test_rejects_bad_values() {
        let f = write_config("[chunking]\nmax_tokens = 0\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[search]\nprovider = \"bing\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[research]\ncollection_prefix = \"RR_\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[embedding]\nprovider = \"openai\"\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let f = write_config(
            "[research]\ncontext_token_budget = 3200\n[heatseek]\nrequery_tried_high_water = 30\n",
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.research.num_ok_links(), 2);
        assert_eq!(config.heatseek.requery_tried_high_water, 30);
    }
}

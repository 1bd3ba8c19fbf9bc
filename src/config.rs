//! TOML configuration.
//!
//! Every section is optional; a missing config file yields [`Config::default`],
//! which reproduces the fixed layout of a bare checkout (`data/` for sources,
//! `chroma_db/` for the persisted index).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
            exclude_globs: default_exclude_globs(),
            follow_symlinks: false,
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string()]
}

fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Rebuild a persisted index whose source hash no longer matches.
    #[serde(default)]
    pub rebuild_on_stale: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            rebuild_on_stale: false,
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("chroma_db")
}

/// Splitting strategy for [`crate::chunk`].
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Splitter {
    /// Plain sliding character window.
    Fixed,
    /// Paragraph-aware windows preferring line, sentence and word cuts.
    #[default]
    Recursive,
}

impl Splitter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Splitter::Fixed => "fixed",
            Splitter::Recursive => "recursive",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub splitter: Splitter,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            splitter: Splitter::default(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
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
    #[serde(default = "default_timeout_secs")]
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
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_new_tokens: default_max_new_tokens(),
            temperature: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_max_new_tokens() -> u32 {
    300
}
fn default_generation_timeout_secs() -> u64 {
    120
}

/// How the "I don't know" fallback is enforced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Rely on the prompt directive; the generator is always called.
    #[default]
    Prompt,
    /// Skip generation when retrieved context scores below `min_score`.
    Context,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            min_score: default_min_score(),
        }
    }
}

fn default_min_score() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Load and validate a config file. A missing file falls back to defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.generation.max_new_tokens == 0 {
        bail!("generation.max_new_tokens must be > 0");
    }

    if !(-1.0..=1.0).contains(&config.answer.min_score) {
        bail!("answer.min_score must be in [-1.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.documents.root, PathBuf::from("data"));
        assert_eq!(cfg.index.dir, PathBuf::from("chroma_db"));
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.chunk_overlap, 50);
        assert_eq!(cfg.chunking.splitter, Splitter::Recursive);
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.generation.max_new_tokens, 300);
        assert_eq!(cfg.answer.strictness, Strictness::Prompt);
    }

    #[test]
    fn overlap_not_smaller_than_size_rejected() {
        let err = parse_config("[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let err = parse_config("[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn unknown_providers_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"faiss\"\n").is_err());
        assert!(parse_config("[generation]\nprovider = \"hub\"\n").is_err());
    }

    #[test]
    fn strictness_and_splitter_parse() {
        let cfg = parse_config(
            "[answer]\nstrictness = \"context\"\nmin_score = 0.5\n\n[chunking]\nsplitter = \"fixed\"\nchunk_size = 300\n",
        )
        .unwrap();
        assert_eq!(cfg.answer.strictness, Strictness::Context);
        assert_eq!(cfg.chunking.splitter, Splitter::Fixed);
        assert_eq!(cfg.chunking.chunk_size, 300);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Path::new("/nonexistent/docqa.toml")).unwrap();
        assert_eq!(cfg.retrieval.top_k, 3);
    }
}

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where raw sources live and where every derived artifact is written.
///
/// Artifact paths default to fixed file names inside `output_dir`; each
/// can be overridden individually.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub unified_csv: Option<PathBuf>,
    #[serde(default)]
    pub documents: Option<PathBuf>,
    #[serde(default)]
    pub index: Option<PathBuf>,
    #[serde(default)]
    pub ids: Option<PathBuf>,
    #[serde(default)]
    pub metadata: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            unified_csv: None,
            documents: None,
            index: None,
            ids: None,
            metadata: None,
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./data/tickets")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/processed")
}

impl PathsConfig {
    pub fn unified_csv_path(&self) -> PathBuf {
        self.resolve(&self.unified_csv, "tickets_unified.csv")
    }

    pub fn documents_path(&self) -> PathBuf {
        self.resolve(&self.documents, "tickets_documents.jsonl")
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.index, "index.flat")
    }

    pub fn ids_path(&self) -> PathBuf {
        self.resolve(&self.ids, "index_ids.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.resolve(&self.metadata, "index_meta.jsonl")
    }

    fn resolve(&self, custom: &Option<PathBuf>, file_name: &str) -> PathBuf {
        custom
            .clone()
            .unwrap_or_else(|| self.output_dir.join(file_name))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    128
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    /// Base URL override for OpenAI-compatible endpoints.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            timeout_secs: default_generation_timeout(),
            max_retries: 0,
            url: None,
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Order candidates by confirmed resolution before raw similarity.
    #[serde(default)]
    pub prefer_resolved: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            prefer_resolved: false,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
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
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, local, openai, or ollama.",
            other
        ),
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    if config.retrieval.default_top_k < 1 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.default_top_k > config.retrieval.max_top_k {
        bail!("retrieval.default_top_k must be <= retrieval.max_top_k");
    }

    Ok(())
}

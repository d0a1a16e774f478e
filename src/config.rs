use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory that holds the persisted index.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_test_case_k")]
    pub test_case_k: usize,
    #[serde(default = "default_script_k")]
    pub script_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            test_case_k: default_test_case_k(),
            script_k: default_script_k(),
        }
    }
}

fn default_test_case_k() -> usize {
    5
}
fn default_script_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for HTTP providers (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key. Provider default when unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            temperature: default_temperature(),
            timeout_secs: default_model_timeout_secs(),
            api_key_env: None,
            url: None,
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_model_timeout_secs() -> u64 {
    120
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Fail test-case generation when the output cites sources that were not retrieved.
    #[serde(default = "default_enforce_grounding")]
    pub enforce_grounding: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enforce_grounding: true,
        }
    }
}

fn default_enforce_grounding() -> bool {
    true
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
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// A config with every section at its default and the index at `index_path`.
    pub fn with_index_path(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                path: index_path.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            model: ModelConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.index.path.as_os_str().is_empty() {
            anyhow::bail!("index.path must be set");
        }

        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            anyhow::bail!(
                "chunking.overlap_chars ({}) must be < chunking.max_chars ({})",
                self.chunking.overlap_chars,
                self.chunking.max_chars
            );
        }

        if self.retrieval.test_case_k == 0 || self.retrieval.script_k == 0 {
            anyhow::bail!("retrieval.test_case_k and retrieval.script_k must be >= 1");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "hash" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() {
                    anyhow::bail!(
                        "embedding.dims must be set when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }

        match self.model.provider.as_str() {
            "disabled" | "gemini" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown model provider: '{}'. Must be disabled, gemini, openai, or ollama.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            anyhow::bail!("model.temperature must be in [0.0, 2.0]");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory holding the book's Markdown files.
    pub book_dir: PathBuf,
    /// Optional directory of supplementary context files, indexed after
    /// the book itself.
    #[serde(default)]
    pub context_dir: Option<PathBuf>,
    /// Path of the JSON index snapshot.
    pub index_path: PathBuf,
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("./data/journal")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"` (deterministic offline stand-in) or `"openai"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_url: default_api_url(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    64
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
fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Per-session reading state, passed explicitly into each request-handling
/// call. The server keeps one behind a lock; concurrent updates are
/// last-write-wins, which is acceptable for a single-operator tool.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionSettings {
    #[serde(default)]
    pub offline: bool,
    /// Socratic register of generated replies, 1 (direct) to 3 (leading
    /// question).
    #[serde(default = "default_socratic_level")]
    pub socratic_level: u8,
    #[serde(default = "default_reply_limit_chars")]
    pub reply_limit_chars: usize,
    /// Explicit reading boundary: maximum passage sequence answers may
    /// draw on. `None` means unbounded (auto-detection still applies).
    #[serde(default)]
    pub read_boundary_seq: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            offline: false,
            socratic_level: default_socratic_level(),
            reply_limit_chars: default_reply_limit_chars(),
            read_boundary_seq: None,
        }
    }
}

fn default_socratic_level() -> u8 {
    2
}
fn default_reply_limit_chars() -> usize {
    500
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
    "127.0.0.1:7878".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.embedding.provider.as_str() {
        "hash" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if !(1..=3).contains(&config.session.socratic_level) {
        anyhow::bail!("session.socratic_level must be in 1..=3");
    }

    if config.session.reply_limit_chars == 0 {
        anyhow::bail!("session.reply_limit_chars must be > 0");
    }

    Ok(config)
}

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docrag engine.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores summary vectors.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Base URL of the document structure-parsing service.
    pub parser_url: String,
    /// Base URL shared by the model-serving endpoints (summaries, vision, answers).
    pub model_server_url: String,
    /// Model identifier used for text and table summarization.
    pub summarization_model: String,
    /// Model identifier used for image description.
    pub vision_model: String,
    /// Model identifier used for answer generation.
    pub generation_model: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Root directory for persisted image files, one subdirectory per document.
    pub images_dir: PathBuf,
    /// Upper bound on characters per extracted text chunk.
    pub max_chunk_chars: usize,
    /// Text runs below this size are merged with their neighbors.
    pub combine_text_under_chars: usize,
    /// A new chunk is started once this many characters accumulate.
    pub new_chunk_after_chars: usize,
    /// Number of images described before the long cooldown kicks in.
    pub image_batch_size: usize,
    /// Cooldown in seconds applied after each full image batch.
    pub image_batch_cooldown_secs: u64,
    /// Short delay in seconds applied between individual images.
    pub image_delay_secs: u64,
    /// Maximum number of concurrent summarization calls.
    pub summary_concurrency: usize,
    /// Optional minimum similarity score accepted from the vector search.
    pub search_score_threshold: Option<f32>,
    /// Character budget per unit when assembling the generation context.
    pub context_excerpt_chars: usize,
    /// Character budget per unit when rendering citation excerpts.
    pub source_excerpt_chars: usize,
}

/// Supported embedding backends for the ingestion pipeline.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic hash-based vectors, useful offline and in tests.
    Deterministic,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            parser_url: load_env("PARSER_URL")?,
            model_server_url: load_env_optional("MODEL_SERVER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            summarization_model: load_env("SUMMARIZATION_MODEL")?,
            vision_model: load_env("VISION_MODEL")?,
            generation_model: load_env("GENERATION_MODEL")?,
            embedding_provider: load_env_optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Deterministic),
            embedding_model: load_env_optional("EMBEDDING_MODEL").unwrap_or_default(),
            embedding_dimension: parse_or_default("EMBEDDING_DIMENSION", 768)?,
            images_dir: PathBuf::from(
                load_env_optional("IMAGES_DIR").unwrap_or_else(|| "storage/images".to_string()),
            ),
            max_chunk_chars: parse_or_default("MAX_CHUNK_CHARS", 4000)?,
            combine_text_under_chars: parse_or_default("COMBINE_TEXT_UNDER_CHARS", 1000)?,
            new_chunk_after_chars: parse_or_default("NEW_CHUNK_AFTER_CHARS", 3000)?,
            image_batch_size: parse_or_default("IMAGE_BATCH_SIZE", 15)?,
            image_batch_cooldown_secs: parse_or_default("IMAGE_BATCH_COOLDOWN_SECS", 60)?,
            image_delay_secs: parse_or_default("IMAGE_DELAY_SECS", 4)?,
            summary_concurrency: parse_or_default("SUMMARY_CONCURRENCY", 3)?,
            search_score_threshold: load_env_optional("SEARCH_SCORE_THRESHOLD")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SEARCH_SCORE_THRESHOLD".into()))
                })
                .transpose()?,
            context_excerpt_chars: parse_or_default("CONTEXT_EXCERPT_CHARS", 1000)?,
            source_excerpt_chars: parse_or_default("SOURCE_EXCERPT_CHARS", 500)?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "deterministic" => Ok(Self::Deterministic),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        parser_url = %config.parser_url,
        model_server_url = %config.model_server_url,
        embedding_provider = ?config.embedding_provider,
        embedding_dimension = config.embedding_dimension,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

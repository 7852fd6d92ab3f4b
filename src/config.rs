use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_CHUNK_SIZE: usize = 512;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;
const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

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

/// Runtime configuration for the Rusty Claims server and CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Language-model backend used for query structuring and decision synthesis.
    pub llm_provider: LlmProvider,
    /// Model identifier passed to the language-model provider.
    pub llm_model: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of vectors produced by the offline hashing client.
    pub embedding_dimension: usize,
    /// Optional override for the Ollama base URL.
    pub ollama_url: Option<String>,
    /// API key for OpenAI-compatible providers.
    pub openai_api_key: Option<String>,
    /// Optional override for the OpenAI-compatible base URL.
    pub openai_base_url: Option<String>,
    /// Maximum number of characters per chunk.
    pub text_splitter_chunk_size: usize,
    /// Number of clauses handed to the decision synthesizer.
    pub retrieval_top_k: usize,
    /// Number of texts sent per embedding request.
    pub embedding_batch_size: usize,
    /// Upper bound for a single language-model or embedding call.
    pub capability_timeout_secs: u64,
    /// Upper bound for extracting text from a single uploaded file.
    pub extraction_timeout_secs: u64,
    /// Maximum accepted multipart body size for `POST /process`.
    pub max_upload_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported language-model backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI (or compatible) chat completions API.
    OpenAI,
}

/// Supported embedding backends for the retrieval stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic offline feature-hashing embeddings.
    Hashing,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_provider = load_env("LLM_PROVIDER")?
            .parse()
            .map_err(|()| ConfigError::InvalidValue("LLM_PROVIDER".to_string()))?;
        let embedding_provider = load_env("EMBEDDING_PROVIDER")?
            .parse()
            .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?;
        let openai_api_key = load_env_optional("OPENAI_API_KEY");

        let needs_openai_key = matches!(llm_provider, LlmProvider::OpenAI)
            || matches!(embedding_provider, EmbeddingProvider::OpenAI);
        if needs_openai_key && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }

        Ok(Self {
            llm_provider,
            llm_model: load_env("LLM_MODEL")?,
            embedding_provider,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_optional("EMBEDDING_DIMENSION")?
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSION),
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_api_key,
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            text_splitter_chunk_size: parse_optional::<usize>("TEXT_SPLITTER_CHUNK_SIZE")?
                .unwrap_or(DEFAULT_CHUNK_SIZE)
                .max(1),
            retrieval_top_k: parse_optional::<usize>("RETRIEVAL_TOP_K")?
                .unwrap_or(DEFAULT_TOP_K)
                .max(1),
            embedding_batch_size: parse_optional::<usize>("EMBEDDING_BATCH_SIZE")?
                .unwrap_or(DEFAULT_EMBEDDING_BATCH_SIZE)
                .max(1),
            capability_timeout_secs: parse_optional::<u64>("CAPABILITY_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_CAPABILITY_TIMEOUT_SECS)
                .max(1),
            extraction_timeout_secs: parse_optional::<u64>("EXTRACTION_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT_SECS)
                .max(1),
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }

    /// Effective Ollama base URL.
    pub fn ollama_base_url(&self) -> String {
        self.ollama_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
    }

    /// Effective OpenAI-compatible base URL.
    pub fn openai_base_url(&self) -> String {
        self.openai_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
    }

    /// Timeout applied to every capability call.
    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    /// Timeout applied to each document extraction.
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for LlmProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashing" => Ok(Self::Hashing),
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
        llm_provider = ?config.llm_provider,
        llm_model = %config.llm_model,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        chunk_size = config.text_splitter_chunk_size,
        top_k = config.retrieval_top_k,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

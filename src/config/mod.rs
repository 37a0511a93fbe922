// Configuration management module
// TOML settings for embedding backends, the vector index and retrieval limits

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    API_KEY_ENV_VAR, Config, ConfigError, DEFAULT_EMBEDDING_DIMENSION, EmbeddingConfig,
    OllamaConfig, RemoteEmbeddingConfig, RetrievalConfig, VectorIndexConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_config_dir()
}

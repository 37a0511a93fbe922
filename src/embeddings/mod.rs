// Embeddings module
// Embedding backends (remote API, local Ollama model), backend selection and lesson chunking

pub mod chunking;
mod http;
pub mod ollama;
pub mod provider;
pub mod remote;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use chunking::{ChunkingConfig, ContentChunk, chunk_lesson, estimate_token_count};
pub use ollama::OllamaClient;
pub use provider::EmbeddingProvider;
pub use remote::RemoteEmbeddingClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding backend '{backend}' unavailable: {message}")]
    Unavailable { backend: String, message: String },

    #[error("embedding backend '{backend}' timed out after {timeout:?}")]
    Timeout { backend: String, timeout: Duration },
}

impl EmbeddingError {
    #[inline]
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn backend(&self) -> &str {
        match self {
            Self::Unavailable { backend, .. } | Self::Timeout { backend, .. } => backend,
        }
    }
}

/// A model that turns text into fixed-length vectors
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Declared output dimension
    fn dimension(&self) -> usize;

    /// Embed a search query
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed lesson content for storage. Output order matches `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Check the backend can currently serve requests
    async fn health_check(&self) -> Result<(), EmbeddingError>;
}

/// Reject vectors of the wrong length or with non-finite components
#[inline]
pub fn validate_embedding(
    backend: &str,
    vector: &[f32],
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vector.len() != dimension {
        return Err(EmbeddingError::unavailable(
            backend,
            format!(
                "malformed output: expected {} dimensions, got {}",
                dimension,
                vector.len()
            ),
        ));
    }

    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::unavailable(
            backend,
            "malformed output: embedding contains non-finite values",
        ));
    }

    Ok(())
}

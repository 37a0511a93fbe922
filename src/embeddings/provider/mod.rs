
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    EmbeddingBackend, EmbeddingError, OllamaClient, RemoteEmbeddingClient, validate_embedding,
};
use crate::config::{Config, ConfigError};

/// Selects between the primary and fallback embedding backends
///
/// The primary backend serves every call. When it fails or times out, that
/// single call is repeated on the fallback. The next call starts at the
/// primary again.
#[derive(Clone)]
pub struct EmbeddingProvider {
    primary: Arc<dyn EmbeddingBackend>,
    fallback: Option<Arc<dyn EmbeddingBackend>>,
    dimension: usize,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|b| b.name()))
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl EmbeddingProvider {
    /// Build a provider, refusing backends whose declared dimension differs from `dimension`
    #[inline]
    pub fn new(
        primary: Arc<dyn EmbeddingBackend>,
        fallback: Option<Arc<dyn EmbeddingBackend>>,
        dimension: usize,
    ) -> Result<Self, ConfigError> {
        for backend in std::iter::once(&primary).chain(fallback.as_ref()) {
            if backend.dimension() != dimension {
                return Err(ConfigError::DimensionMismatch {
                    backend: backend.name().to_string(),
                    expected: dimension,
                    actual: backend.dimension(),
                });
            }
        }

        Ok(Self {
            primary,
            fallback,
            dimension,
        })
    }

    /// Remote API as primary when an API key is configured, the local model otherwise
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let dimension = config.embedding_dimension();
        let timeout = config.retrieval.request_timeout();

        let local: Arc<dyn EmbeddingBackend> = Arc::new(
            OllamaClient::new(&config.ollama, dimension)
                .context("Failed to create local embedding client")?
                .with_timeout(timeout),
        );

        let provider = if config.has_remote_embedding() {
            let remote: Arc<dyn EmbeddingBackend> = Arc::new(
                RemoteEmbeddingClient::new(&config.embedding.remote, dimension)
                    .context("Failed to create remote embedding client")?
                    .with_timeout(timeout),
            );
            info!(
                "Using remote embeddings ({}) with local fallback ({})",
                config.embedding.remote.model, config.ollama.model
            );
            Self::new(remote, Some(local), dimension)?
        } else {
            info!(
                "No remote embedding credential configured, using local model {}",
                config.ollama.model
            );
            Self::new(local, None, dimension)?
        };

        Ok(provider)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    #[inline]
    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_ref().map(|b| b.name())
    }

    /// Embed a query, falling back to the secondary backend for this call on failure
    #[inline]
    pub async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>, EmbeddingError> {
        self.with_fallback(timeout, |backend| async move {
            let vector = backend.embed(text).await?;
            validate_embedding(backend.name(), &vector, self.dimension)?;
            Ok(vector)
        })
        .await
    }

    /// Embed lesson content for storage
    #[inline]
    pub async fn embed_batch(
        &self,
        texts: &[String],
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.with_fallback(timeout, |backend| async move {
            let vectors = backend.embed_batch(texts).await?;
            if vectors.len() != texts.len() {
                return Err(EmbeddingError::unavailable(
                    backend.name(),
                    format!(
                        "malformed output: {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    ),
                ));
            }
            for vector in &vectors {
                validate_embedding(backend.name(), vector, self.dimension)?;
            }
            Ok(vectors)
        })
        .await
    }

    /// Health of every configured backend, primary first
    #[inline]
    pub async fn health_report(&self) -> Vec<(String, Result<(), EmbeddingError>)> {
        let mut report = Vec::new();
        for backend in std::iter::once(&self.primary).chain(self.fallback.as_ref()) {
            report.push((backend.name().to_string(), backend.health_check().await));
        }
        report
    }

    async fn with_fallback<'a, T, F, Fut>(
        &'a self,
        timeout: Duration,
        call: F,
    ) -> Result<T, EmbeddingError>
    where
        F: Fn(&'a Arc<dyn EmbeddingBackend>) -> Fut,
        Fut: Future<Output = Result<T, EmbeddingError>> + 'a,
    {
        debug!("Embedding with primary backend {}", self.primary.name());
        let primary_error = match call_with_timeout(&self.primary, timeout, call(&self.primary)).await
        {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(fallback) = self.fallback.as_ref() else {
            return Err(primary_error);
        };

        warn!(
            "Primary embedding backend failed ({}), falling back to {} for this request",
            primary_error,
            fallback.name()
        );
        call_with_timeout(fallback, timeout, call(fallback)).await
    }
}

async fn call_with_timeout<T>(
    backend: &Arc<dyn EmbeddingBackend>,
    timeout: Duration,
    future: impl Future<Output = Result<T, EmbeddingError>>,
) -> Result<T, EmbeddingError> {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| {
            Err(EmbeddingError::Timeout {
                backend: backend.name().to_string(),
                timeout,
            })
        })
}

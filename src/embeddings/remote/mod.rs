
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::http::{build_agent, request_with_retry};
use super::{EmbeddingBackend, EmbeddingError};
use crate::config::RemoteEmbeddingConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 1;
const BACKEND_NAME: &str = "remote";

/// Purpose hint sent with each embed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    SearchQuery,
    SearchDocument,
}

/// Client for a hosted embedding API speaking the Cohere `/v1/embed` format
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingClient {
    endpoint: Url,
    model: String,
    api_key: String,
    batch_size: u32,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: InputType,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteEmbeddingClient {
    #[inline]
    pub fn new(config: &RemoteEmbeddingConfig, dimension: usize) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .context("Remote embedding API key is not configured")?;

        let endpoint = config
            .endpoint()
            .context("Invalid remote embedding base URL")?
            .join("/v1/embed")
            .context("Failed to build embedding endpoint")?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key,
            batch_size: config.batch_size,
            dimension,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `texts` in batches of `batch_size`, preserving order
    #[inline]
    pub fn generate_embeddings(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1) as usize) {
            results.extend(self.generate_single_batch(chunk, input_type)?);
        }
        Ok(results)
    }

    fn generate_single_batch(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        debug!(
            "Requesting {} embeddings from {} ({:?})",
            texts.len(),
            self.endpoint,
            input_type
        );

        let request = EmbedRequest {
            model: &self.model,
            texts,
            input_type,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;
        let authorization = format!("Bearer {}", self.api_key);

        let response_text = request_with_retry(self.endpoint.as_str(), self.retry_attempts, || {
            self.agent
                .post(self.endpoint.as_str())
                .header("Authorization", &authorization)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    async fn embed_blocking(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.generate_embeddings(&texts, input_type))
            .await
            .map_err(|e| EmbeddingError::unavailable(BACKEND_NAME, format!("task failed: {e}")))?
            .map_err(|e| EmbeddingError::unavailable(BACKEND_NAME, format!("{e:#}")))
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingClient {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self
            .embed_blocking(vec![text.to_string()], InputType::SearchQuery)
            .await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::unavailable(BACKEND_NAME, "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_blocking(texts.to_vec(), InputType::SearchDocument)
            .await
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        self.embed("health check").await.map(|_| ())
    }
}

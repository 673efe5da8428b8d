//! Embedding providers
//!
//! Maps text to fixed-dimension vectors. Requests are partitioned to
//! respect the backend's per-request input cap, with a short pacing delay
//! between sub-requests and usage summed across them.

use crate::config::{EmbeddingProviderConfig, EmbeddingProviderKind};
use crate::error::{EmbeddingError, Result};
use crate::llm::TokenUsage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum inputs per backend request
pub const MAX_BATCH_SIZE: usize = 20;

/// Delay between consecutive sub-requests
const BATCH_PACING: Duration = Duration::from_millis(100);

/// Result of embedding one or many texts
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// One vector per input, in input order
    pub vectors: Vec<Vec<f32>>,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

/// Embedding capability implemented by every backend
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging and status reporting
    fn name(&self) -> &str;

    /// Vector dimension produced by the bound model
    fn dimension(&self) -> usize;

    /// Embed many texts, partitioning past the per-request cap
    async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let batch = self.embed_many(std::slice::from_ref(&text.to_string())).await?;
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding batch".to_string()).into())
    }

    /// Probe whether the backend is reachable with the bound credentials
    async fn test_connection(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// OpenAI embeddings backend
pub struct OpenAiEmbeddings {
    client: Client,
    config: EmbeddingProviderConfig,
    base_url: String,
}

impl OpenAiEmbeddings {
    pub fn new(config: EmbeddingProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            client: Client::new(),
            config,
            base_url,
        }
    }

    async fn request_batch(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        let request = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };

        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let send = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send();

        let response = tokio::time::timeout(Duration::from_secs(self.config.timeout), send)
            .await
            .map_err(|_| EmbeddingError::Timeout)?
            .map_err(|e| EmbeddingError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let diagnostic = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {} error", status));
            return Err(EmbeddingError::RequestFailed(format!("{}: {}", status, diagnostic)).into());
        }

        response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()).into())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                usage: None,
                model: Some(self.config.model.clone()),
            });
        }

        debug!(
            "Embedding {} texts in {} sub-requests",
            texts.len(),
            texts.len().div_ceil(MAX_BATCH_SIZE)
        );

        let mut vectors = Vec::with_capacity(texts.len());
        let mut usage = TokenUsage::default();
        let mut saw_usage = false;
        let mut model = None;

        for (batch_index, batch) in texts.chunks(MAX_BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(BATCH_PACING).await;
            }

            let mut response = self.request_batch(batch).await?;

            if response.data.len() != batch.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.data.len()
                ))
                .into());
            }

            response.data.sort_by_key(|data| data.index);
            for data in response.data {
                if data.embedding.len() != self.config.dimension {
                    return Err(EmbeddingError::InvalidResponse(format!(
                        "expected dimension {}, got {}",
                        self.config.dimension,
                        data.embedding.len()
                    ))
                    .into());
                }
                vectors.push(data.embedding);
            }

            if let Some(batch_usage) = response.usage {
                saw_usage = true;
                usage.add(&TokenUsage {
                    prompt_tokens: batch_usage.prompt_tokens,
                    completion_tokens: 0,
                    total_tokens: batch_usage.total_tokens,
                });
            }
            if model.is_none() {
                model = response.model;
            }
        }

        info!(
            "Embedded {} texts ({} tokens)",
            vectors.len(),
            usage.total_tokens
        );

        Ok(EmbeddingBatch {
            vectors,
            usage: saw_usage.then_some(usage),
            model,
        })
    }

    async fn test_connection(&self) -> bool {
        self.embed_one("connection test").await.is_ok()
    }
}

/// Build a provider instance from a configuration snapshot
pub fn build_embedding_provider(config: &EmbeddingProviderConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider {
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiEmbeddings::new(config.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_openai_provider() {
        let config = EmbeddingProviderConfig {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-ada-002".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: None,
            dimension: 1536,
            timeout: 30,
        };
        let provider = build_embedding_provider(&config);
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.dimension(), 1536);
    }

    #[tokio::test]
    async fn test_embed_many_empty_input() {
        let config = EmbeddingProviderConfig {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-ada-002".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: None,
            dimension: 1536,
            timeout: 30,
        };
        let provider = OpenAiEmbeddings::new(config);
        let batch = provider.embed_many(&[]).await.unwrap();
        assert!(batch.vectors.is_empty());
    }
}

//! Pinecone-backed vector store
//!
//! Talks to a Pinecone index over its REST surface. Upserts are chunked at
//! 100 records per request and deletes at 1,000 ids per request. Record
//! content travels in metadata under the `content` key.

use crate::config::VectorProviderConfig;
use crate::error::{RagError, Result, VectorStoreError};
use crate::vector::{check_dimensions, Metadata, SearchHit, VectorRecord, VectorStore};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Records per upsert request
const UPSERT_BATCH: usize = 100;

/// Ids per delete request
const DELETE_BATCH: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct UpsertRequest {
    vectors: Vec<PineconeVector>,
}

#[derive(Debug, Serialize)]
struct PineconeVector {
    id: String,
    values: Vec<f32>,
    metadata: Metadata,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    vector: Vec<f32>,
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
    #[serde(rename = "deleteAll", skip_serializing_if = "Option::is_none")]
    delete_all: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(rename = "totalVectorCount", default)]
    total_vector_count: usize,
}

/// Pinecone REST client
#[derive(Debug)]
pub struct PineconeStore {
    client: Client,
    host: String,
    api_key: String,
    dimension: usize,
    threshold: f32,
}

impl PineconeStore {
    /// Create a store from a configuration snapshot
    pub fn from_config(config: &VectorProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RagError::Configuration("pinecone requires an api_key".to_string()))?;
        let index_name = config
            .index_name
            .clone()
            .ok_or_else(|| RagError::Configuration("pinecone requires an index_name".to_string()))?;
        let environment = config.environment.clone().ok_or_else(|| {
            RagError::Configuration("pinecone requires an environment".to_string())
        })?;

        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| RagError::Configuration(e.to_string()))?,
            host: format!("https://{}.svc.{}.pinecone.io", index_name, environment),
            api_key,
            dimension: config.dimension,
            threshold: config.threshold,
        })
    }

    async fn post_json<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let url = format!("{}{}", self.host, path);
        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let diagnostic = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {} error", status));
            return Err(
                VectorStoreError::StorageFailed(format!("{}: {}", status, diagnostic)).into(),
            );
        }

        response
            .json()
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()).into())
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn initialize(&self) -> Result<()> {
        // The index already exists server-side; verify it answers
        let stats: StatsResponse = self
            .post_json("/describe_index_stats", &serde_json::json!({}))
            .await?;
        info!(
            "Connected to Pinecone index with {} vectors",
            stats.total_vector_count
        );
        Ok(())
    }

    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<()> {
        check_dimensions(&records, self.dimension)?;

        for batch in records.chunks(UPSERT_BATCH) {
            let vectors = batch
                .iter()
                .map(|record| {
                    let mut metadata = record.metadata.clone();
                    metadata.insert("content".to_string(), Value::String(record.content.clone()));
                    PineconeVector {
                        id: record.id.clone(),
                        values: record.embedding.clone(),
                        metadata,
                    }
                })
                .collect();

            let _: Value = self
                .post_json("/vectors/upsert", &UpsertRequest { vectors })
                .await?;
            debug!("Upserted {} vectors", batch.len());
        }

        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let request = QueryRequest {
            vector: query.to_vec(),
            top_k: k,
            include_metadata: true,
        };

        let response: QueryResponse = self.post_json("/query", &request).await?;

        let mut hits: Vec<SearchHit> = response
            .matches
            .into_iter()
            .map(|m| {
                let mut metadata = m.metadata;
                let content = match metadata.remove("content") {
                    Some(Value::String(text)) => text,
                    _ => String::new(),
                };
                SearchHit {
                    id: m.id,
                    content,
                    score: m.score.clamp(0.0, 1.0),
                    metadata,
                }
            })
            .collect();

        if self.threshold > 0.0 {
            hits.retain(|hit| hit.score >= self.threshold);
        }

        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(DELETE_BATCH) {
            let request = DeleteRequest {
                ids: Some(batch.to_vec()),
                delete_all: None,
            };
            let _: Value = self.post_json("/vectors/delete", &request).await?;
            debug!("Deleted {} ids", batch.len());
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let request = DeleteRequest {
            ids: None,
            delete_all: Some(true),
        };
        let _: Value = self.post_json("/vectors/delete", &request).await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let stats: StatsResponse = self
            .post_json("/describe_index_stats", &serde_json::json!({}))
            .await?;
        Ok(stats.total_vector_count)
    }

    async fn test_connection(&self) -> bool {
        self.count().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VectorProviderConfig, VectorProviderKind};

    fn base_config() -> VectorProviderConfig {
        VectorProviderConfig {
            provider: VectorProviderKind::Pinecone,
            dimension: 4,
            top_k: 5,
            threshold: 0.0,
            index_path: None,
            index_type: Default::default(),
            api_key: Some("key".to_string()),
            environment: Some("us-east-1-aws".to_string()),
            index_name: Some("test-index".to_string()),
            host: None,
            port: None,
            collection_name: None,
            ssl: false,
        }
    }

    #[test]
    fn test_construction_requires_credentials() {
        assert!(PineconeStore::from_config(&base_config()).is_ok());

        let mut missing = base_config();
        missing.api_key = None;
        let err = PineconeStore::from_config(&missing).unwrap_err();
        assert!(err.to_string().contains("pinecone"));

        let mut missing = base_config();
        missing.index_name = None;
        assert!(PineconeStore::from_config(&missing).is_err());
    }

    #[test]
    fn test_host_construction() {
        let store = PineconeStore::from_config(&base_config()).unwrap();
        assert_eq!(
            store.host,
            "https://test-index.svc.us-east-1-aws.pinecone.io"
        );
    }
}

//! Chroma-backed vector store
//!
//! Talks to a Chroma server's collection API. The collection is created on
//! first use with inner-product space, so reported distances convert to
//! the engine's `[0, 1]` score convention as `1 - distance`.

use crate::config::VectorProviderConfig;
use crate::error::{RagError, Result, VectorStoreError};
use crate::vector::{check_dimensions, Metadata, SearchHit, VectorRecord, VectorStore};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Records per upsert request
const UPSERT_BATCH: usize = 100;

/// Ids per delete request
const DELETE_BATCH: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_COLLECTION: &str = "documents";

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<Metadata>>>,
    #[serde(default)]
    distances: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Metadata>,
}

/// Chroma REST client
pub struct ChromaStore {
    client: Client,
    base_url: String,
    collection_name: String,
    collection_id: Mutex<Option<String>>,
    dimension: usize,
    threshold: f32,
}

impl ChromaStore {
    /// Create a store from a configuration snapshot
    pub fn from_config(config: &VectorProviderConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| RagError::Configuration("chroma requires a host".to_string()))?;
        let port = config.port.unwrap_or(DEFAULT_PORT);
        let scheme = if config.ssl { "https" } else { "http" };

        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| RagError::Configuration(e.to_string()))?,
            base_url: format!("{}://{}:{}/api/v1", scheme, host, port),
            collection_name: config
                .collection_name
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            collection_id: Mutex::new(None),
            dimension: config.dimension,
            threshold: config.threshold,
        })
    }

    async fn post_json<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
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

    /// Resolve the collection id, creating the collection on first use
    async fn collection_id(&self) -> Result<String> {
        let mut cached = self.collection_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let body = json!({
            "name": self.collection_name,
            "get_or_create": true,
            "metadata": { "hnsw:space": "ip" },
        });
        let collection: CollectionResponse = self.post_json("/collections", &body).await?;

        info!(
            "Bound to Chroma collection {} ({})",
            self.collection_name, collection.id
        );
        *cached = Some(collection.id.clone());
        Ok(collection.id)
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn initialize(&self) -> Result<()> {
        self.collection_id().await?;
        Ok(())
    }

    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<()> {
        check_dimensions(&records, self.dimension)?;
        let collection = self.collection_id().await?;

        for batch in records.chunks(UPSERT_BATCH) {
            let request = UpsertRequest {
                ids: batch.iter().map(|r| r.id.clone()).collect(),
                embeddings: batch.iter().map(|r| r.embedding.clone()).collect(),
                documents: batch.iter().map(|r| r.content.clone()).collect(),
                metadatas: batch.iter().map(|r| r.metadata.clone()).collect(),
            };

            let _: Value = self
                .post_json(&format!("/collections/{}/upsert", collection), &request)
                .await?;
            debug!("Upserted {} records", batch.len());
        }

        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let stored = self.count().await?;
        let k = k.min(stored);
        if k == 0 {
            return Ok(Vec::new());
        }

        let collection = self.collection_id().await?;
        let body = json!({
            "query_embeddings": [query],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });

        let response: QueryResponse = self
            .post_json(&format!("/collections/{}/query", collection), &body)
            .await?;

        let ids = response.ids.into_iter().next().unwrap_or_default();
        let mut documents = response.documents.into_iter().next().unwrap_or_default();
        let mut metadatas = response.metadatas.into_iter().next().unwrap_or_default();
        let mut distances = response.distances.into_iter().next().unwrap_or_default();

        documents.resize(ids.len(), None);
        metadatas.resize(ids.len(), None);
        distances.resize(ids.len(), 1.0);

        let mut hits: Vec<SearchHit> = ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(distances)
            .map(|(((id, content), metadata), distance)| SearchHit {
                id,
                content: content.unwrap_or_default(),
                score: (1.0 - distance).clamp(0.0, 1.0),
                metadata: metadata.unwrap_or_default(),
            })
            .collect();

        if self.threshold > 0.0 {
            hits.retain(|hit| hit.score >= self.threshold);
        }

        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let collection = self.collection_id().await?;

        for batch in ids.chunks(DELETE_BATCH) {
            let body = json!({ "ids": batch });
            let _: Value = self
                .post_json(&format!("/collections/{}/delete", collection), &body)
                .await?;
            debug!("Deleted {} ids", batch.len());
        }

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        // Dropping and recreating the collection keeps its name stable
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VectorStoreError::StorageFailed(format!(
                "failed to drop collection: HTTP {}",
                response.status()
            ))
            .into());
        }

        *self.collection_id.lock().await = None;
        self.collection_id().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let collection = self.collection_id().await?;
        let url = format!("{}/collections/{}/count", self.base_url, collection);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VectorStoreError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VectorStoreError::SearchFailed(format!(
                "count failed: HTTP {}",
                response.status()
            ))
            .into());
        }

        response
            .json::<usize>()
            .await
            .map_err(|e| VectorStoreError::SearchFailed(e.to_string()).into())
    }

    async fn test_connection(&self) -> bool {
        self.count().await.is_ok()
    }
}

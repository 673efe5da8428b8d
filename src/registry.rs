//! Document registry
//!
//! Bookkeeping for uploaded documents: identity, file metadata, processing
//! status, and the chunk summary written after indexing. The registry is
//! the single source of truth for document counts and for the chunk ids
//! used when a document's vectors are deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{RagError, Result};

/// Processing lifecycle of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Error,
}

/// Chunk bookkeeping stored alongside the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub id: String,
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
}

/// One registered document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub extension: String,
    pub size_bytes: u64,
    pub storage_path: PathBuf,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chunks: Vec<ChunkSummary>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl DocumentRecord {
    /// Register a freshly uploaded file in state `Pending`
    pub fn new(
        filename: impl Into<String>,
        extension: impl Into<String>,
        size_bytes: u64,
        storage_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            extension: extension.into(),
            size_bytes,
            storage_path: storage_path.into(),
            status: DocumentStatus::Pending,
            uploaded_at: Utc::now(),
            processed_at: None,
            chunks: Vec::new(),
            error_message: None,
        }
    }

    /// Ids of this document's chunks in the vector index
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|chunk| chunk.id.clone()).collect()
    }
}

/// Fields a registry update may change
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub status: Option<DocumentStatus>,
    pub processed_at: Option<DateTime<Utc>>,
    pub chunks: Option<Vec<ChunkSummary>>,
    pub error_message: Option<Option<String>>,
}

impl DocumentUpdate {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Registry capability consumed by the engine
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// Fetch one document
    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// List every document, newest first
    async fn list(&self) -> Result<Vec<DocumentRecord>>;

    /// Register a document
    async fn create(&self, record: DocumentRecord) -> Result<()>;

    /// Apply an update; fails when the document is unknown
    async fn update(&self, id: &str, update: DocumentUpdate) -> Result<()>;

    /// Remove a document
    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove every document
    async fn clear_all(&self) -> Result<()>;

    /// Number of registered documents
    async fn count(&self) -> Result<usize>;
}

/// In-memory registry used by the engine and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    documents: Arc<RwLock<HashMap<String, DocumentRecord>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryRegistry {
    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let mut records: Vec<DocumentRecord> =
            self.documents.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(records)
    }

    async fn create(&self, record: DocumentRecord) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, id: &str, update: DocumentUpdate) -> Result<()> {
        let mut documents = self.documents.write().await;
        let record = documents
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("document {}", id)))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(processed_at) = update.processed_at {
            record.processed_at = Some(processed_at);
        }
        if let Some(chunks) = update.chunks {
            record.chunks = chunks;
        }
        if let Some(error_message) = update.error_message {
            record.error_message = error_message;
        }

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.documents.write().await.remove(id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.documents.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.documents.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_document_lifecycle() {
        let registry = InMemoryRegistry::new();
        let record = DocumentRecord::new("notes.txt", "txt", 42, "/tmp/notes.txt");
        let id = record.id.clone();

        registry.create(record).await.unwrap();
        assert_eq!(registry.count().await.unwrap(), 1);

        let fetched = registry.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Pending);
        assert!(fetched.chunks.is_empty());

        registry
            .update(&id, DocumentUpdate::status(DocumentStatus::Processing))
            .await
            .unwrap();
        assert_eq!(
            registry.get(&id).await.unwrap().unwrap().status,
            DocumentStatus::Processing
        );

        registry.delete(&id).await.unwrap();
        assert!(registry.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_document_fails() {
        let registry = InMemoryRegistry::new();
        let result = registry
            .update("missing", DocumentUpdate::status(DocumentStatus::Indexed))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_chunk_ids_reflect_summary() {
        let mut record = DocumentRecord::new("a.txt", "txt", 1, "/tmp/a.txt");
        record.chunks = vec![
            ChunkSummary {
                id: format!("{}_chunk_0", record.id),
                content: "first".to_string(),
                start_char: 0,
                end_char: 5,
            },
            ChunkSummary {
                id: format!("{}_chunk_1", record.id),
                content: "second".to_string(),
                start_char: 5,
                end_char: 11,
            },
        ];

        let ids = record.chunk_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].ends_with("_chunk_0"));
    }

    #[tokio::test]
    async fn test_clear_all() {
        let registry = InMemoryRegistry::new();
        registry
            .create(DocumentRecord::new("a.txt", "txt", 1, "/tmp/a"))
            .await
            .unwrap();
        registry
            .create(DocumentRecord::new("b.txt", "txt", 1, "/tmp/b"))
            .await
            .unwrap();

        registry.clear_all().await.unwrap();
        assert_eq!(registry.count().await.unwrap(), 0);
    }
}

//! Vector index providers
//!
//! Durable nearest-neighbor stores behind one capability trait. The
//! bundled file-backed flat index covers local deployments; Pinecone and
//! Chroma cover remote ones. All stores share the upsert/search/delete/
//! clear/count contract and the `[0, 1]` similarity score convention.

pub mod chroma;
pub mod local;
pub mod pinecone;

pub use chroma::ChromaStore;
pub use local::FlatFileIndex;
pub use pinecone::PineconeStore;

use crate::config::{IndexKind, VectorProviderConfig, VectorProviderKind};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Arbitrary per-record metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One stored vector with its source text and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Globally unique id across documents
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One nearest-neighbor match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    /// Similarity in `[0, 1]`, 1 = most similar
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Capability set implemented by every vector index backend
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logging and status reporting
    fn name(&self) -> &str;

    /// Bind to or create the underlying store, loading persisted state
    async fn initialize(&self) -> Result<()>;

    /// Upsert records by id; durable before this returns
    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Return up to `k` nearest neighbors, best first
    ///
    /// `k` is clamped to the record count; an empty index yields an empty
    /// list. A configured similarity threshold filters low-scoring hits.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Remove matching records; unknown ids are ignored
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Empty the index, preserving its identity and parameters
    async fn clear(&self) -> Result<()>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;

    /// Probe whether the backend is reachable
    async fn test_connection(&self) -> bool;
}

/// Inner-product similarity clamped to `[0, 1]`
///
/// Embedding backends emit unit-norm vectors, so the inner product is the
/// cosine similarity; negative similarity is floored at zero.
pub fn inner_product_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(0.0, 1.0)
}

/// Build a store instance from a configuration snapshot
pub fn build_vector_store(config: &VectorProviderConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider {
        VectorProviderKind::Faiss => {
            if config.index_type != IndexKind::FlatIp {
                warn!(
                    "Index type {:?} is not supported by the file-backed store; using flat-ip",
                    config.index_type
                );
            }
            Ok(Arc::new(FlatFileIndex::from_config(config)?))
        }
        VectorProviderKind::Pinecone => Ok(Arc::new(PineconeStore::from_config(config)?)),
        VectorProviderKind::Chroma => Ok(Arc::new(ChromaStore::from_config(config)?)),
    }
}

/// Reject a record set whose vectors do not match the index dimension
pub(crate) fn check_dimensions(records: &[VectorRecord], dimension: usize) -> Result<()> {
    for record in records {
        if record.embedding.len() != dimension {
            return Err(RagError::VectorStore(
                crate::error::VectorStoreError::InvalidDimension {
                    expected: dimension,
                    actual: record.embedding.len(),
                },
            ));
        }
    }
    Ok(())
}

//! File-backed flat inner-product index
//!
//! Records live in memory and are mirrored to disk as a pair of files:
//! `index.bin` (the packed vector block) and `documents.json` (the ordered
//! record array). Both are written via temp-file + rename so a crash can
//! never leave a half-written pair. `documents.json` is the source of
//! truth on load; the vector block is rebuilt from it when missing or
//! inconsistent.
//!
//! All operations on one index are serialized through a single async lock.

use crate::config::VectorProviderConfig;
use crate::error::{Result, VectorStoreError};
use crate::vector::{
    check_dimensions, inner_product_score, SearchHit, VectorRecord, VectorStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.bin";
const DOCUMENTS_FILE: &str = "documents.json";
const INDEX_MAGIC: &[u8; 4] = b"FIDX";
const HEADER_LEN: usize = 12;

/// Durable flat index over inner-product similarity
pub struct FlatFileIndex {
    dir: PathBuf,
    dimension: usize,
    threshold: f32,
    state: Mutex<IndexState>,
}

#[derive(Default)]
struct IndexState {
    initialized: bool,
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

impl IndexState {
    fn upsert(&mut self, record: VectorRecord) {
        match self.positions.get(&record.id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn reindex_positions(&mut self) {
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position))
            .collect();
    }
}

impl FlatFileIndex {
    /// Create an index rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, dimension: usize, threshold: f32) -> Self {
        Self {
            dir: dir.into(),
            dimension,
            threshold,
            state: Mutex::new(IndexState::default()),
        }
    }

    /// Create an index from a configuration snapshot
    pub fn from_config(config: &VectorProviderConfig) -> Result<Self> {
        let dir = config
            .index_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("./data/faiss_index"));
        Ok(Self::new(dir, config.dimension, config.threshold))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn documents_path(&self) -> PathBuf {
        self.dir.join(DOCUMENTS_FILE)
    }

    fn encode_vectors(&self, records: &[VectorRecord]) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(HEADER_LEN + records.len() * self.dimension * 4);
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(records.len() as u32).to_le_bytes());
        for record in records {
            for value in &record.embedding {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    /// Whether the on-disk vector block matches the loaded records
    fn vector_block_consistent(&self, bytes: &[u8], count: usize) -> bool {
        if bytes.len() < HEADER_LEN || &bytes[..4] != INDEX_MAGIC {
            return false;
        }
        let dimension = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let stored = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        dimension == self.dimension
            && stored == count
            && bytes.len() == HEADER_LEN + count * self.dimension * 4
    }

    /// Atomically rewrite both files
    async fn persist(&self, state: &IndexState) -> Result<()> {
        let documents = serde_json::to_vec(&state.records)?;
        let vectors = self.encode_vectors(&state.records);

        let index_tmp = self.index_path().with_extension("bin.tmp");
        let documents_tmp = self.documents_path().with_extension("json.tmp");

        write_atomic(&index_tmp, &self.index_path(), &vectors).await?;
        write_atomic(&documents_tmp, &self.documents_path(), &documents).await?;

        debug!(
            "Persisted {} records to {}",
            state.records.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn ensure_initialized(state: &IndexState) -> Result<()> {
        if state.initialized {
            Ok(())
        } else {
            Err(VectorStoreError::NotInitialized.into())
        }
    }
}

async fn write_atomic(tmp: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(tmp, bytes)
        .await
        .map_err(|e| VectorStoreError::StorageFailed(format!("write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(tmp, target)
        .await
        .map_err(|e| {
            VectorStoreError::StorageFailed(format!("rename {}: {}", target.display(), e))
        })?;
    Ok(())
}

#[async_trait]
impl VectorStore for FlatFileIndex {
    fn name(&self) -> &str {
        "faiss"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(format!("create index dir: {}", e)))?;

        match tokio::fs::read(self.documents_path()).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<VectorRecord>>(&bytes) {
                Ok(records) => {
                    state.records = records;
                    state.reindex_positions();
                    info!(
                        "Loaded {} records from {}",
                        state.records.len(),
                        self.dir.display()
                    );
                }
                Err(e) => {
                    warn!("Corrupt documents file, starting with an empty index: {}", e);
                }
            },
            Err(_) => {
                debug!("No persisted index at {}", self.dir.display());
            }
        }

        // Rebuild the vector block when it disagrees with the record array
        let consistent = match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => self.vector_block_consistent(&bytes, state.records.len()),
            Err(_) => state.records.is_empty(),
        };
        if !consistent {
            warn!("Vector block out of sync with documents, rebuilding");
            self.persist(&state).await?;
        }

        state.initialized = true;
        Ok(())
    }

    async fn add_documents(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_initialized(&state)?;
        check_dimensions(&records, self.dimension)?;

        if records.is_empty() {
            return Ok(());
        }

        for record in records {
            state.upsert(record);
        }

        self.persist(&state).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let state = self.state.lock().await;
        Self::ensure_initialized(&state)?;

        if state.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            }
            .into());
        }

        let mut hits: Vec<SearchHit> = state
            .records
            .iter()
            .map(|record| SearchHit {
                id: record.id.clone(),
                content: record.content.clone(),
                score: inner_product_score(query, &record.embedding),
                metadata: record.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k.min(state.records.len()));

        if self.threshold > 0.0 {
            hits.retain(|hit| hit.score >= self.threshold);
        }

        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_initialized(&state)?;

        let before = state.records.len();
        state.records.retain(|record| !ids.contains(&record.id));
        if state.records.len() == before {
            return Ok(());
        }
        state.reindex_positions();

        debug!("Deleted {} records", before - state.records.len());
        self.persist(&state).await
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_initialized(&state)?;

        state.records.clear();
        state.positions.clear();
        self.persist(&state).await
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Self::ensure_initialized(&state)?;
        Ok(state.records.len())
    }

    async fn test_connection(&self) -> bool {
        if self.state.lock().await.initialized {
            return true;
        }
        self.initialize().await.is_ok()
    }
}

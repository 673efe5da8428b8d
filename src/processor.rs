//! Document ingestion orchestration
//!
//! `DocumentProcessor` drives one document through extract → chunk →
//! embed → store, with bounded intra-document fan-out: embedding batches
//! of [`EMBED_BATCH_SIZE`] chunks and storage batches of
//! [`STORE_BATCH_SIZE`] records run concurrently. `BatchProcessor` walks
//! many documents strictly one at a time to cap memory.

use crate::chunker::TextChunker;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, ProcessingError, RagError, Result};
use crate::extract::TextExtractor;
use crate::registry::{ChunkSummary, DocumentRecord, DocumentRegistry, DocumentStatus, DocumentUpdate};
use crate::vector::{Metadata, VectorRecord, VectorStore};
use chrono::Utc;
use futures::future;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Chunks per embedding request batch
pub const EMBED_BATCH_SIZE: usize = 20;

/// Records per vector store upsert batch
pub const STORE_BATCH_SIZE: usize = 50;

/// Per-document processing options
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub extract_metadata: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            extract_metadata: true,
        }
    }
}

/// One chunk after embedding, ready for the vector index
#[derive(Debug, Clone)]
pub struct ProcessedChunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

impl From<ProcessedChunk> for VectorRecord {
    fn from(chunk: ProcessedChunk) -> Self {
        Self {
            id: chunk.id,
            content: chunk.content,
            embedding: chunk.embedding,
            metadata: chunk.metadata,
        }
    }
}

/// Outcome of a multi-document run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

/// Per-document progress callback: `(current, total, filename)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Single-document ingestion pipeline
pub struct DocumentProcessor {
    extractor: TextExtractor,
    embeddings: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    registry: Arc<dyn DocumentRegistry>,
    uploads_dir: PathBuf,
}

impl DocumentProcessor {
    pub fn new(
        extractor: TextExtractor,
        embeddings: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        registry: Arc<dyn DocumentRegistry>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            embeddings,
            vector_store,
            registry,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Ingest one document end to end
    ///
    /// The registry entry moves Pending → Processing → Indexed, or Error
    /// with the failure recorded. Returns only after every vector is
    /// durably stored.
    pub async fn process(
        &self,
        document: &DocumentRecord,
        options: &ProcessingOptions,
    ) -> Result<Vec<ProcessedChunk>> {
        self.registry
            .update(&document.id, DocumentUpdate::status(DocumentStatus::Processing))
            .await?;

        match self.run_pipeline(document, options).await {
            Ok(chunks) => {
                let summaries = chunks
                    .iter()
                    .map(|chunk| ChunkSummary {
                        id: chunk.id.clone(),
                        content: chunk.content.clone(),
                        start_char: metadata_offset(&chunk.metadata, "start_char"),
                        end_char: metadata_offset(&chunk.metadata, "end_char"),
                    })
                    .collect();

                self.registry
                    .update(
                        &document.id,
                        DocumentUpdate {
                            status: Some(DocumentStatus::Indexed),
                            processed_at: Some(Utc::now()),
                            chunks: Some(summaries),
                            error_message: Some(None),
                        },
                    )
                    .await?;

                info!(
                    "Indexed document {} ({} chunks)",
                    document.filename,
                    chunks.len()
                );
                Ok(chunks)
            }
            Err(e) => {
                let failure = ProcessingError::new(document.id.clone(), e);
                if let Err(update_err) = self
                    .registry
                    .update(
                        &document.id,
                        DocumentUpdate {
                            status: Some(DocumentStatus::Error),
                            processed_at: None,
                            chunks: None,
                            error_message: Some(Some(failure.source.to_string())),
                        },
                    )
                    .await
                {
                    warn!("Failed to record document failure: {}", update_err);
                }
                Err(failure.into())
            }
        }
    }

    async fn run_pipeline(
        &self,
        document: &DocumentRecord,
        options: &ProcessingOptions,
    ) -> Result<Vec<ProcessedChunk>> {
        let text = self
            .extractor
            .extract(&document.storage_path, &document.extension)
            .await?;

        let chunker = TextChunker::new(options.chunk_size, options.chunk_overlap)?;
        let chunks: Vec<(usize, crate::chunker::TextChunk)> = chunker
            .split(&text)
            .into_iter()
            .filter(|chunk| !chunk.content.is_empty())
            .enumerate()
            .collect();

        if chunks.is_empty() {
            debug!("Document {} produced no chunks", document.filename);
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} chunks for {} in batches of {}",
            chunks.len(),
            document.filename,
            EMBED_BATCH_SIZE
        );

        let embedded = future::try_join_all(
            chunks
                .chunks(EMBED_BATCH_SIZE)
                .map(|batch| self.embed_batch(document, options, batch)),
        )
        .await?;
        let records: Vec<ProcessedChunk> = embedded.into_iter().flatten().collect();

        future::try_join_all(records.chunks(STORE_BATCH_SIZE).map(|batch| {
            let records: Vec<VectorRecord> =
                batch.iter().cloned().map(VectorRecord::from).collect();
            self.vector_store.add_documents(records)
        }))
        .await?;

        Ok(records)
    }

    async fn embed_batch(
        &self,
        document: &DocumentRecord,
        options: &ProcessingOptions,
        batch: &[(usize, crate::chunker::TextChunk)],
    ) -> Result<Vec<ProcessedChunk>> {
        let texts: Vec<String> = batch.iter().map(|(_, chunk)| chunk.content.clone()).collect();
        let embeddings = self.embeddings.embed_many(&texts).await?;

        if embeddings.vectors.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                batch.len(),
                embeddings.vectors.len()
            ))
            .into());
        }

        Ok(batch
            .iter()
            .zip(embeddings.vectors)
            .map(|((index, chunk), embedding)| {
                let mut metadata = Metadata::new();
                metadata.insert("document_id".to_string(), Value::from(document.id.clone()));
                metadata.insert("chunk_index".to_string(), Value::from(*index));
                if options.extract_metadata {
                    metadata.insert("filename".to_string(), Value::from(document.filename.clone()));
                    metadata.insert("start_char".to_string(), Value::from(chunk.start_char));
                    metadata.insert("end_char".to_string(), Value::from(chunk.end_char));
                    metadata.insert("language".to_string(), Value::from(chunk.language.tag()));
                }

                ProcessedChunk {
                    id: format!("{}_chunk_{}", document.id, index),
                    content: chunk.content.clone(),
                    embedding,
                    metadata,
                }
            })
            .collect())
    }

    /// Clear the index and re-process the supplied documents
    pub async fn reindex(
        &self,
        documents: &[DocumentRecord],
        options: &ProcessingOptions,
    ) -> Result<BatchOutcome> {
        self.vector_store.clear().await?;

        let results = future::join_all(
            documents
                .iter()
                .map(|document| self.process(document, options)),
        )
        .await;

        let mut outcome = BatchOutcome::default();
        for result in results {
            match result {
                Ok(_) => outcome.processed += 1,
                Err(e) => {
                    error!("Reindex failure: {}", e);
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Remove a document's vectors, using the chunk ids recorded in the
    /// registry entry
    pub async fn delete_document_chunks(&self, document_id: &str) -> Result<()> {
        let record = self
            .registry
            .get(document_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {}", document_id)))?;

        let ids = record.chunk_ids();
        if ids.is_empty() {
            return Ok(());
        }

        debug!("Deleting {} chunks for document {}", ids.len(), document_id);
        self.vector_store.delete(&ids).await
    }

    /// Empty the vector index and remove uploaded files, best effort
    pub async fn clear_all_documents(&self) -> Result<()> {
        self.vector_store.clear().await?;

        match tokio::fs::read_dir(&self.uploads_dir).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                        warn!("Failed to remove upload {}: {}", entry.path().display(), e);
                    }
                }
            }
            Err(e) => warn!("Could not read uploads dir: {}", e),
        }

        Ok(())
    }
}

/// Sequential multi-document driver
pub struct BatchProcessor {
    processor: Arc<DocumentProcessor>,
}

impl BatchProcessor {
    pub fn new(processor: Arc<DocumentProcessor>) -> Self {
        Self { processor }
    }

    /// Process documents one at a time, reporting per-document progress
    ///
    /// Failures are counted, not propagated; intra-document parallelism
    /// still applies inside each `process` call.
    pub async fn process_files_sequentially(
        &self,
        documents: &[DocumentRecord],
        options: &ProcessingOptions,
        on_progress: Option<ProgressCallback>,
    ) -> BatchOutcome {
        let total = documents.len();
        let mut outcome = BatchOutcome::default();

        for (position, document) in documents.iter().enumerate() {
            if let Some(callback) = &on_progress {
                callback(position + 1, total, &document.filename);
            }

            match self.processor.process(document, options).await {
                Ok(chunks) => {
                    debug!(
                        "Processed {}/{}: {} ({} chunks)",
                        position + 1,
                        total,
                        document.filename,
                        chunks.len()
                    );
                    outcome.processed += 1;
                }
                Err(e) => {
                    error!("Failed to process {}: {}", document.filename, e);
                    outcome.failed += 1;
                }
            }
        }

        info!(
            "Batch complete: {} processed, {} failed",
            outcome.processed, outcome.failed
        );
        outcome
    }
}

fn metadata_offset(metadata: &Metadata, key: &str) -> usize {
    metadata
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingBatch;
    use crate::registry::InMemoryRegistry;
    use crate::vector::FlatFileIndex;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embeddings keyed on text length
    struct FakeEmbeddings {
        dimension: usize,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeEmbeddings {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        fn name(&self) -> &str {
            "fake"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::RequestFailed("backend down".to_string()).into());
            }
            let vectors = texts
                .iter()
                .map(|text| {
                    let mut v = vec![0.0; self.dimension];
                    v[text.len() % self.dimension] = 1.0;
                    v
                })
                .collect();
            Ok(EmbeddingBatch {
                vectors,
                usage: None,
                model: None,
            })
        }

        async fn test_connection(&self) -> bool {
            !self.fail
        }
    }

    struct Harness {
        processor: DocumentProcessor,
        registry: Arc<InMemoryRegistry>,
        store: Arc<FlatFileIndex>,
    }

    async fn harness(fail_embeddings: bool) -> Harness {
        let dir = std::env::temp_dir().join(format!("ragmill_proc_{}", uuid::Uuid::new_v4()));
        let store = Arc::new(FlatFileIndex::new(dir.join("index"), 8, 0.0));
        store.initialize().await.unwrap();

        let registry = Arc::new(InMemoryRegistry::new());
        let embeddings: Arc<dyn EmbeddingProvider> = if fail_embeddings {
            Arc::new(FakeEmbeddings::failing(8))
        } else {
            Arc::new(FakeEmbeddings::new(8))
        };

        let processor = DocumentProcessor::new(
            TextExtractor::without_ocr(),
            embeddings,
            store.clone(),
            registry.clone(),
            dir.join("uploads"),
        );

        Harness {
            processor,
            registry,
            store,
        }
    }

    async fn upload(registry: &InMemoryRegistry, name: &str, contents: &[u8]) -> DocumentRecord {
        let path = std::env::temp_dir().join(format!("ragmill_doc_{}_{}", uuid::Uuid::new_v4(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();

        let record = DocumentRecord::new(name, "txt", contents.len() as u64, &path);
        registry.create(record.clone()).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_process_indexes_document() {
        let h = harness(false).await;
        let doc = upload(&h.registry, "notes.txt", b"The quick brown fox. Jumps over the lazy dog. End of text.").await;

        let chunks = h
            .processor
            .process(&doc, &ProcessingOptions::default())
            .await
            .unwrap();

        assert!(!chunks.is_empty());
        assert!(chunks[0].id.starts_with(&doc.id));
        assert_eq!(h.store.count().await.unwrap(), chunks.len());

        let updated = h.registry.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(updated.status, DocumentStatus::Indexed);
        assert!(updated.processed_at.is_some());
        // Registry chunk summary mirrors the vector index
        assert_eq!(updated.chunk_ids().len(), chunks.len());
    }

    #[tokio::test]
    async fn test_zero_byte_file_indexes_with_no_chunks() {
        let h = harness(false).await;
        let doc = upload(&h.registry, "empty.txt", b"").await;

        let chunks = h
            .processor
            .process(&doc, &ProcessingOptions::default())
            .await
            .unwrap();

        assert!(chunks.is_empty());
        assert_eq!(h.store.count().await.unwrap(), 0);
        assert_eq!(
            h.registry.get(&doc.id).await.unwrap().unwrap().status,
            DocumentStatus::Indexed
        );
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_document_error() {
        let h = harness(true).await;
        let doc = upload(&h.registry, "doomed.txt", b"some content that will fail").await;

        let result = h.processor.process(&doc, &ProcessingOptions::default()).await;
        assert!(result.is_err());

        let updated = h.registry.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(updated.status, DocumentStatus::Error);
        assert!(updated.error_message.is_some());
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_document_chunks_uses_registry_ids() {
        let h = harness(false).await;
        let doc = upload(&h.registry, "notes.txt", b"First sentence here. Second sentence there.").await;

        h.processor
            .process(&doc, &ProcessingOptions::default())
            .await
            .unwrap();
        assert!(h.store.count().await.unwrap() > 0);

        h.processor.delete_document_chunks(&doc.id).await.unwrap();
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_processing_counts_failures() {
        let h = harness(false).await;
        let good = upload(&h.registry, "good.txt", b"Readable content for the batch run.").await;

        let mut missing = DocumentRecord::new("missing.txt", "txt", 10, "/nonexistent/missing.txt");
        missing.id = "missing-doc".to_string();
        h.registry.create(missing.clone()).await.unwrap();

        let batch = BatchProcessor::new(Arc::new(h.processor));
        let progress: Arc<std::sync::Mutex<Vec<(usize, usize, String)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = progress.clone();

        let outcome = batch
            .process_files_sequentially(
                &[good, missing],
                &ProcessingOptions::default(),
                Some(Arc::new(move |current, total, filename| {
                    seen.lock().unwrap().push((current, total, filename.to_string()));
                })),
            )
            .await;

        assert_eq!(outcome, BatchOutcome { processed: 1, failed: 1 });

        let calls = progress.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (1, 2, "good.txt".to_string()));
        assert_eq!(calls[1], (2, 2, "missing.txt".to_string()));
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let h = harness(false).await;
        let doc = upload(&h.registry, "stable.txt", b"Deterministic content for reindexing runs.").await;

        h.processor
            .process(&doc, &ProcessingOptions::default())
            .await
            .unwrap();
        let first = h.store.count().await.unwrap();

        let docs = vec![h.registry.get(&doc.id).await.unwrap().unwrap()];
        h.processor
            .reindex(&docs, &ProcessingOptions::default())
            .await
            .unwrap();
        assert_eq!(h.store.count().await.unwrap(), first);

        h.processor
            .reindex(&docs, &ProcessingOptions::default())
            .await
            .unwrap();
        assert_eq!(h.store.count().await.unwrap(), first);
    }
}

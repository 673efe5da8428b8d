//! Retrieval-Augmented Generation Engine
//!
//! A document ingestion and retrieval engine that integrates:
//! - Text extraction for PDF/DOCX/HTML/TXT/MD/JSON with an OCR fallback
//! - Overlapping chunking with script-based language detection
//! - Pluggable embedding, vector-index, and language-model providers
//! - A streaming query pipeline that grounds answers in retrieved chunks
//!
//! # Example
//!
//! ```rust,no_run
//! use ragmill::config::RagSettings;
//! use ragmill::coordinator::{ConfigurationCoordinator, InMemoryConfigStore};
//! use ragmill::registry::InMemoryRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = RagSettings::from_env();
//!     let coordinator = ConfigurationCoordinator::new(
//!         Arc::new(InMemoryConfigStore::new()),
//!         Arc::new(InMemoryRegistry::new()),
//!         "default",
//!     );
//!     coordinator.bootstrap(&settings).await?;
//!
//!     let pipeline = coordinator.get_active_pipeline().await?;
//!     let answer = pipeline.query("What is in my documents?", &[]).await?;
//!     println!("{}", answer.content);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod chunker;
pub mod config;
pub mod coordinator;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod language;
pub mod llm;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod vector;

// Re-export main types
pub use chunker::{TextChunk, TextChunker};
pub use config::{
    ConfigurationPatch, ConfigurationRecord, EmbeddingProviderConfig, EmbeddingProviderKind,
    IndexKind, LlmProviderConfig, LlmProviderKind, RagSettings, VectorProviderConfig,
    VectorProviderKind,
};
pub use coordinator::{
    ConfigStore, ConfigurationCoordinator, InMemoryConfigStore, SqliteConfigStore, SystemStatus,
};
pub use embedding::{build_embedding_provider, EmbeddingBatch, EmbeddingProvider, OpenAiEmbeddings};
pub use error::{
    EmbeddingError, ExtractionError, LlmError, ProcessingError, RagError, Result, VectorStoreError,
};
pub use extract::{OcrConfig, OcrEngine, OcrOutcome, TextExtractor};
pub use language::{Language, LanguageDetection, LanguageDetector};
pub use llm::{
    build_chat_provider, AnthropicProvider, ChatProvider, ChatResponse, ChatStream, Message,
    OpenAiChatProvider, Role, StreamEvent, TokenUsage,
};
pub use pipeline::{PipelineOptions, RagAnswer, RagFrame, RagPipeline, RagStream};
pub use processor::{
    BatchOutcome, BatchProcessor, DocumentProcessor, ProcessedChunk, ProcessingOptions,
};
pub use registry::{
    ChunkSummary, DocumentRecord, DocumentRegistry, DocumentStatus, DocumentUpdate,
    InMemoryRegistry,
};
pub use vector::{
    build_vector_store, ChromaStore, FlatFileIndex, Metadata, PineconeStore, SearchHit,
    VectorRecord, VectorStore,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

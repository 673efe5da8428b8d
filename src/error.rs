//! Error handling for the RAG engine

use thiserror::Error;

/// Result type alias for the RAG engine
pub type Result<T> = std::result::Result<T, RagError>;

/// Main error type for the RAG engine
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No active configuration")]
    NoActiveConfiguration,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors raised while turning a document file into text
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(String),

    #[error("PDF parsing failed: {0}")]
    PdfParse(String),

    #[error("DOCX parsing failed: {0}")]
    DocxParse(String),

    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// Errors raised by embedding backends
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: embedding request took too long")]
    Timeout,
}

/// Errors raised by language model backends
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unauthorized: check the configured API key")]
    Unauthorized,

    #[error("Rate limited by upstream API")]
    RateLimited,

    #[error("Upstream server error: {0}")]
    ServerError(String),

    #[error("Timeout: generation took too long")]
    Timeout,
}

/// Errors raised by vector index backends
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Storage failed: {0}")]
    StorageFailed(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Wrapper recorded on a document when any stage of ingest fails
#[derive(Error, Debug)]
#[error("Document {document_id} failed: {source}")]
pub struct ProcessingError {
    pub document_id: String,
    #[source]
    pub source: Box<RagError>,
}

impl ProcessingError {
    pub fn new(document_id: impl Into<String>, source: RagError) -> Self {
        Self {
            document_id: document_id.into(),
            source: Box::new(source),
        }
    }
}

impl RagError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Llm(LlmError::Timeout)
                | RagError::Llm(LlmError::ConnectionFailed(_))
                | RagError::Llm(LlmError::RateLimited)
                | RagError::Embedding(EmbeddingError::Timeout)
                | RagError::Embedding(EmbeddingError::ConnectionFailed(_))
                | RagError::VectorStore(VectorStoreError::ConnectionFailed(_))
                | RagError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            RagError::Extraction(_) => "extraction",
            RagError::Embedding(_) => "embedding",
            RagError::Llm(_) => "llm",
            RagError::VectorStore(_) => "vector_store",
            RagError::Processing(_) => "processing",
            RagError::Configuration(_) => "configuration",
            RagError::NoActiveConfiguration => "no_active_configuration",
            RagError::Io(_) => "io",
            RagError::Serialization(_) => "serialization",
            RagError::Http(_) => "http",
            RagError::Database(_) => "database",
            RagError::NotFound(_) => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_error = RagError::Llm(LlmError::Timeout);
        assert!(timeout_error.is_retryable());

        let config_error = RagError::Configuration("invalid config".to_string());
        assert!(!config_error.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let llm_error = RagError::Llm(LlmError::Timeout);
        assert_eq!(llm_error.category(), "llm");

        let store_error = RagError::VectorStore(VectorStoreError::NotInitialized);
        assert_eq!(store_error.category(), "vector_store");
    }

    #[test]
    fn test_processing_error_wraps_source() {
        let inner = RagError::Embedding(EmbeddingError::Timeout);
        let wrapped = ProcessingError::new("doc-1", inner);
        assert_eq!(wrapped.document_id, "doc-1");
        assert!(wrapped.to_string().contains("doc-1"));
    }
}

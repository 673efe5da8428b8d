//! Configuration management for the RAG engine
//!
//! A configuration snapshot selects one backend per capability (language
//! model, embedding, vector index) together with its parameters. Snapshots
//! are immutable once persisted; the coordinator materializes providers
//! from the active snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Supported language model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure-openai")]
    AzureOpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderKind::OpenAi => write!(f, "openai"),
            LlmProviderKind::AzureOpenAi => write!(f, "azure-openai"),
            LlmProviderKind::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Supported embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProviderKind::OpenAi => write!(f, "openai"),
        }
    }
}

/// Supported vector index backends
///
/// `Faiss` selects the bundled file-backed flat inner-product index, which
/// persists under the configured index path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorProviderKind {
    #[serde(rename = "faiss")]
    Faiss,
    #[serde(rename = "pinecone")]
    Pinecone,
    #[serde(rename = "chroma")]
    Chroma,
}

impl std::fmt::Display for VectorProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorProviderKind::Faiss => write!(f, "faiss"),
            VectorProviderKind::Pinecone => write!(f, "pinecone"),
            VectorProviderKind::Chroma => write!(f, "chroma"),
        }
    }
}

/// Index algorithm requested for the local store
///
/// Only the flat inner-product index is implemented; the other kinds are
/// accepted and downgraded to flat with a warning at build time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    #[serde(rename = "flat-ip")]
    FlatIp,
    #[serde(rename = "hnsw-flat")]
    HnswFlat,
    #[serde(rename = "ivf-flat")]
    IvfFlat,
}

/// Language model provider parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Backend selector
    pub provider: LlmProviderKind,

    /// Model name (or Azure deployment's underlying model)
    pub model: String,

    /// API key; required for openai and anthropic
    pub api_key: Option<String>,

    /// Override for the API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Azure resource endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Azure deployment name
    #[serde(default)]
    pub deployment_name: Option<String>,

    /// Azure API version
    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Optional stop sequences
    #[serde(default)]
    pub stop: Option<Vec<String>>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Embedding provider parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    /// Backend selector
    pub provider: EmbeddingProviderKind,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// API key
    pub api_key: Option<String>,

    /// Override for the API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Vector dimension produced by the model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Vector index provider parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorProviderConfig {
    /// Backend selector
    pub provider: VectorProviderKind,

    /// Vector dimension; immutable for the life of an index
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Default number of neighbors returned by search
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score kept by search; 0 disables the filter
    #[serde(default)]
    pub threshold: f32,

    /// Directory for the file-backed index
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Requested index algorithm for the file-backed store
    #[serde(default)]
    pub index_type: IndexKind,

    /// Pinecone API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Pinecone environment
    #[serde(default)]
    pub environment: Option<String>,

    /// Pinecone index name
    #[serde(default)]
    pub index_name: Option<String>,

    /// Chroma host
    #[serde(default)]
    pub host: Option<String>,

    /// Chroma port
    #[serde(default)]
    pub port: Option<u16>,

    /// Chroma collection name
    #[serde(default)]
    pub collection_name: Option<String>,

    /// Use https when talking to Chroma
    #[serde(default)]
    pub ssl: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout() -> u64 {
    120
}

fn default_dimension() -> usize {
    1536
}

fn default_top_k() -> usize {
    5
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}

/// An immutable provider-selection snapshot
///
/// At most one snapshot per owner is active at any instant; activating one
/// deactivates the rest atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub id: Uuid,
    pub name: String,
    pub llm: LlmProviderConfig,
    pub embedding: EmbeddingProviderConfig,
    pub vector: VectorProviderConfig,
    pub active: bool,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

impl ConfigurationRecord {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        llm: LlmProviderConfig,
        embedding: EmbeddingProviderConfig,
        vector: VectorProviderConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            llm,
            embedding,
            vector,
            active: false,
            owner: owner.into(),
            created_at: Utc::now(),
        }
    }

    /// Validate internal consistency of the snapshot
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.model.is_empty() {
            return Err(anyhow::anyhow!("LLM model name cannot be empty"));
        }

        match self.llm.provider {
            LlmProviderKind::OpenAi | LlmProviderKind::Anthropic => {
                if self.llm.api_key.as_deref().unwrap_or("").is_empty() {
                    return Err(anyhow::anyhow!(
                        "Provider {} requires an API key",
                        self.llm.provider
                    ));
                }
            }
            LlmProviderKind::AzureOpenAi => {
                if self.llm.endpoint.is_none() || self.llm.deployment_name.is_none() {
                    return Err(anyhow::anyhow!(
                        "azure-openai requires endpoint and deployment_name"
                    ));
                }
            }
        }

        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!("Embedding dimension must be greater than 0"));
        }

        if self.embedding.dimension != self.vector.dimension {
            return Err(anyhow::anyhow!(
                "Embedding dimension {} does not match vector index dimension {}",
                self.embedding.dimension,
                self.vector.dimension
            ));
        }

        if !(0.0..=1.0).contains(&self.vector.threshold) {
            return Err(anyhow::anyhow!(
                "Similarity threshold must be between 0.0 and 1.0"
            ));
        }

        match self.vector.provider {
            VectorProviderKind::Faiss => {}
            VectorProviderKind::Pinecone => {
                if self.vector.api_key.is_none() || self.vector.index_name.is_none() {
                    return Err(anyhow::anyhow!("pinecone requires api_key and index_name"));
                }
            }
            VectorProviderKind::Chroma => {
                if self.vector.host.is_none() {
                    return Err(anyhow::anyhow!("chroma requires a host"));
                }
            }
        }

        Ok(())
    }
}

/// Partial update applied to an existing snapshot
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigurationPatch {
    pub name: Option<String>,
    pub llm: Option<LlmProviderConfig>,
    pub embedding: Option<EmbeddingProviderConfig>,
    pub vector: Option<VectorProviderConfig>,
}

impl ConfigurationPatch {
    /// Whether applying this patch changes any provider parameters
    pub fn touches_providers(&self) -> bool {
        self.llm.is_some() || self.embedding.is_some() || self.vector.is_some()
    }
}

/// Engine settings read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    /// OpenAI credential; enables the default configuration when present
    pub openai_api_key: Option<String>,

    /// Chat model for the default configuration
    pub openai_model: String,

    /// Embedding model for the default configuration
    pub openai_embedding_model: String,

    /// Azure OpenAI credential and routing
    pub azure_api_key: Option<String>,
    pub azure_endpoint: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,

    /// Anthropic credential and model
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,

    pub vector_dimension: usize,
    pub vector_provider: VectorProviderKind,
    pub vector_top_k: usize,
    pub vector_threshold: f32,
    pub index_path: PathBuf,
    pub index_type: IndexKind,

    /// Directory for uploaded document files
    pub uploads_dir: PathBuf,

    /// Sqlite URL for the configuration store
    pub database_url: String,

    /// Address the HTTP server binds to
    pub bind_addr: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o".to_string(),
            openai_embedding_model: "text-embedding-ada-002".to_string(),
            azure_api_key: None,
            azure_endpoint: None,
            azure_deployment: None,
            azure_api_version: None,
            anthropic_api_key: None,
            anthropic_model: "claude-3-5-sonnet-20241022".to_string(),
            vector_dimension: 1536,
            vector_provider: VectorProviderKind::Faiss,
            vector_top_k: 5,
            vector_threshold: 0.0,
            index_path: PathBuf::from("./data/faiss_index"),
            index_type: IndexKind::FlatIp,
            uploads_dir: PathBuf::from("./data/uploads"),
            database_url: "sqlite:./data/ragmill.db".to_string(),
            bind_addr: "0.0.0.0:3001".to_string(),
        }
    }
}

impl RagSettings {
    /// Load settings from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let parse_kind = |value: String| match value.as_str() {
            "pinecone" => VectorProviderKind::Pinecone,
            "chroma" => VectorProviderKind::Chroma,
            _ => VectorProviderKind::Faiss,
        };

        let parse_index = |value: String| match value.as_str() {
            "hnsw-flat" => IndexKind::HnswFlat,
            "ivf-flat" => IndexKind::IvfFlat,
            _ => IndexKind::FlatIp,
        };

        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_embedding_model: std::env::var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or(defaults.openai_embedding_model),
            azure_api_key: std::env::var("AZURE_OPENAI_API_KEY").ok(),
            azure_endpoint: std::env::var("AZURE_OPENAI_ENDPOINT").ok(),
            azure_deployment: std::env::var("AZURE_OPENAI_DEPLOYMENT").ok(),
            azure_api_version: std::env::var("AZURE_OPENAI_API_VERSION").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            anthropic_model: std::env::var("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            vector_dimension: std::env::var("VECTOR_DIMENSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vector_dimension),
            vector_provider: std::env::var("VECTOR_PROVIDER")
                .map(parse_kind)
                .unwrap_or(defaults.vector_provider),
            vector_top_k: std::env::var("VECTOR_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vector_top_k),
            vector_threshold: std::env::var("VECTOR_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.vector_threshold),
            index_path: std::env::var("FAISS_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_path),
            index_type: std::env::var("FAISS_INDEX_TYPE")
                .map(parse_index)
                .unwrap_or(defaults.index_type),
            uploads_dir: std::env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }

    /// Load settings from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let settings = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(settings)
    }

    /// Build the bootstrap configuration when an OpenAI credential is present
    ///
    /// Returns `None` without a credential; queries then fail until a
    /// configuration is created explicitly.
    pub fn default_configuration(&self, owner: &str) -> Option<ConfigurationRecord> {
        let api_key = self.openai_api_key.clone()?;

        let llm = LlmProviderConfig {
            provider: LlmProviderKind::OpenAi,
            model: self.openai_model.clone(),
            api_key: Some(api_key.clone()),
            base_url: None,
            endpoint: None,
            deployment_name: None,
            api_version: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            stop: None,
            timeout: default_timeout(),
        };

        let embedding = EmbeddingProviderConfig {
            provider: EmbeddingProviderKind::OpenAi,
            model: self.openai_embedding_model.clone(),
            api_key: Some(api_key),
            base_url: None,
            dimension: self.vector_dimension,
            timeout: default_timeout(),
        };

        let vector = VectorProviderConfig {
            provider: self.vector_provider,
            dimension: self.vector_dimension,
            top_k: self.vector_top_k,
            threshold: self.vector_threshold,
            index_path: Some(self.index_path.clone()),
            index_type: self.index_type,
            api_key: None,
            environment: None,
            index_name: None,
            host: None,
            port: None,
            collection_name: None,
            ssl: false,
        };

        Some(ConfigurationRecord::new("default", owner, llm, embedding, vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ConfigurationRecord {
        let llm = LlmProviderConfig {
            provider: LlmProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: None,
            endpoint: None,
            deployment_name: None,
            api_version: None,
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 2048,
            stop: None,
            timeout: 120,
        };
        let embedding = EmbeddingProviderConfig {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-ada-002".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: None,
            dimension: 1536,
            timeout: 120,
        };
        let vector = VectorProviderConfig {
            provider: VectorProviderKind::Faiss,
            dimension: 1536,
            top_k: 5,
            threshold: 0.0,
            index_path: Some(PathBuf::from("/tmp/idx")),
            index_type: IndexKind::FlatIp,
            api_key: None,
            environment: None,
            index_name: None,
            host: None,
            port: None,
            collection_name: None,
            ssl: false,
        };
        ConfigurationRecord::new("test", "owner-1", llm, embedding, vector)
    }

    #[test]
    fn test_record_validation() {
        let record = sample_record();
        assert!(record.validate().is_ok());

        let mut missing_key = record.clone();
        missing_key.llm.api_key = None;
        assert!(missing_key.validate().is_err());

        let mut mismatched = record.clone();
        mismatched.vector.dimension = 768;
        assert!(mismatched.validate().is_err());

        let mut bare_pinecone = record;
        bare_pinecone.vector.provider = VectorProviderKind::Pinecone;
        assert!(bare_pinecone.validate().is_err());
    }

    #[test]
    fn test_kind_serialization_tags() {
        assert_eq!(
            serde_json::to_string(&LlmProviderKind::AzureOpenAi).unwrap(),
            "\"azure-openai\""
        );
        assert_eq!(
            serde_json::to_string(&VectorProviderKind::Faiss).unwrap(),
            "\"faiss\""
        );
        assert_eq!(
            serde_json::to_string(&IndexKind::HnswFlat).unwrap(),
            "\"hnsw-flat\""
        );
    }

    #[test]
    fn test_default_configuration_requires_credential() {
        let mut settings = RagSettings::default();
        assert!(settings.default_configuration("owner-1").is_none());

        settings.openai_api_key = Some("sk-test".to_string());
        let record = settings.default_configuration("owner-1").unwrap();
        assert_eq!(record.llm.model, "gpt-4o");
        assert_eq!(record.embedding.dimension, 1536);
        assert_eq!(record.vector.top_k, 5);
        assert!(record.validate().is_ok());
    }
}

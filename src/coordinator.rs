//! Configuration coordination
//!
//! Persists provider-selection snapshots, validates them against the live
//! backends, enforces the single-active-per-owner rule, and materializes
//! the query pipeline from the active snapshot.

use crate::config::{ConfigurationPatch, ConfigurationRecord, RagSettings};
use crate::embedding::{build_embedding_provider, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::llm::{build_chat_provider, ChatProvider};
use crate::pipeline::{PipelineOptions, RagPipeline};
use crate::registry::DocumentRegistry;
use crate::vector::{build_vector_store, VectorStore};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Persistence behind the coordinator
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<ConfigurationRecord>>;

    /// All configurations for an owner, newest first
    async fn list(&self, owner: &str) -> Result<Vec<ConfigurationRecord>>;

    async fn insert(&self, record: &ConfigurationRecord) -> Result<()>;

    async fn update(&self, record: &ConfigurationRecord) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Atomically make `id` the only active configuration for `owner`
    async fn activate(&self, id: Uuid, owner: &str) -> Result<()>;

    async fn active_for(&self, owner: &str) -> Result<Option<ConfigurationRecord>>;

    async fn is_empty(&self) -> Result<bool>;
}

/// Sqlite-backed configuration store
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    /// Connect and create the schema if needed
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Ensure the directory for the database file exists
        if let Some(db_path) = database_url.strip_prefix("sqlite:") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RagError::Configuration(format!("cannot create database directory: {}", e))
                    })?;
                }
            }
        }

        let database_url = if database_url.contains('?') {
            database_url.to_string()
        } else {
            format!("{}?mode=rwc", database_url)
        };

        let pool = SqlitePool::connect(&database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS configurations (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_configurations_owner ON configurations(owner)")
            .execute(&pool)
            .await?;

        info!("Configuration store initialized");
        Ok(Self { pool })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ConfigurationRecord> {
        let payload: String = row.get("payload");
        let mut record: ConfigurationRecord = serde_json::from_str(&payload)?;
        // Columns override the payload for the mutable fields
        record.active = row.get::<i64, _>("active") != 0;
        Ok(record)
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get(&self, id: Uuid) -> Result<Option<ConfigurationRecord>> {
        let row = sqlx::query("SELECT * FROM configurations WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list(&self, owner: &str) -> Result<Vec<ConfigurationRecord>> {
        let rows =
            sqlx::query("SELECT * FROM configurations WHERE owner = ?1 ORDER BY created_at DESC")
                .bind(owner)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn insert(&self, record: &ConfigurationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO configurations (id, owner, name, payload, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.owner)
        .bind(&record.name)
        .bind(serde_json::to_string(record)?)
        .bind(record.active as i64)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Stored configuration {}", record.id);
        Ok(())
    }

    async fn update(&self, record: &ConfigurationRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE configurations SET name = ?1, payload = ?2, active = ?3 WHERE id = ?4",
        )
        .bind(&record.name)
        .bind(serde_json::to_string(record)?)
        .bind(record.active as i64)
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("configuration {}", record.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM configurations WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn activate(&self, id: Uuid, owner: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE configurations SET active = 0 WHERE owner = ?1")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "UPDATE configurations SET active = 1 WHERE id = ?1 AND owner = ?2",
        )
        .bind(id.to_string())
        .bind(owner)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RagError::NotFound(format!("configuration {}", id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn active_for(&self, owner: &str) -> Result<Option<ConfigurationRecord>> {
        let row = sqlx::query("SELECT * FROM configurations WHERE owner = ?1 AND active = 1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn is_empty(&self) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM configurations")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count == 0)
    }
}

/// In-memory configuration store for tests and ephemeral deployments
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigStore {
    records: Arc<RwLock<HashMap<Uuid, ConfigurationRecord>>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, id: Uuid) -> Result<Option<ConfigurationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list(&self, owner: &str) -> Result<Vec<ConfigurationRecord>> {
        let mut records: Vec<ConfigurationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn insert(&self, record: &ConfigurationRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &ConfigurationRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(RagError::NotFound(format!("configuration {}", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn activate(&self, id: Uuid, owner: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&id) {
            return Err(RagError::NotFound(format!("configuration {}", id)));
        }
        for record in records.values_mut() {
            if record.owner == owner {
                record.active = record.id == id;
            }
        }
        Ok(())
    }

    async fn active_for(&self, owner: &str) -> Result<Option<ConfigurationRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| record.owner == owner && record.active)
            .cloned())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.records.read().await.is_empty())
    }
}

/// Providers materialized from one configuration snapshot
struct ActiveProviders {
    config_id: Uuid,
    chat: Arc<dyn ChatProvider>,
    embeddings: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    pipeline: Arc<RagPipeline>,
}

/// Health summary returned by `system_status`
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub has_active_config: bool,
    pub llm_status: bool,
    pub vector_status: bool,
    pub embedding_status: bool,
    pub document_count: usize,
}

/// Coordinates configuration records and the live pipeline
pub struct ConfigurationCoordinator {
    store: Arc<dyn ConfigStore>,
    registry: Arc<dyn DocumentRegistry>,
    owner: String,
    active: Mutex<Option<ActiveProviders>>,
}

impl ConfigurationCoordinator {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        registry: Arc<dyn DocumentRegistry>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            owner: owner.into(),
            active: Mutex::new(None),
        }
    }

    /// Build providers for a snapshot without probing them
    fn materialize(record: &ConfigurationRecord) -> Result<ActiveProviders> {
        let chat = build_chat_provider(&record.llm)?;
        let embeddings = build_embedding_provider(&record.embedding);
        let vector_store = build_vector_store(&record.vector)?;

        let pipeline = Arc::new(RagPipeline::new(
            embeddings.clone(),
            vector_store.clone(),
            chat.clone(),
            PipelineOptions {
                max_sources: record.vector.top_k,
                ..Default::default()
            },
        ));

        Ok(ActiveProviders {
            config_id: record.id,
            chat,
            embeddings,
            vector_store,
            pipeline,
        })
    }

    /// Probe all three providers; fail naming the first that is unreachable
    async fn validate_connections(providers: &ActiveProviders) -> Result<()> {
        let (llm_ok, embedding_ok, vector_ok) = tokio::join!(
            providers.chat.test_connection(),
            providers.embeddings.test_connection(),
            providers.vector_store.test_connection(),
        );

        if !llm_ok {
            return Err(RagError::Configuration(
                "LLM provider failed connection test".to_string(),
            ));
        }
        if !embedding_ok {
            return Err(RagError::Configuration(
                "Embedding provider failed connection test".to_string(),
            ));
        }
        if !vector_ok {
            return Err(RagError::Configuration(
                "Vector provider failed connection test".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and persist a new configuration
    pub async fn create(&self, record: ConfigurationRecord) -> Result<ConfigurationRecord> {
        record
            .validate()
            .map_err(|e| RagError::Configuration(e.to_string()))?;

        let providers = Self::materialize(&record)?;
        Self::validate_connections(&providers).await?;

        self.store.insert(&record).await?;
        info!("Created configuration {} ({})", record.name, record.id);
        Ok(record)
    }

    /// Merge a patch into an existing configuration
    ///
    /// Provider changes are re-validated; when the patched record is the
    /// active one, the live pipeline is rebuilt from the new providers.
    pub async fn update(&self, id: Uuid, patch: ConfigurationPatch) -> Result<ConfigurationRecord> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("configuration {}", id)))?;

        let touches_providers = patch.touches_providers();
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(llm) = patch.llm {
            record.llm = llm;
        }
        if let Some(embedding) = patch.embedding {
            record.embedding = embedding;
        }
        if let Some(vector) = patch.vector {
            record.vector = vector;
        }

        if touches_providers {
            record
                .validate()
                .map_err(|e| RagError::Configuration(e.to_string()))?;
            let providers = Self::materialize(&record)?;
            Self::validate_connections(&providers).await?;
        }

        self.store.update(&record).await?;

        if record.active {
            self.rebuild_active(&record).await?;
        }

        Ok(record)
    }

    /// List an owner's configurations
    pub async fn list(&self, owner: &str) -> Result<Vec<ConfigurationRecord>> {
        self.store.list(owner).await
    }

    /// Fetch one configuration
    pub async fn get(&self, id: Uuid) -> Result<Option<ConfigurationRecord>> {
        self.store.get(id).await
    }

    /// Delete a configuration; the active pipeline is dropped if it was
    /// built from it
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await?;

        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.config_id == id) {
            *active = None;
        }
        Ok(())
    }

    /// Make `id` the owner's single active configuration
    pub async fn activate(&self, id: Uuid, owner: &str) -> Result<ConfigurationRecord> {
        self.store.activate(id, owner).await?;

        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("configuration {}", id)))?;

        self.rebuild_active(&record).await?;
        info!("Activated configuration {} for {}", record.name, owner);
        Ok(record)
    }

    async fn rebuild_active(&self, record: &ConfigurationRecord) -> Result<()> {
        let providers = Self::materialize(record)?;
        providers.vector_store.initialize().await?;
        *self.active.lock().await = Some(providers);
        Ok(())
    }

    /// The live query pipeline, built lazily from the active record
    pub async fn get_active_pipeline(&self) -> Result<Arc<RagPipeline>> {
        {
            let active = self.active.lock().await;
            if let Some(providers) = active.as_ref() {
                return Ok(providers.pipeline.clone());
            }
        }

        let record = self
            .store
            .active_for(&self.owner)
            .await?
            .ok_or(RagError::NoActiveConfiguration)?;

        self.rebuild_active(&record).await?;
        let active = self.active.lock().await;
        Ok(active
            .as_ref()
            .map(|providers| providers.pipeline.clone())
            .expect("pipeline was just rebuilt"))
    }

    /// The vector store bound to the active configuration
    pub async fn active_vector_store(&self) -> Result<Arc<dyn VectorStore>> {
        self.get_active_pipeline().await?;
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|providers| providers.vector_store.clone())
            .ok_or(RagError::NoActiveConfiguration)
    }

    /// The embedding provider bound to the active configuration
    pub async fn active_embeddings(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.get_active_pipeline().await?;
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|providers| providers.embeddings.clone())
            .ok_or(RagError::NoActiveConfiguration)
    }

    /// Fresh connection probes plus the registry's document count
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let document_count = self.registry.count().await?;

        if self.get_active_pipeline().await.is_err() {
            return Ok(SystemStatus {
                has_active_config: false,
                llm_status: false,
                vector_status: false,
                embedding_status: false,
                document_count,
            });
        }

        let active = self.active.lock().await;
        let providers = active.as_ref().expect("active pipeline exists");

        let (llm_status, embedding_status, vector_status) = tokio::join!(
            providers.chat.test_connection(),
            providers.embeddings.test_connection(),
            providers.vector_store.test_connection(),
        );

        Ok(SystemStatus {
            has_active_config: true,
            llm_status,
            vector_status,
            embedding_status,
            document_count,
        })
    }

    /// First-start bootstrap: create and activate a default configuration
    /// when the store is empty and an OpenAI credential is available
    pub async fn bootstrap(&self, settings: &RagSettings) -> Result<()> {
        if !self.store.is_empty().await? {
            return Ok(());
        }

        let Some(record) = settings.default_configuration(&self.owner) else {
            info!("No OpenAI credential present; skipping default configuration");
            return Ok(());
        };

        self.store.insert(&record).await?;
        if let Err(e) = self.store.activate(record.id, &self.owner).await {
            warn!("Failed to activate default configuration: {}", e);
            return Ok(());
        }

        info!("Bootstrapped default configuration {}", record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        EmbeddingProviderConfig, EmbeddingProviderKind, IndexKind, LlmProviderConfig,
        LlmProviderKind, VectorProviderConfig, VectorProviderKind,
    };
    use crate::registry::InMemoryRegistry;

    fn sample_record(owner: &str) -> ConfigurationRecord {
        let dir = std::env::temp_dir().join(format!("ragmill_coord_{}", Uuid::new_v4()));
        ConfigurationRecord::new(
            "test",
            owner,
            LlmProviderConfig {
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
                timeout: 5,
            },
            EmbeddingProviderConfig {
                provider: EmbeddingProviderKind::OpenAi,
                model: "text-embedding-ada-002".to_string(),
                api_key: Some("sk-test".to_string()),
                base_url: None,
                dimension: 8,
                timeout: 5,
            },
            VectorProviderConfig {
                provider: VectorProviderKind::Faiss,
                dimension: 8,
                top_k: 5,
                threshold: 0.0,
                index_path: Some(dir),
                index_type: IndexKind::FlatIp,
                api_key: None,
                environment: None,
                index_name: None,
                host: None,
                port: None,
                collection_name: None,
                ssl: false,
            },
        )
    }

    #[tokio::test]
    async fn test_activation_is_exclusive_per_owner() {
        let store = InMemoryConfigStore::new();
        let a = sample_record("owner-1");
        let b = sample_record("owner-1");
        let other = sample_record("owner-2");

        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.insert(&other).await.unwrap();

        store.activate(a.id, "owner-1").await.unwrap();
        store.activate(other.id, "owner-2").await.unwrap();
        store.activate(b.id, "owner-1").await.unwrap();

        let active: Vec<_> = store
            .list("owner-1")
            .await
            .unwrap()
            .into_iter()
            .filter(|record| record.active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);

        // The other owner's activation is untouched
        assert!(store.active_for("owner-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_active_configuration_error() {
        let coordinator = ConfigurationCoordinator::new(
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(InMemoryRegistry::new()),
            "owner-1",
        );

        let result = coordinator.get_active_pipeline().await;
        assert!(matches!(result, Err(RagError::NoActiveConfiguration)));
    }

    #[tokio::test]
    async fn test_system_status_without_active_config() {
        let coordinator = ConfigurationCoordinator::new(
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(InMemoryRegistry::new()),
            "owner-1",
        );

        let status = coordinator.system_status().await.unwrap();
        assert!(!status.has_active_config);
        assert!(!status.llm_status);
        assert_eq!(status.document_count, 0);
    }

    #[tokio::test]
    async fn test_activate_builds_pipeline() {
        let store = Arc::new(InMemoryConfigStore::new());
        let coordinator = ConfigurationCoordinator::new(
            store.clone(),
            Arc::new(InMemoryRegistry::new()),
            "owner-1",
        );

        let record = sample_record("owner-1");
        store.insert(&record).await.unwrap();

        coordinator.activate(record.id, "owner-1").await.unwrap();
        assert!(coordinator.get_active_pipeline().await.is_ok());
        assert!(coordinator.active_vector_store().await.is_ok());
    }

    #[tokio::test]
    async fn test_bootstrap_without_credential_creates_nothing() {
        let store = Arc::new(InMemoryConfigStore::new());
        let coordinator = ConfigurationCoordinator::new(
            store.clone(),
            Arc::new(InMemoryRegistry::new()),
            "owner-1",
        );

        let settings = RagSettings::default();
        coordinator.bootstrap(&settings).await.unwrap();
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_with_credential_activates_default() {
        let store = Arc::new(InMemoryConfigStore::new());
        let coordinator = ConfigurationCoordinator::new(
            store.clone(),
            Arc::new(InMemoryRegistry::new()),
            "owner-1",
        );

        let mut settings = RagSettings::default();
        settings.openai_api_key = Some("sk-test".to_string());
        settings.index_path =
            std::env::temp_dir().join(format!("ragmill_boot_{}", Uuid::new_v4()));

        coordinator.bootstrap(&settings).await.unwrap();

        let active = store.active_for("owner-1").await.unwrap().unwrap();
        assert_eq!(active.name, "default");
        assert_eq!(active.embedding.dimension, 1536);

        // A second bootstrap is a no-op
        coordinator.bootstrap(&settings).await.unwrap();
        assert_eq!(store.list("owner-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_patches_fields() {
        let store = Arc::new(InMemoryConfigStore::new());
        let coordinator = ConfigurationCoordinator::new(
            store.clone(),
            Arc::new(InMemoryRegistry::new()),
            "owner-1",
        );

        let record = sample_record("owner-1");
        store.insert(&record).await.unwrap();

        let updated = coordinator
            .update(
                record.id,
                ConfigurationPatch {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(
            store.get(record.id).await.unwrap().unwrap().name,
            "renamed"
        );
    }
}

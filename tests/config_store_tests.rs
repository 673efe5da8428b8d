//! Sqlite configuration store behavior

use ragmill::{
    ConfigStore, ConfigurationRecord, EmbeddingProviderConfig, EmbeddingProviderKind, IndexKind,
    LlmProviderConfig, LlmProviderKind, SqliteConfigStore, VectorProviderConfig,
    VectorProviderKind,
};

fn sample(owner: &str) -> ConfigurationRecord {
    ConfigurationRecord::new(
        "sample",
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
            timeout: 30,
        },
        EmbeddingProviderConfig {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-ada-002".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: None,
            dimension: 1536,
            timeout: 30,
        },
        VectorProviderConfig {
            provider: VectorProviderKind::Faiss,
            dimension: 1536,
            top_k: 5,
            threshold: 0.0,
            index_path: Some(std::env::temp_dir().join("ragmill_cfg_idx")),
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

async fn temp_store() -> SqliteConfigStore {
    let dir = tempfile::tempdir().unwrap().keep();
    let url = format!("sqlite:{}", dir.join("config.db").display());
    SqliteConfigStore::connect(&url).await.unwrap()
}

#[tokio::test]
async fn round_trips_records() {
    let store = temp_store().await;
    assert!(store.is_empty().await.unwrap());

    let record = sample("owner-1");
    store.insert(&record).await.unwrap();
    assert!(!store.is_empty().await.unwrap());

    let fetched = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "sample");
    assert_eq!(fetched.llm.model, "gpt-4o");
    assert_eq!(fetched.embedding.dimension, 1536);
    assert!(!fetched.active);
}

#[tokio::test]
async fn activation_is_atomic_and_exclusive() {
    let store = temp_store().await;

    let a = sample("owner-1");
    let b = sample("owner-1");
    store.insert(&a).await.unwrap();
    store.insert(&b).await.unwrap();

    store.activate(a.id, "owner-1").await.unwrap();
    store.activate(b.id, "owner-1").await.unwrap();

    let records = store.list("owner-1").await.unwrap();
    let active: Vec<_> = records.iter().filter(|record| record.active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, b.id);

    assert!(!store.get(a.id).await.unwrap().unwrap().active);
    assert_eq!(store.active_for("owner-1").await.unwrap().unwrap().id, b.id);
}

#[tokio::test]
async fn activating_unknown_id_rolls_back() {
    let store = temp_store().await;
    let record = sample("owner-1");
    store.insert(&record).await.unwrap();
    store.activate(record.id, "owner-1").await.unwrap();

    let ghost = uuid::Uuid::new_v4();
    assert!(store.activate(ghost, "owner-1").await.is_err());

    // The previous activation survives the failed attempt
    assert_eq!(
        store.active_for("owner-1").await.unwrap().unwrap().id,
        record.id
    );
}

#[tokio::test]
async fn update_and_delete() {
    let store = temp_store().await;
    let mut record = sample("owner-1");
    store.insert(&record).await.unwrap();

    record.name = "renamed".to_string();
    store.update(&record).await.unwrap();
    assert_eq!(store.get(record.id).await.unwrap().unwrap().name, "renamed");

    store.delete(record.id).await.unwrap();
    assert!(store.get(record.id).await.unwrap().is_none());
}

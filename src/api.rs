//! REST API for the RAG engine
//!
//! Thin HTTP layer over the core: document upload and lifecycle,
//! unary and streaming chat, configuration management, and provider
//! connection probes. Streaming chat uses server-sent events with one
//! JSON frame per event.

use crate::config::{
    ConfigurationPatch, ConfigurationRecord, EmbeddingProviderConfig, LlmProviderConfig,
    VectorProviderConfig,
};
use crate::coordinator::{ConfigurationCoordinator, SystemStatus};
use crate::error::RagError;
use crate::extract::{OcrEngine, TextExtractor};
use crate::llm::{build_chat_provider, Message};
use crate::pipeline::RagFrame;
use crate::processor::{BatchProcessor, DocumentProcessor, ProcessingOptions};
use crate::registry::{DocumentRecord, DocumentRegistry};
use crate::vector::{build_vector_store, SearchHit};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Maximum files accepted per upload request
const MAX_UPLOAD_FILES: usize = 10;

/// Maximum size per uploaded file
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Extensions accepted for upload
const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "docx", "txt", "md", "html", "json"];

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ConfigurationCoordinator>,
    pub registry: Arc<dyn DocumentRegistry>,
    pub uploads_dir: PathBuf,
    pub owner: String,
}

impl AppState {
    /// Build an ingestion processor bound to the active providers
    async fn document_processor(&self) -> Result<Arc<DocumentProcessor>, RagError> {
        let embeddings = self.coordinator.active_embeddings().await?;
        let vector_store = self.coordinator.active_vector_store().await?;
        Ok(Arc::new(DocumentProcessor::new(
            TextExtractor::new(),
            embeddings,
            vector_store,
            self.registry.clone(),
            self.uploads_dir.clone(),
        )))
    }
}

/// API error with a sanitized message
struct ApiError(RagError);

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::Configuration(_) | RagError::NoActiveConfiguration => StatusCode::BAD_REQUEST,
            RagError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self.0);
        }

        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/documents", get(list_documents))
        .route("/documents/upload", post(upload_documents))
        .route("/documents/clear-all", post(clear_all_documents))
        .route("/documents/{id}", delete(delete_document))
        .route("/documents/{id}/reindex", post(reindex_document))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/configurations", get(list_configurations).post(create_configuration))
        .route(
            "/configurations/{id}",
            get(get_configuration)
                .put(update_configuration)
                .delete(delete_configuration),
        )
        .route("/configurations/{id}/activate", post(activate_configuration))
        .route("/system/status", get(system_status))
        .route("/test/llm", post(test_llm))
        .route("/test/vector", post(test_vector))
        .route("/test/ocr", post(test_ocr))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_FILES * MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the API until the process is stopped
pub async fn start_server(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("API server listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn list_documents(State(state): State<AppState>) -> ApiResult<Json<Vec<DocumentRecord>>> {
    Ok(Json(state.registry.list().await?))
}

async fn upload_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Vec<DocumentRecord>>> {
    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .map_err(RagError::from)?;

    let mut records = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(RagError::Configuration(format!("invalid multipart body: {}", e)))
    })? {
        let Some(filename) = field.file_name().map(String::from) else {
            continue;
        };

        if records.len() >= MAX_UPLOAD_FILES {
            return Err(ApiError(RagError::Configuration(format!(
                "at most {} files per upload",
                MAX_UPLOAD_FILES
            ))));
        }

        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ApiError(RagError::Configuration(format!(
                "unsupported extension: {}",
                extension
            ))));
        }

        let bytes = field.bytes().await.map_err(|e| {
            ApiError(RagError::Configuration(format!("failed to read upload: {}", e)))
        })?;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError(RagError::Configuration(format!(
                "{} exceeds the 50 MiB upload limit",
                filename
            ))));
        }

        let storage_path = state
            .uploads_dir
            .join(format!("{}_{}", Uuid::new_v4(), filename));
        tokio::fs::write(&storage_path, &bytes)
            .await
            .map_err(RagError::from)?;

        let record = DocumentRecord::new(&filename, &extension, bytes.len() as u64, &storage_path);
        state.registry.create(record.clone()).await?;
        records.push(record);
    }

    // Ingest out of band; status evolves through the registry
    let processor = state.document_processor().await?;
    let batch_records = records.clone();
    tokio::spawn(async move {
        let batch = BatchProcessor::new(processor);
        let outcome = batch
            .process_files_sequentially(&batch_records, &ProcessingOptions::default(), None)
            .await;
        info!(
            "Upload batch finished: {} processed, {} failed",
            outcome.processed, outcome.failed
        );
    });

    Ok(Json(records))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let record = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| ApiError(RagError::NotFound(format!("document {}", id))))?;

    let processor = state.document_processor().await?;
    processor.delete_document_chunks(&id).await?;

    if let Err(e) = tokio::fs::remove_file(&record.storage_path).await {
        warn!("Failed to remove {}: {}", record.storage_path.display(), e);
    }

    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reindex_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DocumentRecord>> {
    let record = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| ApiError(RagError::NotFound(format!("document {}", id))))?;

    let processor = state.document_processor().await?;
    processor.delete_document_chunks(&id).await?;
    processor
        .process(&record, &ProcessingOptions::default())
        .await?;

    let updated = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| ApiError(RagError::NotFound(format!("document {}", id))))?;
    Ok(Json(updated))
}

async fn clear_all_documents(State(state): State<AppState>) -> ApiResult<StatusCode> {
    let processor = state.document_processor().await?;
    processor.clear_all_documents().await?;
    state.registry.clear_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Chat request; `session_id` is persisted by the session collaborator,
/// not the engine
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponseBody {
    pub content: String,
    pub sources: Vec<SearchHit>,
    pub usage: Option<crate::llm::TokenUsage>,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponseBody>> {
    let pipeline = state.coordinator.get_active_pipeline().await?;
    let answer = pipeline.query(&request.message, &request.history).await?;

    Ok(Json(ChatResponseBody {
        content: answer.content,
        sources: answer.sources,
        usage: answer.usage,
    }))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<axum::response::sse::KeepAliveStream<futures::stream::BoxStream<'static, Result<Event, Infallible>>>> {
    let frames = async {
        let pipeline = state.coordinator.get_active_pipeline().await?;
        pipeline.query_stream(&request.message, &request.history).await
    }
    .await;

    let events = match frames {
        Ok(frames) => frames
            // A failed frame closes the stream with a terminal error event
            .scan(false, |errored, frame| {
                let out = if *errored {
                    None
                } else {
                    match frame {
                        Ok(frame) => Some(frame_event(&frame)),
                        Err(e) => {
                            *errored = true;
                            Some(error_event(&e))
                        }
                    }
                };
                futures::future::ready(out)
            })
            .boxed(),
        Err(e) => futures::stream::once(futures::future::ready(error_event(&e))).boxed(),
    };

    Sse::new(events.map(Ok::<Event, Infallible>).boxed()).keep_alive(KeepAlive::default())
}

fn frame_event(frame: &RagFrame) -> Event {
    let payload = serde_json::to_string(frame)
        .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failed"}"#.to_string());
    Event::default().data(payload)
}

fn error_event(e: &RagError) -> Event {
    let payload = json!({ "type": "error", "message": e.to_string() });
    Event::default().data(payload.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateConfigurationRequest {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub llm: LlmProviderConfig,
    pub embedding: EmbeddingProviderConfig,
    pub vector: VectorProviderConfig,
}

async fn list_configurations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ConfigurationRecord>>> {
    Ok(Json(state.coordinator.list(&state.owner).await?))
}

async fn create_configuration(
    State(state): State<AppState>,
    Json(request): Json<CreateConfigurationRequest>,
) -> ApiResult<(StatusCode, Json<ConfigurationRecord>)> {
    let owner = request.owner.unwrap_or_else(|| state.owner.clone());
    let record = ConfigurationRecord::new(
        request.name,
        owner,
        request.llm,
        request.embedding,
        request.vector,
    );

    let created = state.coordinator.create(record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConfigurationRecord>> {
    let record = state
        .coordinator
        .get(id)
        .await?
        .ok_or_else(|| ApiError(RagError::NotFound(format!("configuration {}", id))))?;
    Ok(Json(record))
}

async fn update_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ConfigurationPatch>,
) -> ApiResult<Json<ConfigurationRecord>> {
    Ok(Json(state.coordinator.update(id, patch).await?))
}

async fn delete_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.coordinator.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_configuration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConfigurationRecord>> {
    Ok(Json(state.coordinator.activate(id, &state.owner).await?))
}

async fn system_status(State(state): State<AppState>) -> ApiResult<Json<SystemStatus>> {
    Ok(Json(state.coordinator.system_status().await?))
}

/// Transient provider probe: `{provider, config}`
#[derive(Debug, Deserialize)]
pub struct TestProviderRequest {
    pub provider: serde_json::Value,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestProviderRequest {
    /// Merge the provider tag into the config object
    fn merged(self) -> serde_json::Value {
        let mut config = self.config;
        if let Some(object) = config.as_object_mut() {
            object.insert("provider".to_string(), self.provider);
        }
        config
    }
}

async fn test_llm(Json(request): Json<TestProviderRequest>) -> Json<TestConnectionResponse> {
    let outcome = async {
        let config: LlmProviderConfig = serde_json::from_value(request.merged())?;
        let provider = build_chat_provider(&config)?;
        Ok::<bool, RagError>(provider.test_connection().await)
    }
    .await;

    Json(match outcome {
        Ok(connected) => TestConnectionResponse {
            connected,
            error: None,
        },
        Err(e) => TestConnectionResponse {
            connected: false,
            error: Some(e.to_string()),
        },
    })
}

async fn test_vector(Json(request): Json<TestProviderRequest>) -> Json<TestConnectionResponse> {
    let outcome = async {
        let config: VectorProviderConfig = serde_json::from_value(request.merged())?;
        let store = build_vector_store(&config)?;
        Ok::<bool, RagError>(store.test_connection().await)
    }
    .await;

    Json(match outcome {
        Ok(connected) => TestConnectionResponse {
            connected,
            error: None,
        },
        Err(e) => TestConnectionResponse {
            connected: false,
            error: Some(e.to_string()),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct OcrProbeResponse {
    pub text_length: usize,
    pub pages: Vec<OcrProbePage>,
    pub language: String,
    pub tesseract_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OcrProbePage {
    pub page: usize,
    pub confidence: f32,
}

async fn test_ocr(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<OcrProbeResponse>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(RagError::Configuration(format!("invalid multipart body: {}", e))))?
        .ok_or_else(|| ApiError(RagError::Configuration("no file supplied".to_string())))?;

    let filename = field.file_name().unwrap_or("probe.pdf").to_string();
    let bytes = field.bytes().await.map_err(|e| {
        ApiError(RagError::Configuration(format!("failed to read upload: {}", e)))
    })?;

    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .map_err(RagError::from)?;
    let path = state
        .uploads_dir
        .join(format!("ocr_probe_{}_{}", Uuid::new_v4(), filename));
    tokio::fs::write(&path, &bytes).await.map_err(RagError::from)?;

    let page_count = crate::extract::pdf::page_count(&path).await;
    let outcome = OcrEngine::default().recognize_pdf(&path, page_count).await;

    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!("Failed to remove OCR probe file: {}", e);
    }

    let outcome = outcome?;
    Ok(Json(OcrProbeResponse {
        text_length: outcome.text.chars().count(),
        pages: outcome
            .pages
            .iter()
            .map(|page| OcrProbePage {
                page: page.page,
                confidence: page.confidence,
            })
            .collect(),
        language: outcome.language.tag().to_string(),
        tesseract_version: outcome.tesseract_version,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_request_merging() {
        let request = TestProviderRequest {
            provider: json!("openai"),
            config: json!({ "model": "gpt-4o", "api_key": "sk-test" }),
        };

        let merged = request.merged();
        assert_eq!(merged["provider"], "openai");
        assert_eq!(merged["model"], "gpt-4o");

        let config: LlmProviderConfig = serde_json::from_value(merged).unwrap();
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn test_allowed_extensions_cover_supported_formats() {
        for extension in ["pdf", "docx", "txt", "md", "html", "json"] {
            assert!(ALLOWED_EXTENSIONS.contains(&extension));
        }
        assert!(!ALLOWED_EXTENSIONS.contains(&"exe"));
    }

    #[test]
    fn test_frame_event_payload_is_tagged() {
        let event_payload = serde_json::to_string(&RagFrame::Content {
            delta: "hi".to_string(),
        })
        .unwrap();
        assert!(event_payload.contains("\"type\":\"content\""));
    }
}

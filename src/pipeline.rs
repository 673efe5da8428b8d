//! Retrieval-augmented query pipeline
//!
//! Embeds the question, searches the vector index, assembles a bounded
//! context from the best hits, and prompts the language model. Streaming
//! responses emit exactly one sources frame, then content deltas, then
//! exactly one terminal done frame.

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::llm::{user_message, ChatProvider, Message, TokenUsage};
use crate::vector::{SearchHit, VectorStore};
use futures::future;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Default number of hits requested from the index
pub const DEFAULT_MAX_SOURCES: usize = 5;

/// Default minimum similarity for a hit to be used
pub const DEFAULT_MIN_SCORE: f32 = 0.5;

/// Default character budget for assembled context
pub const DEFAULT_CONTEXT_WINDOW: usize = 4000;

/// A truncated tail is only worth sending past this budget
const TRUNCATION_MIN_BUDGET: usize = 100;

/// Query-time tunables
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_sources: usize,
    pub min_score: f32,
    pub context_window: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_sources: DEFAULT_MAX_SOURCES,
            min_score: DEFAULT_MIN_SCORE,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Answer to a unary query
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub content: String,
    pub sources: Vec<SearchHit>,
    pub usage: Option<TokenUsage>,
}

/// One frame of a streamed query
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RagFrame {
    Sources { sources: Vec<SearchHit> },
    Content { delta: String },
    Done { usage: Option<TokenUsage> },
}

/// Lazily produced sequence of frames
pub type RagStream = BoxStream<'static, Result<RagFrame>>;

/// The live query pipeline bound to one provider set
pub struct RagPipeline {
    embeddings: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    chat: Arc<dyn ChatProvider>,
    options: PipelineOptions,
}

impl RagPipeline {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatProvider>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            embeddings,
            vector_store,
            chat,
            options,
        }
    }

    /// Embed, search, and filter; shared by both query paths
    async fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        let vector = self.embeddings.embed_one(question).await?;
        let hits = self
            .vector_store
            .search(&vector, self.options.max_sources)
            .await?;

        let filtered: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.options.min_score)
            .collect();

        debug!("{} hits passed the score filter", filtered.len());
        Ok(filtered)
    }

    /// Answer a question in one round trip
    ///
    /// An empty hit set is legal: the model is prompted with the base
    /// system message only and `sources` comes back empty.
    pub async fn query(&self, question: &str, history: &[Message]) -> Result<RagAnswer> {
        let sources = self.retrieve(question).await?;
        let context = assemble_context(&sources, self.options.context_window);

        let mut messages = history.to_vec();
        messages.push(user_message(question));

        let response = self.chat.chat(&messages, &context).await?;

        Ok(RagAnswer {
            content: response.content,
            sources,
            usage: response.usage,
        })
    }

    /// Answer a question as a frame stream
    pub async fn query_stream(&self, question: &str, history: &[Message]) -> Result<RagStream> {
        let sources = self.retrieve(question).await?;
        let context = assemble_context(&sources, self.options.context_window);

        let mut messages = history.to_vec();
        messages.push(user_message(question));

        let llm_stream = self.chat.chat_stream(&messages, &context).await?;

        // The sentinel appended after the provider stream guarantees a
        // terminal done frame even when the backend never sent one.
        let content_frames = llm_stream
            .map(Some)
            .chain(futures::stream::once(future::ready(None)))
            .scan(false, |done_seen, item| {
                let out: Option<Option<Result<RagFrame>>> = match item {
                    Some(Err(e)) => Some(Some(Err(e))),
                    Some(Ok(event)) if event.done => {
                        if *done_seen {
                            Some(None)
                        } else {
                            *done_seen = true;
                            Some(Some(Ok(RagFrame::Done { usage: event.usage })))
                        }
                    }
                    Some(Ok(event)) => {
                        if *done_seen || event.delta.is_empty() {
                            Some(None)
                        } else {
                            Some(Some(Ok(RagFrame::Content { delta: event.delta })))
                        }
                    }
                    None => {
                        if *done_seen {
                            None
                        } else {
                            *done_seen = true;
                            Some(Some(Ok(RagFrame::Done { usage: None })))
                        }
                    }
                };
                future::ready(out)
            })
            .filter_map(future::ready);

        let stream = futures::stream::once(future::ready(Ok(RagFrame::Sources { sources })))
            .chain(content_frames);

        Ok(stream.boxed())
    }
}

/// Assemble hit contents into the context budget, in rank order
///
/// A hit that would overflow the budget contributes a truncated prefix
/// ending in `"..."` when more than 100 characters of budget remain;
/// assembly stops at the first overflow either way.
fn assemble_context(hits: &[SearchHit], window: usize) -> Vec<String> {
    let mut context = Vec::new();
    let mut used = 0usize;

    for hit in hits {
        let length = hit.content.chars().count();
        if used + length <= window {
            context.push(hit.content.clone());
            used += length;
        } else {
            let remaining = window.saturating_sub(used);
            if remaining > TRUNCATION_MIN_BUDGET {
                let prefix: String = hit
                    .content
                    .chars()
                    .take(remaining.saturating_sub(3))
                    .collect();
                context.push(format!("{}...", prefix));
            }
            break;
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingBatch;
    use crate::error::{EmbeddingError, RagError};
    use crate::llm::{ChatResponse, ChatStream, StreamEvent};
    use crate::vector::{Metadata, VectorRecord};
    use async_trait::async_trait;

    struct FakeEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        fn name(&self) -> &str {
            "fake"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch> {
            if texts.is_empty() {
                return Err(EmbeddingError::RequestFailed("no input".to_string()).into());
            }
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect(),
                usage: None,
                model: None,
            })
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    /// Echoes the context size and streams three fixed deltas
    struct FakeChat;

    #[async_trait]
    impl ChatProvider for FakeChat {
        fn name(&self) -> &str {
            "fake"
        }

        async fn chat(&self, messages: &[Message], context: &[String]) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: format!("answered {} with {} snippets", messages.len(), context.len()),
                usage: Some(TokenUsage {
                    prompt_tokens: 7,
                    completion_tokens: 3,
                    total_tokens: 10,
                }),
                model: Some("fake-model".to_string()),
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn chat_stream(&self, _: &[Message], _: &[String]) -> Result<ChatStream> {
            let events = vec![
                Ok(StreamEvent {
                    delta: "Hel".to_string(),
                    done: false,
                    usage: None,
                }),
                Ok(StreamEvent {
                    delta: "lo".to_string(),
                    done: false,
                    usage: None,
                }),
                Ok(StreamEvent {
                    delta: String::new(),
                    done: true,
                    usage: Some(TokenUsage::default()),
                }),
            ];
            Ok(futures::stream::iter(events).boxed())
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    async fn seeded_pipeline(min_score: f32) -> RagPipeline {
        let dir = std::env::temp_dir().join(format!("ragmill_pipe_{}", uuid::Uuid::new_v4()));
        let store = Arc::new(crate::vector::FlatFileIndex::new(dir, 4, 0.0));
        store.initialize().await.unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("filename".to_string(), serde_json::Value::from("notes.txt"));
        store
            .add_documents(vec![
                VectorRecord {
                    id: "doc_chunk_0".to_string(),
                    content: "the brown fox content".to_string(),
                    embedding: vec![1.0, 0.0, 0.0, 0.0],
                    metadata,
                },
                VectorRecord {
                    id: "doc_chunk_1".to_string(),
                    content: "unrelated content".to_string(),
                    embedding: vec![0.0, 1.0, 0.0, 0.0],
                    metadata: Metadata::new(),
                },
            ])
            .await
            .unwrap();

        RagPipeline::new(
            Arc::new(FakeEmbeddings),
            store,
            Arc::new(FakeChat),
            PipelineOptions {
                min_score,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_query_returns_filtered_sources() {
        let pipeline = seeded_pipeline(0.5).await;
        let answer = pipeline.query("brown fox", &[]).await.unwrap();

        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].id, "doc_chunk_0");
        assert!(answer.sources[0].score >= 0.5);
        assert_eq!(
            answer.sources[0].metadata.get("filename").unwrap(),
            "notes.txt"
        );
        assert!(answer.content.contains("1 snippets"));
        assert_eq!(answer.usage.unwrap().total_tokens, 10);
    }

    #[tokio::test]
    async fn test_stream_frame_ordering() {
        let pipeline = seeded_pipeline(0.5).await;
        let frames: Vec<RagFrame> = pipeline
            .query_stream("brown fox", &[])
            .await
            .unwrap()
            .map(|frame| frame.unwrap())
            .collect()
            .await;

        assert!(matches!(frames[0], RagFrame::Sources { .. }));
        let done_count = frames
            .iter()
            .filter(|frame| matches!(frame, RagFrame::Done { .. }))
            .count();
        assert_eq!(done_count, 1);
        assert!(matches!(frames.last().unwrap(), RagFrame::Done { .. }));

        let content: String = frames
            .iter()
            .filter_map(|frame| match frame {
                RagFrame::Content { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(content, "Hello");
    }

    #[tokio::test]
    async fn test_stream_with_no_hits_emits_empty_sources() {
        // Threshold nothing can reach
        let pipeline = seeded_pipeline(1.1).await;
        let frames: Vec<RagFrame> = pipeline
            .query_stream("anything", &[])
            .await
            .unwrap()
            .map(|frame| frame.unwrap())
            .collect()
            .await;

        match &frames[0] {
            RagFrame::Sources { sources } => assert!(sources.is_empty()),
            other => panic!("expected sources frame, got {:?}", other),
        }
        assert!(matches!(frames.last().unwrap(), RagFrame::Done { .. }));
    }

    #[tokio::test]
    async fn test_query_with_empty_index_is_legal() {
        let dir = std::env::temp_dir().join(format!("ragmill_pipe_{}", uuid::Uuid::new_v4()));
        let store = Arc::new(crate::vector::FlatFileIndex::new(dir, 4, 0.0));
        store.initialize().await.unwrap();

        let pipeline = RagPipeline::new(
            Arc::new(FakeEmbeddings),
            store,
            Arc::new(FakeChat),
            PipelineOptions::default(),
        );

        let answer = pipeline.query("anything", &[]).await.unwrap();
        assert!(answer.sources.is_empty());
        assert!(answer.content.contains("0 snippets"));
    }

    fn hit(content: &str, score: f32) -> SearchHit {
        SearchHit {
            id: "h".to_string(),
            content: content.to_string(),
            score,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_context_assembly_respects_budget() {
        let hits = vec![hit(&"a".repeat(300), 0.9), hit(&"b".repeat(300), 0.8)];
        let context = assemble_context(&hits, 450);

        assert_eq!(context.len(), 2);
        assert_eq!(context[0].chars().count(), 300);
        // 150 characters of budget remain for the second hit
        assert_eq!(context[1].chars().count(), 150);
        assert!(context[1].ends_with("..."));
    }

    #[test]
    fn test_context_truncation_skipped_below_minimum() {
        let hits = vec![hit(&"a".repeat(350), 0.9), hit(&"b".repeat(300), 0.8)];
        // 50 characters left: below the truncation minimum
        let context = assemble_context(&hits, 400);
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_context_stops_after_first_overflow() {
        let hits = vec![
            hit(&"a".repeat(200), 0.9),
            hit(&"b".repeat(900), 0.8),
            hit("short", 0.7),
        ];
        let context = assemble_context(&hits, 500);
        // Overflow on the second hit ends assembly; the third never lands
        assert_eq!(context.len(), 2);
        assert!(context[1].starts_with("bbb"));
        assert!(context[1].ends_with("..."));
    }
}

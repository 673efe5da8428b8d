//! Shared fixtures for integration tests

use async_trait::async_trait;
use ragmill::{
    ChatProvider, ChatResponse, ChatStream, EmbeddingBatch, EmbeddingProvider, Message, Result,
    StreamEvent, TokenUsage,
};
use std::path::PathBuf;

/// Embedding dimension used by the fake provider
pub const DIM: usize = 32;

/// Deterministic letter-histogram embeddings
///
/// Texts sharing vocabulary land close together under inner product, which
/// is enough for retrieval assertions without a live backend.
pub struct HashEmbeddings;

fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
        let slot = (c.to_ascii_lowercase() as usize - 'a' as usize) % DIM;
        v[slot] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|text| embed_text(text)).collect(),
            usage: None,
            model: None,
        })
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

/// Chat provider that answers with a fixed string and streams it in two
/// deltas followed by one done event
pub struct ScriptedChat;

#[async_trait]
impl ChatProvider for ScriptedChat {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, _: &[Message], context: &[String]) -> Result<ChatResponse> {
        Ok(ChatResponse {
            content: format!("grounded in {} snippets", context.len()),
            usage: Some(TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 5,
                total_tokens: 10,
            }),
            model: Some("scripted".to_string()),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(&self, _: &[Message], _: &[String]) -> Result<ChatStream> {
        use futures::StreamExt;
        let events = vec![
            Ok(StreamEvent {
                delta: "part one ".to_string(),
                done: false,
                usage: None,
            }),
            Ok(StreamEvent {
                delta: "part two".to_string(),
                done: false,
                usage: None,
            }),
            Ok(StreamEvent {
                delta: String::new(),
                done: true,
                usage: None,
            }),
        ];
        Ok(futures::stream::iter(events).boxed())
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

/// Unique scratch directory for a test
pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ragmill_it_{}_{}", label, uuid::Uuid::new_v4()))
}

/// Write a file into a scratch dir and return its path
pub fn write_file(dir: &std::path::Path, name: &str, contents: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

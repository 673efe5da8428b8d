//! Language model providers
//!
//! Defines the chat capability consumed by the query pipeline and the
//! provider implementations behind it. Providers take the conversation
//! verbatim and synthesize a system prompt from retrieved context.

pub mod anthropic;
pub mod client;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use client::HttpProviderClient;
pub use openai::{AzureOpenAiAdapter, OpenAiAdapter, OpenAiChatProvider};

use crate::config::{LlmProviderConfig, LlmProviderKind};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Token accounting reported by a backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Sum usage across sub-requests
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from a unary chat completion
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

/// One frame of a streamed chat completion
///
/// A stream is finite and terminated by exactly one event with
/// `done = true`, which carries the final usage when the backend reports it.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub delta: String,
    pub done: bool,
    pub usage: Option<TokenUsage>,
}

/// Lazily produced sequence of stream events
pub type ChatStream = BoxStream<'static, Result<StreamEvent>>;

/// Chat capability implemented by every language model backend
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logging and status reporting
    fn name(&self) -> &str;

    /// Complete a conversation in one round trip
    async fn chat(&self, messages: &[Message], context: &[String]) -> Result<ChatResponse>;

    /// Complete a conversation as a token stream
    async fn chat_stream(&self, messages: &[Message], context: &[String]) -> Result<ChatStream>;

    /// Probe whether the backend is reachable with the bound credentials
    async fn test_connection(&self) -> bool;
}

/// Leading sentence of every synthesized system prompt
pub const BASE_SYSTEM_PROMPT: &str =
    "You are an AI assistant that helps people find information.";

/// Synthesize the system prompt for a set of retrieved context snippets
pub fn build_system_prompt(context: &[String]) -> String {
    if context.is_empty() {
        return BASE_SYSTEM_PROMPT.to_string();
    }

    format!(
        "{}\n\nUse the following context to answer questions. \
         If the information is not in the context, say so clearly.\n\nContext:\n{}",
        BASE_SYSTEM_PROMPT,
        context.join("\n\n")
    )
}

/// Build a provider instance from a configuration snapshot
pub fn build_chat_provider(config: &LlmProviderConfig) -> Result<Arc<dyn ChatProvider>> {
    match config.provider {
        LlmProviderKind::OpenAi => Ok(OpenAiChatProvider::create(config.clone())),
        LlmProviderKind::AzureOpenAi => OpenAiChatProvider::create_azure(config.clone()),
        LlmProviderKind::Anthropic => Ok(AnthropicProvider::create(config.clone())),
    }
}

/// Create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

/// Create an assistant message
pub fn assistant_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::Assistant,
        content: content.into(),
    }
}

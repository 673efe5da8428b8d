//! OpenAI-compatible chat providers
//!
//! A shared generic provider drives every backend that speaks the OpenAI
//! chat-completions API; adapters supply the base URL, authentication
//! headers, and endpoint routing. Azure OpenAI differs only in its
//! deployment-based routing and `api-key` header.

use crate::config::LlmProviderConfig;
use crate::error::{LlmError, RagError, Result};
use crate::llm::client::HttpProviderClient;
use crate::llm::{
    build_system_prompt, ChatProvider, ChatResponse, ChatStream, Message, Role, StreamEvent,
    TokenUsage,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Common trait for OpenAI-compatible API adapters
pub trait OpenAiCompatible: Send + Sync {
    /// Base URL for the provider
    fn base_url(&self) -> &str;

    /// API key
    fn api_key(&self) -> Option<&str>;

    /// Build auth headers
    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(key) = self.api_key() {
            headers.push(("Authorization", format!("Bearer {}", key)));
        }
        headers
    }

    /// Transform endpoint path (for provider-specific routing)
    fn transform_endpoint(&self, endpoint: &str) -> String {
        endpoint.to_string()
    }

    /// Build full URL for an endpoint
    fn build_url(&self, endpoint: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        let transformed = self.transform_endpoint(endpoint);
        let path = transformed.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// Chat completion request body
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// Wire-format message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for ApiMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system".to_string(),
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ApiMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<ApiUsage> for TokenUsage {
    fn from(usage: ApiUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// One SSE chunk of a streamed completion
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelData>,
}

#[derive(Debug, Deserialize)]
pub struct ModelData {
    pub id: String,
}

/// Generic provider over any OpenAI-compatible backend
pub struct OpenAiChatProvider<T: OpenAiCompatible> {
    adapter: T,
    client: HttpProviderClient,
    config: LlmProviderConfig,
    name: String,
}

impl<T: OpenAiCompatible + Send + Sync + 'static> OpenAiChatProvider<T> {
    pub fn new(adapter: T, config: LlmProviderConfig) -> Self {
        let client = HttpProviderClient::new(config.timeout);
        let name = config.provider.to_string();
        Self {
            adapter,
            client,
            config,
            name,
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        context: &[String],
        stream: bool,
    ) -> ChatCompletionRequest {
        let mut api_messages = vec![ApiMessage {
            role: "system".to_string(),
            content: build_system_prompt(context),
        }];
        api_messages.extend(messages.iter().map(ApiMessage::from));

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: api_messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            stop: self.config.stop.clone(),
            stream,
            stream_options: stream.then(|| StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[async_trait]
impl<T: OpenAiCompatible + Send + Sync + 'static> ChatProvider for OpenAiChatProvider<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: &[Message], context: &[String]) -> Result<ChatResponse> {
        debug!(
            "Chat completion with {} over {} messages, {} context snippets",
            self.name(),
            messages.len(),
            context.len()
        );

        let request = self.build_request(messages, context, false);
        let url = self.adapter.build_url("chat/completions");

        let response: ChatCompletionResponse = self
            .client
            .post_json(&url, &request, self.adapter.auth_headers())
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let usage: Option<TokenUsage> = response.usage.map(Into::into);
        info!(
            "Generated {} tokens with {}",
            usage.map(|u| u.total_tokens).unwrap_or(0),
            response.model
        );

        Ok(ChatResponse {
            content: choice.message.content,
            usage,
            model: Some(response.model),
            finish_reason: choice.finish_reason,
        })
    }

    async fn chat_stream(&self, messages: &[Message], context: &[String]) -> Result<ChatStream> {
        debug!("Streaming chat completion with {}", self.name());

        let request = self.build_request(messages, context, true);
        let url = self.adapter.build_url("chat/completions");

        let lines = self
            .client
            .post_sse(&url, &request, self.adapter.auth_headers())
            .await?;

        // One terminal event per stream: [DONE] closes with the usage
        // captured from the last chunk that reported it.
        let events = lines
            .scan(
                (None::<TokenUsage>, false),
                |(usage, finished), line| {
                    let item: Option<Option<Result<StreamEvent>>> = match line {
                        Err(e) => Some(Some(Err(e))),
                        Ok(data) if data == "[DONE]" => {
                            if *finished {
                                None
                            } else {
                                *finished = true;
                                Some(Some(Ok(StreamEvent {
                                    delta: String::new(),
                                    done: true,
                                    usage: usage.take(),
                                })))
                            }
                        }
                        Ok(data) => match serde_json::from_str::<ChatCompletionChunk>(&data) {
                            Ok(chunk) => {
                                if let Some(reported) = chunk.usage {
                                    *usage = Some(reported.into());
                                }
                                let delta = chunk
                                    .choices
                                    .first()
                                    .and_then(|c| c.delta.content.clone())
                                    .unwrap_or_default();
                                if delta.is_empty() {
                                    Some(None)
                                } else {
                                    Some(Some(Ok(StreamEvent {
                                        delta,
                                        done: false,
                                        usage: None,
                                    })))
                                }
                            }
                            Err(_) => Some(None),
                        },
                    };
                    futures::future::ready(item)
                },
            )
            .filter_map(futures::future::ready);

        Ok(events.boxed())
    }

    async fn test_connection(&self) -> bool {
        let url = self.adapter.build_url("models");
        self.client
            .get::<ModelsResponse>(&url, self.adapter.auth_headers())
            .await
            .is_ok()
    }
}

/// OpenAI adapter
pub struct OpenAiAdapter {
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
        }
    }
}

impl OpenAiCompatible for OpenAiAdapter {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

impl OpenAiChatProvider<OpenAiAdapter> {
    /// Create an OpenAI provider from a configuration snapshot
    pub fn create(config: LlmProviderConfig) -> Arc<dyn ChatProvider> {
        let adapter = OpenAiAdapter::new(config.api_key.clone(), config.base_url.clone());
        Arc::new(Self::new(adapter, config))
    }
}

/// Azure OpenAI adapter
pub struct AzureOpenAiAdapter {
    endpoint: String,
    api_key: Option<String>,
    api_version: String,
    deployment_name: String,
}

impl AzureOpenAiAdapter {
    pub fn new(
        endpoint: String,
        deployment_name: String,
        api_key: Option<String>,
        api_version: Option<String>,
    ) -> Self {
        Self {
            endpoint,
            api_key,
            api_version: api_version.unwrap_or_else(|| "2024-02-15-preview".to_string()),
            deployment_name,
        }
    }
}

impl OpenAiCompatible for AzureOpenAiAdapter {
    fn base_url(&self) -> &str {
        &self.endpoint
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(key) = self.api_key.as_ref() {
            headers.push(("api-key", key.clone()));
        }
        headers
    }

    fn transform_endpoint(&self, endpoint: &str) -> String {
        // Azure uses deployment-based routing
        match endpoint {
            "chat/completions" => format!(
                "openai/deployments/{}/chat/completions?api-version={}",
                self.deployment_name, self.api_version
            ),
            "models" => format!("openai/models?api-version={}", self.api_version),
            _ => format!("{}?api-version={}", endpoint, self.api_version),
        }
    }
}

impl OpenAiChatProvider<AzureOpenAiAdapter> {
    /// Create an Azure OpenAI provider from a configuration snapshot
    pub fn create_azure(config: LlmProviderConfig) -> Result<Arc<dyn ChatProvider>> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            RagError::Configuration("azure-openai requires an endpoint".to_string())
        })?;
        let deployment_name = config
            .deployment_name
            .clone()
            .unwrap_or_else(|| config.model.clone());

        let adapter = AzureOpenAiAdapter::new(
            endpoint,
            deployment_name,
            config.api_key.clone(),
            config.api_version.clone(),
        );

        Ok(Arc::new(Self::new(adapter, config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProviderKind;

    fn test_config() -> LlmProviderConfig {
        LlmProviderConfig {
            provider: LlmProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: None,
            endpoint: None,
            deployment_name: None,
            api_version: None,
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 2048,
            stop: None,
            timeout: 30,
        }
    }

    #[test]
    fn test_adapter_defaults() {
        let adapter = OpenAiAdapter::new(Some("test-key".to_string()), None);
        assert_eq!(adapter.base_url(), "https://api.openai.com/v1");
        assert_eq!(adapter.api_key(), Some("test-key"));
        assert_eq!(
            adapter.build_url("chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_auth_headers() {
        let adapter = OpenAiAdapter::new(Some("test-key".to_string()), None);
        let headers = adapter.auth_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "Authorization");
        assert_eq!(headers[0].1, "Bearer test-key");
    }

    #[test]
    fn test_azure_endpoint_transform() {
        let adapter = AzureOpenAiAdapter::new(
            "https://my-resource.openai.azure.com".to_string(),
            "gpt-4-deployment".to_string(),
            Some("test-key".to_string()),
            Some("2024-02-15-preview".to_string()),
        );

        let chat_endpoint = adapter.transform_endpoint("chat/completions");
        assert!(chat_endpoint.contains("gpt-4-deployment"));
        assert!(chat_endpoint.contains("2024-02-15-preview"));

        let headers = adapter.auth_headers();
        assert_eq!(headers[0].0, "api-key");
    }

    #[test]
    fn test_request_carries_system_prompt_first() {
        let provider = OpenAiChatProvider::new(
            OpenAiAdapter::new(Some("k".to_string()), None),
            test_config(),
        );
        let messages = vec![crate::llm::user_message("hello")];
        let context = vec!["snippet".to_string()];

        let request = provider.build_request(&messages, &context, false);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[0].content.contains("snippet"));
        assert_eq!(request.messages[1].role, "user");
        assert!(!request.stream);
        assert!(request.stream_options.is_none());
    }

    #[test]
    fn test_streaming_request_asks_for_usage() {
        let provider = OpenAiChatProvider::new(
            OpenAiAdapter::new(Some("k".to_string()), None),
            test_config(),
        );
        let request = provider.build_request(&[], &[], true);
        assert!(request.stream);
        assert!(request.stream_options.is_some());
    }
}

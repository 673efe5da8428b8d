//! Anthropic Claude provider
//!
//! Anthropic's messages API differs from the OpenAI shape: the system
//! prompt is a top-level field, content comes back as typed blocks, and
//! streamed events are tagged by a `type` discriminator. The provider is
//! implemented directly rather than through the OpenAI-compatible base.

use crate::config::LlmProviderConfig;
use crate::error::{LlmError, Result};
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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Wire-format message; system prompts are carried separately
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for AnthropicMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
                // System messages are carried in the top-level field
                Role::System => "user".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<AnthropicUsage> for TokenUsage {
    fn from(usage: AnthropicUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

/// One tagged SSE payload
#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    message: Option<StreamStart>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamStart {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[allow(dead_code)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[allow(dead_code)]
    id: String,
}

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: HttpProviderClient,
    config: LlmProviderConfig,
}

impl AnthropicProvider {
    /// Create a provider from a configuration snapshot
    pub fn create(config: LlmProviderConfig) -> Arc<dyn ChatProvider> {
        let client = HttpProviderClient::new(config.timeout);
        Arc::new(Self { client, config })
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn build_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("anthropic-version", API_VERSION.to_string())];
        if let Some(api_key) = &self.config.api_key {
            headers.push(("x-api-key", api_key.clone()));
        }
        headers
    }

    fn build_request(
        &self,
        messages: &[Message],
        context: &[String],
        stream: bool,
    ) -> AnthropicRequest {
        AnthropicRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(AnthropicMessage::from).collect(),
            max_tokens: self.config.max_tokens,
            system: build_system_prompt(context),
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            stop_sequences: self.config.stop.clone(),
            stream,
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, messages: &[Message], context: &[String]) -> Result<ChatResponse> {
        debug!("Chat completion with anthropic over {} messages", messages.len());

        let request = self.build_request(messages, context, false);
        let url = format!("{}/v1/messages", self.base_url());

        let response: AnthropicResponse = self
            .client
            .post_json(&url, &request, self.build_headers())
            .await?;

        if response.content.is_empty() {
            return Err(LlmError::InvalidResponse("No content blocks in response".to_string()).into());
        }

        let content = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        let usage: TokenUsage = response.usage.into();
        info!("Generated {} tokens with {}", usage.total_tokens, response.model);

        Ok(ChatResponse {
            content,
            usage: Some(usage),
            model: Some(response.model),
            finish_reason: response.stop_reason,
        })
    }

    async fn chat_stream(&self, messages: &[Message], context: &[String]) -> Result<ChatStream> {
        debug!("Streaming chat completion with anthropic");

        let request = self.build_request(messages, context, true);
        let url = format!("{}/v1/messages", self.base_url());

        let lines = self
            .client
            .post_sse(&url, &request, self.build_headers())
            .await?;

        // input tokens arrive in message_start, output tokens in
        // message_delta; message_stop closes the stream.
        let events = lines
            .scan((0u32, 0u32, false), |(input, output, finished), line| {
                let item: Option<Option<Result<StreamEvent>>> = match line {
                    Err(e) => Some(Some(Err(e))),
                    Ok(data) => match serde_json::from_str::<StreamPayload>(&data) {
                        Ok(payload) => match payload.kind.as_str() {
                            "message_start" => {
                                if let Some(usage) =
                                    payload.message.and_then(|start| start.usage)
                                {
                                    *input = usage.input_tokens;
                                }
                                Some(None)
                            }
                            "content_block_delta" => {
                                let text = payload
                                    .delta
                                    .and_then(|delta| delta.text)
                                    .unwrap_or_default();
                                if text.is_empty() {
                                    Some(None)
                                } else {
                                    Some(Some(Ok(StreamEvent {
                                        delta: text,
                                        done: false,
                                        usage: None,
                                    })))
                                }
                            }
                            "message_delta" => {
                                if let Some(usage) = payload.usage {
                                    *output = usage.output_tokens;
                                }
                                Some(None)
                            }
                            "message_stop" => {
                                if *finished {
                                    None
                                } else {
                                    *finished = true;
                                    Some(Some(Ok(StreamEvent {
                                        delta: String::new(),
                                        done: true,
                                        usage: Some(TokenUsage {
                                            prompt_tokens: *input,
                                            completion_tokens: *output,
                                            total_tokens: *input + *output,
                                        }),
                                    })))
                                }
                            }
                            _ => Some(None),
                        },
                        Err(_) => Some(None),
                    },
                };
                futures::future::ready(item)
            })
            .filter_map(futures::future::ready);

        Ok(events.boxed())
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url());
        self.client
            .get::<ModelsResponse>(&url, self.build_headers())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProviderKind;
    use crate::llm::user_message;

    fn test_config() -> LlmProviderConfig {
        LlmProviderConfig {
            provider: LlmProviderKind::Anthropic,
            model: "claude-3-5-sonnet-20241022".to_string(),
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
    fn test_message_conversion_maps_system_to_user() {
        let msg = crate::llm::system_message("rules");
        let converted = AnthropicMessage::from(&msg);
        assert_eq!(converted.role, "user");
    }

    #[test]
    fn test_request_carries_system_field() {
        let provider = AnthropicProvider {
            client: HttpProviderClient::new(30),
            config: test_config(),
        };
        let request = provider.build_request(
            &[user_message("question")],
            &["retrieved snippet".to_string()],
            false,
        );

        assert!(request.system.contains("retrieved snippet"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_usage_conversion() {
        let usage: TokenUsage = AnthropicUsage {
            input_tokens: 10,
            output_tokens: 4,
        }
        .into();
        assert_eq!(usage.total_tokens, 14);
    }
}

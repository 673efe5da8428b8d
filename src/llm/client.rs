//! Shared HTTP client for cloud providers
//!
//! Wraps `reqwest` with per-request timeouts mapped to typed errors and a
//! server-sent-events reader used by the streaming chat paths.

use crate::error::{LlmError, RagError, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// `data:` payload lines of an SSE response
pub type SseStream = BoxStream<'static, Result<String>>;

/// HTTP client shared by provider implementations
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: Client,
    timeout: Duration,
}

impl HttpProviderClient {
    /// Create a client with the given per-request timeout
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Execute a POST request with JSON body
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: Vec<(&str, String)>,
    ) -> Result<R> {
        debug!("Making POST request to: {}", url);

        let mut request = self.client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Self::handle_response(response).await
    }

    /// Execute a GET request
    pub async fn get<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: Vec<(&str, String)>,
    ) -> Result<R> {
        debug!("Making GET request to: {}", url);

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Self::handle_response(response).await
    }

    /// Execute a POST request and read the response as server-sent events
    ///
    /// The timeout covers connection and response headers; the body streams
    /// until the server closes it.
    pub async fn post_sse<T: Serialize>(
        &self,
        url: &str,
        body: &T,
        headers: Vec<(&str, String)>,
    ) -> Result<SseStream> {
        debug!("Opening SSE stream to: {}", url);

        let mut request = self.client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {} error", status));
            error!("API error ({}): {}", status, error_text);
            return Err(Self::status_error(status, error_text).into());
        }

        // Buffer raw bytes so a multi-byte character split across network
        // chunks is only decoded once its line is complete.
        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| RagError::Llm(LlmError::ConnectionFailed(e.to_string())))
            })
            .scan(Vec::<u8>::new(), |buffer, chunk| {
                let lines: Vec<Result<String>> = match chunk {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        let mut complete = Vec::new();
                        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=newline).collect();
                            let line = String::from_utf8_lossy(&line);
                            let line = line.trim_end_matches(['\n', '\r']);
                            if let Some(data) = line.strip_prefix("data:") {
                                complete.push(Ok(data.trim_start().to_string()));
                            }
                        }
                        complete
                    }
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(futures::stream::iter(lines)))
            })
            .flatten();

        Ok(stream.boxed())
    }

    /// Handle HTTP response and deserialize
    async fn handle_response<R: DeserializeOwned>(response: Response) -> Result<R> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {} error", status));

            error!("API error ({}): {}", status, error_text);
            return Err(Self::status_error(status, error_text).into());
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()).into())
    }

    fn status_error(status: StatusCode, error_text: String) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized,
            429 => LlmError::RateLimited,
            500..=599 => LlmError::ServerError(error_text),
            _ => LlmError::GenerationFailed(error_text),
        }
    }
}

//! Ollama provider implementation.
//!
//! Talks to the native Ollama HTTP API:
//! - `POST /api/chat` for completions (single JSON body or NDJSON stream)
//! - `POST /api/embed` for batch embeddings
//! - `GET /api/tags` for health checks

use async_trait::async_trait;
use futures::StreamExt;
use inkwell_config::LlmConfig;
use inkwell_core::error::ProviderError;
use inkwell_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A provider backed by a local or remote Ollama server.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the server at `base_url`.
    ///
    /// Only the connection phase has a client-level timeout. Callers bound
    /// each attempt to start a request, and each wait for the next stream
    /// chunk, with their own deadline.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> ApiChatRequest<'_> {
        ApiChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream,
            options: ApiOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }

    async fn post_chat(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&Self::chat_body(request, stream))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        check_status(response, &request.model).await
    }
}

/// Map non-success HTTP statuses to provider errors.
async fn check_status(
    response: reqwest::Response,
    model: &str,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if status == 200 {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    warn!(status, body = %error_body, "Ollama returned error");

    if status == 404 {
        return Err(ProviderError::ModelNotFound(model.to_string()));
    }
    Err(ProviderError::ApiError {
        status_code: status,
        message: error_body,
    })
}

fn usage_from(prompt: Option<u32>, completion: Option<u32>) -> Option<Usage> {
    if prompt.is_none() && completion.is_none() {
        return None;
    }
    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    })
}

/// Raw response bytes split into lines. Decoding waits for a whole line, so
/// a multi-byte character split across network reads survives intact.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line without its terminator. Lines that are not valid
    /// UTF-8 are skipped.
    fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.bytes.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.bytes.drain(..=end).collect();
            match std::str::from_utf8(&line) {
                Ok(text) => return Some(text.trim_end_matches(['\n', '\r']).to_string()),
                Err(e) => warn!(error = %e, "Skipping stream line with invalid UTF-8"),
            }
        }
    }

    /// Whatever is left after the last newline.
    fn remainder(&mut self) -> Option<String> {
        String::from_utf8(std::mem::take(&mut self.bytes)).ok()
    }
}

/// Parse one NDJSON line of a streaming `/api/chat` response.
///
/// Returns `None` for blank lines.
fn parse_stream_line(line: &str) -> Option<std::result::Result<StreamChunk, ProviderError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parsed: ApiChatResponse = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Some(Err(ProviderError::StreamInterrupted(format!(
                "unparseable stream line: {e}"
            ))));
        }
    };

    if let Some(error) = parsed.error {
        return Some(Err(ProviderError::StreamInterrupted(error)));
    }

    let content = parsed
        .message
        .map(|m| m.content)
        .filter(|c| !c.is_empty());

    Some(Ok(StreamChunk {
        content,
        done: parsed.done,
        usage: if parsed.done {
            usage_from(parsed.prompt_eval_count, parsed.eval_count)
        } else {
            None
        },
    }))
}

#[async_trait]
impl inkwell_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(model = %request.model, "Sending completion request");

        let response = self.post_chat(&request, false).await?;
        let api_response: ApiChatResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        if let Some(error) = api_response.error {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: error,
            });
        }

        let content = api_response
            .message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No message in response".into(),
            })?;

        Ok(ProviderResponse {
            content,
            usage: usage_from(api_response.prompt_eval_count, api_response.eval_count),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        debug!(model = %request.model, "Sending streaming request");

        let response = self.post_chat(&request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the NDJSON byte stream and forward parsed chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = LineBuffer::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend(&bytes);

                while let Some(line) = buffer.next_line() {
                    let Some(parsed) = parse_stream_line(&line) else {
                        continue;
                    };
                    let finished = matches!(&parsed, Ok(chunk) if chunk.done) || parsed.is_err();
                    if tx.send(parsed).await.is_err() {
                        trace!("Stream receiver dropped");
                        return;
                    }
                    if finished {
                        return;
                    }
                }
            }

            // Trailing line without newline
            if let Some(parsed) = buffer.remainder().as_deref().and_then(parse_stream_line) {
                let finished = matches!(&parsed, Ok(chunk) if chunk.done) || parsed.is_err();
                if tx.send(parsed).await.is_err() || finished {
                    return;
                }
            }

            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before completion".into(),
                )))
                .await;
        });

        Ok(rx)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let url = format!("{}/api/embed", self.base_url);

        debug!(
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self
            .client
            .post(&url)
            .json(&ApiEmbedRequest {
                model: &request.model,
                input: &request.inputs,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status(response, &request.model).await?;

        let api_resp: ApiEmbedResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        if api_resp.embeddings.len() != request.inputs.len() {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: format!(
                    "expected {} embeddings, got {}",
                    request.inputs.len(),
                    api_resp.embeddings.len()
                ),
            });
        }

        Ok(EmbeddingResponse {
            embeddings: api_resp.embeddings,
            model: api_resp.model.unwrap_or(request.model),
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    stream: bool,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

/// Both the non-streaming body and each NDJSON stream line.
#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ApiEmbedResponse {
    #[serde(default)]
    model: Option<String>,
    embeddings: Vec<Vec<f32>>,
}

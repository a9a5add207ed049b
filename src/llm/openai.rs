use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::LlmProvider;
use super::stream::TextStream;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

/// Client for OpenAI and OpenAI-compatible servers (LM Studio, vLLM, llama.cpp).
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    base_url: String,
    client: Client,
    request_timeout: Duration,
}

impl OpenAiCompatibleProvider {
    /// `base_url` includes the API version prefix, e.g. `https://api.openai.com/v1`.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| ApiError::Config("llm.api_key contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    fn chat_body(request: &ChatRequest, model_id: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
            if let Some(s) = &request.stop {
                obj.insert("stop".to_string(), json!(s));
            }
        }
        body
    }

    async fn post(&self, path: &str, body: &Value, timeout: Option<Duration>) -> Result<Response, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.client.post(&url).json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let res = builder.send().await?;
        check_status(res).await
    }
}

async fn check_status(res: Response) -> Result<Response, ApiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    let message = format!("backend returned {}: {}", status, truncate(&text, 300));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(ApiError::Transport(message))
    } else {
        Err(ApiError::Internal(message))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Ignore,
}

/// Splits a byte stream into lines. Bytes are decoded only once a whole line
/// has arrived, so a multi-byte character cut across network frames stays
/// intact.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Appends `bytes` and returns every line it completed, newline included.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(line));
        }
        lines
    }

    /// Whatever trails the last newline when the body ends.
    pub(crate) fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode_line(self.pending))
    }
}

fn decode_line(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Interprets one line of an OpenAI streaming response.
pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Ignore;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseEvent::Delta(content.to_string()),
            _ => SseEvent::Ignore,
        },
        Err(_) => SseEvent::Ignore,
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let body = Self::chat_body(&request, model_id, false);
        let res = self
            .post("chat/completions", &body, Some(self.request_timeout))
            .await?;

        let payload: Value = res.json().await.map_err(ApiError::internal)?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::Internal("chat response has no message content".into()))
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<TextStream, ApiError> {
        let body = Self::chat_body(&request, model_id, true);

        // Only the wait for response headers is bounded; the body streams freely.
        let res = tokio::time::timeout(self.request_timeout, self.post("chat/completions", &body, None))
            .await
            .map_err(|_| ApiError::Transport("timed out waiting for the stream to start".into()))??;

        let (tx, stream) = TextStream::channel();
        let mut bytes = res.bytes_stream();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::default();
            while let Some(item) = bytes.next().await {
                match item {
                    Ok(chunk) => {
                        for line in lines.push(&chunk) {
                            match parse_sse_line(&line) {
                                SseEvent::Delta(content) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                                SseEvent::Done => return,
                                SseEvent::Ignore => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::from(e))).await;
                        return;
                    }
                }
            }
            if let Some(rest) = lines.finish() {
                if let SseEvent::Delta(content) = parse_sse_line(&rest) {
                    let _ = tx.send(Ok(content)).await;
                }
            }
        });

        Ok(stream)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .post("embeddings", &body, Some(self.request_timeout))
            .await?;
        let mut payload: EmbeddingResponse = res.json().await.map_err(ApiError::internal)?;

        if payload.data.len() != inputs.len() {
            return Err(ApiError::Internal(format!(
                "embedding backend returned {} vectors for {} inputs",
                payload.data.len(),
                inputs.len()
            )));
        }
        payload.data.sort_by_key(|item| item.index);
        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }
}

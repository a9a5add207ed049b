//! In-process provider with scripted replies for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::provider::LlmProvider;
use super::stream::TextStream;
use super::types::ChatRequest;
use crate::core::errors::ApiError;
use crate::embedding::hashing::hash_embed;

pub const SCRIPTED_EMBED_DIMENSION: usize = 64;

pub enum StreamScript {
    Fragments(Vec<String>),
    /// Yields the fragments, then a transport error.
    Interrupted(Vec<String>),
    /// `stream_chat` itself fails.
    Fail(ApiError),
}

impl StreamScript {
    pub fn text(parts: &[&str]) -> Self {
        StreamScript::Fragments(parts.iter().map(|p| p.to_string()).collect())
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    chat_replies: Mutex<VecDeque<Result<String, ApiError>>>,
    stream_replies: Mutex<VecDeque<StreamScript>>,
    embed_failures: Mutex<VecDeque<ApiError>>,
    poisoned_marker: Mutex<Option<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    chat_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, reply: Result<String, ApiError>) -> &Self {
        self.chat_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn push_stream(&self, script: StreamScript) -> &Self {
        self.stream_replies.lock().unwrap().push_back(script);
        self
    }

    /// The next embed call fails with `err`.
    pub fn push_embed_failure(&self, err: ApiError) -> &Self {
        self.embed_failures.lock().unwrap().push_back(err);
        self
    }

    /// Every embed call whose batch contains `marker` fails with a non-transport error.
    pub fn poison_embeddings_containing(&self, marker: &str) -> &Self {
        *self.poisoned_marker.lock().unwrap() = Some(marker.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Internal("no scripted chat reply".into())))
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        _model_id: &str,
    ) -> Result<TextStream, ApiError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let script = self
            .stream_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamScript::Fail(ApiError::Internal("no scripted stream".into())));

        match script {
            StreamScript::Fragments(parts) => Ok(TextStream::from_fragments(parts)),
            StreamScript::Interrupted(parts) => {
                let (tx, stream) = TextStream::channel();
                tokio::spawn(async move {
                    for part in parts {
                        if tx.send(Ok(part)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Err(ApiError::transport("connection reset mid-stream")))
                        .await;
                });
                Ok(stream)
            }
            StreamScript::Fail(err) => Err(err),
        }
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.embed_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(marker) = self.poisoned_marker.lock().unwrap().as_deref() {
            if inputs.iter().any(|input| input.contains(marker)) {
                return Err(ApiError::Internal("embedding rejected input".into()));
            }
        }
        Ok(inputs
            .iter()
            .map(|input| hash_embed(input, SCRIPTED_EMBED_DIMENSION))
            .collect())
    }
}

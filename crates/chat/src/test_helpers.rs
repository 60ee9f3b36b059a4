//! Shared test helpers: a scripted provider doubling as chat model and
//! embedder.

use inkwell_core::error::ProviderError;
use inkwell_core::provider::{
    ChunkReceiver, EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest,
    ProviderResponse, StreamChunk, Usage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// What the next `stream()` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream the text word by word, then finish.
    Reply(String),
    /// Refuse to start the stream.
    Fail(ProviderError),
    /// Emit the text, then fail mid-stream.
    BreakAfter(String),
    /// Emit the text, then stall until the receiver goes away.
    Stall(String),
}

/// Vector whose cosine similarity with `[1, 0]` is exactly `score`.
pub fn unit_vector(score: f32) -> Vec<f32> {
    vec![score, (1.0 - score * score).max(0.0).sqrt()]
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    summaries: Mutex<VecDeque<Result<String, ProviderError>>>,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    embeddings_down: AtomicBool,
    embed_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            vectors: Mutex::new(HashMap::new()),
            embeddings_down: AtomicBool::new(false),
            embed_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn reply(&self, text: &str) {
        self.push(Script::Reply(text.into()));
    }

    pub fn push_summary(&self, result: Result<String, ProviderError>) {
        self.summaries.lock().unwrap().push_back(result);
    }

    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.into(), vector);
    }

    pub fn set_embeddings_down(&self, down: bool) {
        self.embeddings_down.store(down, Ordering::SeqCst);
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Every chat and summary request seen so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn text_chunk(text: &str) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: Some(text.to_string()),
        done: false,
        usage: None,
    })
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self
            .summaries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Summary of the earlier conversation.".into()));
        next.map(|content| ProviderResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Reply("ok".into()));

        match script {
            Script::Fail(e) => Err(e),
            Script::Reply(text) => {
                let words: Vec<&str> = text.split_inclusive(' ').collect();
                let (tx, rx) = tokio::sync::mpsc::channel(words.len() + 1);
                for word in words {
                    let _ = tx.try_send(text_chunk(word));
                }
                let _ = tx.try_send(Ok(StreamChunk {
                    content: None,
                    done: true,
                    usage: None,
                }));
                Ok(rx)
            }
            Script::BreakAfter(text) => {
                let (tx, rx) = tokio::sync::mpsc::channel(2);
                let _ = tx.try_send(text_chunk(&text));
                let _ = tx.try_send(Err(ProviderError::StreamInterrupted(
                    "connection reset".into(),
                )));
                Ok(rx)
            }
            Script::Stall(text) => {
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                tokio::spawn(async move {
                    let _ = tx.send(text_chunk(&text)).await;
                    tx.closed().await;
                });
                Ok(rx)
            }
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.embeddings_down.load(Ordering::SeqCst) {
            return Err(ProviderError::Network("embedding service unreachable".into()));
        }
        let vectors = self.vectors.lock().unwrap();
        let embeddings = request
            .inputs
            .iter()
            .map(|text| vectors.get(text).cloned().unwrap_or_else(|| unit_vector(0.0)))
            .collect();
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
        })
    }
}

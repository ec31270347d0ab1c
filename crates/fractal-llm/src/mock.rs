//! Deterministic LLM provider for exercising the agent loop and fractal
//! delegation without a network call, plus fake Embedding/VectorStore ports
//! for the same purpose.

use crate::ports::{EmbeddingProvider, PortResult, VectorMatch, VectorStore};
use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta};
use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A scripted response for [`MockLlmProvider`].
#[derive(Clone, Debug)]
pub enum MockBehavior {
    Text(String),
    ToolCall { name: String, args: Value },
    MultiToolCall(Vec<(String, Value)>),
    TextThenTool { text: String, tool_name: String, tool_args: Value },
    Error(String),
}

/// Pops one [`MockBehavior`] per call; once the sequence is exhausted it
/// repeats a default text reply. This is the only `LlmProvider` most tests
/// need — no network access, fully deterministic.
pub struct MockLlmProvider {
    behaviors: Mutex<Vec<MockBehavior>>,
    default_behavior: MockBehavior,
    call_count: Mutex<usize>,
    last_request: Mutex<Option<LlmRequest>>,
}

impl MockLlmProvider {
    pub fn constant(behavior: MockBehavior) -> Self {
        Self { behaviors: Mutex::new(Vec::new()), default_behavior: behavior, call_count: Mutex::new(0), last_request: Mutex::new(None) }
    }

    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            default_behavior: MockBehavior::Text("(mock: sequence exhausted)".into()),
            call_count: Mutex::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub async fn call_count(&self) -> usize {
        *self.call_count.lock().await
    }

    /// The most recent request this provider was asked to complete — lets a
    /// test inspect what context assembly produced without a real backend.
    pub async fn last_request(&self) -> Option<LlmRequest> {
        self.last_request.lock().await.clone()
    }

    async fn next_behavior(&self) -> MockBehavior {
        let mut count = self.call_count.lock().await;
        *count += 1;
        let mut behaviors = self.behaviors.lock().await;
        if behaviors.is_empty() {
            self.default_behavior.clone()
        } else {
            behaviors.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> &[&str] {
        &["mock-model"]
    }

    async fn complete_stream(&self, request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
        *self.last_request.lock().await = Some(request);
        let behavior = self.next_behavior().await;
        let s = stream! {
            match behavior {
                MockBehavior::Text(text) => {
                    for chunk in text.as_bytes().chunks(40) {
                        yield Ok(StreamDelta::Text(String::from_utf8_lossy(chunk).to_string()));
                    }
                    yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
                }
                MockBehavior::ToolCall { name, args } => {
                    let id = format!("toolu_mock_{}", uuid::Uuid::new_v4().simple());
                    yield Ok(StreamDelta::ToolCallStart { id: id.clone(), name });
                    yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments: serde_json::to_string(&args).unwrap_or_default() });
                    yield Ok(StreamDelta::ToolCallEnd { id });
                    yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
                }
                MockBehavior::MultiToolCall(calls) => {
                    for (name, args) in calls {
                        let id = format!("toolu_mock_{}", uuid::Uuid::new_v4().simple());
                        yield Ok(StreamDelta::ToolCallStart { id: id.clone(), name });
                        yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments: serde_json::to_string(&args).unwrap_or_default() });
                        yield Ok(StreamDelta::ToolCallEnd { id });
                    }
                    yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
                }
                MockBehavior::TextThenTool { text, tool_name, tool_args } => {
                    yield Ok(StreamDelta::Text(text));
                    let id = format!("toolu_mock_{}", uuid::Uuid::new_v4().simple());
                    yield Ok(StreamDelta::ToolCallStart { id: id.clone(), name: tool_name });
                    yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments: serde_json::to_string(&tool_args).unwrap_or_default() });
                    yield Ok(StreamDelta::ToolCallEnd { id });
                    yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
                }
                MockBehavior::Error(msg) => {
                    yield Err(LlmError::RequestFailed(msg));
                }
            }
        };
        Ok(Box::pin(s))
    }
}

/// A deterministic embedder: hashes words into a fixed-size bag-of-words
/// vector. Good enough to make cosine similarity behave sensibly in tests
/// without pulling in a real embedding model.
pub struct MockEmbeddingProvider {
    dim: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> PortResult<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        for word in text.split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for b in word.as_bytes() {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            v[(hash as usize) % self.dim] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// An in-memory vector store: linear-scan cosine search. Fine for tests and
/// small deployments; an embedder swaps this for a real backend in
/// production via the same trait.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: StdMutex<HashMap<String, (Vec<f32>, HashMap<String, Value>)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: HashMap<String, Value>) -> PortResult<()> {
        self.entries.lock().unwrap().insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> PortResult<Vec<VectorMatch>> {
        let entries = self.entries.lock().unwrap();
        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .map(|(id, (v, meta))| VectorMatch { id: id.clone(), score: cosine(vector, v), metadata: meta.clone() })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, id: &str) -> PortResult<()> {
        self.entries.lock().unwrap().remove(id);
        Ok(())
    }

    async fn count(&self) -> PortResult<usize> {
        Ok(self.entries.lock().unwrap().len())
    }
}

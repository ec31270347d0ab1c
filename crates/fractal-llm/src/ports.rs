//! The Embedding, Vector Store, and Sandbox ports (C9). Each is a thin
//! async trait an embedder implements against a concrete backend; the core
//! runtime only ever talks to the trait object.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub type PortResult<T> = Result<T, PortError>;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("embedding backend error: {0}")]
    Embedding(String),
    #[error("vector store error: {0}")]
    VectorStore(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into a dense vector for semantic memory retrieval (C4).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> PortResult<Vec<f32>>;

    async fn batch_embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, Value>,
}

/// Backs L4 long-term memory (C4) when persistence is enabled.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: HashMap<String, Value>) -> PortResult<()>;

    async fn search(&self, vector: &[f32], top_k: usize) -> PortResult<Vec<VectorMatch>>;

    async fn delete(&self, id: &str) -> PortResult<()>;

    async fn count(&self) -> PortResult<usize>;
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DynamicToolSpec {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub implementation: String,
}

/// Lets an agent create and execute tools at runtime, if the embedder wires
/// up a code-execution backend. Optional: most deployments never touch it.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn create_tool(&self, spec: DynamicToolSpec) -> PortResult<()>;
    async fn list_tools(&self) -> PortResult<Vec<String>>;
    async fn execute(&self, tool_name: &str, args: Value) -> PortResult<Value>;
}

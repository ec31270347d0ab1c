//! The LLM, Embedding, Vector Store, and Sandbox ports (C9) — the only
//! surface the core runtime uses to reach outside itself. No concrete
//! vendor SDK lives here; that is an embedder's integration concern.

pub mod mock;
pub mod ports;
pub mod provider;
pub mod types;

pub use mock::{InMemoryVectorStore, MockBehavior, MockEmbeddingProvider, MockLlmProvider};
pub use ports::{DynamicToolSpec, EmbeddingProvider, PortError, PortResult, Sandbox, VectorMatch, VectorStore};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use types::*;

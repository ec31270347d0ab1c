//! Optional L4 persistence port (§4.4 supplemented, §4.9). L1–L3 are
//! explicitly volatile and have no persistence hook — only facts that have
//! survived to long-term memory are worth carrying across a restart.

use fractal_core::MemoryUnit;

pub type MemoryStoreResult<T> = Result<T, MemoryStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("memory store backend error: {0}")]
    Backend(String),
}

#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save_fact(&self, unit: &MemoryUnit) -> MemoryStoreResult<()>;
    async fn load_facts(&self) -> MemoryStoreResult<Vec<MemoryUnit>>;
    async fn delete_fact(&self, unit_id: &str) -> MemoryStoreResult<()>;
}

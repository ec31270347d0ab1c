//! Hierarchical memory (C4): four tiers, a promotion pipeline, ephemeral
//! scratch space, semantic/keyword retrieval, and context projection for
//! delegated child agents.

pub mod config;
pub mod persistence;
pub mod projection;
pub mod store;
pub mod summarizer;

pub use config::MemoryConfig;
pub use fractal_core::{MemoryTier, MemoryUnit, MemoryUnitType};
pub use persistence::{MemoryStore, MemoryStoreError, MemoryStoreResult};
pub use projection::{ContextProjection, ProjectionMode};
pub use store::{HierarchicalMemory, MemoryPorts};
pub use summarizer::{rule_based_summary, Summarizer};

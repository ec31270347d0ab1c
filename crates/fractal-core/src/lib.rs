//! Core types, traits, and error handling for the fractal agent runtime.
//!
//! This crate has no knowledge of the event bus, tools, memory, or the LLM
//! — it defines the vocabulary ([`Task`], [`CloudEvent`], [`AgentConfig`])
//! that every other crate in the workspace speaks.

pub mod error;
pub mod memory;
pub mod skill;
pub mod types;

pub use error::{Error, Result};
pub use memory::{MemoryTier, MemoryUnit, MemoryUnitType};
pub use skill::Skill;
pub use types::*;

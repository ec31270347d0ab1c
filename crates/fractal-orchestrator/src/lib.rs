//! The fractal orchestrator (C7): builds the delegation tree of
//! [`fractal_agent::AgentNode`]s, each scoped by its own
//! [`fractal_core::AgentConfig`], and tracks every delegation's lifecycle
//! through a [`DelegationRegistry`].

pub mod orchestrator;
pub mod registry;

pub use orchestrator::FractalOrchestrator;
pub use registry::{purpose_hash_name, DelegationRegistry, DelegationStatus};

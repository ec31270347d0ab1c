//! Tool registry, schema validation, caching, and batch scheduling (C3).
//!
//! Each tool is a self-contained file in `src/tools/`. To add a tool: create
//! the file, implement [`Tool`], register it in [`create_default_registry`].
//! To remove one: delete the file, remove it from `tools/mod.rs` and here.

pub mod cache;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod tools;

pub use cache::ToolCache;
pub use registry::{Tool, ToolRegistry, ToolResult};
pub use scheduler::{Scheduler, SchedulerConfig, ToolCallRequest, ToolObservation};
pub use tools::create_tool::CreateToolTool;
pub use tools::delegate::{
    DelegateTaskTool, DelegationControl, DelegationControlTool, DelegationInfoSnapshot,
    DelegationRegistryHandle, DelegationRuntime, DelegationRuntimeHandle,
};
pub use tools::memory_query::{QueryL2MemoryTool, QueryL3MemoryTool, SearchL4MemoryTool};

use fractal_core::AgentConfig;
use fractal_llm::Sandbox;
use fractal_memory::HierarchicalMemory;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the orchestrator's delegation registry, set after
/// construction — the tool registry is built before the registry that
/// depends on it exists.
pub type RegistryHandle = Arc<RwLock<Option<DelegationRegistryHandle>>>;

/// Create an empty delegation runtime handle. Set it after constructing the
/// orchestrator's runtime: `*handle.write().await = Some(runtime)`.
pub fn create_runtime_handle() -> DelegationRuntimeHandle {
    Arc::new(RwLock::new(None))
}

/// Create an empty delegation registry handle. Set it after constructing
/// the orchestrator's delegation registry.
pub fn create_registry_handle() -> RegistryHandle {
    Arc::new(RwLock::new(None))
}

/// Build the full tool registry: every builtin tool, unscoped, plus memory
/// query tools over `memory` and (if provided) a dynamic `create_tool`
/// backed by `sandbox`.
pub fn create_default_registry(
    workspace_root: impl AsRef<Path>,
    runtime_handle: DelegationRuntimeHandle,
    registry_handle: RegistryHandle,
    memory: Arc<HierarchicalMemory>,
    sandbox: Option<Arc<dyn Sandbox>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();

    registry.register(tools::read::ReadTool::new(root));
    registry.register(tools::glob::GlobTool::new(root));
    registry.register(tools::grep::GrepTool::new(root));

    registry.register(tools::write::WriteTool::new(root));
    registry.register(tools::edit::EditTool::new(root));
    registry.register(tools::bash::BashTool::new(root));

    registry.register(DelegateTaskTool::new(runtime_handle).with_registry(registry_handle.clone()));
    registry.register(DelegationControlTool::new(registry_handle));

    registry.register(QueryL2MemoryTool::new(memory.clone()));
    registry.register(QueryL3MemoryTool::new(memory.clone()));
    registry.register(SearchL4MemoryTool::new(memory));

    if let Some(sandbox) = sandbox {
        registry.register(CreateToolTool::new(sandbox));
    }

    registry
}

/// Build a registry scoped to an [`AgentConfig`]'s `enabled_tools` — the
/// mechanism by which a child agent's tool surface is pruned at delegation
/// time (§4.6). A tool absent from the registry is invisible to the LLM:
/// it can't be called, let alone misused.
pub fn create_scoped_registry(
    workspace_root: impl AsRef<Path>,
    config: &AgentConfig,
    runtime_handle: DelegationRuntimeHandle,
    registry_handle: RegistryHandle,
    memory: Arc<HierarchicalMemory>,
    sandbox: Option<Arc<dyn Sandbox>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();
    let enabled = |name: &str| config.enabled_tools.contains(name);

    if enabled("read") {
        registry.register(tools::read::ReadTool::new(root));
    }
    if enabled("glob") {
        registry.register(tools::glob::GlobTool::new(root));
    }
    if enabled("grep") {
        registry.register(tools::grep::GrepTool::new(root));
    }
    if enabled("write") {
        registry.register(tools::write::WriteTool::new(root));
    }
    if enabled("edit") {
        registry.register(tools::edit::EditTool::new(root));
    }
    if enabled("bash") {
        registry.register(tools::bash::BashTool::new(root));
    }
    if enabled("delegate_task") {
        registry.register(DelegateTaskTool::new(runtime_handle).with_registry(registry_handle.clone()));
    }
    if enabled("delegation_control") {
        registry.register(DelegationControlTool::new(registry_handle));
    }
    if enabled("query_l2_memory") {
        registry.register(QueryL2MemoryTool::new(memory.clone()));
    }
    if enabled("query_l3_memory") {
        registry.register(QueryL3MemoryTool::new(memory.clone()));
    }
    if enabled("search_l4_memory") {
        registry.register(SearchL4MemoryTool::new(memory));
    }
    if enabled("create_tool") {
        if let Some(sandbox) = sandbox {
            registry.register(CreateToolTool::new(sandbox));
        }
    }

    registry
}

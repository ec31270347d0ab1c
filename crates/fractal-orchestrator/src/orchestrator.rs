//! The fractal orchestrator (C7): builds every node in the delegation tree
//! — root or child — with the same recipe, so recursion is genuine
//! self-similarity rather than a special case. A node's own
//! [`AgentConfig`] (and, through it, its own depth and budget) is what the
//! `delegate_task` tool bridges back into when a child delegates further.

use fractal_agent::AgentNode;
use fractal_bus::EventBus;
use fractal_core::{ActionKind, AgentConfig, Task};
use fractal_llm::{LlmProvider, Sandbox};
use fractal_memory::{HierarchicalMemory, MemoryConfig, MemoryPorts};
use fractal_tools::{create_registry_handle, create_runtime_handle, create_scoped_registry, DelegationRuntime, SchedulerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::registry::DelegationRegistry;

/// Rough `chars/4` token estimate, matching the approximation used
/// elsewhere in the codebase for ports this crate can't reach directly.
fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Builds every [`AgentNode`] in the tree — the root and every delegated
/// child — wired to a shared LLM, workspace, event bus, and delegation
/// registry.
pub struct FractalOrchestrator {
    llm: Arc<dyn LlmProvider>,
    workspace_root: PathBuf,
    bus: Option<Arc<EventBus>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    registry: Arc<DelegationRegistry>,
    max_parallel_reads: usize,
}

impl FractalOrchestrator {
    /// `max_children` bounds fan-out for every parent in the tree; it comes
    /// from the root [`AgentConfig`] since the registry is shared across all
    /// depths and can't vary per-node.
    pub fn new(llm: Arc<dyn LlmProvider>, workspace_root: impl Into<PathBuf>, max_children: usize) -> Self {
        Self {
            llm,
            workspace_root: workspace_root.into(),
            bus: None,
            sandbox: None,
            registry: Arc::new(DelegationRegistry::new(max_children)),
            max_parallel_reads: SchedulerConfig::default().max_parallel_reads,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Bounds concurrent reads within a node's tool-executor queue (§5); the
    /// same limit applies to every node this orchestrator builds, root and
    /// child alike.
    pub fn with_max_parallel_reads(mut self, max_parallel_reads: usize) -> Self {
        self.max_parallel_reads = max_parallel_reads;
        self
    }

    pub fn registry(&self) -> &Arc<DelegationRegistry> {
        &self.registry
    }

    /// Build the root node: depth 0, a fresh L1-L4 memory, every tool its
    /// config enables.
    pub async fn build_root_node(&self, node_id: impl Into<String>, config: AgentConfig) -> AgentNode {
        let memory = Arc::new(HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default()));
        self.build_node(node_id, config, memory).await
    }

    /// Build any node — root or child — with its own config and memory.
    /// Every node gets its own runtime/registry handle pair so that the
    /// `delegate_task` tool it's given, if any, bridges into a
    /// [`NodeDelegationRuntime`] that knows *this* node's depth.
    pub async fn build_node(&self, node_id: impl Into<String>, config: AgentConfig, memory: Arc<HierarchicalMemory>) -> AgentNode {
        let node_id = node_id.into();
        let runtime_handle = create_runtime_handle();
        let registry_handle = create_registry_handle();

        let tools = Arc::new(create_scoped_registry(
            &self.workspace_root,
            &config,
            runtime_handle.clone(),
            registry_handle.clone(),
            memory.clone(),
            self.sandbox.clone(),
        ));

        let mut node = AgentNode::new(node_id, config.clone(), self.llm.clone(), tools, memory.clone())
            .with_scheduler_config(SchedulerConfig { max_parallel_reads: self.max_parallel_reads, ..SchedulerConfig::default() });
        if let Some(bus) = &self.bus {
            node = node.with_bus(bus.clone());
        }

        let node_runtime: Arc<dyn DelegationRuntime> = Arc::new(NodeDelegationRuntime {
            orchestrator_llm: self.llm.clone(),
            workspace_root: self.workspace_root.clone(),
            bus: self.bus.clone(),
            sandbox: self.sandbox.clone(),
            registry: self.registry.clone(),
            max_parallel_reads: self.max_parallel_reads,
            parent_config: config,
            parent_memory: memory,
        });

        *runtime_handle.write().await = Some(node_runtime);
        *registry_handle.write().await = Some(self.registry.clone() as Arc<dyn fractal_tools::DelegationControl>);

        node
    }
}

/// Bridges a single node's `delegate_task` tool calls into freshly built
/// child [`AgentNode`]s. One instance per node, capturing that node's own
/// config (and so its own depth) — the mechanism that makes delegation
/// genuinely recursive rather than routed through one global depth
/// counter.
struct NodeDelegationRuntime {
    orchestrator_llm: Arc<dyn LlmProvider>,
    workspace_root: PathBuf,
    bus: Option<Arc<EventBus>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    registry: Arc<DelegationRegistry>,
    max_parallel_reads: usize,
    parent_config: AgentConfig,
    parent_memory: Arc<HierarchicalMemory>,
}

#[async_trait::async_trait]
impl DelegationRuntime for NodeDelegationRuntime {
    async fn run_child(
        &self,
        session_id: &str,
        system_prompt: &str,
        task: &str,
        add_skills: &[String],
        remove_skills: &[String],
        add_tools: &[String],
        remove_tools: &[String],
        timeout_ms: u64,
    ) -> Result<(String, usize), String> {
        if !self.parent_config.can_delegate() {
            return Err("depth_limit".to_string());
        }

        let child_config = self.parent_config.inherit(add_skills, remove_skills, add_tools, remove_tools);
        let child_config = AgentConfig { system_prompt: Some(system_prompt.to_string()), ..child_config };

        let projection = self.parent_memory.create_projection(task, child_config.context_budget_tokens / 2, None).await;
        let child_memory = Arc::new(HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default()));
        for unit in projection.items {
            child_memory.record(unit).await;
        }

        let orchestrator = FractalOrchestrator {
            llm: self.orchestrator_llm.clone(),
            workspace_root: self.workspace_root.clone(),
            bus: self.bus.clone(),
            sandbox: self.sandbox.clone(),
            registry: self.registry.clone(),
            max_parallel_reads: self.max_parallel_reads,
        };
        let child_node = orchestrator.build_node(session_id.to_string(), child_config, child_memory).await;

        let mut params = serde_json::Map::new();
        params.insert("instruction".to_string(), serde_json::json!(task));
        let child_task = Task::new(ActionKind::Execute, params).with_session(session_id);

        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), child_node.execute_task(child_task, cancel)).await;

        match result {
            Ok(finished) => match finished.status {
                fractal_core::TaskStatus::Completed => {
                    let output = finished.result.as_ref().and_then(|v| v.as_str()).map(str::to_string).unwrap_or_default();
                    let tokens = estimate_tokens(&output);
                    Ok((output, tokens))
                }
                _ => Err(finished.error.unwrap_or_else(|| "child task did not complete".to_string())),
            },
            Err(_) => Err(format!("delegation timed out after {timeout_ms}ms")),
        }
    }
}

//! `delegate_task` — the fractal-delegation primitive (C7). Any agent can
//! delegate a scoped subtask to a freshly constructed child agent.
//!
//! This is not a generic utility: it is how the fractal orchestrator's
//! recursion becomes visible to the LLM. Code prepares the child's isolated
//! context, the child reasons within its own budget, code captures the
//! result and hands it back to the parent as a plain tool observation.
//!
//! [`DelegationRuntime`] and [`DelegationControl`] are bridge traits that
//! decouple this crate from `fractal-orchestrator`: the orchestrator owns
//! the concrete registry and runtime, this tool only ever sees trait
//! objects, breaking what would otherwise be a circular crate dependency.

use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the orchestrator's runtime, set after construction —
/// the tool registry is built before the runtime that depends on it exists.
pub type DelegationRuntimeHandle = Arc<RwLock<Option<Arc<dyn DelegationRuntime>>>>;

/// Shared handle to the delegation registry for lifecycle tracking.
pub type DelegationRegistryHandle = Arc<dyn DelegationControl>;

/// Implemented by the fractal orchestrator's delegation registry. Decouples
/// the tool layer from the concrete registry type.
#[async_trait::async_trait]
pub trait DelegationControl: Send + Sync {
    /// Register a new delegation. Returns its display name, or an error
    /// string (`"depth_limit"` / `"max_children"`) if the orchestrator's
    /// invariants would be violated.
    fn register(&self, purpose: &str, session_id: &str, parent: Option<&str>) -> Result<String, String>;
    fn mark_complete(&self, name: &str, output: &str, tokens: usize);
    fn mark_failed(&self, name: &str, error: &str);
    fn pause(&self, name: &str) -> Result<(), String>;
    fn resume(&self, name: &str) -> Result<(), String>;
    fn kill(&self, name: &str) -> Result<(), String>;
    fn query(&self, name: &str) -> Result<DelegationInfoSnapshot, String>;
    fn list_all(&self) -> Vec<DelegationInfoSnapshot>;
    fn find_by_prefix(&self, prefix: &str) -> Option<String>;
}

/// Snapshot of a delegation's state, decoupled from the orchestrator's
/// internal representation.
#[derive(Debug, Clone)]
pub struct DelegationInfoSnapshot {
    pub name: String,
    pub purpose: String,
    pub status: String,
    pub tokens: usize,
    pub elapsed_ms: u64,
    pub last_output: String,
    pub children: Vec<String>,
    pub parent: Option<String>,
}

impl std::fmt::Display for DelegationInfoSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] — {} ({}ms, ~{}tok)", self.name, self.status, self.purpose, self.elapsed_ms, self.tokens)?;
        if !self.last_output.is_empty() {
            let preview = if self.last_output.len() > 100 { format!("{}...", &self.last_output[..97]) } else { self.last_output.clone() };
            write!(f, "\n  └─ {}", preview)?;
        }
        Ok(())
    }
}

/// Implemented by the orchestrator's runtime to actually execute a child
/// agent. Returns `(output_text, token_estimate)`.
#[async_trait::async_trait]
pub trait DelegationRuntime: Send + Sync {
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
    ) -> Result<(String, usize), String>;
}

pub struct DelegateTaskTool {
    runtime: DelegationRuntimeHandle,
    registry: Option<Arc<RwLock<Option<DelegationRegistryHandle>>>>,
    child_counter: Arc<std::sync::atomic::AtomicU64>,
    default_timeout_ms: u64,
}

impl DelegateTaskTool {
    pub fn new(runtime: DelegationRuntimeHandle) -> Self {
        Self { runtime, registry: None, child_counter: Arc::new(std::sync::atomic::AtomicU64::new(0)), default_timeout_ms: 60_000 }
    }

    pub fn with_registry(mut self, registry: Arc<RwLock<Option<DelegationRegistryHandle>>>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn next_child_id(&self) -> u64 {
        self.child_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

fn string_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        "delegate_task"
    }

    fn description(&self) -> &str {
        "Delegate a scoped subtask to a new child agent. The child has its own context \
         budget and tool set; you only provide the purpose and task, not file contents — \
         the child discovers its own context by reading files."
    }

    fn prompt(&self) -> &str {
        "Use delegate_task to decompose work:\n\
         - purpose: one sentence, falsifiable goal\n\
         - task: what to do, specific about location and intent\n\
         - add_skills/remove_skills, add_tools/remove_tools: optional scoping relative to your own config\n\
         - Children can delegate further, recursively, up to a fixed depth\n\n\
         Good: delegate_task(purpose='Fix slider CSS', task='Read issue #183, find slider components, fix styling')\n\
         Bad: delegate_task(purpose='Fix slider', task='<500 lines pasted file contents> fix it')"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["purpose", "task"],
            "properties": {
                "purpose": {"type": "string", "description": "Why this child exists. One sentence."},
                "task": {"type": "string", "description": "What to do. Specific about location and goal."},
                "add_skills": {"type": "array", "items": {"type": "string"}},
                "remove_skills": {"type": "array", "items": {"type": "string"}},
                "add_tools": {"type": "array", "items": {"type": "string"}},
                "remove_tools": {"type": "array", "items": {"type": "string"}},
                "timeout_ms": {"type": "integer", "description": "Delegation timeout in milliseconds (default 60000)"}
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let purpose = args.get("purpose").and_then(|v| v.as_str()).unwrap_or("unspecified");
        let task = match args.get("task").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => return ToolResult::error("'task' is required"),
        };
        let timeout_ms = args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_ms);
        let add_skills = string_list(&args, "add_skills");
        let remove_skills = string_list(&args, "remove_skills");
        let add_tools = string_list(&args, "add_tools");
        let remove_tools = string_list(&args, "remove_tools");

        let child_id = self.next_child_id();
        let session_id = format!("delegate-{}-{}", child_id, chrono::Utc::now().format("%H%M%S%3f"));

        let delegation_name = if let Some(ref reg_handle) = self.registry {
            let guard = reg_handle.read().await;
            match guard.as_ref() {
                Some(reg) => match reg.register(purpose, &session_id, None) {
                    Ok(name) => Some(name),
                    Err(reason) => return ToolResult::error(format!("delegation rejected: {}", reason)),
                },
                None => None,
            }
        } else {
            None
        };

        tracing::info!(child = %session_id, purpose = %purpose, "delegating task");

        let system_prompt = format!(
            "PURPOSE: {purpose}\n\nYou are a focused agent handling a delegated subtask. \
             Read the files you need. Execute precisely. Report what you did and what changed."
        );

        let start = std::time::Instant::now();
        let runtime_guard = self.runtime.read().await;
        let runtime = match runtime_guard.as_ref() {
            Some(r) => r.clone(),
            None => return ToolResult::error("delegation runtime not initialized"),
        };
        drop(runtime_guard);

        let result = runtime
            .run_child(&session_id, &system_prompt, task, &add_skills, &remove_skills, &add_tools, &remove_tools, timeout_ms)
            .await;
        let wall_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((output, tokens)) => {
                tracing::info!(child = %session_id, tokens, wall_ms, "delegation completed");
                if let (Some(ref name), Some(ref reg_handle)) = (&delegation_name, &self.registry) {
                    if let Some(ref reg) = *reg_handle.read().await {
                        reg.mark_complete(name, &output, tokens);
                    }
                }
                let label = delegation_name.as_deref().unwrap_or(&session_id);
                ToolResult::text(format!("[{}] {}", label, output))
            }
            Err(e) => {
                tracing::warn!(child = %session_id, error = %e, wall_ms, "delegation failed");
                if let (Some(ref name), Some(ref reg_handle)) = (&delegation_name, &self.registry) {
                    if let Some(ref reg) = *reg_handle.read().await {
                        reg.mark_failed(name, &e);
                    }
                }
                ToolResult::error(format!("subtask failed: {}", e))
            }
        }
    }
}

/// Observability/control surface over live and finished delegations
/// (§4.7 "delegation registry"): list, query, pause, resume, kill.
pub struct DelegationControlTool {
    registry: Arc<RwLock<Option<DelegationRegistryHandle>>>,
}

impl DelegationControlTool {
    pub fn new(registry: Arc<RwLock<Option<DelegationRegistryHandle>>>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl Tool for DelegationControlTool {
    fn name(&self) -> &str {
        "delegation_control"
    }

    fn description(&self) -> &str {
        "Observe and cooperatively control running or finished delegations: list, query, pause, resume, kill."
    }

    fn prompt(&self) -> &str {
        "Use delegation_control to manage child agents:\n\
         - list: all delegations with status\n\
         - query <name>: detailed status\n\
         - pause/resume <name>: suspend/continue (recursive to descendants)\n\
         - kill <name>: cooperative cancellation (recursive to descendants)\n\n\
         Names are purpose-hash format; prefix matching works."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {"type": "string", "enum": ["list", "query", "pause", "resume", "kill"]},
                "name": {"type": "string", "description": "Delegation name or prefix"}
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let command = match args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("'command' is required"),
        };

        let guard = self.registry.read().await;
        let registry = match guard.as_ref() {
            Some(r) => r,
            None => return ToolResult::error("delegation registry not initialized"),
        };

        match command {
            "list" => {
                let agents = registry.list_all();
                if agents.is_empty() {
                    ToolResult::text("No delegations running.")
                } else {
                    ToolResult::text(agents.iter().map(|a| a.to_string()).collect::<Vec<_>>().join("\n"))
                }
            }
            "query" | "pause" | "resume" | "kill" => {
                let name_input = match args.get("name").and_then(|v| v.as_str()) {
                    Some(n) => n,
                    None => return ToolResult::error(format!("'name' is required for '{}'", command)),
                };
                let resolved_name = if registry.query(name_input).is_ok() {
                    name_input.to_string()
                } else {
                    match registry.find_by_prefix(name_input) {
                        Some(n) => n,
                        None => return ToolResult::error(format!("delegation '{}' not found", name_input)),
                    }
                };
                match command {
                    "query" => match registry.query(&resolved_name) {
                        Ok(info) => ToolResult::text(info.to_string()),
                        Err(e) => ToolResult::error(e),
                    },
                    "pause" => match registry.pause(&resolved_name) {
                        Ok(()) => ToolResult::text(format!("Paused: {}", resolved_name)),
                        Err(e) => ToolResult::error(e),
                    },
                    "resume" => match registry.resume(&resolved_name) {
                        Ok(()) => ToolResult::text(format!("Resumed: {}", resolved_name)),
                        Err(e) => ToolResult::error(e),
                    },
                    "kill" => match registry.kill(&resolved_name) {
                        Ok(()) => ToolResult::text(format!("Killed: {}", resolved_name)),
                        Err(e) => ToolResult::error(e),
                    },
                    _ => unreachable!(),
                }
            }
            _ => ToolResult::error(format!("unknown command: {}", command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockRegistry {
        agents: std::sync::Mutex<Vec<DelegationInfoSnapshot>>,
    }

    impl MockRegistry {
        fn new() -> Self {
            Self {
                agents: std::sync::Mutex::new(vec![DelegationInfoSnapshot {
                    name: "fix-bug-abc12".to_string(),
                    purpose: "Fix the bug".to_string(),
                    status: "running".to_string(),
                    tokens: 100,
                    elapsed_ms: 5000,
                    last_output: String::new(),
                    children: vec![],
                    parent: None,
                }]),
            }
        }
    }

    #[async_trait::async_trait]
    impl DelegationControl for MockRegistry {
        fn register(&self, purpose: &str, _session_id: &str, _parent: Option<&str>) -> Result<String, String> {
            Ok(format!("mock-{}", purpose.replace(' ', "-").to_lowercase()))
        }
        fn mark_complete(&self, _name: &str, _output: &str, _tokens: usize) {}
        fn mark_failed(&self, _name: &str, _error: &str) {}
        fn pause(&self, name: &str) -> Result<(), String> {
            if name == "fix-bug-abc12" { Ok(()) } else { Err("not found".into()) }
        }
        fn resume(&self, name: &str) -> Result<(), String> {
            if name == "fix-bug-abc12" { Ok(()) } else { Err("not found".into()) }
        }
        fn kill(&self, name: &str) -> Result<(), String> {
            if name == "fix-bug-abc12" { Ok(()) } else { Err("not found".into()) }
        }
        fn query(&self, name: &str) -> Result<DelegationInfoSnapshot, String> {
            self.agents.lock().unwrap().iter().find(|a| a.name == name).cloned().ok_or_else(|| "not found".into())
        }
        fn list_all(&self) -> Vec<DelegationInfoSnapshot> {
            self.agents.lock().unwrap().clone()
        }
        fn find_by_prefix(&self, prefix: &str) -> Option<String> {
            self.agents.lock().unwrap().iter().find(|a| a.name.starts_with(prefix)).map(|a| a.name.clone())
        }
    }

    fn handle(mock: MockRegistry) -> Arc<RwLock<Option<DelegationRegistryHandle>>> {
        let reg: DelegationRegistryHandle = Arc::new(mock);
        Arc::new(RwLock::new(Some(reg)))
    }

    #[tokio::test]
    async fn list_command_shows_running_delegations() {
        let tool = DelegationControlTool::new(handle(MockRegistry::new()));
        let result = tool.execute(json!({"command": "list"})).await;
        let text = result.to_content_string();
        assert!(text.contains("fix-bug-abc12"));
        assert!(text.contains("running"));
    }

    #[tokio::test]
    async fn pause_and_kill_round_trip() {
        let tool = DelegationControlTool::new(handle(MockRegistry::new()));
        let paused = tool.execute(json!({"command": "pause", "name": "fix-bug-abc12"})).await;
        assert!(!paused.is_error());
        let killed = tool.execute(json!({"command": "kill", "name": "fix-bug-abc12"})).await;
        assert!(!killed.is_error());
    }

    #[tokio::test]
    async fn missing_name_is_an_error() {
        let tool = DelegationControlTool::new(handle(MockRegistry::new()));
        let result = tool.execute(json!({"command": "pause"})).await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn delegate_task_without_runtime_errors() {
        let runtime: DelegationRuntimeHandle = Arc::new(RwLock::new(None));
        let tool = DelegateTaskTool::new(runtime);
        let result = tool.execute(json!({"purpose": "test", "task": "do it"})).await;
        assert!(result.is_error());
    }
}

//! Core data types shared across the fractal agent runtime: the task/event
//! model (C1) and the agent configuration record threaded through
//! delegation (C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Session identifier — cheaply cloneable.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Message role for the LLM wire format.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single LLM conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_calls: None, tool_call_id: Some(tool_call_id.into()) }
    }
}

/// A tool call requested by the assistant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Tool definition as presented to the LLM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Streaming delta emitted by an LLM port.
#[derive(Clone, Debug)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments: String },
    ToolCallEnd { id: String },
    Done,
    Error(String),
}

/// The closed set of actions a [`Task`] may carry. Matches the wire strings
/// used by [`crate::CloudEvent::event_type`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Execute,
    Cancel,
    Query,
    Stream,
    #[serde(rename = "node.thinking")]
    NodeThinking,
    #[serde(rename = "node.tool_call")]
    NodeToolCall,
    #[serde(rename = "node.tool_result")]
    NodeToolResult,
    #[serde(rename = "node.message")]
    NodeMessage,
    #[serde(rename = "node.start")]
    NodeStart,
    #[serde(rename = "node.complete")]
    NodeComplete,
    #[serde(rename = "node.error")]
    NodeError,
    #[serde(rename = "node.planning")]
    NodePlanning,
    #[serde(rename = "node.delegation_request")]
    NodeDelegationRequest,
}

impl ActionKind {
    /// The CloudEvents `type` string for this action.
    pub fn wire_type(&self) -> &'static str {
        match self {
            ActionKind::Execute => "execute",
            ActionKind::Cancel => "cancel",
            ActionKind::Query => "query",
            ActionKind::Stream => "stream",
            ActionKind::NodeThinking => "node.thinking",
            ActionKind::NodeToolCall => "node.tool_call",
            ActionKind::NodeToolResult => "node.tool_result",
            ActionKind::NodeMessage => "node.message",
            ActionKind::NodeStart => "node.start",
            ActionKind::NodeComplete => "node.complete",
            ActionKind::NodeError => "node.error",
            ActionKind::NodePlanning => "node.planning",
            ActionKind::NodeDelegationRequest => "node.delegation_request",
        }
    }
}

/// Terminal/non-terminal lifecycle state of a [`Task`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// The universal unit of work and the only inter-node payload.
///
/// `task_id` is globally unique; hierarchical children use the
/// `parent_id:subtask-N` convention so ancestry can be read off the id
/// without a side table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    pub action: ActionKind,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn new(action: ActionKind, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            source_agent: None,
            target_agent: None,
            action,
            parameters,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            session_id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Build a child task id of the form `parent_id:subtask-N`.
    pub fn child_id(parent_id: &str, n: usize) -> String {
        format!("{parent_id}:subtask-{n}")
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_agent = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_agent = Some(target.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    /// Importance in `[0, 1]`, read from `metadata.importance`, defaulting
    /// to 0.5 when absent or malformed — memory ingestion never fails on a
    /// missing importance annotation.
    pub fn importance(&self) -> f64 {
        self.metadata
            .get("importance")
            .and_then(|v| v.as_f64())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(0.5)
    }

    /// Convert to a [`CloudEvent`] wire envelope.
    pub fn to_cloudevent(&self, source: impl Into<String>) -> CloudEvent {
        CloudEvent::from_task(self, source)
    }
}

/// CloudEvents 1.0 wire envelope (<https://cloudevents.io>) with a W3C
/// `traceparent` extension for distributed tracing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
}

impl CloudEvent {
    pub fn from_task(task: &Task, source: impl Into<String>) -> Self {
        Self {
            specversion: "1.0".to_string(),
            id: format!("{}:event:{}", task.task_id, task.action.wire_type()),
            source: source.into(),
            event_type: task.action.wire_type().to_string(),
            time: task.updated_at,
            datacontenttype: "application/json".to_string(),
            data: task.clone(),
            traceparent: None,
        }
    }

    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }

    /// Recover the original [`Task`]. Round-trips exactly modulo the
    /// envelope-level `time`/`id` fields, which are derived from the task.
    pub fn into_task(self) -> Task {
        self.data
    }
}

/// Every agent gets these regardless of delegation scope; an `AgentConfig`
/// may prune them for a subtask via `inherit`'s `remove_tools`, but they are
/// never something a caller has to opt into.
pub const BASELINE_TOOLS: [&str; 5] =
    ["delegate_task", "query_l2_memory", "query_l3_memory", "search_l4_memory", "create_tool"];

/// Immutable configuration for an agent node, threaded through delegation
/// via [`AgentConfig::inherit`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub enabled_skills: HashSet<String>,
    pub enabled_tools: HashSet<String>,
    pub max_iterations: usize,
    pub max_depth: usize,
    pub max_children: usize,
    pub context_budget_tokens: usize,
    pub delegation_timeout_ms: u64,
    pub default_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Depth of the node this config was built for; the root node is 0.
    pub depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled_skills: HashSet::new(),
            enabled_tools: BASELINE_TOOLS.iter().map(|t| t.to_string()).collect(),
            max_iterations: 10,
            max_depth: 3,
            max_children: 5,
            context_budget_tokens: 8_000,
            delegation_timeout_ms: 60_000,
            default_model: "default-chat-model".to_string(),
            system_prompt: None,
            depth: 0,
        }
    }
}

impl AgentConfig {
    /// Build a child configuration: add/remove skills and tools relative to
    /// the parent, bump depth by one, and — per the depth invariant — strip
    /// `delegate_task` once the child would sit at `max_depth`.
    pub fn inherit(
        &self,
        add_skills: &[String],
        remove_skills: &[String],
        add_tools: &[String],
        remove_tools: &[String],
    ) -> Self {
        let mut enabled_skills = self.enabled_skills.clone();
        for s in add_skills {
            enabled_skills.insert(s.clone());
        }
        for s in remove_skills {
            enabled_skills.remove(s);
        }

        let mut enabled_tools = self.enabled_tools.clone();
        for t in add_tools {
            enabled_tools.insert(t.clone());
        }
        for t in remove_tools {
            enabled_tools.remove(t);
        }

        let child_depth = self.depth + 1;
        if child_depth >= self.max_depth {
            enabled_tools.remove("delegate_task");
        }

        Self { enabled_skills, enabled_tools, depth: child_depth, ..self.clone() }
    }

    pub fn can_delegate(&self) -> bool {
        self.depth < self.max_depth && self.enabled_tools.contains("delegate_task")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lifecycle_transitions_are_terminal() {
        let mut task = Task::new(ActionKind::Execute, serde_json::Map::new());
        assert_eq!(task.status, TaskStatus::Pending);
        task.mark_running();
        assert_eq!(task.status, TaskStatus::Running);
        task.complete(serde_json::json!({"ok": true}));
        assert!(task.status.is_terminal());
    }

    #[test]
    fn cloudevent_roundtrip_preserves_task() {
        let mut task = Task::new(ActionKind::NodeMessage, serde_json::Map::new());
        task.complete(serde_json::json!("done"));
        let event = task.to_cloudevent("node://agent-a");
        assert_eq!(event.event_type, "node.message");
        let back = event.into_task();
        assert_eq!(back.task_id, task.task_id);
        assert_eq!(back.status, task.status);
    }

    #[test]
    fn child_id_follows_convention() {
        assert_eq!(Task::child_id("root", 1), "root:subtask-1");
    }

    #[test]
    fn importance_defaults_and_clamps() {
        let task = Task::new(ActionKind::Execute, serde_json::Map::new());
        assert_eq!(task.importance(), 0.5);

        let mut params = serde_json::Map::new();
        params.insert("unused".into(), serde_json::json!(1));
        let mut task = Task::new(ActionKind::Execute, params);
        task.metadata.insert("importance".into(), serde_json::json!(1.4));
        assert_eq!(task.importance(), 1.0);
    }

    #[test]
    fn agent_config_inherit_strips_delegate_at_max_depth() {
        let mut root = AgentConfig { max_depth: 2, depth: 1, ..Default::default() };
        root.enabled_tools.insert("delegate_task".to_string());
        let child = root.inherit(&[], &[], &[], &[]);
        assert_eq!(child.depth, 2);
        assert!(!child.enabled_tools.contains("delegate_task"));
        assert!(!child.can_delegate());
    }
}

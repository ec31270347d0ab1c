//! The agent node (C6): the ReAct execution loop every fractal delegation
//! eventually bottoms out in. Each iteration assembles context, streams one
//! LLM completion, schedules any requested tool calls, and records the
//! round into memory; the loop ends when the LLM stops requesting tools,
//! the iteration limit is hit, or the task is cancelled through the bus.

use fractal_bus::EventBus;
use fractal_context::ContextAssembler;
use fractal_core::{ActionKind, AgentConfig, Error, MemoryTier, MemoryUnit, MemoryUnitType, Message, Result, Role, Task};
use fractal_llm::{AccumulatedToolCall, LlmContent, LlmMessage, LlmProvider, LlmRequest, StreamDelta};
use fractal_memory::HierarchicalMemory;
use fractal_skills::SkillRegistry;
use fractal_tools::{Scheduler, SchedulerConfig, ToolCallRequest, ToolObservation, ToolRegistry};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-node tunables that sit alongside [`AgentConfig`] without being part
/// of the inherited delegation contract.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub n_recent_history: usize,
    pub n_middle_history: usize,
    pub memory_retrieval_top_k: usize,
    pub direct_message_limit: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { n_recent_history: 10, n_middle_history: 10, memory_retrieval_top_k: 5, direct_message_limit: 10 }
    }
}

/// One node in the fractal tree: an LLM, a scoped tool registry, its own
/// memory, and an in-process transcript. A delegated child is simply
/// another `AgentNode` with a narrower [`AgentConfig`] and a projected
/// memory instance (§4.7).
pub struct AgentNode {
    node_id: String,
    agent_config: AgentConfig,
    node_config: NodeConfig,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    scheduler: Scheduler,
    memory: Arc<HierarchicalMemory>,
    bus: Option<Arc<EventBus>>,
    skills: Option<Arc<SkillRegistry>>,
    transcript: RwLock<Vec<Message>>,
}

impl AgentNode {
    pub fn new(
        node_id: impl Into<String>,
        agent_config: AgentConfig,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        memory: Arc<HierarchicalMemory>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            agent_config,
            node_config: NodeConfig::default(),
            llm,
            tools,
            scheduler: Scheduler::new(SchedulerConfig::default()),
            memory,
            bus: None,
            skills: None,
            transcript: RwLock::new(Vec::new()),
        }
    }

    pub fn with_node_config(mut self, node_config: NodeConfig) -> Self {
        self.node_config = node_config;
        self
    }

    pub fn with_scheduler_config(mut self, scheduler_config: SchedulerConfig) -> Self {
        self.scheduler = Scheduler::new(scheduler_config);
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Skills consulted for a short quick-guide in the role prompt (§4.8).
    /// Registry content, not tool access: a skill's `required_tools` must
    /// still be present in this node's own [`ToolRegistry`] to be acted on.
    pub fn with_skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.agent_config
    }

    pub fn memory(&self) -> &Arc<HierarchicalMemory> {
        &self.memory
    }

    /// Execute one task through the full loop (§4.6). Always returns a
    /// terminal task — failure and cancellation are folded into its status
    /// rather than surfaced as a Rust error, matching the bus's contract
    /// that a handler cannot crash the publisher.
    pub async fn execute_task(&self, mut task: Task, cancel: CancellationToken) -> Task {
        task.mark_running();
        self.emit(ActionKind::NodeStart, &task, serde_json::json!({"node_id": self.node_id})).await;

        let instruction = task_instruction(&task);
        self.memory.record(MemoryUnit::new(instruction.clone(), MemoryTier::L1, MemoryUnitType::Task, task.importance())).await;

        let mut iteration = 0usize;
        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(Error::Cancelled);
            }
            if iteration >= self.agent_config.max_iterations {
                break Err(Error::iteration_limit(self.agent_config.max_iterations));
            }
            iteration += 1;

            match self.run_iteration(&task, &instruction, cancel.clone()).await {
                Ok(Some(final_text)) => break Ok(final_text),
                Ok(None) => continue,
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(result_text) => {
                task.complete(serde_json::json!(result_text));
                self.emit(ActionKind::NodeComplete, &task, serde_json::json!({"result": result_text})).await;
            }
            Err(Error::Cancelled) => {
                task.cancel();
                self.emit(ActionKind::NodeError, &task, serde_json::json!({"error": "cancelled"})).await;
            }
            Err(e) => {
                task.fail(e.to_string());
                self.emit(ActionKind::NodeError, &task, serde_json::json!({"error": e.to_string()})).await;
            }
        }

        self.memory.promote_tiers().await;
        task
    }

    /// `Ok(Some(text))`: the LLM produced a final answer with no tool
    /// calls, stop the loop. `Ok(None)`: tool calls were scheduled and
    /// recorded, continue to the next iteration.
    async fn run_iteration(&self, task: &Task, instruction: &str, cancel: CancellationToken) -> Result<Option<String>> {
        let messages = self.assemble_messages(instruction).await?;

        let request = LlmRequest {
            model: self.agent_config.default_model.clone(),
            messages,
            tools: Some(self.tools.get_definitions()),
            system: self.agent_config.system_prompt.clone(),
            ..Default::default()
        };

        let (text, tool_calls) = self.stream_completion_with_retry(task, request, cancel.clone()).await?;

        if tool_calls.is_empty() {
            self.append_assistant_text(&text).await;
            return Ok(Some(text));
        }

        self.append_assistant_with_tool_calls(&text, &tool_calls).await;

        let calls: Vec<ToolCallRequest> = tool_calls
            .iter()
            .map(|tc| ToolCallRequest { id: tc.id.clone(), name: tc.name.clone(), arguments: tc.parse_arguments().unwrap_or(serde_json::Value::Null) })
            .collect();

        for call in &calls {
            self.emit(ActionKind::NodeToolCall, task, serde_json::json!({"id": call.id, "name": call.name, "arguments": call.arguments})).await;
        }

        let observations = self.scheduler.execute_batch(&self.tools, calls, cancel).await;

        for obs in &observations {
            self.emit(ActionKind::NodeToolResult, task, serde_json::to_value(obs).unwrap_or_default()).await;
            self.record_observation(obs).await;
        }

        Ok(None)
    }

    /// One retry with exponential backoff on an LLM-level failure (a
    /// request that never starts streaming, or a `StreamDelta::Error`
    /// partway through). Cancellation always propagates immediately,
    /// never retried.
    async fn stream_completion_with_retry(
        &self,
        task: &Task,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<(String, Vec<AccumulatedToolCall>)> {
        const BASE_DELAY_MS: u64 = 200;
        match self.stream_completion_once(task, request.clone(), cancel.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "llm call failed, retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(BASE_DELAY_MS)).await;
                self.stream_completion_once(task, request, cancel).await
            }
        }
    }

    async fn stream_completion_once(
        &self,
        task: &Task,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<(String, Vec<AccumulatedToolCall>)> {
        let stream = self.llm.complete_stream(request, Some(cancel.clone())).await.map_err(Error::from)?;
        tokio::pin!(stream);

        let mut text = String::new();
        let mut tool_calls: Vec<AccumulatedToolCall> = Vec::new();
        let mut current: Option<AccumulatedToolCall> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                delta = stream.next() => match delta {
                    Some(Ok(StreamDelta::Text(t))) => {
                        self.emit(ActionKind::NodeThinking, task, serde_json::json!({"text": t})).await;
                        text.push_str(&t);
                    }
                    Some(Ok(StreamDelta::Thinking(t))) => {
                        self.emit(ActionKind::NodeThinking, task, serde_json::json!({"thinking": t})).await;
                    }
                    Some(Ok(StreamDelta::ToolCallStart { id, name })) => {
                        current = Some(AccumulatedToolCall { id, name, arguments: String::new() });
                    }
                    Some(Ok(StreamDelta::ToolCallDelta { id: _, arguments })) => {
                        if let Some(tc) = current.as_mut() {
                            tc.arguments.push_str(&arguments);
                        }
                    }
                    Some(Ok(StreamDelta::ToolCallEnd { id: _ })) => {
                        if let Some(tc) = current.take() {
                            tool_calls.push(tc);
                        }
                    }
                    Some(Ok(StreamDelta::Done { .. })) => break,
                    Some(Ok(StreamDelta::Error(e))) => return Err(Error::llm_error(self.llm.name(), e)),
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        Ok((text, tool_calls))
    }

    async fn assemble_messages(&self, instruction: &str) -> Result<Vec<LlmMessage>> {
        let retrieved = self.memory.retrieve(instruction, self.node_config.memory_retrieval_top_k, None).await;
        let transcript = self.transcript.read().await.clone();

        let mut assembler = ContextAssembler::with_default_tokenizer(self.agent_config.context_budget_tokens);
        assembler.critical_instructions("You are an autonomous agent. Use the available tools to make progress, then respond with a final answer once the task is done.");
        let tool_prompts = self.tools.combined_prompts();
        if !tool_prompts.is_empty() {
            assembler.role_prompt(tool_prompts);
        }
        if let Some(skill_block) = self.relevant_skill_guide(instruction) {
            assembler.role_prompt(skill_block);
        }
        assembler.task_description(instruction.to_string());
        assembler.retrieved_memory(retrieved);
        assembler.direct_messages(&self.direct_messages());
        assembler.session_history(&transcript, self.node_config.n_recent_history, self.node_config.n_middle_history);

        let assembled = assembler.build()?;
        Ok(to_llm_messages(&assembled))
    }

    async fn append_assistant_text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.transcript.write().await.push(Message::assistant(text));
    }

    /// Renders each tool call inline in the assistant message. The context
    /// assembler budgets plain text, not structured blocks, so the call's
    /// id/name/arguments survive as readable text rather than a
    /// provider-specific content block.
    async fn append_assistant_with_tool_calls(&self, text: &str, calls: &[AccumulatedToolCall]) {
        let mut rendered = text.to_string();
        for call in calls {
            rendered.push_str(&format!("\n[tool_call id={} name={} arguments={}]", call.id, call.name, call.arguments));
        }
        self.transcript.write().await.push(Message::assistant(rendered));
    }

    async fn record_observation(&self, obs: &ToolObservation) {
        self.transcript.write().await.push(Message::tool_result(obs.id.clone(), obs.to_content_string()));
        let importance = if obs.ok { 0.4 } else { 0.6 };
        self.memory.record(MemoryUnit::new(obs.to_content_string(), MemoryTier::L1, MemoryUnitType::Task, importance)).await;
    }

    /// Non-expired messages addressed directly to this node (§4.5), most
    /// recent/highest-priority first. Empty if there's no bus to query.
    fn direct_messages(&self) -> Vec<String> {
        let Some(bus) = &self.bus else { return Vec::new() };
        bus.query_by_target(&self.node_id, self.node_config.direct_message_limit).iter().map(|t| direct_message_text(t)).collect()
    }

    /// Renders a short quick-guide for each skill whose name, description,
    /// category, or tags match `instruction` (§4.8). Only a skill's
    /// `quick_guide` goes into the prompt; the full document stays on disk,
    /// to be read on demand via a file tool.
    fn relevant_skill_guide(&self, instruction: &str) -> Option<String> {
        let skills = self.skills.as_ref()?;
        let relevant = skills.find_relevant(instruction);
        if relevant.is_empty() {
            return None;
        }
        let guide = relevant.iter().map(|s| format!("- {}: {}", s.name, s.quick_guide)).collect::<Vec<_>>().join("\n");
        Some(format!("Relevant skills:\n{guide}"))
    }

    async fn emit(&self, action: ActionKind, task: &Task, payload: serde_json::Value) {
        let Some(bus) = &self.bus else { return };
        let mut event = Task::new(action, serde_json::Map::new());
        event.task_id = task.task_id.clone();
        event.source_agent = Some(self.node_id.clone());
        event.session_id = task.session_id.clone();
        event.complete(payload);
        bus.emit(event).await;
    }
}

fn task_instruction(task: &Task) -> String {
    task.parameters
        .get("instruction")
        .or_else(|| task.parameters.get("description"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| serde_json::to_string(&task.parameters).unwrap_or_default())
}

/// Renders a direct-message `Task` (`node.message`, `target_agent` set) down
/// to plain text: its `message`/`instruction` parameter, or its completed
/// `result`, whichever is present.
fn direct_message_text(task: &Task) -> String {
    task.parameters
        .get("message")
        .or_else(|| task.parameters.get("instruction"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| task.result.as_ref().and_then(|r| r.as_str()).map(str::to_string))
        .unwrap_or_else(|| serde_json::to_string(&task.parameters).unwrap_or_default())
}

fn to_llm_messages(messages: &[Message]) -> Vec<LlmMessage> {
    messages.iter().map(|m| LlmMessage { role: role_str(m.role).to_string(), content: LlmContent::Text(m.content.clone()) }).collect()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

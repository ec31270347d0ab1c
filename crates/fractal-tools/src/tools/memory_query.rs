//! Memory query tools (§4.6): let the LLM pull beyond what the context
//! assembler already placed in the prompt — deliberate recall rather than
//! ambient recall.

use crate::registry::{Tool, ToolResult};
use fractal_memory::{HierarchicalMemory, MemoryTier};
use serde_json::{json, Value};
use std::sync::Arc;

fn query_schema() -> Value {
    json!({
        "type": "object",
        "required": ["query"],
        "properties": {
            "query": {"type": "string", "description": "What to recall"},
            "top_k": {"type": "integer", "description": "Maximum items to return (default 5)"}
        }
    })
}

fn top_k(args: &Value) -> usize {
    args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(5) as usize
}

fn query_str(args: &Value) -> Result<&str, ToolResult> {
    args.get("query").and_then(|v| v.as_str()).ok_or_else(|| ToolResult::error("Missing required parameter: query"))
}

pub struct QueryL2MemoryTool {
    memory: Arc<HierarchicalMemory>,
}

impl QueryL2MemoryTool {
    pub fn new(memory: Arc<HierarchicalMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait::async_trait]
impl Tool for QueryL2MemoryTool {
    fn name(&self) -> &str {
        "query_l2_memory"
    }

    fn description(&self) -> &str {
        "Search working memory (recent, importance-ranked items) for content relevant to a query."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        query_schema()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = match query_str(&args) {
            Ok(q) => q,
            Err(e) => return e,
        };
        ToolResult::text(self.memory.retrieve(query, top_k(&args), Some(MemoryTier::L2)).await)
    }
}

pub struct QueryL3MemoryTool {
    memory: Arc<HierarchicalMemory>,
}

impl QueryL3MemoryTool {
    pub fn new(memory: Arc<HierarchicalMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait::async_trait]
impl Tool for QueryL3MemoryTool {
    fn name(&self) -> &str {
        "query_l3_memory"
    }

    fn description(&self) -> &str {
        "Search compressed summaries of older conversation for content relevant to a query."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        query_schema()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = match query_str(&args) {
            Ok(q) => q,
            Err(e) => return e,
        };
        ToolResult::text(self.memory.retrieve(query, top_k(&args), Some(MemoryTier::L3)).await)
    }
}

pub struct SearchL4MemoryTool {
    memory: Arc<HierarchicalMemory>,
}

impl SearchL4MemoryTool {
    pub fn new(memory: Arc<HierarchicalMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait::async_trait]
impl Tool for SearchL4MemoryTool {
    fn name(&self) -> &str {
        "search_l4_memory"
    }

    fn description(&self) -> &str {
        "Semantic search over long-term facts (vector-indexed when an embedding port is configured, keyword search otherwise)."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        query_schema()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = match query_str(&args) {
            Ok(q) => q,
            Err(e) => return e,
        };
        ToolResult::text(self.memory.retrieve(query, top_k(&args), Some(MemoryTier::L4)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_memory::{MemoryConfig, MemoryPorts, MemoryUnit, MemoryUnitType};

    #[tokio::test]
    async fn l2_query_surfaces_matching_content() {
        let config = MemoryConfig { theta_promote: 0.0, ..MemoryConfig::default() };
        let memory = HierarchicalMemory::new(config, MemoryPorts::default());
        memory.record(MemoryUnit::new("deploy failed on staging", MemoryTier::L1, MemoryUnitType::Task, 0.6)).await;
        memory.promote_tiers().await;

        let tool = QueryL2MemoryTool::new(Arc::new(memory));
        let result = tool.execute(json!({"query": "deploy staging"})).await;
        assert!(result.to_content_string().contains("deploy failed"));
    }
}

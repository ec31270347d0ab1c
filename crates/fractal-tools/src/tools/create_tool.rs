//! Dynamic tool creation (§4.6, §4.9): bridges the LLM to a [`Sandbox`]
//! port, when the embedder wires one up. Absent a sandbox this tool is
//! simply never registered — an agent without one never sees it.

use crate::registry::{Tool, ToolResult};
use fractal_llm::{DynamicToolSpec, Sandbox};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct CreateToolTool {
    sandbox: Arc<dyn Sandbox>,
}

impl CreateToolTool {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for CreateToolTool {
    fn name(&self) -> &str {
        "create_tool"
    }

    fn description(&self) -> &str {
        "Define a new tool at runtime, backed by the sandbox's code-execution environment."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name", "description", "parameter_schema", "implementation"],
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "parameter_schema": {"type": "object"},
                "implementation": {"type": "string", "description": "Source of the tool's implementation, in whatever language the sandbox executes"}
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let spec: DynamicToolSpec = match serde_json::from_value(args) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(format!("invalid tool spec: {e}")),
        };
        match self.sandbox.create_tool(spec).await {
            Ok(()) => ToolResult::text("tool created"),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

//! End-to-end delegation: a root node calls `delegate_task`, which builds
//! and runs a real child [`fractal_agent::AgentNode`], whose output flows
//! back into the root's tool observation.

use fractal_core::{ActionKind, AgentConfig, Task, TaskStatus};
use fractal_llm::{MockBehavior, MockLlmProvider};
use fractal_orchestrator::FractalOrchestrator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn task_with_instruction(instruction: &str) -> Task {
    let mut params = serde_json::Map::new();
    params.insert("instruction".to_string(), serde_json::json!(instruction));
    Task::new(ActionKind::Execute, params)
}

#[tokio::test]
async fn root_delegates_to_a_child_and_surfaces_its_output() {
    // Root and every child share this one `MockLlmProvider`, so behaviors
    // are consumed in wall-clock call order: root's first call, then the
    // child's only call (it answers with plain text), then root's second
    // call once the tool observation is back in its context.
    let llm = Arc::new(MockLlmProvider::sequence(vec![
        MockBehavior::ToolCall {
            name: "delegate_task".into(),
            args: serde_json::json!({
                "purpose": "summarize the notes",
                "task": "write one sentence",
            }),
        },
        MockBehavior::Text("the child reported back".into()),
        MockBehavior::Text("root says: delegation complete".into()),
    ]));

    let orchestrator = FractalOrchestrator::new(llm, std::env::temp_dir(), 5);
    let mut config = AgentConfig::default();
    config.enabled_tools.insert("delegate_task".to_string());
    let root = orchestrator.build_root_node("root", config).await;

    let result = root.execute_task(task_with_instruction("delegate this out"), CancellationToken::new()).await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.result, Some(serde_json::json!("root says: delegation complete")));

    let delegations = orchestrator.registry().list_all();
    assert_eq!(delegations.len(), 1);
    assert_eq!(delegations[0].status, "complete");
}

#[tokio::test]
async fn delegation_beyond_max_depth_is_rejected() {
    let llm = Arc::new(MockLlmProvider::constant(MockBehavior::ToolCall {
        name: "delegate_task".into(),
        args: serde_json::json!({
            "purpose": "go deeper",
            "task": "keep delegating",
        }),
    }));

    let orchestrator = FractalOrchestrator::new(llm, std::env::temp_dir(), 5);
    let mut config = AgentConfig { max_depth: 1, max_iterations: 1, ..AgentConfig::default() };
    config.enabled_tools.insert("delegate_task".to_string());
    let root = orchestrator.build_root_node("root", config).await;

    let result = root.execute_task(task_with_instruction("delegate beyond the limit"), CancellationToken::new()).await;

    // Root (depth 0, max_depth 1) can still delegate once; the child it
    // builds is at depth 1, where `inherit` has already stripped
    // `delegate_task` from its tools. Both nodes exhaust their single
    // allowed iteration without reaching a final text answer.
    assert_eq!(result.status, TaskStatus::Failed);
}

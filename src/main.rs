//! Fractal agent runtime — demonstration binary.
//!
//! Wires a single root [`fractal_orchestrator::FractalOrchestrator`] node
//! and runs one task to completion, logging every lifecycle event through
//! `tracing`. No concrete LLM vendor is wired in; swap [`MockLlmProvider`]
//! for a real [`fractal_llm::LlmProvider`] impl to point this at a model.

mod config;

use clap::Parser;
use config::RuntimeConfig;
use fractal_core::{ActionKind, Skill, Task};
use fractal_llm::{MockBehavior, MockLlmProvider};
use fractal_orchestrator::FractalOrchestrator;
use fractal_skills::SkillRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fractal-demo", about = "Fractal agent runtime — demonstration binary")]
struct Cli {
    /// Instruction text to run as the root task.
    #[arg(short, long, default_value = "Summarize the current state of the workspace.")]
    task: String,

    /// Workspace directory tools operate against.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Optional path to a RuntimeConfig TOML file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// "pretty" or "json".
    #[arg(long)]
    log_format: Option<String>,

    /// e.g. "info", "debug", "fractal_agent=debug".
    #[arg(long)]
    log_level: Option<String>,

    /// Max delegation depth for the root config.
    #[arg(long)]
    max_depth: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RuntimeConfig::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(max_depth) = cli.max_depth {
        config.max_depth = max_depth;
    }

    init_tracing(&config);

    let llm = Arc::new(MockLlmProvider::constant(MockBehavior::Text(
        "No concrete LLM provider configured; this is a demonstration response.".to_string(),
    )));

    let orchestrator =
        FractalOrchestrator::new(llm, cli.workspace, config.max_children).with_max_parallel_reads(config.max_parallel_reads);
    let mut agent_config = config.agent_config();
    for tool in ["read", "glob", "grep", "delegate_task"] {
        agent_config.enabled_tools.insert(tool.to_string());
    }

    let mut skills = SkillRegistry::new();
    let mut search_skill = Skill::new("workspace-search", "Workspace Search", "locate files and code across the workspace");
    search_skill.tags = vec!["search".into(), "files".into(), "grep".into()];
    search_skill.required_tools = vec!["glob".into(), "grep".into()];
    search_skill.quick_guide = "Use glob to find candidate files by name, then grep to confirm the content you're after.".to_string();
    skills.register_skill(search_skill);

    let node = orchestrator.build_root_node("root", agent_config).await.with_skills(Arc::new(skills));

    let mut params = serde_json::Map::new();
    params.insert("instruction".to_string(), serde_json::json!(cli.task));
    let task = Task::new(ActionKind::Execute, params);

    let result = node.execute_task(task, CancellationToken::new()).await;

    match result.status {
        fractal_core::TaskStatus::Completed => {
            tracing::info!(result = ?result.result, "task completed");
        }
        status => {
            tracing::error!(?status, error = ?result.error, "task did not complete");
        }
    }

    Ok(())
}

fn init_tracing(config: &RuntimeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

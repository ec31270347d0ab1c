//! Layered runtime configuration: built-in defaults, overlaid by an
//! optional TOML file, overlaid by `FRACTAL_*` environment variables,
//! overlaid last by CLI flags (see [`crate::Cli`]).

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_iterations: usize,
    pub max_depth: usize,
    pub max_children: usize,
    pub context_budget_tokens: usize,
    pub l1_capacity: usize,
    pub l2_capacity: usize,
    pub l3_capacity: usize,
    pub l4_soft_cap: usize,
    pub importance_decay_lambda: f64,
    pub tool_cache_ttl_ms: u64,
    pub tool_max_retries: u32,
    pub delegation_timeout_ms: u64,
    pub embedding_dim: usize,
    pub log_level: String,
    pub log_format: String,
    pub bus_history_capacity: usize,
    pub max_parallel_reads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_depth: 3,
            max_children: 5,
            context_budget_tokens: 8000,
            l1_capacity: 50,
            l2_capacity: 100,
            l3_capacity: 500,
            l4_soft_cap: 150,
            importance_decay_lambda: 0.1,
            tool_cache_ttl_ms: 300_000,
            tool_max_retries: 3,
            delegation_timeout_ms: 60_000,
            embedding_dim: 512,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            bus_history_capacity: 1000,
            max_parallel_reads: 8,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, overlaid by `path` (if given and present), overlaid by
    /// `FRACTAL_*` env vars. CLI flags are applied separately by the
    /// caller, since those come from a parsed [`clap`] struct rather than
    /// strings.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)?;
                config = toml::from_str(&raw)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        macro_rules! env_usize {
            ($field:ident, $key:literal) => {
                if let Ok(v) = std::env::var($key) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }

        env_usize!(max_iterations, "FRACTAL_MAX_ITERATIONS");
        env_usize!(max_depth, "FRACTAL_MAX_DEPTH");
        env_usize!(max_children, "FRACTAL_MAX_CHILDREN");
        env_usize!(context_budget_tokens, "FRACTAL_CONTEXT_BUDGET_TOKENS");
        env_usize!(l1_capacity, "FRACTAL_L1_CAPACITY");
        env_usize!(l2_capacity, "FRACTAL_L2_CAPACITY");
        env_usize!(l3_capacity, "FRACTAL_L3_CAPACITY");
        env_usize!(l4_soft_cap, "FRACTAL_L4_SOFT_CAP");
        env_usize!(tool_max_retries, "FRACTAL_TOOL_MAX_RETRIES");
        env_usize!(embedding_dim, "FRACTAL_EMBEDDING_DIM");
        env_usize!(bus_history_capacity, "FRACTAL_BUS_HISTORY_CAPACITY");
        env_usize!(max_parallel_reads, "FRACTAL_MAX_PARALLEL_READS");

        if let Ok(v) = std::env::var("FRACTAL_IMPORTANCE_DECAY_LAMBDA") {
            if let Ok(parsed) = v.parse() {
                self.importance_decay_lambda = parsed;
            }
        }
        if let Ok(v) = std::env::var("FRACTAL_TOOL_CACHE_TTL_MS") {
            if let Ok(parsed) = v.parse() {
                self.tool_cache_ttl_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("FRACTAL_DELEGATION_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                self.delegation_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("FRACTAL_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("FRACTAL_LOG_FORMAT") {
            self.log_format = v;
        }
    }

    pub fn memory_config(&self) -> fractal_memory::MemoryConfig {
        fractal_memory::MemoryConfig {
            l1_capacity: self.l1_capacity,
            l2_capacity: self.l2_capacity,
            l3_capacity: self.l3_capacity,
            l4_soft_cap: self.l4_soft_cap,
            importance_decay_lambda: self.importance_decay_lambda,
            embedding_dim: self.embedding_dim,
            ..Default::default()
        }
    }

    pub fn agent_config(&self) -> fractal_core::AgentConfig {
        fractal_core::AgentConfig {
            max_iterations: self.max_iterations,
            max_depth: self.max_depth,
            max_children: self.max_children,
            context_budget_tokens: self.context_budget_tokens,
            delegation_timeout_ms: self.delegation_timeout_ms,
            ..Default::default()
        }
    }
}

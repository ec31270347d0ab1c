//! Batch scheduling of a turn's tool calls (C3 §4.3): contiguous read calls
//! run in parallel, each write call is a singleton barrier, and
//! observations are returned in the original left-to-right order
//! regardless of completion order.

use crate::cache::ToolCache;
use crate::registry::{ToolRegistry, ToolResult};
use crate::schema::validate;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One tool call requested by the LLM in a single turn.
#[derive(Clone, Debug)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Normalised tool outcome handed back to the agent loop as an LLM
/// observation. Errors never propagate as Rust errors past this point —
/// they are reformulated here so the LLM can self-correct.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolObservation {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ToolObservation {
    fn ok(id: String, result: &ToolResult) -> Self {
        let value = match result {
            ToolResult::Json(v) => Some(v.clone()),
            ToolResult::Text(s) => Some(Value::String(s.clone())),
            ToolResult::Error(_) => None,
        };
        Self { id, ok: true, value, error_kind: None, error_detail: None, suggestion: None }
    }

    fn error(id: String, kind: impl Into<String>, detail: impl Into<String>, suggestion: Option<String>) -> Self {
        Self { id, ok: false, value: None, error_kind: Some(kind.into()), error_detail: Some(detail.into()), suggestion }
    }

    /// Render as a single string for providers whose message format wants
    /// plain text tool-result content rather than structured JSON.
    pub fn to_content_string(&self) -> String {
        if self.ok {
            match &self.value {
                Some(Value::String(s)) => s.clone(),
                Some(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
                None => String::new(),
            }
        } else {
            format!(
                "Error ({}): {}{}",
                self.error_kind.as_deref().unwrap_or("tool_error"),
                self.error_detail.as_deref().unwrap_or(""),
                self.suggestion.as_ref().map(|s| format!(" — {s}")).unwrap_or_default()
            )
        }
    }
}

/// Configuration for a single [`Scheduler::execute_batch`] call.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub cache_ttl: Duration,
    /// Bounds how many read calls within one contiguous read-group run
    /// concurrently; further reads in the group wait for a slot.
    pub max_parallel_reads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_retries: 3, retry_base_delay_ms: 100, cache_ttl: Duration::from_secs(300), max_parallel_reads: 8 }
    }
}

pub struct Scheduler {
    cache: ToolCache,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { cache: ToolCache::new(config.cache_ttl), config }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Group indices into contiguous read-runs and write singletons, then
    /// execute the groups in order — reads within a group run concurrently,
    /// writes execute alone — and return observations in the original
    /// request order.
    pub async fn execute_batch(
        &self,
        registry: &ToolRegistry,
        calls: Vec<ToolCallRequest>,
        cancel: CancellationToken,
    ) -> Vec<ToolObservation> {
        let mut results: Vec<Option<ToolObservation>> = vec![None; calls.len()];

        // Dedup: first occurrence of a (tool, canonical args) pair within
        // this batch is the one actually executed; later occurrences reuse
        // its result. Only meaningful for read-only tools.
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut dedup_source: Vec<Option<usize>> = vec![None; calls.len()];
        for (idx, call) in calls.iter().enumerate() {
            let read_only = registry.get(&call.name).map(|t| t.is_read_only()).unwrap_or(false);
            if !read_only {
                continue;
            }
            let key = ToolCache::key(&call.name, &call.arguments);
            match first_seen.get(&key) {
                Some(&first) => dedup_source[idx] = Some(first),
                None => {
                    first_seen.insert(key, idx);
                }
            }
        }

        let groups = group_by_read_write(registry, &calls);

        for group in groups {
            match group {
                Group::Read(indices) => {
                    let indices_to_run: Vec<usize> = indices.iter().copied().filter(|&i| dedup_source[i].is_none()).collect();
                    let limit = self.config.max_parallel_reads.max(1);
                    let outcomes: Vec<(usize, ToolObservation)> = stream::iter(indices_to_run)
                        .map(|i| async move { (i, self.execute_one(registry, &calls[i], cancel.clone()).await) })
                        .buffer_unordered(limit)
                        .collect()
                        .await;
                    for (i, obs) in outcomes {
                        results[i] = Some(obs);
                    }
                }
                Group::Write(i) => {
                    let obs = self.execute_one(registry, &calls[i], cancel.clone()).await;
                    results[i] = Some(obs);
                }
            }
        }

        // Fill in deduped positions from their source.
        for (i, source) in dedup_source.iter().enumerate() {
            if let Some(src) = source {
                let mut obs = results[*src].clone().expect("source executed before dedup targets");
                obs.id = calls[i].id.clone();
                results[i] = Some(obs);
            }
        }

        results.into_iter().map(|o| o.expect("every call produces an observation")).collect()
    }

    async fn execute_one(&self, registry: &ToolRegistry, call: &ToolCallRequest, cancel: CancellationToken) -> ToolObservation {
        let tool = match registry.get(&call.name) {
            Some(t) => t,
            None => {
                return ToolObservation::error(
                    call.id.clone(),
                    "tool_not_found",
                    format!("no tool registered with name '{}'", call.name),
                    Some("check the tool name against the available tool list".to_string()),
                )
            }
        };

        let failures = validate(&tool.input_schema(), &call.arguments);
        if !failures.is_empty() {
            let detail = failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ");
            return ToolObservation::error(
                call.id.clone(),
                "invalid_arguments",
                detail,
                Some("fix the listed fields and retry".to_string()),
            );
        }

        let cache_key = if tool.is_read_only() { Some(ToolCache::key(&call.name, &call.arguments)) } else { None };
        if let Some(ref key) = cache_key {
            if let Some(cached) = self.cache.get(key) {
                return result_to_observation(call.id.clone(), &cached);
            }
        }

        let mut attempt = 0u32;
        loop {
            let result = tool.execute_cancellable(call.arguments.clone(), cancel.clone()).await;
            let retryable = matches!(&result, ToolResult::Error(msg) if is_retryable_message(msg));
            if !retryable || attempt >= self.config.max_retries {
                if let (Some(key), ToolResult::Error(_)) = (&cache_key, &result) {
                    let _ = key; // errors are never cached
                } else if let Some(key) = cache_key {
                    self.cache.put(key, result.clone());
                }
                return result_to_observation(call.id.clone(), &result);
            }
            let delay = self.config.retry_base_delay_ms * 2u64.pow(attempt);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }
}

fn is_retryable_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection")
}

fn result_to_observation(id: String, result: &ToolResult) -> ToolObservation {
    match result {
        ToolResult::Error(msg) => ToolObservation::error(id, "tool_error", msg.clone(), None),
        other => ToolObservation::ok(id, other),
    }
}

enum Group {
    Read(Vec<usize>),
    Write(usize),
}

fn group_by_read_write(registry: &ToolRegistry, calls: &[ToolCallRequest]) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current_read: Vec<usize> = Vec::new();
    for (i, call) in calls.iter().enumerate() {
        let read_only = registry.get(&call.name).map(|t| t.is_read_only()).unwrap_or(false);
        if read_only {
            current_read.push(i);
        } else {
            if !current_read.is_empty() {
                groups.push(Group::Read(std::mem::take(&mut current_read)));
            }
            groups.push(Group::Write(i));
        }
    }
    if !current_read.is_empty() {
        groups.push(Group::Read(current_read));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoRead;
    #[async_trait]
    impl Tool for EchoRead {
        fn name(&self) -> &str {
            "echo_read"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "required": ["v"], "properties": {"v": {"type": "string"}}})
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn execute(&self, args: Value) -> ToolResult {
            ToolResult::text(args["v"].as_str().unwrap_or_default().to_string())
        }
    }

    struct CountingWrite {
        calls: std::sync::atomic::AtomicUsize,
    }
    #[async_trait]
    impl Tool for CountingWrite {
        fn name(&self) -> &str {
            "write_once"
        }
        fn description(&self) -> &str {
            "records a write"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ToolResult::text("written")
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(EchoRead);
        r.register(CountingWrite { calls: std::sync::atomic::AtomicUsize::new(0) });
        r
    }

    struct TrackingRead {
        in_flight: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        max_seen: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }
    #[async_trait]
    impl Tool for TrackingRead {
        fn name(&self) -> &str {
            "tracking_read"
        }
        fn description(&self) -> &str {
            "records peak concurrent in-flight calls"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            use std::sync::atomic::Ordering;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ToolResult::text("ok")
        }
    }

    #[tokio::test]
    async fn preserves_original_order() {
        let reg = registry();
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let calls = vec![
            ToolCallRequest { id: "1".into(), name: "echo_read".into(), arguments: json!({"v": "a"}) },
            ToolCallRequest { id: "2".into(), name: "write_once".into(), arguments: json!({}) },
            ToolCallRequest { id: "3".into(), name: "echo_read".into(), arguments: json!({"v": "b"}) },
        ];
        let obs = scheduler.execute_batch(&reg, calls, CancellationToken::new()).await;
        assert_eq!(obs.iter().map(|o| o.id.clone()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
        assert_eq!(obs[0].value, Some(json!("a")));
        assert_eq!(obs[2].value, Some(json!("b")));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_observation() {
        let reg = registry();
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let calls = vec![ToolCallRequest { id: "1".into(), name: "nope".into(), arguments: json!({}) }];
        let obs = scheduler.execute_batch(&reg, calls, CancellationToken::new()).await;
        assert!(!obs[0].ok);
        assert_eq!(obs[0].error_kind.as_deref(), Some("tool_not_found"));
    }

    #[tokio::test]
    async fn invalid_arguments_rejected_before_execution() {
        let reg = registry();
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let calls = vec![ToolCallRequest { id: "1".into(), name: "echo_read".into(), arguments: json!({}) }];
        let obs = scheduler.execute_batch(&reg, calls, CancellationToken::new()).await;
        assert!(!obs[0].ok);
        assert_eq!(obs[0].error_kind.as_deref(), Some("invalid_arguments"));
    }

    #[tokio::test]
    async fn duplicate_read_calls_dedupe_within_a_batch() {
        let reg = registry();
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let calls = vec![
            ToolCallRequest { id: "1".into(), name: "echo_read".into(), arguments: json!({"v": "x"}) },
            ToolCallRequest { id: "2".into(), name: "echo_read".into(), arguments: json!({"v": "x"}) },
        ];
        let obs = scheduler.execute_batch(&reg, calls, CancellationToken::new()).await;
        assert_eq!(obs[0].value, obs[1].value);
    }

    #[tokio::test]
    async fn concurrent_reads_are_bounded_by_max_parallel_reads() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut reg = ToolRegistry::new();
        reg.register(TrackingRead { in_flight: in_flight.clone(), max_seen: max_seen.clone() });

        let scheduler = Scheduler::new(SchedulerConfig { max_parallel_reads: 2, ..SchedulerConfig::default() });
        let calls: Vec<ToolCallRequest> =
            (0..8).map(|i| ToolCallRequest { id: i.to_string(), name: "tracking_read".into(), arguments: json!({"n": i}) }).collect();

        scheduler.execute_batch(&reg, calls, CancellationToken::new()).await;
        assert!(max_seen.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn read_results_are_cached_across_batches() {
        let reg = registry();
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let calls = vec![ToolCallRequest { id: "1".into(), name: "echo_read".into(), arguments: json!({"v": "cached"}) }];
        scheduler.execute_batch(&reg, calls.clone(), CancellationToken::new()).await;
        assert_eq!(scheduler.cache_len(), 1);
    }
}

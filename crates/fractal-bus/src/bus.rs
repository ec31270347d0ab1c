//! The event bus (C2): a typed pub/sub fabric over [`Task`]/[`CloudEvent`].
//!
//! One primary [`Handler`] per [`ActionKind`] answers `publish`; any number
//! of passive [`Subscriber`]s observe every publish for an action without
//! affecting the result the publisher sees.

use crate::handler::{Handler, Subscriber};
use crate::history::History;
use chrono::Utc;
use dashmap::DashMap;
use fractal_core::{ActionKind, Error, Result, Task, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct BusConfig {
    pub history_capacity: usize,
    pub default_delegation_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { history_capacity: 1_000, default_delegation_timeout_ms: 30_000 }
    }
}

pub struct EventBus {
    config: BusConfig,
    handlers: DashMap<ActionKind, Arc<dyn Handler>>,
    subscribers: DashMap<ActionKind, Vec<Arc<dyn Subscriber>>>,
    history: History,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let history = History::new(config.history_capacity);
        Self { config, handlers: DashMap::new(), subscribers: DashMap::new(), history }
    }

    /// Register the sole primary handler for `action`, replacing any
    /// previous one.
    pub fn register_handler(&self, action: ActionKind, handler: Arc<dyn Handler>) {
        self.handlers.insert(action, handler);
    }

    /// Add a passive observer for `action`. Does not replace other
    /// subscribers or the primary handler.
    pub fn subscribe(&self, action: ActionKind, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.entry(action).or_default().push(subscriber);
    }

    /// Publish a task. With `wait_result=true`, awaits the primary handler
    /// and returns the mutated task. With `wait_result=false`, spawns the
    /// handler and returns immediately with `status=running`; handler
    /// errors are logged and suppressed, never surfaced to the publisher.
    pub async fn publish(&self, mut task: Task, wait_result: bool) -> Task {
        self.notify_subscribers(&task).await;

        let Some(handler) = self.handlers.get(&task.action).map(|h| h.clone()) else {
            task.fail("no handler");
            self.history.append(task.clone());
            return task;
        };

        if wait_result {
            let result = handler.handle(task.clone()).await;
            let mut finished = match result {
                Ok(t) => t,
                Err(e) => {
                    task.fail(e.to_string());
                    task
                }
            };
            if !finished.status.is_terminal() {
                finished.fail("handler returned without a terminal status");
            }
            self.history.append(finished.clone());
            finished
        } else {
            task.mark_running();
            self.history.append(task.clone());
            let handler = handler.clone();
            let pending = task.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(pending).await {
                    tracing::warn!(error = %e, "fire-and-forget handler failed");
                }
            });
            task
        }
    }

    /// Record and notify subscribers for a task that has no primary
    /// handler and expects no response — instrumentation events
    /// (`node.thinking`, `node.tool_call`, ...) rather than requests.
    pub async fn emit(&self, task: Task) {
        self.notify_subscribers(&task).await;
        self.history.append(task);
    }

    async fn notify_subscribers(&self, task: &Task) {
        let Some(subs) = self.subscribers.get(&task.action) else { return };
        for sub in subs.iter() {
            sub.on_event(task).await;
        }
    }

    /// Publish a `node.delegation_request` to `target_agent` and await its
    /// terminal response, bounded by `timeout_ms` (default
    /// [`BusConfig::default_delegation_timeout_ms`]).
    pub async fn delegate_task(&self, target_agent: impl Into<String>, subtask: Task, timeout_ms: Option<u64>) -> Result<Task> {
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_delegation_timeout_ms);
        let mut request = subtask;
        request.action = ActionKind::NodeDelegationRequest;
        let target_agent = target_agent.into();
        request.target_agent = Some(target_agent.clone());

        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.publish(request, true)).await {
            Ok(task) => Ok(task),
            Err(_) => Err(Error::delegation_timeout(target_agent, timeout_ms)),
        }
    }

    pub fn query_by_source(&self, source_agent: &str) -> Vec<Arc<Task>> {
        self.history.by_source_agent(source_agent)
    }

    pub fn query_by_action(&self, action: ActionKind) -> Vec<Arc<Task>> {
        self.history.by_action(action.wire_type())
    }

    pub fn query_by_task_id(&self, task_id: &str) -> Vec<Arc<Task>> {
        self.history.by_task_id(task_id)
    }

    /// Direct messages (`action=node.message`) addressed to `target`,
    /// excluding TTL-expired ones, sorted by descending priority then
    /// descending recency, truncated to `limit`.
    pub fn query_by_target(&self, target: &str, limit: usize) -> Vec<Arc<Task>> {
        let now = Utc::now();
        let mut matches: Vec<Arc<Task>> = self
            .history
            .by_target_agent(target)
            .into_iter()
            .filter(|t| t.target_agent.as_deref() == Some(target))
            .filter(|t| !is_expired(t, now))
            .collect();

        matches.sort_by(|a, b| {
            let pa = priority_of(a);
            let pb = priority_of(b);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        matches.truncate(limit);
        matches
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_snapshot(&self) -> Vec<Arc<Task>> {
        self.history.snapshot()
    }
}

fn priority_of(task: &Task) -> f64 {
    task.parameters.get("priority").and_then(|v| v.as_f64()).unwrap_or(0.5)
}

fn is_expired(task: &Task, now: chrono::DateTime<Utc>) -> bool {
    let Some(ttl) = task.parameters.get("ttl_seconds").and_then(|v| v.as_u64()) else {
        return false;
    };
    let elapsed = now.signed_duration_since(task.created_at).num_seconds();
    elapsed >= ttl as i64
}

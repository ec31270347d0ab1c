//! The delegation registry (C7): control-plane bookkeeping for every
//! in-flight and finished delegation — list/query/pause/resume/kill — and
//! the `max_children` fan-out limit. Depth is not enforced here: the
//! child's [`fractal_core::AgentConfig`] already carries the bumped depth
//! by the time a delegation reaches this registry, so that invariant lives
//! in [`crate::orchestrator::NodeDelegationRuntime`] instead.

use dashmap::DashMap;
use fractal_tools::{DelegationControl, DelegationInfoSnapshot};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationStatus {
    Running,
    Paused,
    Complete,
    Failed,
    Killed,
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

struct DelegationEntry {
    name: String,
    purpose: String,
    #[allow(dead_code)]
    session_id: String,
    status: DelegationStatus,
    tokens: usize,
    started_at: Instant,
    ended_at: Option<Instant>,
    last_output: String,
    parent: Option<String>,
    children: Vec<String>,
    pause_gate: Arc<Notify>,
    is_paused: bool,
    kill_requested: bool,
}

/// A human-readable, collision-resistant delegation name: a kebab-case
/// prefix from the purpose plus a 5-hex-char uniqueness suffix.
pub fn purpose_hash_name(purpose: &str) -> String {
    let words: Vec<&str> = purpose.split_whitespace().filter(|w| w.len() > 1).take(4).collect();
    let prefix = if words.is_empty() {
        "agent".to_string()
    } else {
        words.iter().map(|w| w.to_lowercase().chars().filter(|c| c.is_alphanumeric()).collect::<String>()).collect::<Vec<_>>().join("-")
    };
    let prefix = if prefix.len() > 20 { prefix[..20].to_string() } else { prefix };

    let mut hasher = DefaultHasher::new();
    purpose.hash(&mut hasher);
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_nanos().hash(&mut hasher);
    let suffix = format!("{:05x}", hasher.finish() & 0xFFFFF);

    format!("{prefix}-{suffix}")
}

pub struct DelegationRegistry {
    entries: DashMap<String, DelegationEntry>,
    max_children: usize,
}

impl DelegationRegistry {
    pub fn new(max_children: usize) -> Self {
        Self { entries: DashMap::new(), max_children }
    }

    fn child_count(&self, parent: &str) -> usize {
        self.entries.get(parent).map(|e| e.children.len()).unwrap_or(0)
    }

    pub fn register_checked(&self, purpose: &str, session_id: &str, parent: Option<&str>) -> Result<String, String> {
        if let Some(p) = parent {
            if self.child_count(p) >= self.max_children {
                return Err("max_children".to_string());
            }
        }

        let name = purpose_hash_name(purpose);
        let entry = DelegationEntry {
            name: name.clone(),
            purpose: purpose.to_string(),
            session_id: session_id.to_string(),
            status: DelegationStatus::Running,
            tokens: 0,
            started_at: Instant::now(),
            ended_at: None,
            last_output: String::new(),
            parent: parent.map(String::from),
            children: Vec::new(),
            pause_gate: Arc::new(Notify::new()),
            is_paused: false,
            kill_requested: false,
        };

        if let Some(parent_name) = parent {
            if let Some(mut parent_entry) = self.entries.get_mut(parent_name) {
                parent_entry.children.push(name.clone());
            }
        }

        info!(name = %name, purpose = %purpose, session = %session_id, "delegation registered");
        self.entries.insert(name.clone(), entry);
        Ok(name)
    }

    pub fn mark_complete(&self, name: &str, output: &str, tokens: usize) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.status = DelegationStatus::Complete;
            entry.tokens = tokens;
            entry.ended_at = Some(Instant::now());
            entry.last_output = if output.len() > 500 { format!("{}...", &output[..497]) } else { output.to_string() };
            info!(name = %name, tokens, "delegation completed");
        }
    }

    pub fn mark_failed(&self, name: &str, error: &str) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.status = DelegationStatus::Failed;
            entry.ended_at = Some(Instant::now());
            entry.last_output = format!("ERROR: {error}");
            info!(name = %name, error = %error, "delegation failed");
        }
    }

    pub fn pause(&self, name: &str) -> Result<(), String> {
        let children = {
            let mut entry = self.entries.get_mut(name).ok_or_else(|| format!("delegation '{name}' not found"))?;
            if entry.status != DelegationStatus::Running {
                return Err(format!("delegation '{name}' is not running (status: {})", entry.status));
            }
            entry.is_paused = true;
            entry.status = DelegationStatus::Paused;
            debug!(name = %name, "delegation paused");
            entry.children.clone()
        };
        for child in children {
            let _ = self.pause(&child);
        }
        Ok(())
    }

    pub fn resume(&self, name: &str) -> Result<(), String> {
        let (gate, children) = {
            let mut entry = self.entries.get_mut(name).ok_or_else(|| format!("delegation '{name}' not found"))?;
            if entry.status != DelegationStatus::Paused {
                return Err(format!("delegation '{name}' is not paused (status: {})", entry.status));
            }
            entry.is_paused = false;
            entry.status = DelegationStatus::Running;
            (entry.pause_gate.clone(), entry.children.clone())
        };
        gate.notify_one();
        for child in children {
            let _ = self.resume(&child);
        }
        Ok(())
    }

    pub fn kill(&self, name: &str) -> Result<(), String> {
        let (gate, children) = {
            let mut entry = self.entries.get_mut(name).ok_or_else(|| format!("delegation '{name}' not found"))?;
            if matches!(entry.status, DelegationStatus::Complete | DelegationStatus::Failed | DelegationStatus::Killed) {
                return Err(format!("delegation '{name}' already terminated (status: {})", entry.status));
            }
            entry.kill_requested = true;
            entry.status = DelegationStatus::Killed;
            entry.ended_at = Some(Instant::now());
            (entry.pause_gate.clone(), entry.children.clone())
        };
        gate.notify_one();
        for child in children {
            let _ = self.kill(&child);
        }
        Ok(())
    }

    pub fn is_killed(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.kill_requested).unwrap_or(false)
    }

    pub fn pause_gate(&self, name: &str) -> Option<Arc<Notify>> {
        self.entries.get(name).map(|e| e.pause_gate.clone())
    }

    fn snapshot(entry: &DelegationEntry) -> DelegationInfoSnapshot {
        DelegationInfoSnapshot {
            name: entry.name.clone(),
            purpose: entry.purpose.clone(),
            status: entry.status.to_string(),
            tokens: entry.tokens,
            elapsed_ms: entry.started_at.elapsed().as_millis() as u64,
            last_output: entry.last_output.clone(),
            children: entry.children.clone(),
            parent: entry.parent.clone(),
        }
    }
}

#[async_trait::async_trait]
impl DelegationControl for DelegationRegistry {
    fn register(&self, purpose: &str, session_id: &str, parent: Option<&str>) -> Result<String, String> {
        self.register_checked(purpose, session_id, parent)
    }

    fn mark_complete(&self, name: &str, output: &str, tokens: usize) {
        DelegationRegistry::mark_complete(self, name, output, tokens)
    }

    fn mark_failed(&self, name: &str, error: &str) {
        DelegationRegistry::mark_failed(self, name, error)
    }

    fn pause(&self, name: &str) -> Result<(), String> {
        DelegationRegistry::pause(self, name)
    }

    fn resume(&self, name: &str) -> Result<(), String> {
        DelegationRegistry::resume(self, name)
    }

    fn kill(&self, name: &str) -> Result<(), String> {
        DelegationRegistry::kill(self, name)
    }

    fn query(&self, name: &str) -> Result<DelegationInfoSnapshot, String> {
        self.entries.get(name).map(|e| Self::snapshot(&e)).ok_or_else(|| format!("delegation '{name}' not found"))
    }

    fn list_all(&self) -> Vec<DelegationInfoSnapshot> {
        self.entries.iter().map(|e| Self::snapshot(&e)).collect()
    }

    fn find_by_prefix(&self, prefix: &str) -> Option<String> {
        let prefix_lower = prefix.to_lowercase();
        self.entries.iter().find(|e| e.name.starts_with(&prefix_lower)).map(|e| e.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_query_round_trip() {
        let reg = DelegationRegistry::new(5);
        let name = reg.register_checked("fix slider css", "s1", None).unwrap();
        let info = reg.query(&name).unwrap();
        assert_eq!(info.purpose, "fix slider css");
        assert_eq!(info.status, "running");
    }

    #[test]
    fn max_children_rejects_extra_fanout() {
        let reg = DelegationRegistry::new(1);
        let parent = reg.register_checked("parent task", "s0", None).unwrap();
        reg.register_checked("child one", "s1", Some(&parent)).unwrap();
        let rejected = reg.register_checked("child two", "s2", Some(&parent));
        assert_eq!(rejected, Err("max_children".to_string()));
    }

    #[test]
    fn pause_cascades_to_children() {
        let reg = DelegationRegistry::new(5);
        let parent = reg.register_checked("parent", "s0", None).unwrap();
        let child = reg.register_checked("child", "s1", Some(&parent)).unwrap();
        reg.pause(&parent).unwrap();
        assert_eq!(reg.query(&child).unwrap().status, "paused");
    }

    #[test]
    fn kill_already_terminated_is_an_error() {
        let reg = DelegationRegistry::new(5);
        let name = reg.register_checked("task", "s0", None).unwrap();
        reg.kill(&name).unwrap();
        assert!(reg.kill(&name).is_err());
    }
}

//! TTL cache for read-tool results (C3 §4.3). Keyed by `(tool_name,
//! canonical_parameters)`; writes never populate or invalidate it — the
//! scheduler assumes read tools are idempotent over the TTL window.

use crate::registry::ToolResult;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Entry {
    result: ToolResult,
    expires_at: Instant,
}

pub struct ToolCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl ToolCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// Canonical cache key for a tool call. `serde_json::Value` objects
    /// serialize their keys in sorted order by default, so two calls with
    /// the same arguments in different literal order still collide here.
    pub fn key(tool_name: &str, args: &serde_json::Value) -> String {
        format!("{tool_name}:{}", serde_json::to_string(args).unwrap_or_default())
    }

    pub fn get(&self, key: &str) -> Option<ToolResult> {
        let hit = self.entries.get(key)?;
        if hit.expires_at > Instant::now() {
            Some(hit.result.clone())
        } else {
            drop(hit);
            self.entries.remove(key);
            None
        }
    }

    pub fn put(&self, key: String, result: ToolResult) {
        self.entries.insert(key, Entry { result, expires_at: Instant::now() + self.ttl });
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = ToolCache::new(Duration::from_millis(1));
        cache.put("k".to_string(), ToolResult::text("v"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn fresh_entries_are_returned() {
        let cache = ToolCache::new(Duration::from_secs(60));
        cache.put("k".to_string(), ToolResult::text("v"));
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn key_is_stable_regardless_of_field_order() {
        let a = ToolCache::key("read", &serde_json::json!({"path": "/a", "limit": 10}));
        let b = ToolCache::key("read", &serde_json::json!({"limit": 10, "path": "/a"}));
        assert_eq!(a, b);
    }
}

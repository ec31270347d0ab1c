//! Bounded, multi-indexed event history.
//!
//! The deque is the single source of truth; the index maps are views over
//! the same `Arc<Task>` pointers, kept in lock-step on every append and
//! eviction so a query never needs to scan the whole history.

use dashmap::DashMap;
use fractal_core::Task;
use std::collections::VecDeque;
use std::sync::Arc;

fn ancestor_ids(task_id: &str) -> Vec<String> {
    let mut ids = vec![task_id.to_string()];
    let mut rest = task_id;
    while let Some(idx) = rest.rfind(":subtask-") {
        rest = &rest[..idx];
        ids.push(rest.to_string());
    }
    ids
}

pub struct History {
    capacity: usize,
    entries: parking_lot_deque::Deque,
    by_source: DashMap<String, Vec<Arc<Task>>>,
    by_action: DashMap<String, Vec<Arc<Task>>>,
    by_task_id: DashMap<String, Vec<Arc<Task>>>,
    by_target: DashMap<String, Vec<Arc<Task>>>,
}

mod parking_lot_deque {
    use super::*;
    use std::sync::Mutex;

    /// Thin mutex-guarded deque; the bus only ever touches this under one
    /// lock per call, so plain `std::sync::Mutex` is enough — no `.await`
    /// happens while it's held.
    pub struct Deque(Mutex<VecDeque<Arc<Task>>>);

    impl Deque {
        pub fn new() -> Self {
            Self(Mutex::new(VecDeque::new()))
        }

        pub fn push_back(&self, task: Arc<Task>) {
            self.0.lock().unwrap().push_back(task);
        }

        pub fn pop_front(&self) -> Option<Arc<Task>> {
            self.0.lock().unwrap().pop_front()
        }

        pub fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        pub fn snapshot(&self) -> Vec<Arc<Task>> {
            self.0.lock().unwrap().iter().cloned().collect()
        }
    }
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: parking_lot_deque::Deque::new(),
            by_source: DashMap::new(),
            by_action: DashMap::new(),
            by_task_id: DashMap::new(),
            by_target: DashMap::new(),
        }
    }

    /// Append a task snapshot, evicting the oldest entry first if the
    /// history is already at capacity. Incoming events are never dropped;
    /// only the oldest existing one is.
    pub fn append(&self, task: Task) {
        let arc = Arc::new(task);

        if let Some(source) = &arc.source_agent {
            self.by_source.entry(source.clone()).or_default().push(arc.clone());
        }
        self.by_action.entry(arc.action.wire_type().to_string()).or_default().push(arc.clone());
        for id in ancestor_ids(&arc.task_id) {
            self.by_task_id.entry(id).or_default().push(arc.clone());
        }
        if let Some(target) = &arc.target_agent {
            self.by_target.entry(target.clone()).or_default().push(arc.clone());
        }

        self.entries.push_back(arc);

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.remove_from_index(&self.by_source, evicted.source_agent.as_deref(), &evicted);
                self.remove_from_index(&self.by_action, Some(evicted.action.wire_type()), &evicted);
                for id in ancestor_ids(&evicted.task_id) {
                    self.remove_from_index(&self.by_task_id, Some(id.as_str()), &evicted);
                }
                self.remove_from_index(&self.by_target, evicted.target_agent.as_deref(), &evicted);
            }
        }
    }

    fn remove_from_index(&self, index: &DashMap<String, Vec<Arc<Task>>>, key: Option<&str>, evicted: &Arc<Task>) {
        let Some(key) = key else { return };
        if let Some(mut bucket) = index.get_mut(key) {
            bucket.retain(|t| !Arc::ptr_eq(t, evicted));
        }
    }

    pub fn by_source_agent(&self, source: &str) -> Vec<Arc<Task>> {
        self.by_source.get(source).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn by_action(&self, action: &str) -> Vec<Arc<Task>> {
        self.by_action.get(action).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn by_task_id(&self, task_id: &str) -> Vec<Arc<Task>> {
        self.by_task_id.get(task_id).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn by_target_agent(&self, target: &str) -> Vec<Arc<Task>> {
        self.by_target.get(target).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<Task>> {
        self.entries.snapshot()
    }
}

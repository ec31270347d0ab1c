//! The hierarchical memory manager (C4): four tiers, a promotion pipeline
//! between them, an ephemeral scratch space, and retrieval/projection for
//! the context assembler and the fractal orchestrator.

use crate::config::MemoryConfig;
use crate::persistence::MemoryStore;
use crate::projection::{estimate_tokens, ContextProjection, ProjectionMode};
use crate::summarizer::{rule_based_summary, Summarizer};
use fractal_llm::{EmbeddingProvider, VectorStore};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

pub use fractal_core::{MemoryTier, MemoryUnit, MemoryUnitType};

/// External ports the memory manager degrades gracefully without.
#[derive(Clone, Default)]
pub struct MemoryPorts {
    pub embedding: Option<Arc<dyn EmbeddingProvider>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub memory_store: Option<Arc<dyn MemoryStore>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

struct EphemeralEntry {
    content: String,
    metadata: serde_json::Map<String, serde_json::Value>,
}

struct State {
    l1: VecDeque<MemoryUnit>,
    l2: Vec<MemoryUnit>,
    l3: Vec<MemoryUnit>,
    l4: Vec<MemoryUnit>,
    ephemeral: HashMap<String, EphemeralEntry>,
    promotion_window_processed: usize,
    promotion_window_promoted: usize,
}

impl State {
    fn new() -> Self {
        Self {
            l1: VecDeque::new(),
            l2: Vec::new(),
            l3: Vec::new(),
            l4: Vec::new(),
            ephemeral: HashMap::new(),
            promotion_window_processed: 0,
            promotion_window_promoted: 0,
        }
    }
}

pub struct HierarchicalMemory {
    config: RwLock<MemoryConfig>,
    ports: MemoryPorts,
    state: RwLock<State>,
}

impl HierarchicalMemory {
    pub fn new(config: MemoryConfig, ports: MemoryPorts) -> Self {
        Self { config: RwLock::new(config), ports, state: RwLock::new(State::new()) }
    }

    /// Record a new unit into L1. Ties in eviction favor dropping the
    /// oldest of the equally-low-importance items.
    pub async fn record(&self, unit: MemoryUnit) {
        let config = self.config.read().await.clone();
        let mut state = self.state.write().await;
        state.l1.push_back(unit);
        while state.l1.len() > config.l1_capacity {
            evict_lowest_score(&mut state.l1, config.importance_decay_lambda);
        }
    }

    pub async fn add_ephemeral(&self, key: impl Into<String>, content: impl Into<String>, metadata: serde_json::Map<String, serde_json::Value>) {
        let mut state = self.state.write().await;
        state.ephemeral.insert(key.into(), EphemeralEntry { content: content.into(), metadata });
    }

    pub async fn get_ephemeral(&self, key: &str) -> Option<String> {
        self.state.read().await.ephemeral.get(key).map(|e| e.content.clone())
    }

    pub async fn clear_ephemeral(&self, key: Option<&str>) {
        let mut state = self.state.write().await;
        match key {
            Some(k) => {
                state.ephemeral.remove(k);
            }
            None => state.ephemeral.clear(),
        }
    }

    /// Run the full promotion pipeline: L1→L2, L2→L3, L3→L4, and L4
    /// compression if over the soft cap. Called once per completed task,
    /// never interleaved with a running iteration.
    pub async fn promote_tiers(&self) {
        self.promote_l1_to_l2().await;
        self.compress_l2_overflow().await;
        self.promote_l3_overflow_to_l4().await;
        self.compress_l4_if_over_cap().await;
    }

    async fn promote_l1_to_l2(&self) {
        let lambda = self.config.read().await.importance_decay_lambda;
        let mut state = self.state.write().await;
        let theta = self.config.read().await.theta_promote;
        let mut remaining = VecDeque::new();
        let mut promoted = Vec::new();
        while let Some(unit) = state.l1.pop_front() {
            if unit.effective_importance(lambda) > theta {
                promoted.push(unit);
            } else {
                remaining.push_back(unit);
            }
        }
        state.l1 = remaining;
        let processed = promoted.len() + state.l1.len();
        let promoted_count = promoted.len();
        for mut unit in promoted {
            unit.tier = MemoryTier::L2;
            state.l2.push(unit);
        }
        self.adjust_promotion_threshold(&mut state, processed, promoted_count).await;
    }

    async fn adjust_promotion_threshold(&self, state: &mut State, processed: usize, promoted: usize) {
        state.promotion_window_processed += processed;
        state.promotion_window_promoted += promoted;
        if state.promotion_window_processed < 100 {
            return;
        }
        let rate = state.promotion_window_promoted as f64 / state.promotion_window_processed as f64;
        let mut config = self.config.write().await;
        if rate > 0.30 {
            config.theta_promote = (config.theta_promote + 0.05).min(config.theta_promote_max);
        } else if rate < 0.20 {
            config.theta_promote = (config.theta_promote - 0.05).max(config.theta_promote_min);
        }
        state.promotion_window_processed = 0;
        state.promotion_window_promoted = 0;
    }

    async fn compress_l2_overflow(&self) {
        let capacity = self.config.read().await.l2_capacity;
        let mut state = self.state.write().await;
        if state.l2.len() <= capacity {
            return;
        }
        state.l2.sort_by(|a, b| a.importance.partial_cmp(&b.importance).unwrap_or(std::cmp::Ordering::Equal));
        let drop_count = (state.l2.len() / 5).max(1);
        let lowest: Vec<MemoryUnit> = state.l2.drain(0..drop_count).collect();
        drop(state);

        let summary_text = match &self.ports.summarizer {
            Some(s) => s.summarize(&lowest).await.unwrap_or_else(|| rule_based_summary(&lowest)),
            None => rule_based_summary(&lowest),
        };
        let avg_importance = lowest.iter().map(|u| u.importance).sum::<f64>() / lowest.len().max(1) as f64;
        let summary = MemoryUnit::new(summary_text, MemoryTier::L3, MemoryUnitType::Summary, avg_importance);

        let mut state = self.state.write().await;
        state.l3.push(summary);
    }

    async fn promote_l3_overflow_to_l4(&self) {
        let capacity = self.config.read().await.l3_capacity;
        let mut state = self.state.write().await;
        if state.l3.len() <= capacity {
            return;
        }
        state.l3.sort_by_key(|u| u.created_at);
        let promote_count = (state.l3.len() / 5).max(1);
        let oldest: Vec<MemoryUnit> = state.l3.drain(0..promote_count).collect();
        drop(state);

        for mut unit in oldest {
            unit.tier = MemoryTier::L4;
            unit.unit_type = MemoryUnitType::Fact;
            if let Some(embedder) = &self.ports.embedding {
                match embedder.embed(&unit.content).await {
                    Ok(vec) => unit.embedding = Some(vec),
                    Err(e) => tracing::warn!(error = %e, "embedding failed, L4 entry stored without vector"),
                }
            }
            if let (Some(vs), Some(vec)) = (&self.ports.vector_store, unit.embedding.clone()) {
                if let Err(e) = vs.upsert(&unit.unit_id, vec, HashMap::new()).await {
                    tracing::warn!(error = %e, "vector store upsert failed");
                }
            }
            if let Some(store) = &self.ports.memory_store {
                if let Err(e) = store.save_fact(&unit).await {
                    tracing::warn!(error = %e, "L4 persistence failed");
                }
            }
            let mut state = self.state.write().await;
            state.l4.push(unit);
        }
    }

    /// Cluster L4 facts by cosine similarity and merge dense clusters into
    /// aggregated facts. A single pass; items left unclustered (singletons,
    /// or lacking an embedding) are untouched.
    async fn compress_l4_if_over_cap(&self) {
        let (soft_cap, theta, min_size) = {
            let config = self.config.read().await;
            (config.l4_soft_cap, config.theta_cluster, config.min_cluster_size)
        };
        let items = {
            let mut state = self.state.write().await;
            if state.l4.len() <= soft_cap {
                return;
            }
            std::mem::take(&mut state.l4)
        };
        let mut assigned = vec![false; items.len()];
        let mut clusters: Vec<Vec<usize>> = Vec::new();

        for i in 0..items.len() {
            if assigned[i] || items[i].embedding.is_none() {
                continue;
            }
            let mut cluster = vec![i];
            assigned[i] = true;
            for j in (i + 1)..items.len() {
                if assigned[j] {
                    continue;
                }
                if let (Some(a), Some(b)) = (&items[i].embedding, &items[j].embedding) {
                    if cosine(a, b) >= theta {
                        cluster.push(j);
                        assigned[j] = true;
                    }
                }
            }
            clusters.push(cluster);
        }

        let merged = items;
        let mut result = Vec::new();
        let mut consumed = vec![false; merged.len()];
        for cluster in &clusters {
            if cluster.len() < min_size {
                continue;
            }
            let members: Vec<MemoryUnit> = cluster.iter().map(|&idx| merged[idx].clone()).collect();
            for &idx in cluster {
                consumed[idx] = true;
            }
            let summary_text = rule_based_summary(&members);
            let importance = members.iter().map(|m| m.importance).fold(0.0_f64, f64::max);
            let aggregated_embedding = average_vector(members.iter().filter_map(|m| m.embedding.as_deref()));
            let mut aggregated = MemoryUnit::new(summary_text, MemoryTier::L4, MemoryUnitType::Fact, importance);
            aggregated.embedding = aggregated_embedding;
            if let Some(vs) = &self.ports.vector_store {
                for member in &members {
                    let _ = vs.delete(&member.unit_id).await;
                }
                if let Some(vec) = aggregated.embedding.clone() {
                    let _ = vs.upsert(&aggregated.unit_id, vec, HashMap::new()).await;
                }
            }
            result.push(aggregated);
        }
        for (idx, item) in merged.into_iter().enumerate() {
            if !consumed[idx] {
                result.push(item);
            }
        }

        self.state.write().await.l4 = result;
    }

    /// Retrieve memory relevant to `query`, rendered as the XML block
    /// consumed by the context assembler.
    pub async fn retrieve(&self, query: &str, top_k: usize, tier: Option<MemoryTier>) -> String {
        let state = self.state.read().await;
        let mut scored: Vec<(MemoryTier, String, f64)> = Vec::new();

        let want = |t: MemoryTier| tier.map(|restrict| restrict == t).unwrap_or(true);

        if want(MemoryTier::L4) {
            if let Some(embedder) = &self.ports.embedding {
                if let Ok(query_vec) = embedder.embed(query).await {
                    for unit in &state.l4 {
                        if let Some(vec) = &unit.embedding {
                            scored.push((MemoryTier::L4, unit.content.clone(), cosine(&query_vec, vec) as f64));
                        }
                    }
                }
            }
            if scored.is_empty() {
                scored.extend(keyword_score(&state.l4, MemoryTier::L4, query));
            }
        }

        if tier.is_none() || tier == Some(MemoryTier::L3) {
            scored.extend(keyword_score(&state.l3, MemoryTier::L3, query));
        }
        if tier.is_none() || tier == Some(MemoryTier::L2) {
            scored.extend(keyword_score(&state.l2, MemoryTier::L2, query));
        }
        if tier.is_none() || tier == Some(MemoryTier::L1) {
            scored.extend(state.l1.iter().map(|u| (MemoryTier::L1, u.content.clone(), 0.0)).collect::<Vec<_>>());
        }

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        render_xml(&scored)
    }

    /// Build a compact, budget-bounded slice of memory for a delegated
    /// child agent.
    pub async fn create_projection(&self, instruction: &str, total_budget: usize, mode: Option<ProjectionMode>) -> ContextProjection {
        let mode = mode.unwrap_or_else(|| ProjectionMode::detect(instruction));
        let state = self.state.read().await;

        let mut pool: Vec<MemoryUnit> = match mode {
            ProjectionMode::Debug => state.l1.iter().chain(state.l2.iter()).cloned().collect(),
            ProjectionMode::Analytical => state.l3.iter().chain(state.l4.iter()).cloned().collect(),
            ProjectionMode::Contextual => state.l1.iter().rev().cloned().collect(),
            ProjectionMode::Minimal => state.l2.iter().cloned().collect(),
            ProjectionMode::Standard => state.l2.iter().chain(state.l3.iter()).cloned().collect(),
        };
        pool.sort_by(|a, b| b.importance.partial_cmp(&a.importance).unwrap_or(std::cmp::Ordering::Equal));

        let mut items = Vec::new();
        let mut tokens = 0usize;
        for unit in pool {
            let cost = estimate_tokens(&unit.content);
            if tokens + cost > total_budget {
                continue;
            }
            tokens += cost;
            items.push(unit);
        }

        ContextProjection { mode, items, estimated_tokens: tokens }
    }
}

fn evict_lowest_score(l1: &mut VecDeque<MemoryUnit>, lambda: f64) {
    let Some((idx, _)) = l1
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.effective_importance(lambda)
                .partial_cmp(&b.effective_importance(lambda))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    else {
        return;
    };
    l1.remove(idx);
}

fn keyword_score(units: &[MemoryUnit], tier: MemoryTier, query: &str) -> Vec<(MemoryTier, String, f64)> {
    let query_words: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    units
        .iter()
        .map(|unit| {
            let content_lower = unit.content.to_lowercase();
            let hits = query_words.iter().filter(|w| content_lower.contains(w.as_str())).count();
            let score = hits as f64 / query_words.len().max(1) as f64;
            (tier, unit.content.clone(), score)
        })
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn average_vector<'a>(vectors: impl Iterator<Item = &'a [f32]>) -> Option<Vec<f32>> {
    let mut sum: Vec<f32> = Vec::new();
    let mut count = 0usize;
    for v in vectors {
        if sum.is_empty() {
            sum = vec![0.0; v.len()];
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum.into_iter().map(|x| x / count as f32).collect())
}

fn render_xml(scored: &[(MemoryTier, String, f64)]) -> String {
    let mut out = String::from("<retrieved_memory>");
    for (tier, content, relevance) in scored {
        let tier_str = match tier {
            MemoryTier::L1 => "L1",
            MemoryTier::L2 => "L2",
            MemoryTier::L3 => "L3",
            MemoryTier::L4 => "L4",
        };
        out.push_str(&format!(
            "<memory tier=\"{tier_str}\" relevance=\"{relevance:.2}\">{}</memory>",
            xml_escape(content)
        ));
    }
    out.push_str("</retrieved_memory>");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_core::MemoryUnitType;

    fn unit(content: &str, importance: f64) -> MemoryUnit {
        MemoryUnit::new(content, MemoryTier::L1, MemoryUnitType::Task, importance)
    }

    #[tokio::test]
    async fn l1_evicts_lowest_importance_when_over_capacity() {
        let mut config = MemoryConfig::default();
        config.l1_capacity = 2;
        let memory = HierarchicalMemory::new(config, MemoryPorts::default());
        memory.record(unit("keep-high", 0.9)).await;
        memory.record(unit("drop-low", 0.1)).await;
        memory.record(unit("keep-mid", 0.5)).await;

        let xml = memory.retrieve("keep", 10, Some(MemoryTier::L1)).await;
        assert!(xml.contains("keep-high"));
        assert!(xml.contains("keep-mid"));
        assert!(!xml.contains("drop-low"));
    }

    #[tokio::test]
    async fn promotion_moves_high_importance_items_to_l2() {
        let mut config = MemoryConfig::default();
        config.theta_promote = 0.5;
        let memory = HierarchicalMemory::new(config, MemoryPorts::default());
        memory.record(unit("important", 0.95)).await;
        memory.record(unit("trivial", 0.1)).await;
        memory.promote_tiers().await;

        let xml = memory.retrieve("important trivial", 10, Some(MemoryTier::L2)).await;
        assert!(xml.contains("important"));
        assert!(!xml.contains("trivial"));
    }

    #[tokio::test]
    async fn l2_overflow_summarizes_into_l3() {
        let mut config = MemoryConfig::default();
        config.l2_capacity = 2;
        let memory = HierarchicalMemory::new(config, MemoryPorts::default());
        for i in 0..5 {
            let mut u = unit(&format!("item-{i}"), 0.5 + i as f64 * 0.01);
            u.tier = MemoryTier::L2;
            memory.record(u).await;
        }
        // Move everything straight to L2 for this test via promote with a low theta.
        {
            let mut state = memory.state.write().await;
            let drained: Vec<_> = state.l1.drain(..).collect();
            state.l2.extend(drained);
        }
        memory.compress_l2_overflow().await;
        let state = memory.state.read().await;
        assert!(state.l2.len() <= 4);
        assert!(!state.l3.is_empty());
    }

    #[tokio::test]
    async fn ephemeral_store_round_trips_and_clears() {
        let memory = HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default());
        memory.add_ephemeral("k", "v", serde_json::Map::new()).await;
        assert_eq!(memory.get_ephemeral("k").await, Some("v".to_string()));
        memory.clear_ephemeral(Some("k")).await;
        assert_eq!(memory.get_ephemeral("k").await, None);
    }

    #[tokio::test]
    async fn projection_respects_token_budget() {
        let memory = HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default());
        for i in 0..20 {
            let mut u = unit(&format!("fact number {i} with some extra padding text"), 0.5);
            u.tier = MemoryTier::L2;
            let mut state = memory.state.write().await;
            state.l2.push(u);
        }
        let projection = memory.create_projection("short task", 50, None).await;
        assert!(projection.estimated_tokens <= 50);
    }

    #[tokio::test]
    async fn retrieve_keyword_fallback_ranks_matching_content_higher() {
        let memory = HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default());
        {
            let mut state = memory.state.write().await;
            state.l2.push(unit("database migration failed on staging", 0.5));
            state.l2.push(unit("unrelated weather report", 0.5));
        }
        let xml = memory.retrieve("database migration", 1, Some(MemoryTier::L2)).await;
        assert!(xml.contains("database migration"));
        assert!(!xml.contains("weather"));
    }
}

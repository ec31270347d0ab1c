//! Cross-module contract tests for the hierarchical memory pipeline,
//! exercised with the deterministic embedding/vector-store test doubles.

use fractal_core::{MemoryTier, MemoryUnit, MemoryUnitType};
use fractal_llm::{InMemoryVectorStore, MockEmbeddingProvider};
use fractal_memory::{HierarchicalMemory, MemoryConfig, MemoryPorts, ProjectionMode};
use std::sync::Arc;

fn unit(content: &str, importance: f64) -> MemoryUnit {
    MemoryUnit::new(content, MemoryTier::L1, MemoryUnitType::Task, importance)
}

#[tokio::test]
async fn full_lifecycle_promotes_through_all_tiers() {
    let mut config = MemoryConfig::default();
    config.l1_capacity = 3;
    config.l2_capacity = 3;
    config.l3_capacity = 2;
    config.theta_promote = 0.3;
    let memory = HierarchicalMemory::new(config, MemoryPorts::default());

    for i in 0..10 {
        memory.record(unit(&format!("task {i} result detail"), 0.8)).await;
        memory.promote_tiers().await;
    }

    let l4 = memory.retrieve("task", 50, Some(MemoryTier::L4)).await;
    assert!(l4.contains("retrieved_memory"));
}

#[tokio::test]
async fn items_cascade_from_l1_to_l4_with_embeddings() {
    let mut config = MemoryConfig::default();
    config.l1_capacity = 1;
    config.l2_capacity = 1;
    config.l3_capacity = 1;
    config.theta_promote = 0.1;
    let ports = MemoryPorts {
        embedding: Some(Arc::new(MockEmbeddingProvider::new(32))),
        vector_store: Some(Arc::new(InMemoryVectorStore::new())),
        memory_store: None,
        summarizer: None,
    };
    let memory = HierarchicalMemory::new(config, ports);

    for i in 0..6 {
        memory.record(unit(&format!("vector search result {i}"), 0.9)).await;
        memory.promote_tiers().await;
    }

    let xml = memory.retrieve("vector search", 5, Some(MemoryTier::L4)).await;
    assert!(xml.starts_with("<retrieved_memory>"));
    assert!(xml.contains("L4"));
}

#[tokio::test]
async fn projection_mode_detection_drives_pool_selection() {
    let memory = HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default());
    memory.record(unit("recent activity", 0.7)).await;
    let projection = memory.create_projection("continue where we left off", 200, None).await;
    assert_eq!(projection.mode, ProjectionMode::Contextual);
}

#[tokio::test]
async fn ephemeral_store_is_independent_of_tier_promotion() {
    let memory = HierarchicalMemory::new(MemoryConfig::default(), MemoryPorts::default());
    memory.add_ephemeral("scratch", "intermediate tool state", serde_json::Map::new()).await;
    memory.record(unit("unrelated", 0.9)).await;
    memory.promote_tiers().await;
    assert_eq!(memory.get_ephemeral("scratch").await, Some("intermediate tool state".to_string()));
}

//! Vocabulary for the hierarchical memory system (C4): the stored-item
//! shape shared by every tier, independent of how a tier stores or evicts
//! it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the four memory tiers a [`MemoryUnit`] currently lives in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryTier {
    L1,
    L2,
    L3,
    L4,
}

/// What kind of content a [`MemoryUnit`] carries.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryUnitType {
    Task,
    Summary,
    Fact,
}

/// A single stored memory item, at rest in exactly one tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub unit_id: String,
    pub content: String,
    pub tier: MemoryTier,
    pub unit_type: MemoryUnitType,
    /// Base importance in `[0, 1]`, before recency decay is applied.
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MemoryUnit {
    pub fn new(content: impl Into<String>, tier: MemoryTier, unit_type: MemoryUnitType, importance: f64) -> Self {
        let now = Utc::now();
        Self {
            unit_id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            tier,
            unit_type,
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            embedding: None,
            metadata: serde_json::Map::new(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }

    /// Importance decayed by age since creation: `base * e^{-lambda * age_hours}`.
    pub fn effective_importance(&self, lambda: f64) -> f64 {
        let age_hours = (Utc::now() - self.created_at).num_seconds().max(0) as f64 / 3600.0;
        self.importance * (-lambda * age_hours).exp()
    }
}

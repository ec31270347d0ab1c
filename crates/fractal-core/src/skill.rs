//! Vocabulary for the skill registry (C8): knowledge metadata, not
//! executable code.

use serde::{Deserialize, Serialize};

/// A metadata entry describing a capability an agent may draw on. Skills
/// are documentation plus a tool dependency list, never handlers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Skill {
    pub skill_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub optional_tools: Vec<String>,
    /// Short form injected directly into the system prompt.
    pub quick_guide: String,
    /// Reference to the full document, read on demand via a file tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_doc_ref: Option<String>,
}

impl Skill {
    pub fn new(skill_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            skill_id: skill_id.into(),
            name: name.into(),
            description: description.into(),
            category: "general".to_string(),
            tags: Vec::new(),
            required_tools: Vec::new(),
            optional_tools: Vec::new(),
            quick_guide: String::new(),
            detailed_doc_ref: None,
        }
    }
}

//! The skill registry (C8): a capability metadata index, not an executor.
//! Skills are looked up by id, searched by keyword, and validated against
//! whichever tool registry an agent node actually has.

use fractal_core::Skill;
use std::collections::HashMap;

/// Why a skill can't be used right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingTools(pub Vec<String>);

impl std::fmt::Display for MissingTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "missing required tools: {}", self.0.join(", "))
    }
}

/// Holds every known [`Skill`], keyed by `skill_id`.
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self { skills: HashMap::new() }
    }

    /// Register a skill, replacing any prior entry with the same id.
    pub fn register_skill(&mut self, skill: Skill) {
        self.skills.insert(skill.skill_id.clone(), skill);
    }

    pub fn get_skill(&self, id: &str) -> Option<&Skill> {
        self.skills.get(id)
    }

    pub fn list_skills(&self) -> Vec<&Skill> {
        let mut skills: Vec<&Skill> = self.skills.values().collect();
        skills.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        skills
    }

    /// Keyword search over name, description, category, and tags. No
    /// embeddings here — skills are a small, curated set meant to be
    /// scanned, not semantically retrieved like memory.
    pub fn find_relevant(&self, query: &str) -> Vec<&Skill> {
        let words: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&Skill, usize)> = self
            .skills
            .values()
            .filter_map(|skill| {
                let haystack = format!(
                    "{} {} {} {}",
                    skill.name.to_lowercase(),
                    skill.description.to_lowercase(),
                    skill.category.to_lowercase(),
                    skill.tags.join(" ").to_lowercase()
                );
                let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
                (hits > 0).then_some((skill, hits))
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.skill_id.cmp(&b.0.skill_id)));
        scored.into_iter().map(|(skill, _)| skill).collect()
    }

    /// A skill's `required_tools` must all be present in `available_tools`
    /// (tool names, e.g. from [`fractal_tools::ToolRegistry::list`]) for it
    /// to be usable. Absence doesn't remove the skill from the registry —
    /// it just marks it unavailable until the missing tools are supplied.
    pub fn validate_dependencies(&self, skill_id: &str, available_tools: &[String]) -> Result<(), MissingTools> {
        let Some(skill) = self.get_skill(skill_id) else {
            return Err(MissingTools(vec![format!("unknown skill '{skill_id}'")]));
        };
        let missing: Vec<String> = skill.required_tools.iter().filter(|t| !available_tools.iter().any(|a| a == *t)).cloned().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingTools(missing))
        }
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

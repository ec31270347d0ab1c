//! Context projection for child agents (§4.4, §4.7): a compact, read-only
//! slice of the parent's memory handed to a delegated subtask instead of
//! the full history.

use fractal_core::MemoryUnit;

/// Retrieval emphasis, auto-detected from the delegation instruction's
/// wording unless the caller pins one explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Errors/fixes: recent failures and their context dominate.
    Debug,
    /// Analysis requests: summaries and facts dominate over raw history.
    Analytical,
    /// Continuations: most-recent items dominate.
    Contextual,
    /// Short tasks: a handful of the most important items only.
    Minimal,
    /// Balanced default.
    Standard,
}

impl ProjectionMode {
    /// Detect a mode from keywords in the delegation instruction. Falls
    /// back to [`ProjectionMode::Standard`].
    pub fn detect(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        if ["error", "fix", "bug", "fail", "crash"].iter().any(|k| lower.contains(k)) {
            ProjectionMode::Debug
        } else if ["analy", "investigate", "review", "evaluate"].iter().any(|k| lower.contains(k)) {
            ProjectionMode::Analytical
        } else if ["continue", "resume", "next step", "keep going"].iter().any(|k| lower.contains(k)) {
            ProjectionMode::Contextual
        } else if instruction.len() < 60 {
            ProjectionMode::Minimal
        } else {
            ProjectionMode::Standard
        }
    }
}

/// A compact selection of memory handed to a child agent.
#[derive(Clone, Debug)]
pub struct ContextProjection {
    pub mode: ProjectionMode,
    pub items: Vec<MemoryUnit>,
    pub estimated_tokens: usize,
}

pub(crate) fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / 4.0).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_debug_mode_from_keywords() {
        assert_eq!(ProjectionMode::detect("fix the crash in the parser"), ProjectionMode::Debug);
    }

    #[test]
    fn detects_minimal_for_short_instructions() {
        assert_eq!(ProjectionMode::detect("rename x to y"), ProjectionMode::Minimal);
    }

    #[test]
    fn falls_back_to_standard() {
        let instr = "Please read through the module layout and tell me what the overall architecture looks like across files";
        assert_eq!(ProjectionMode::detect(instr), ProjectionMode::Standard);
    }
}

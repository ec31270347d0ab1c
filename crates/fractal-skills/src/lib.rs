//! Skill registry (C8): a capability metadata index agents and the context
//! assembler consult, never execute directly.

pub mod registry;

pub use fractal_core::Skill;
pub use registry::{MissingTools, SkillRegistry};

//! Priority-ordered, token-budgeted prompt assembly (C5). Builds the final
//! message sequence for the LLM and enforces the budget by dropping or
//! shrinking low-priority components before ever touching the critical
//! ones.

use crate::tokenizer::{CharsPerToken, Tokenizer};
use fractal_core::{Error, Message, Result, Role};
use std::sync::Arc;

/// Priority a component is assembled at. Higher survives truncation
/// longer; 100 is never dropped or shrunk.
pub mod priority {
    pub const CRITICAL: u8 = 100;
    pub const HIGH_STRUCTURAL: u8 = 90;
    pub const RECENT_HISTORY: u8 = 70;
    pub const WORKING_MEMORY: u8 = 50;
    pub const MIDDLE_HISTORY: u8 = 50;
    pub const FEW_SHOT: u8 = 50;
    pub const OLD_HISTORY: u8 = 30;
}

struct Component {
    label: String,
    role: Role,
    priority: u8,
    content: String,
    truncatable: bool,
    order: usize,
}

/// Builds an ordered [`Message`] sequence under a token budget. Call the
/// builder methods in the order the final prompt should read — 1 through 9
/// in the component design — then [`ContextAssembler::build`].
pub struct ContextAssembler {
    tokenizer: Arc<dyn Tokenizer>,
    budget: usize,
    components: Vec<Component>,
    next_order: usize,
}

impl ContextAssembler {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, budget: usize) -> Self {
        Self { tokenizer, budget, components: Vec::new(), next_order: 0 }
    }

    pub fn with_default_tokenizer(budget: usize) -> Self {
        Self::new(Arc::new(CharsPerToken), budget)
    }

    fn push(&mut self, label: &str, role: Role, priority: u8, content: impl Into<String>, truncatable: bool) -> &mut Self {
        let content = content.into();
        if content.is_empty() {
            return self;
        }
        self.components.push(Component { label: label.to_string(), role, priority, content, truncatable, order: self.next_order });
        self.next_order += 1;
        self
    }

    /// Priority 100, placed first. Never truncated or dropped.
    pub fn critical_instructions(&mut self, text: impl Into<String>) -> &mut Self {
        self.push("critical_instructions", Role::System, priority::CRITICAL, text, false)
    }

    pub fn role_prompt(&mut self, text: impl Into<String>) -> &mut Self {
        self.push("role_prompt", Role::System, priority::HIGH_STRUCTURAL, text, false)
    }

    pub fn task_description(&mut self, text: impl Into<String>) -> &mut Self {
        self.push("task_description", Role::User, priority::HIGH_STRUCTURAL, text, false)
    }

    /// Placed before dialogue history to fight the "lost in the middle"
    /// effect. Truncatable: shrunk rather than dropped outright.
    pub fn retrieved_memory(&mut self, xml: impl Into<String>) -> &mut Self {
        self.push("retrieved_memory", Role::System, priority::HIGH_STRUCTURAL, xml, true)
    }

    pub fn working_memory(&mut self, text: impl Into<String>) -> &mut Self {
        self.push("working_memory", Role::System, priority::WORKING_MEMORY, text, true)
    }

    /// Non-TTL-expired direct messages addressed to this node, prepended to
    /// history at high priority.
    pub fn direct_messages(&mut self, messages: &[String]) -> &mut Self {
        for (i, m) in messages.iter().enumerate() {
            self.push(&format!("direct_message_{i}"), Role::User, priority::RECENT_HISTORY, m.clone(), false);
        }
        self
    }

    /// Session history with recency-tiered priority: the most recent
    /// `n_recent` messages are highest priority, the next `n_middle` are
    /// mid, everything older is lowest.
    pub fn session_history(&mut self, messages: &[Message], n_recent: usize, n_middle: usize) -> &mut Self {
        let total = messages.len();
        for (i, m) in messages.iter().enumerate() {
            let age_from_end = total - i;
            let priority = if age_from_end <= n_recent {
                priority::RECENT_HISTORY
            } else if age_from_end <= n_recent + n_middle {
                priority::MIDDLE_HISTORY
            } else {
                priority::OLD_HISTORY
            };
            self.push(&format!("history_{i}"), m.role, priority, m.content.clone(), true);
        }
        self
    }

    pub fn few_shot_examples(&mut self, text: impl Into<String>) -> &mut Self {
        self.push("few_shot_examples", Role::System, priority::FEW_SHOT, text, true)
    }

    pub fn output_format(&mut self, text: impl Into<String>) -> &mut Self {
        self.push("output_format", Role::System, priority::HIGH_STRUCTURAL, text, false)
    }

    /// Assemble the final message sequence, dropping/shrinking components
    /// in priority-ascending order (oldest-inserted first within a tie)
    /// until the total fits the budget. `context_overflow` is returned only
    /// when the priority-100 components alone exceed the budget.
    pub fn build(mut self) -> Result<Vec<Message>> {
        let critical_tokens: usize = self
            .components
            .iter()
            .filter(|c| c.priority == priority::CRITICAL)
            .map(|c| self.tokenizer.count(&c.content))
            .sum();
        if critical_tokens > self.budget {
            return Err(Error::context_overflow(critical_tokens, self.budget));
        }

        loop {
            let total = self.total_tokens();
            if total <= self.budget {
                break;
            }
            match self.cheapest_victim() {
                Some(idx) if self.components[idx].truncatable => {
                    if !self.shrink(idx) {
                        self.components.remove(idx);
                    }
                }
                Some(idx) => {
                    tracing::warn!(label = %self.components[idx].label, "dropping context component to stay within budget");
                    self.components.remove(idx);
                }
                None => break,
            }
        }

        Ok(self
            .components
            .into_iter()
            .map(|c| Message { role: c.role, content: c.content, tool_calls: None, tool_call_id: None })
            .collect())
    }

    fn total_tokens(&self) -> usize {
        self.components.iter().map(|c| self.tokenizer.count(&c.content)).sum()
    }

    /// Index of the lowest-priority, non-critical component; ties broken by
    /// earliest insertion order.
    fn cheapest_victim(&self) -> Option<usize> {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.priority < priority::CRITICAL)
            .min_by_key(|(_, c)| (c.priority, c.order))
            .map(|(i, _)| i)
    }

    /// Halve a truncatable component's content. Returns false once it has
    /// shrunk below a useful minimum, signalling the caller to drop it.
    fn shrink(&mut self, idx: usize) -> bool {
        const MIN_CHARS: usize = 80;
        let component = &mut self.components[idx];
        if component.content.len() <= MIN_CHARS {
            return false;
        }
        let target = component.content.len() / 2;
        let cut = component.content.char_indices().take_while(|(i, _)| *i < target).last().map(|(i, c)| i + c.len_utf8()).unwrap_or(target);
        component.content.truncate(cut);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_core::Message;

    #[test]
    fn critical_instructions_survive_tight_budget() {
        let mut asm = ContextAssembler::with_default_tokenizer(5);
        asm.critical_instructions("core");
        asm.few_shot_examples("x".repeat(200));
        let messages = asm.build().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "core");
    }

    #[test]
    fn overflowing_critical_alone_is_an_error() {
        let mut asm = ContextAssembler::with_default_tokenizer(1);
        asm.critical_instructions("way more than one token of content here");
        assert!(asm.build().is_err());
    }

    #[test]
    fn low_priority_components_drop_before_high_priority() {
        let mut asm = ContextAssembler::with_default_tokenizer(20);
        asm.critical_instructions("rule");
        asm.role_prompt("you are an agent");
        asm.few_shot_examples("example ".repeat(50));
        let messages = asm.build().unwrap();
        assert!(messages.iter().any(|m| m.content == "rule"));
        assert!(messages.iter().any(|m| m.content == "you are an agent"));
        assert!(!messages.iter().any(|m| m.content.starts_with("example")));
    }

    #[test]
    fn session_history_tiers_recency() {
        let mut asm = ContextAssembler::with_default_tokenizer(10_000);
        let history: Vec<Message> = (0..5).map(|i| Message::user(format!("msg-{i}"))).collect();
        asm.session_history(&history, 2, 1);
        let messages = asm.build().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[4].content, "msg-4");
    }

    #[test]
    fn truncatable_components_shrink_before_dropping() {
        let mut asm = ContextAssembler::with_default_tokenizer(30);
        asm.critical_instructions("keep");
        asm.retrieved_memory("x".repeat(400));
        let messages = asm.build().unwrap();
        let memory_msg = messages.iter().find(|m| m.content.starts_with('x'));
        if let Some(m) = memory_msg {
            assert!(m.content.len() < 400);
        }
    }
}

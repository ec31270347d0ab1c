//! LLM-assisted summarisation for L2 → L3 compression, with a rule-based
//! fallback so a flaky LLM port never blocks the promotion pipeline.

use fractal_core::MemoryUnit;

/// Summarises a batch of memory units into one piece of text. Implemented
/// by an LLM-backed adapter in an embedder; failures degrade to
/// [`rule_based_summary`].
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, items: &[MemoryUnit]) -> Option<String>;
}

/// Truncate-and-concatenate fallback: no network, no failure mode.
pub fn rule_based_summary(items: &[MemoryUnit]) -> String {
    const PER_ITEM_CHARS: usize = 120;
    items
        .iter()
        .map(|unit| {
            let content = &unit.content;
            if content.chars().count() > PER_ITEM_CHARS {
                let truncated: String = content.chars().take(PER_ITEM_CHARS).collect();
                format!("- {truncated}…")
            } else {
                format!("- {content}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

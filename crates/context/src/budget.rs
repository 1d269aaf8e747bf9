//! Token-budgeted compression.
//!
//! Budgets are measured with a chars-per-token approximation; sections
//! are ordered by priority and dropped tail-first, with the section
//! that crosses the budget truncated at a char boundary.

/// Approximate chars-per-token multiplier.
const CHARS_PER_TOKEN: usize = 4;

/// Marker appended when a section was cut by the budget.
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Rough token estimate for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// A named block of prompt text, in priority order (first = kept first).
#[derive(Debug, Clone)]
pub struct PromptSection {
    pub name: String,
    pub content: String,
}

impl PromptSection {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Assemble sections under a token budget.
///
/// Sections are consumed in order; once the budget runs out, the
/// crossing section is truncated and the rest are dropped. Empty
/// sections never render.
pub fn fit_to_budget(sections: &[PromptSection], token_budget: usize) -> String {
    let char_budget = token_budget.saturating_mul(CHARS_PER_TOKEN);
    let mut out = String::new();

    for section in sections {
        if section.content.is_empty() {
            continue;
        }
        let remaining = char_budget.saturating_sub(out.len());
        if remaining == 0 {
            tracing::debug!(section = %section.name, "dropped by token budget");
            continue;
        }

        if section.content.len() <= remaining {
            out.push_str(&section.content);
            out.push('\n');
        } else {
            let boundary = char_boundary_at_most(&section.content, remaining);
            out.push_str(&section.content[..boundary]);
            out.push_str(TRUNCATION_MARKER);
            out.push('\n');
            tracing::debug!(section = %section.name, "truncated by token budget");
        }
    }

    out
}

/// Hard character cap with a char-boundary-safe cut. Used for the
/// per-subdomain guidance limit.
pub fn cap_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = char_boundary_at_most(text, max_chars);
    text[..boundary].to_string()
}

fn char_boundary_at_most(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

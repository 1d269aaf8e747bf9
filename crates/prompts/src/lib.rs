//! Prompt assembly.
//!
//! Every node's system prompt resolves through the same fallback chain:
//! a full domain replacement wins, otherwise the built-in template is
//! filled with the domain's context and any injection is appended. Act
//! is layered (`base` / `crud` / step type / injection) and its user
//! prompt is the fixed 15-section layout.

mod act;
mod assembly;
mod cache;
mod templates;

pub use act::{act_system_prompt, act_user_prompt, ActPromptInputs, ActStatus};
pub use assembly::node_system_prompt;
pub use cache::load_template;

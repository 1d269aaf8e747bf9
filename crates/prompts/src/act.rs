//! Act prompt assembly: the layered system prompt and the fixed
//! 15-section user prompt.

use std::path::Path;

use chrono::NaiveDate;

use alfred_domain::contract::{DomainConfig, NodeKind};
use alfred_domain::step::StepType;

use crate::cache::load_template;

/// Separator between Act system-prompt layers.
const LAYER_SEPARATOR: &str = "\n\n---\n\n";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Act's layered system prompt: `base`, then `crud` for tool-using
/// steps, then the step-type layer, then the domain injection.
pub fn act_system_prompt(
    domain: &dyn DomainConfig,
    step_type: StepType,
    template_dir: Option<&Path>,
) -> String {
    let mut layers = vec![load_template(template_dir, "act_base")];

    if step_type.uses_tools() {
        layers.push(load_template(template_dir, "act_crud"));
    }

    let step_layer = match step_type {
        StepType::Read => "act_step_read",
        StepType::Write => "act_step_write",
        StepType::Analyze => "act_step_analyze",
        StepType::Generate => "act_step_generate",
    };
    layers.push(load_template(template_dir, step_layer));

    if let Some(injection) = domain.node_prompt_injection(NodeKind::Act) {
        if !injection.is_empty() {
            layers.push(injection);
        }
    }

    layers.join(LAYER_SEPARATOR)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The STATUS table inputs.
#[derive(Debug, Clone)]
pub struct ActStatus {
    /// Zero-based current step index.
    pub step_index: usize,
    pub total_steps: usize,
    pub goal: String,
    pub step_type: StepType,
    /// One line per finished step ("1 done: read 3 rows").
    pub progress: Vec<String>,
    pub today: NaiveDate,
}

/// Pre-rendered section bodies for the Act user prompt. Empty strings
/// render nothing; conditional sections are gated by step type here.
#[derive(Debug, Clone, Default)]
pub struct ActPromptInputs {
    pub subdomain: String,
    pub schema: String,
    pub user_preferences: String,
    pub prev_step_note: String,
    pub user_profile: String,
    pub subdomain_guidance: String,
    pub step_description: String,
    pub user_request: String,
    pub batch_manifest: String,
    pub domain_examples: String,
    pub data_section: String,
    pub entity_context: String,
    pub artifacts: String,
    pub conversation: String,
}

/// Assemble the 15 ordered sections.
pub fn act_user_prompt(inputs: &ActPromptInputs, status: &ActStatus) -> String {
    let step_type = status.step_type;
    let mut sections: Vec<String> = Vec::with_capacity(15);

    // 1. Subdomain header.
    sections.push(format!("## Subdomain: {}", inputs.subdomain));

    // 2. Schema.
    if !inputs.schema.is_empty() {
        sections.push(format!("## Schema\n{}", inputs.schema));
    }

    // 3. User preferences (write only).
    if step_type == StepType::Write && !inputs.user_preferences.is_empty() {
        sections.push(format!("## User preferences\n{}", inputs.user_preferences));
    }

    // 4. STATUS table.
    let progress = if status.progress.is_empty() {
        "none yet".to_string()
    } else {
        status.progress.join("; ")
    };
    sections.push(format!(
        "## Status\nStep {} of {} | goal: {} | type: {} | progress: {} | today: {}",
        status.step_index + 1,
        status.total_steps,
        status.goal,
        step_type.as_str(),
        progress,
        status.today,
    ));

    // 5. Previous-step note (read/write only).
    if step_type.uses_tools() && !inputs.prev_step_note.is_empty() {
        sections.push(format!("## Note from previous step\n{}", inputs.prev_step_note));
    }

    // 6. User profile (analyze/generate).
    if !step_type.uses_tools() && !inputs.user_profile.is_empty() {
        sections.push(format!("## User profile\n{}", inputs.user_profile));
    }

    // 7. Subdomain guidance (analyze/generate).
    if !step_type.uses_tools() && !inputs.subdomain_guidance.is_empty() {
        sections.push(format!("## Guidance\n{}", inputs.subdomain_guidance));
    }

    // 8. Task.
    sections.push(format!(
        "## Task\nYour job this step: {}\nFull user request: {}",
        inputs.step_description, inputs.user_request
    ));

    // 9. Batch manifest (write only, when active).
    if step_type == StepType::Write && !inputs.batch_manifest.is_empty() {
        sections.push(format!("## Batch manifest\n{}", inputs.batch_manifest));
    }

    // 10. Domain examples.
    if !inputs.domain_examples.is_empty() {
        sections.push(format!("## Examples\n{}", inputs.domain_examples));
    }

    // 11. Data.
    if !inputs.data_section.is_empty() {
        sections.push(format!("## Data\n{}", inputs.data_section));
    }

    // 12. Entity context.
    if !inputs.entity_context.is_empty() {
        sections.push(format!("## Entities\n{}", inputs.entity_context));
    }

    // 13. Artifacts (write/generate/analyze).
    if step_type != StepType::Read && !inputs.artifacts.is_empty() {
        sections.push(format!("## Artifacts\n{}", inputs.artifacts));
    }

    // 14. Conversation.
    if !inputs.conversation.is_empty() {
        sections.push(format!("## Conversation\n{}", inputs.conversation));
    }

    // 15. Decision prompt.
    let decision = if step_type.uses_tools() {
        "Decide: emit a tool_call to gather or change data, or step_complete \
         with the step's result. Other actions (request_schema, retrieve_step, \
         retrieve_archive, ask_user, blocked, fail) are available when needed."
    } else {
        "This step has no tools: respond with step_complete carrying the \
         step's full result."
    };
    sections.push(format!("## Decision\n{decision}"));

    sections.join("\n\n")
}

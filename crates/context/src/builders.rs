//! Per-node context builders.
//!
//! Each consumer gets its own selection and ordering of the three
//! layers. Understand and Think use the condensed budget; Act gets the
//! full budget plus step-result payloads.

use chrono::NaiveDate;
use serde_json::Value;

use alfred_domain::config::ContextConfig;
use alfred_domain::contract::DomainConfig;
use alfred_domain::mode::Mode;
use alfred_registry::SessionIdRegistry;

use crate::budget::{cap_chars, fit_to_budget, PromptSection};
use crate::conversation::Conversation;
use crate::tiers::render_entity_context;

/// Everything a builder needs, pre-fetched by the engine.
pub struct ContextInputs<'a> {
    pub conversation: &'a Conversation,
    pub registry: &'a SessionIdRegistry,
    pub domain: &'a dyn DomainConfig,
    pub config: &'a ContextConfig,
    pub user_message: &'a str,
    pub mode: Mode,
    pub today: NaiveDate,
    /// Pre-fetched async domain context.
    pub user_profile: &'a str,
    pub domain_snapshot: &'a str,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared section renderers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn session_context(inputs: &ContextInputs<'_>) -> String {
    let mut body = String::new();
    if !inputs.user_profile.is_empty() {
        body.push_str(inputs.user_profile);
        body.push('\n');
    }
    if !inputs.domain_snapshot.is_empty() {
        body.push_str(inputs.domain_snapshot);
        body.push('\n');
    }
    wrap("session_context", &body)
}

fn entity_context(inputs: &ContextInputs<'_>) -> String {
    let view = render_entity_context(inputs.registry, inputs.config.active_window_turns);
    if view.is_empty() {
        return String::new();
    }
    let mut body = view.render(inputs.config.active_window_turns);
    if let Some(legend) = inputs.domain.entity_data_legend() {
        body.push_str(&legend);
        body.push('\n');
    }
    wrap("entity_context", &body)
}

fn turn_narrative(conversation: &Conversation) -> String {
    let mut body = String::new();
    for summary in conversation.turn_summaries.iter().rev() {
        body.push_str(&summary.render_narrative());
        body.push('\n');
    }
    if !conversation.reasoning_summary.is_empty() {
        body.push_str("(older) ");
        body.push_str(&conversation.reasoning_summary.replace('\n', "; "));
        body.push('\n');
    }
    if body.is_empty() {
        return String::new();
    }
    wrap("turn_narrative", &body)
}

/// Recent turns at full text, older turns compressed. Also used on its
/// own by the Reply prompt (full budget).
pub fn conversation_history(conversation: &Conversation) -> String {
    let mut body = String::new();
    if !conversation.history_summary.is_empty() {
        body.push_str("Earlier: ");
        body.push_str(&conversation.history_summary.replace('\n', " "));
        body.push('\n');
    }
    for record in &conversation.recent_turns {
        body.push_str(&format!(
            "[T{}] User: {}\n[T{}] Assistant: {}\n",
            record.turn, record.user_message, record.turn, record.assistant_response
        ));
    }
    if body.is_empty() {
        return String::new();
    }
    wrap("conversation_history", &body)
}

fn immediate_task(inputs: &ContextInputs<'_>) -> String {
    let mode = match inputs.mode {
        Mode::Quick => "quick",
        Mode::Plan => "plan",
        Mode::Create => "create",
    };
    wrap(
        "immediate_task",
        &format!(
            "User message: {}\nToday: {}\nMode: {mode}\n",
            inputs.user_message, inputs.today
        ),
    )
}

fn wrap(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{body}</{tag}>\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Understand sees the condensed view: who the user is, what entities
/// are live, what was said, and the message under consideration.
pub fn build_understand_context(inputs: &ContextInputs<'_>) -> String {
    let sections = vec![
        PromptSection::new("session", session_context(inputs)),
        PromptSection::new("entities", entity_context(inputs)),
        PromptSection::new("history", conversation_history(inputs.conversation)),
        PromptSection::new("task", immediate_task(inputs)),
    ];
    fit_to_budget(&sections, inputs.config.condensed_token_budget)
}

/// Think's planning context: the five-block condensed layout.
/// Priority under the budget: engagement, entities, the task, the turn
/// narrative, then history, dropped tail-first.
pub fn build_think_context(inputs: &ContextInputs<'_>) -> String {
    let engagement = if inputs.conversation.engagement_summary.is_empty() {
        String::new()
    } else {
        format!("Engagement: {}\n", inputs.conversation.engagement_summary)
    };

    let sections = vec![
        PromptSection::new("engagement", engagement),
        PromptSection::new("session", session_context(inputs)),
        PromptSection::new("entities", entity_context(inputs)),
        PromptSection::new("task", immediate_task(inputs)),
        PromptSection::new("narrative", turn_narrative(inputs.conversation)),
        PromptSection::new("history", conversation_history(inputs.conversation)),
    ];
    fit_to_budget(&sections, inputs.config.condensed_token_budget)
}

/// The Act data section: the previous turn's step results (last two
/// steps, summarized) plus the current step's tool results in full.
pub fn build_act_data_section(
    conversation: &Conversation,
    current_turn: u64,
    current_step_results: &[Value],
) -> String {
    let mut body = String::new();

    if let Some(previous) = conversation.step_results_for(current_turn.saturating_sub(1)) {
        let mut steps: Vec<_> = previous.values().collect();
        let keep = steps.len().saturating_sub(2);
        steps.drain(..keep);
        if !steps.is_empty() {
            body.push_str("Previous turn results:\n");
            for step in steps {
                let preview = summarize_value(&step.data, 400);
                body.push_str(&format!(
                    "  step {} ({}): {preview}\n",
                    step.step_index + 1,
                    step.step_type
                ));
            }
        }
    }

    if !current_step_results.is_empty() {
        body.push_str("Current step tool results:\n");
        for result in current_step_results {
            body.push_str(&serde_json::to_string_pretty(result).unwrap_or_default());
            body.push('\n');
        }
    }

    body
}

/// Per-subdomain guidance with the hard character cap applied.
pub fn capped_guidance(guidance: &str, config: &ContextConfig) -> String {
    cap_chars(guidance, config.guidance_char_cap)
}

fn summarize_value(value: &Value, max_chars: usize) -> String {
    let text = serde_json::to_string(value).unwrap_or_default();
    cap_chars(&text, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{StepResult, TurnRecord};
    use crate::summary::TurnExecutionSummary;
    use alfred_domain::entity::{EntityDefinition, EntityIndex, SubdomainDefinition};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    struct BareDomain {
        entities: HashMap<String, EntityDefinition>,
        subdomains: HashMap<String, SubdomainDefinition>,
        index: EntityIndex,
        empty: HashSet<String>,
        fk: HashMap<String, alfred_domain::contract::FkEnrichTarget>,
    }

    impl BareDomain {
        fn new() -> Self {
            let entities = HashMap::new();
            Self {
                index: EntityIndex::build(&entities),
                entities,
                subdomains: HashMap::new(),
                empty: HashSet::new(),
                fk: HashMap::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl DomainConfig for BareDomain {
        fn name(&self) -> &str {
            "bare"
        }
        fn entities(&self) -> &HashMap<String, EntityDefinition> {
            &self.entities
        }
        fn subdomains(&self) -> &HashMap<String, SubdomainDefinition> {
            &self.subdomains
        }
        fn entity_index(&self) -> &EntityIndex {
            &self.index
        }
        fn user_owned_tables(&self) -> &HashSet<String> {
            &self.empty
        }
        fn uuid_fields(&self) -> &HashSet<String> {
            &self.empty
        }
        fn fk_enrich_map(&self) -> &HashMap<String, alfred_domain::contract::FkEnrichTarget> {
            &self.fk
        }
        fn system_prompt(&self) -> String {
            String::new()
        }
        async fn user_profile(&self, _u: &str) -> alfred_domain::Result<String> {
            Ok(String::new())
        }
        async fn domain_snapshot(&self, _u: &str) -> alfred_domain::Result<String> {
            Ok(String::new())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn think_context_contains_all_blocks() {
        let mut conversation = Conversation::default();
        conversation.engagement_summary = "planning things".into();
        conversation.push_turn(
            TurnRecord {
                turn: 1,
                user_message: "hello".into(),
                assistant_response: "hi".into(),
            },
            3,
        );
        conversation.push_turn_summary(
            TurnExecutionSummary {
                turn_num: 1,
                think_decision: "plan_direct".into(),
                think_goal: "greet".into(),
                steps: vec![],
                entity_curation: Value::Null,
                conversation_phase: Default::default(),
                user_expressed: String::new(),
                blocked_reason: None,
            },
            2,
        );

        let mut registry = SessionIdRegistry::new(1);
        registry.advance_turn();
        registry.register_read(
            "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa",
            "thing",
            "Alpha".into(),
            None,
        );

        let domain = BareDomain::new();
        let config = ContextConfig::default();
        let inputs = ContextInputs {
            conversation: &conversation,
            registry: &registry,
            domain: &domain,
            config: &config,
            user_message: "list my things",
            mode: Mode::Plan,
            today: today(),
            user_profile: "collector of things",
            domain_snapshot: "tables: things",
        };

        let text = build_think_context(&inputs);
        assert!(text.contains("Engagement: planning things"));
        assert!(text.contains("<session_context>"));
        assert!(text.contains("<entity_context>"));
        assert!(text.contains("thing_1 - Alpha"));
        assert!(text.contains("<turn_narrative>"));
        assert!(text.contains("Turn 1: decision=plan_direct"));
        assert!(text.contains("<conversation_history>"));
        assert!(text.contains("<immediate_task>"));
        assert!(text.contains("list my things"));
        assert!(text.contains("Mode: plan"));
    }

    #[test]
    fn tight_budget_drops_history_before_task() {
        let mut conversation = Conversation::default();
        for n in 1..=3 {
            conversation.push_turn(
                TurnRecord {
                    turn: n,
                    user_message: "m".repeat(2000),
                    assistant_response: "r".repeat(2000),
                },
                3,
            );
        }
        let registry = SessionIdRegistry::new(1);
        let domain = BareDomain::new();
        let mut config = ContextConfig::default();
        config.condensed_token_budget = 100;
        let inputs = ContextInputs {
            conversation: &conversation,
            registry: &registry,
            domain: &domain,
            config: &config,
            user_message: "short task",
            mode: Mode::Plan,
            today: today(),
            user_profile: "",
            domain_snapshot: "",
        };

        let text = build_think_context(&inputs);
        // The task block (higher priority) survives; history is cut.
        assert!(text.contains("short task"));
        assert!(text.len() <= 100 * 4 + 64);
    }

    #[test]
    fn act_data_section_keeps_last_two_previous_steps() {
        let mut conversation = Conversation::default();
        for i in 0..4 {
            conversation.record_step_result(
                1,
                StepResult {
                    step_index: i,
                    step_type: "read".into(),
                    description: format!("step {i}"),
                    data: json!([{"id": format!("thing_{i}")}]),
                    tool_calls: vec![],
                    note: None,
                },
            );
        }
        let body = build_act_data_section(&conversation, 2, &[json!({"fresh": true})]);
        assert!(!body.contains("thing_0"));
        assert!(!body.contains("thing_1"));
        assert!(body.contains("thing_2"));
        assert!(body.contains("thing_3"));
        assert!(body.contains("fresh"));
    }

    #[test]
    fn guidance_is_capped() {
        let config = ContextConfig::default();
        let long = "g".repeat(2000);
        assert_eq!(capped_guidance(&long, &config).len(), 800);
    }
}

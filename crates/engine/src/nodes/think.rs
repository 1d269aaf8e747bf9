//! Think: the planner.

use alfred_domain::contract::NodeKind;
use alfred_domain::entity::Complexity as EntityComplexity;
use alfred_domain::error::Result;
use alfred_domain::event::{PlanStep, TurnEvent};
use alfred_domain::trace::NodeTrace;
use alfred_llm::Complexity;
use alfred_prompts::node_system_prompt;

use crate::engine::NodeCtx;
use crate::outputs::{ThinkDecision, ThinkOutput};
use crate::state::{EventSink, PipelineState};

pub async fn run(ctx: &NodeCtx, state: &mut PipelineState, events: &EventSink) -> Result<()> {
    let span = tracing::info_span!("node.think", turn = state.current_turn);
    tracing::Instrument::instrument(run_inner(ctx, state, events), span).await
}

async fn run_inner(ctx: &NodeCtx, state: &mut PipelineState, events: &EventSink) -> Result<()> {
    let mut trace = NodeTrace::start("think");

    events
        .emit(TurnEvent::Thinking {
            message: "Planning".into(),
        })
        .await;

    let user_prompt = alfred_context::build_think_context(&super::context_inputs(ctx, state));
    let system_prompt = super::full_system_prompt(
        ctx,
        &node_system_prompt(
            ctx.domain.as_ref(),
            NodeKind::Think,
            ctx.config.prompts.template_dir.as_deref(),
        ),
    );

    let result = ctx
        .llm
        .call_structured::<ThinkOutput>(
            "think",
            &system_prompt,
            &user_prompt,
            None,
            planning_complexity(ctx, state),
        )
        .await;

    let (output, usage) = match result {
        Ok(ok) => ok,
        Err(e) => {
            trace.finish(true);
            state.trace.push(trace);
            return Err(e);
        }
    };
    state.usage.add(&usage);

    let settings = ctx
        .config
        .mode_settings(state.mode_context.selected_mode);
    let mut settings = settings;
    if let Some(max) = state.mode_context.override_params.max_steps {
        settings.max_steps = max;
    }
    let output = output.validate(&settings);

    events
        .emit(TurnEvent::ThinkComplete {
            decision: output.decision.as_str().to_string(),
        })
        .await;

    match output.decision {
        ThinkDecision::PlanDirect => {
            events
                .emit(TurnEvent::Plan {
                    goal: output.goal.clone(),
                    total_steps: output.steps.len(),
                    steps: output
                        .steps
                        .iter()
                        .map(|s| PlanStep {
                            description: s.description.clone(),
                            step_type: s.step_type.as_str().to_string(),
                            subdomain: s.subdomain.clone(),
                        })
                        .collect(),
                })
                .await;
        }
        ThinkDecision::Propose => {
            events
                .emit(TurnEvent::Propose {
                    message: output.proposal_message.clone(),
                })
                .await;
        }
        ThinkDecision::Clarify => {
            events
                .emit(TurnEvent::Clarify {
                    questions: output.clarification_questions.clone(),
                })
                .await;
        }
    }

    state.think_output = Some(output);
    trace.finish(false);
    state.trace.push(trace);
    Ok(())
}

/// Planning weight: any referenced high-complexity entity type lifts
/// the tier.
fn planning_complexity(ctx: &NodeCtx, state: &PipelineState) -> Complexity {
    let referenced = state
        .understand_output
        .as_ref()
        .map(|u| u.referenced_entities.as_slice())
        .unwrap_or(&[]);
    for entity_ref in referenced {
        let Some(type_name) = state.registry.type_of(entity_ref) else {
            continue;
        };
        let is_high = ctx
            .domain
            .entities()
            .values()
            .any(|def| def.type_name == type_name && def.complexity == EntityComplexity::High);
        if is_high {
            return Complexity::High;
        }
    }
    Complexity::Medium
}

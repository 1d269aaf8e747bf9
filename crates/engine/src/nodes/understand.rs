//! Understand: the memory manager.

use alfred_domain::contract::NodeKind;
use alfred_domain::error::Result;
use alfred_domain::event::TurnEvent;
use alfred_domain::trace::NodeTrace;
use alfred_llm::Complexity;
use alfred_prompts::node_system_prompt;

use crate::engine::NodeCtx;
use crate::outputs::{CurationOp, UnderstandOutput};
use crate::state::{EventSink, PipelineState};

pub async fn run(ctx: &NodeCtx, state: &mut PipelineState, events: &EventSink) -> Result<()> {
    let span = tracing::info_span!("node.understand", turn = state.current_turn);
    tracing::Instrument::instrument(run_inner(ctx, state, events), span).await
}

async fn run_inner(ctx: &NodeCtx, state: &mut PipelineState, events: &EventSink) -> Result<()> {
    let mut trace = NodeTrace::start("understand");

    events
        .emit(TurnEvent::Thinking {
            message: "Reading the conversation".into(),
        })
        .await;

    let user_prompt =
        alfred_context::build_understand_context(&super::context_inputs(ctx, state));
    let system_prompt = super::full_system_prompt(
        ctx,
        &node_system_prompt(
            ctx.domain.as_ref(),
            NodeKind::Understand,
            ctx.config.prompts.template_dir.as_deref(),
        ),
    );

    let result = ctx
        .llm
        .call_structured::<UnderstandOutput>(
            "understand",
            &system_prompt,
            &user_prompt,
            None,
            Complexity::Medium,
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

    // Curation is applied immediately; Summarize only records it.
    apply_curation(state, &output.entity_curation);

    state.understand_output = Some(output);
    trace.finish(false);
    state.trace.push(trace);
    Ok(())
}

fn apply_curation(state: &mut PipelineState, ops: &[CurationOp]) {
    for op in ops {
        match op {
            CurationOp::RetainActive { entity_ref, reason } => {
                state.registry.set_active_reason(entity_ref, reason.clone());
            }
            CurationOp::Demote { entity_ref, .. } => {
                state.registry.clear_active_reason(entity_ref);
            }
            CurationOp::Drop { entity_ref, .. } => {
                state.registry.remove_ref(entity_ref);
            }
            CurationOp::ClearAll { .. } => {
                let retained: Vec<String> = state
                    .registry
                    .all_refs()
                    .filter(|r| state.registry.active_reason(r).is_some())
                    .map(str::to_string)
                    .collect();
                for entity_ref in retained {
                    state.registry.clear_active_reason(&entity_ref);
                }
            }
        }
    }
}

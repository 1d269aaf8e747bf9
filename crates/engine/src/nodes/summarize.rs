//! Summarize: close out the turn and persist.
//!
//! Builds the turn's reasoning trace, compresses the response, updates
//! the engagement summary, serializes the registry into the
//! conversation, and only then clears promoted artifacts.

use serde_json::json;

use alfred_context::{
    PendingClarification, StepExecutionSummary, TurnExecutionSummary, TurnRecord,
};
use alfred_domain::contract::NodeKind;
use alfred_domain::error::{Error, Result};
use alfred_domain::trace::NodeTrace;
use alfred_llm::Complexity;
use alfred_prompts::node_system_prompt;

use crate::engine::NodeCtx;
use crate::outputs::SummarizeOutput;
use crate::state::PipelineState;

pub async fn run(ctx: &NodeCtx, state: &mut PipelineState) -> Result<()> {
    let span = tracing::info_span!("node.summarize", turn = state.current_turn);
    tracing::Instrument::instrument(run_inner(ctx, state), span).await
}

async fn run_inner(ctx: &NodeCtx, state: &mut PipelineState) -> Result<()> {
    let mut trace = NodeTrace::start("summarize");

    let response = state.final_response.clone().unwrap_or_default();

    // Compress the response and refresh the session theme. A failed
    // summarize call degrades to deterministic fallbacks; the turn's
    // data still persists.
    let output = match llm_summarize(ctx, state, &response).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(error = %e, "summarize call failed; using fallback compression");
            SummarizeOutput::default()
        }
    };

    // ── Reasoning trace ────────────────────────────────────────────
    let steps = state
        .step_metadata
        .iter()
        .enumerate()
        .map(|(index, meta)| StepExecutionSummary {
            index,
            description: meta.description.clone(),
            step_type: meta.step_type.clone(),
            subdomain: meta.subdomain.clone(),
            outcome: meta.outcome.clone(),
            tool_calls: meta.tool_calls.clone(),
            blocked_reason: meta.blocked_reason.clone(),
        })
        .collect();

    let curation = state
        .understand_output
        .as_ref()
        .map(|u| serde_json::to_value(&u.entity_curation).unwrap_or_default())
        .unwrap_or_default();

    let summary = TurnExecutionSummary {
        turn_num: state.current_turn,
        think_decision: state
            .think_output
            .as_ref()
            .map(|t| t.decision.as_str().to_string())
            .unwrap_or_else(|| "none".into()),
        think_goal: state
            .think_output
            .as_ref()
            .map(|t| t.goal.clone())
            .unwrap_or_default(),
        steps,
        entity_curation: curation,
        conversation_phase: output.conversation_phase,
        user_expressed: output.user_expressed.clone(),
        blocked_reason: state.blocked.as_ref().and_then(|(e, _)| match e {
            Error::BlockedStep { reason_code, .. } => Some(reason_code.clone()),
            _ => None,
        }),
    };
    state
        .conversation
        .push_turn_summary(summary, ctx.config.context.full_trace_turns);

    // ── Conversation history ───────────────────────────────────────
    let record = TurnRecord {
        turn: state.current_turn,
        user_message: state.user_message.clone(),
        assistant_response: if output.response_summary.is_empty() {
            response.clone()
        } else {
            output.response_summary.clone()
        },
    };
    let overflow = state
        .conversation
        .push_turn(record, ctx.config.context.full_detail_turns);
    for old in overflow {
        let line = format!(
            "T{}: {} -> {}",
            old.turn,
            alfred_context::cap_chars(&old.user_message, 120),
            alfred_context::cap_chars(&old.assistant_response, 160),
        );
        state.conversation.fold_history(&line);
    }

    if !output.engagement_summary.is_empty() {
        state.conversation.engagement_summary = output.engagement_summary;
    }

    // ── Pending clarification ──────────────────────────────────────
    state.conversation.pending_clarification =
        state.ask_user_question.clone().map(|question| PendingClarification {
            question,
            turn: state.current_turn,
        });

    // ── Usage and pruning ──────────────────────────────────────────
    state.conversation.usage.add(&state.usage);
    state
        .conversation
        .prune_step_results(state.current_turn, ctx.config.context.full_detail_turns as u64);

    // ── Persist the registry ───────────────────────────────────────
    // Promoted artifacts are cleared only now, after the reply went out.
    state.registry.clear_turn_promoted_artifacts();
    state.conversation.id_registry = state.registry.to_dict()?;

    trace.finish(false);
    state.trace.push(trace);
    Ok(())
}

async fn llm_summarize(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    response: &str,
) -> Result<SummarizeOutput> {
    let system_prompt = super::full_system_prompt(
        ctx,
        &node_system_prompt(
            ctx.domain.as_ref(),
            NodeKind::Summarize,
            ctx.config.prompts.template_dir.as_deref(),
        ),
    );
    let user_prompt = format!(
        "User message: {}\n\nAssistant response:\n{response}\n\n\
         Previous engagement summary: {}\n\nSteps executed: {}",
        state.user_message,
        state.conversation.engagement_summary,
        json!(state
            .step_metadata
            .iter()
            .map(|m| m.outcome.clone())
            .collect::<Vec<_>>()),
    );

    let (output, usage) = ctx
        .llm
        .call_structured::<SummarizeOutput>(
            "summarize",
            &system_prompt,
            &user_prompt,
            None,
            Complexity::Low,
        )
        .await?;
    state.usage.add(&usage);
    Ok(output)
}

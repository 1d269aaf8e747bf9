//! Reply: the single point that renders anything user-facing.
//!
//! A priority cascade where the first matching branch wins. Every
//! deterministic branch speaks in labels, never refs or ids; the LLM
//! branches are instructed the same way.

use serde_json::Value;

use alfred_context::conversation_history;
use alfred_domain::contract::NodeKind;
use alfred_domain::error::{Error, Result};
use alfred_domain::trace::NodeTrace;
use alfred_llm::Complexity;
use alfred_prompts::node_system_prompt;

use crate::engine::NodeCtx;
use crate::outputs::ThinkDecision;
use crate::state::PipelineState;

pub async fn run(ctx: &NodeCtx, state: &mut PipelineState) -> Result<()> {
    let span = tracing::info_span!("node.reply", turn = state.current_turn);
    tracing::Instrument::instrument(run_inner(ctx, state), span).await
}

async fn run_inner(ctx: &NodeCtx, state: &mut PipelineState) -> Result<()> {
    let mut trace = NodeTrace::start("reply");

    let response = cascade(ctx, state).await?;

    // The mismatch warning rides on top of whichever branch won.
    // Surfaced, never fatal: the typed error is recorded on the state
    // alongside the note.
    let response = match detect_action_mismatch(state) {
        Some(mismatch) => {
            tracing::info!(error = %mismatch, "surfacing action mismatch");
            // A fatal node error already on the state wins; the
            // mismatch only fills an empty slot.
            if state.error.is_none() {
                state.error = Some(mismatch);
            }
            format!(
                "{response}\n\nNote: this looked like a change request, but I only \
                 read data this turn. Tell me to go ahead if you want me to make \
                 the change."
            )
        }
        None => response,
    };

    state.final_response = Some(response);
    trace.finish(false);
    state.trace.push(trace);
    Ok(())
}

async fn cascade(ctx: &NodeCtx, state: &mut PipelineState) -> Result<String> {
    // 1. Clarification / disambiguation from Understand.
    if let Some(understand) = &state.understand_output {
        if understand.needs_clarification && !understand.clarification_questions.is_empty() {
            let question = understand.clarification_questions.join("\n");
            state.ask_user_question = Some(question.clone());
            return Ok(question);
        }
        if understand.needs_disambiguation && !understand.disambiguation_options.is_empty() {
            let options = understand
                .disambiguation_options
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}. {o}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            let question = format!("Which one did you mean?\n{options}");
            state.ask_user_question = Some(question.clone());
            return Ok(question);
        }
    }

    // 2. Quick-response formatter: deterministic first, LLM on mismatch.
    let quick = state
        .understand_output
        .as_ref()
        .filter(|u| u.quick_mode)
        .map(|u| {
            (
                u.quick_subdomain.clone().unwrap_or_default(),
                u.quick_intent.clone().unwrap_or_default(),
            )
        });
    if let Some((subdomain, intent)) = quick {
        let records = first_step_records(state);
        if records.is_empty() {
            if let Some(empty) = ctx.domain.empty_response(&subdomain) {
                return Ok(empty);
            }
        }
        if let Some(formatted) = ctx
            .domain
            .format_quick_response(&subdomain, &intent, &records)
        {
            return Ok(formatted);
        }
        return llm_reply(ctx, state).await;
    }

    if let Some(think) = &state.think_output {
        // 3. Proposal.
        if think.decision == ThinkDecision::Propose {
            return Ok(think.proposal_message.clone());
        }
        // 4. Clarify.
        if think.decision == ThinkDecision::Clarify {
            let question = if think.clarification_questions.is_empty() {
                "Can you tell me a bit more about what you want?".to_string()
            } else {
                think.clarification_questions.join("\n")
            };
            state.ask_user_question = Some(question.clone());
            return Ok(question);
        }
    }

    // 5. Turn error.
    if let Some(error) = &state.error {
        tracing::warn!(error = %error, "rendering error reply");
        return Ok(
            "Something went wrong while working on that. Nothing else was \
             changed; it may be worth trying again or rephrasing the request."
                .to_string(),
        );
    }

    // 6. Ask-user passthrough.
    if let Some(question) = &state.ask_user_question {
        return Ok(question.clone());
    }

    // 7. Fail passthrough.
    if let Some(message) = &state.fail_message {
        return Ok(format!(
            "I couldn't finish that: {message}. Nothing was changed beyond the \
             steps already reported."
        ));
    }

    // 8. Blocked: rendered by the LLM with the details in hand.
    if let Some((Error::BlockedStep {
        reason_code,
        details,
    }, suggested)) = &state.blocked
    {
        let reason_code = reason_code.clone();
        let details = details.clone();
        let suggested = suggested.clone();
        return blocked_reply(ctx, state, &reason_code, &details, suggested.as_deref()).await;
    }

    // 9. Empty-execution guard.
    let planned_direct = state
        .think_output
        .as_ref()
        .is_some_and(|t| t.decision == ThinkDecision::PlanDirect);
    if planned_direct && state.step_metadata.is_empty() {
        return Ok(
            "I had a plan for that but nothing ended up running. Could you try \
             asking again?"
                .to_string(),
        );
    }

    // 10. Normal LLM response.
    llm_reply(ctx, state).await
}

// ── Branch helpers ─────────────────────────────────────────────────

fn first_step_records(state: &PipelineState) -> Vec<Value> {
    state
        .step_results
        .values()
        .next()
        .and_then(|r| r.data.as_array().cloned())
        .unwrap_or_default()
}

async fn blocked_reply(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    reason_code: &str,
    details: &str,
    suggested: Option<&str>,
) -> Result<String> {
    let system_prompt = reply_system_prompt(ctx);
    let user_prompt = format!(
        "A step was blocked.\nReason code: {reason_code}\nDetails: {details}\n\
         Suggested next step: {}\n\nExplain this to the user in one or two \
         sentences and tell them what to try. No internal identifiers.",
        suggested.unwrap_or("none")
    );
    let (text, usage) = ctx
        .llm
        .call_text("reply", &system_prompt, &user_prompt, Complexity::Medium)
        .await?;
    state.usage.add(&usage);
    Ok(text)
}

async fn llm_reply(ctx: &NodeCtx, state: &mut PipelineState) -> Result<String> {
    let mut outcomes = String::new();
    for (i, meta) in state.step_metadata.iter().enumerate() {
        outcomes.push_str(&format!(
            "{}. [{}] {}: {}\n",
            i + 1,
            meta.step_type,
            meta.description,
            meta.outcome
        ));
    }

    let mut data = String::new();
    for result in state.step_results.values() {
        data.push_str(&serde_json::to_string_pretty(&result.data).unwrap_or_default());
        data.push('\n');
    }

    let history = alfred_context::fit_to_budget(
        &[alfred_context::PromptSection::new(
            "history",
            conversation_history(&state.conversation),
        )],
        ctx.config.context.full_token_budget,
    );

    let user_prompt = format!(
        "User message: {}\n\nWhat happened this turn:\n{}\nData:\n{}\n\
         Conversation:\n{}\nWrite the reply.",
        state.user_message,
        if outcomes.is_empty() {
            "nothing executed\n"
        } else {
            outcomes.as_str()
        },
        data,
        history,
    );

    let (text, usage) = ctx
        .llm
        .call_text("reply", &reply_system_prompt(ctx), &user_prompt, Complexity::Medium)
        .await?;
    state.usage.add(&usage);
    Ok(text)
}

fn reply_system_prompt(ctx: &NodeCtx) -> String {
    super::full_system_prompt(
        ctx,
        &node_system_prompt(
            ctx.domain.as_ref(),
            NodeKind::Reply,
            ctx.config.prompts.template_dir.as_deref(),
        ),
    )
}

// ── Action mismatch ────────────────────────────────────────────────

const WRITE_VERBS: &[&str] = &[
    "update", "rename", "delete", "remove", "create", "save", "change", "set ", "add ", "make ",
];

/// When the message reads like a change request but only reads ran,
/// the typed mismatch names the requested verb and what executed.
fn detect_action_mismatch(state: &PipelineState) -> Option<Error> {
    if state.step_metadata.is_empty() {
        return None;
    }
    let message = state.user_message.to_lowercase();
    let requested = WRITE_VERBS.iter().find(|verb| message.contains(*verb))?;
    let executed = state.executed_tools();
    if executed.is_empty() || executed.iter().any(|tool| *tool != "db_read") {
        return None;
    }
    Some(Error::ActionMismatch {
        requested: requested.trim().to_string(),
        executed: executed.join(", "),
    })
}

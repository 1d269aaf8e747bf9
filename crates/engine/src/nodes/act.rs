//! Act: the iterative executor.
//!
//! A self-cycling state machine implemented as an explicit loop: each
//! iteration asks the model for one [`ActDecision`] and dispatches it.
//! Only `step_complete` advances the step index. Circuit breakers: the
//! per-step tool-call cap, and repeated empty reads of the same table.

use std::collections::HashMap;

use serde_json::{json, Value};

use alfred_context::{build_act_data_section, conversation_history, estimate_tokens, render_entity_context};
use alfred_context::StepResult;
use alfred_domain::error::{Error, Result};
use alfred_domain::event::{ToolCallSummary, TurnEvent};
use alfred_domain::filter::CrudTool;
use alfred_domain::step::StepType;
use alfred_domain::trace::NodeTrace;
use alfred_llm::Complexity;
use alfred_prompts::{act_system_prompt, act_user_prompt, ActPromptInputs, ActStatus};

use crate::engine::NodeCtx;
use crate::outputs::{ActDecision, GeneratedArtifact, ThinkStep};
use crate::state::{
    BatchItem, BatchItemState, BatchManifest, CancelToken, EventSink, PipelineState,
};

/// Extra decision iterations beyond the tool cap before a step is
/// force-completed (covers schema requests and retrievals).
const EXTRA_ITERATIONS: usize = 4;

/// Run the whole plan. Returns `Ok(true)` when every step completed and
/// `Ok(false)` when an `ask_user` / `blocked` / `fail` routed to Reply.
pub async fn run_loop(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<bool> {
    let steps: Vec<ThinkStep> = state
        .think_output
        .as_ref()
        .map(|t| t.steps.clone())
        .unwrap_or_default();
    let total = steps.len();

    while state.current_step_index < total {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let step = steps[state.current_step_index].clone();
        state.begin_step();

        if step.step_type == StepType::Write {
            state.current_batch_manifest = Some(build_manifest(state));
        }

        events
            .emit(TurnEvent::Step {
                step: state.current_step_index + 1,
                total,
                description: step.description.clone(),
                step_type: step.step_type.as_str().to_string(),
                group: step.group,
            })
            .await;

        let completed = run_step(ctx, state, events, cancel, &step, total).await?;
        if !completed {
            return Ok(false);
        }
    }

    state.pending_action = None;
    Ok(true)
}

/// Artifacts generated this turn and still unsaved.
fn build_manifest(state: &PipelineState) -> BatchManifest {
    let items = state
        .registry
        .generated_refs()
        .into_iter()
        .filter(|r| state.registry.turn_created(r) == Some(state.current_turn))
        .map(|entity_ref| BatchItem {
            label: state
                .registry
                .label_of(&entity_ref)
                .unwrap_or(&entity_ref)
                .to_string(),
            entity_ref,
            state: BatchItemState::Pending,
        })
        .collect();
    BatchManifest { items }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One step
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_step(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    events: &EventSink,
    cancel: &CancelToken,
    step: &ThinkStep,
    total: usize,
) -> Result<bool> {
    let span = tracing::info_span!(
        "node.act",
        step = state.current_step_index + 1,
        step_type = step.step_type.as_str()
    );
    tracing::Instrument::instrument(
        run_step_inner(ctx, state, events, cancel, step, total),
        span,
    )
    .await
}

async fn run_step_inner(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    events: &EventSink,
    cancel: &CancelToken,
    step: &ThinkStep,
    total: usize,
) -> Result<bool> {
    let mut trace = NodeTrace::start("act");

    let max_tool_calls = effective_tool_cap(ctx, state);
    let max_iterations = max_tool_calls + EXTRA_ITERATIONS;

    let mut tool_calls_used = 0usize;
    let mut tool_summaries: Vec<ToolCallSummary> = Vec::new();
    let mut empty_reads: HashMap<String, usize> = HashMap::new();
    let mut manifest_warned = false;

    // Fetched once per step; capped before injection.
    let guidance = ctx
        .domain
        .subdomain_guidance(&state.user_id, &step.subdomain)
        .await?
        .map(|g| alfred_context::capped_guidance(&g, &ctx.config.context))
        .unwrap_or_default();

    for iteration in 0.. {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if iteration >= max_iterations {
            tracing::warn!(step = state.current_step_index + 1, "iteration guard tripped; forcing completion");
            force_complete(state, step, tool_summaries, "iteration limit reached", events, total)
                .await;
            trace.finish(false);
            state.trace.push(trace);
            return Ok(true);
        }

        let decision = decide(ctx, state, step, total, &guidance).await?;
        state.pending_action = Some(decision.kind().to_string());

        match decision {
            // ── tool_call: never advances the step index ───────────
            ActDecision::ToolCall { tool, params } => {
                if !step.step_type.uses_tools() {
                    state.current_step_tool_results.push(json!({
                        "error": "this step has no tools; respond with step_complete"
                    }));
                    continue;
                }
                if tool_calls_used >= max_tool_calls {
                    // Recoverable: record and force completion.
                    let e = Error::ToolCapExceeded {
                        step: state.current_step_index,
                    };
                    tracing::warn!(error = %e, "tool cap exceeded");
                    state
                        .current_step_tool_results
                        .push(json!({"error": e.to_string()}));
                    force_complete(state, step, tool_summaries, "tool cap reached", events, total)
                        .await;
                    trace.finish(false);
                    state.trace.push(trace);
                    return Ok(true);
                }

                tool_calls_used += 1;
                let table = params
                    .get("table")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                events
                    .emit(TurnEvent::Working {
                        message: format!("{} on {table}", tool.as_str()),
                    })
                    .await;

                match ctx
                    .executor
                    .execute_crud(tool, params, &state.user_id, &mut state.registry)
                    .await
                {
                    Ok(outcome) => {
                        tool_summaries.push(ToolCallSummary {
                            tool: tool.as_str().to_string(),
                            table: outcome.table.clone(),
                            count: outcome.count,
                        });

                        if tool == CrudTool::DbRead && outcome.count == 0 {
                            let misses = empty_reads.entry(outcome.table.clone()).or_insert(0);
                            *misses += 1;
                            if *misses >= ctx.config.act.empty_read_breaker {
                                state.current_step_tool_results.push(outcome.data);
                                force_complete(
                                    state,
                                    step,
                                    tool_summaries,
                                    "repeated empty reads",
                                    events,
                                    total,
                                )
                                .await;
                                trace.finish(false);
                                state.trace.push(trace);
                                return Ok(true);
                            }
                        }

                        if let Some(manifest) = &mut state.current_batch_manifest {
                            sync_manifest(manifest, &state.registry);
                        }
                        state.current_step_tool_results.push(outcome.data);
                    }
                    Err(e) => {
                        // An unfiltered delete surfaces as a blocked
                        // step; Reply asks the user to narrow it.
                        let (e, hint) = match e {
                            Error::UnsafeDelete { table } => (
                                Error::BlockedStep {
                                    reason_code: "unsafe_delete".into(),
                                    details: format!("a delete on {table} had no conditions"),
                                },
                                Some("add a filter that names what to delete".to_string()),
                            ),
                            other => (other, None),
                        };

                        if !e.is_recoverable() {
                            trace.finish(true);
                            state.trace.push(trace);
                            return Err(e);
                        }

                        if let Error::BlockedStep { reason_code, .. } = &e {
                            let reason_code = reason_code.clone();
                            record_metadata(
                                state,
                                step,
                                &format!("blocked: {reason_code}"),
                                tool_summaries,
                                Some(reason_code),
                            );
                            state.pending_action = Some("blocked".into());
                            state.blocked = Some((e, hint));
                            trace.finish(true);
                            state.trace.push(trace);
                            return Ok(false);
                        }

                        // The model can correct the rest; the call is
                        // spent either way.
                        tracing::warn!(error = %e, "tool call rejected");
                        state
                            .current_step_tool_results
                            .push(json!({"error": e.to_string()}));
                    }
                }
            }

            // ── step_complete: the only way forward ────────────────
            ActDecision::StepComplete {
                result,
                note,
                artifacts,
            } => {
                if step.step_type == StepType::Write {
                    if let Some(manifest) = &mut state.current_batch_manifest {
                        sync_manifest(manifest, &state.registry);
                        if manifest.has_pending() && !manifest_warned {
                            manifest_warned = true;
                            let pending = manifest.render();
                            state.current_step_tool_results.push(json!({
                                "error": format!("batch items still pending:\n{pending}")
                            }));
                            continue;
                        }
                        if manifest.has_pending() {
                            // Second refusal would loop forever; record
                            // the skip explicitly instead.
                            manifest.skip_remaining();
                        }
                    }
                }

                let artifact_refs = register_artifacts(ctx, state, step, &artifacts);

                let data = if result.is_null() {
                    json!(state.current_step_tool_results.clone())
                } else {
                    result
                };
                let data = if artifact_refs.is_empty() {
                    data
                } else {
                    json!({"result": data, "artifacts": artifact_refs})
                };

                let outcome_line = note.clone().unwrap_or_else(|| {
                    summarize_tools(&tool_summaries)
                        .unwrap_or_else(|| format!("{} step done", step.step_type.as_str()))
                });

                let step_result = StepResult {
                    step_index: state.current_step_index,
                    step_type: step.step_type.as_str().to_string(),
                    description: step.description.clone(),
                    data: data.clone(),
                    tool_calls: tool_summaries.clone(),
                    note: note.clone(),
                };
                state
                    .step_results
                    .insert(state.current_step_index, step_result.clone());
                state
                    .conversation
                    .record_step_result(state.current_turn, step_result);
                record_metadata(state, step, &outcome_line, tool_summaries, None);
                state.prev_step_note = note;

                events
                    .emit(TurnEvent::StepComplete {
                        step: state.current_step_index + 1,
                        total,
                        data,
                        tool_calls: state
                            .step_metadata
                            .last()
                            .map(|m| m.tool_calls.clone())
                            .unwrap_or_default(),
                    })
                    .await;

                state.current_step_index += 1;
                trace.finish(false);
                state.trace.push(trace);
                return Ok(true);
            }

            // ── loop-continuing retrievals ─────────────────────────
            ActDecision::RequestSchema { table } => {
                if state.schema_requests >= ctx.config.act.max_schema_requests {
                    state.current_step_tool_results.push(json!({
                        "error": "schema request limit reached for this step"
                    }));
                    continue;
                }
                state.schema_requests += 1;
                let schema = ctx
                    .domain
                    .fallback_schemas()
                    .get(&table)
                    .cloned()
                    .unwrap_or(Value::Null);
                let enums = ctx.domain.field_enums(&table).unwrap_or(Value::Null);
                state
                    .current_step_tool_results
                    .push(json!({"schema": schema, "enums": enums, "table": table}));
            }
            ActDecision::RetrieveStep { turn, step: index } => {
                let data = state
                    .conversation
                    .step_results_for(turn)
                    .and_then(|steps| steps.get(&index))
                    .map(|r| r.data.clone())
                    .unwrap_or(Value::Null);
                state
                    .current_step_tool_results
                    .push(json!({"retrieved_step": {"turn": turn, "step": index}, "data": data}));
            }
            ActDecision::RetrieveArchive { key } => {
                let data = state.conversation.archived(&key).cloned().unwrap_or(Value::Null);
                state
                    .current_step_tool_results
                    .push(json!({"retrieved_archive": key, "data": data}));
            }

            // ── terminal: route to Reply ───────────────────────────
            ActDecision::AskUser { question } => {
                record_metadata(state, step, "asked the user", tool_summaries, None);
                state.ask_user_question = Some(question);
                trace.finish(false);
                state.trace.push(trace);
                return Ok(false);
            }
            ActDecision::Blocked {
                reason_code,
                details,
                suggested_next,
            } => {
                record_metadata(
                    state,
                    step,
                    &format!("blocked: {reason_code}"),
                    tool_summaries,
                    Some(reason_code.clone()),
                );
                state.blocked = Some((
                    Error::BlockedStep {
                        reason_code,
                        details,
                    },
                    suggested_next,
                ));
                trace.finish(false);
                state.trace.push(trace);
                return Ok(false);
            }
            ActDecision::Fail { message } => {
                record_metadata(state, step, "failed", tool_summaries, None);
                state.fail_message = Some(if message.is_empty() {
                    "the step could not be completed".into()
                } else {
                    message
                });
                trace.finish(true);
                state.trace.push(trace);
                return Ok(false);
            }
        }
    }

    unreachable!("the iteration guard returns before the loop ends")
}

fn effective_tool_cap(ctx: &NodeCtx, state: &PipelineState) -> usize {
    state
        .mode_context
        .override_params
        .max_tool_calls_per_step
        .unwrap_or(ctx.config.act.max_tool_calls_per_step)
}

fn sync_manifest(manifest: &mut BatchManifest, registry: &alfred_registry::SessionIdRegistry) {
    let saved: Vec<String> = manifest
        .items
        .iter()
        .filter(|item| item.state == BatchItemState::Pending && !registry.is_pending(&item.entity_ref))
        .map(|item| item.entity_ref.clone())
        .collect();
    for entity_ref in saved {
        manifest.mark_saved(&entity_ref);
    }
}

/// Register generated artifacts and archive their content.
fn register_artifacts(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    step: &ThinkStep,
    artifacts: &[GeneratedArtifact],
) -> Vec<String> {
    let mut refs = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let type_name = artifact
            .type_name
            .clone()
            .or_else(|| ctx.domain.infer_entity_type_from_artifact(&artifact.content))
            .or_else(|| {
                ctx.domain
                    .subdomains()
                    .get(&step.subdomain)
                    .and_then(|sd| ctx.domain.entity_index().type_for_table(&sd.primary_table))
                    .map(str::to_string)
            });
        let Some(type_name) = type_name else {
            tracing::warn!(label = %artifact.label, "artifact with no inferable type; skipped");
            continue;
        };

        let entity_ref = state.registry.register_generated(
            &type_name,
            artifact.content.clone(),
            artifact.label.clone(),
            state.current_step_index,
        );

        let archive_key = ctx
            .domain
            .archive_keys_for_subdomain(&step.subdomain)
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("{}:{type_name}", step.subdomain));
        state
            .conversation
            .archive_content(archive_key, artifact.content.clone());

        refs.push(entity_ref);
    }
    refs
}

async fn force_complete(
    state: &mut PipelineState,
    step: &ThinkStep,
    tool_summaries: Vec<ToolCallSummary>,
    reason: &str,
    events: &EventSink,
    total: usize,
) {
    let data = json!(state.current_step_tool_results.clone());
    let step_result = StepResult {
        step_index: state.current_step_index,
        step_type: step.step_type.as_str().to_string(),
        description: step.description.clone(),
        data: data.clone(),
        tool_calls: tool_summaries.clone(),
        note: Some(reason.to_string()),
    };
    state
        .step_results
        .insert(state.current_step_index, step_result.clone());
    state
        .conversation
        .record_step_result(state.current_turn, step_result);
    record_metadata(
        state,
        step,
        &format!("completed early: {reason}"),
        tool_summaries,
        None,
    );
    state.prev_step_note = Some(reason.to_string());
    state.pending_action = Some("step_complete".into());

    events
        .emit(TurnEvent::StepComplete {
            step: state.current_step_index + 1,
            total,
            data,
            tool_calls: state
                .step_metadata
                .last()
                .map(|m| m.tool_calls.clone())
                .unwrap_or_default(),
        })
        .await;

    state.current_step_index += 1;
}

fn record_metadata(
    state: &mut PipelineState,
    step: &ThinkStep,
    outcome: &str,
    tool_calls: Vec<ToolCallSummary>,
    blocked_reason: Option<String>,
) {
    state.step_metadata.push(crate::state::StepMetadata {
        description: step.description.clone(),
        step_type: step.step_type.as_str().to_string(),
        subdomain: step.subdomain.clone(),
        outcome: outcome.to_string(),
        tool_calls,
        blocked_reason,
    });
}

fn summarize_tools(summaries: &[ToolCallSummary]) -> Option<String> {
    if summaries.is_empty() {
        return None;
    }
    Some(
        summaries
            .iter()
            .map(|s| format!("{} {} row(s) on {}", s.tool, s.count, s.table))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The decision call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn decide(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    step: &ThinkStep,
    total: usize,
    guidance: &str,
) -> Result<ActDecision> {
    let goal = state
        .think_output
        .as_ref()
        .map(|t| t.goal.clone())
        .unwrap_or_default();

    // Schema for the step's subdomain tables.
    let schema = ctx
        .domain
        .subdomains()
        .get(&step.subdomain)
        .map(|sd| {
            let schemas = ctx.domain.fallback_schemas();
            let mut tables = vec![sd.primary_table.clone()];
            tables.extend(sd.related_tables.iter().cloned());
            tables
                .iter()
                .filter_map(|t| schemas.get(t))
                .map(|s| serde_json::to_string_pretty(s).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    // Artifact JSON for non-read steps.
    let artifacts = state
        .registry
        .generated_refs()
        .iter()
        .filter_map(|r| {
            state
                .registry
                .get_entity_data(r)
                .map(|content| format!("{r}: {}", serde_json::to_string(content).unwrap_or_default()))
        })
        .collect::<Vec<_>>()
        .join("\n");

    let entity_context =
        render_entity_context(&state.registry, ctx.config.context.active_window_turns)
            .render(ctx.config.context.active_window_turns);

    let data_section = build_act_data_section(
        &state.conversation,
        state.current_turn,
        &state.current_step_tool_results,
    );

    let progress = state
        .step_metadata
        .iter()
        .enumerate()
        .map(|(i, meta)| format!("{} done: {}", i + 1, meta.outcome))
        .collect();

    let inputs = ActPromptInputs {
        subdomain: step.subdomain.clone(),
        schema,
        user_preferences: guidance.to_string(),
        prev_step_note: state.prev_step_note.clone().unwrap_or_default(),
        user_profile: state.user_profile.clone(),
        subdomain_guidance: guidance.to_string(),
        step_description: step.description.clone(),
        user_request: state.user_message.clone(),
        batch_manifest: state
            .current_batch_manifest
            .as_ref()
            .map(BatchManifest::render)
            .unwrap_or_default(),
        domain_examples: ctx.domain.subdomain_examples(&step.subdomain).unwrap_or_default(),
        data_section,
        entity_context,
        artifacts,
        conversation: String::new(),
    };

    let status = ActStatus {
        step_index: state.current_step_index,
        total_steps: total,
        goal,
        step_type: step.step_type,
        progress,
        today: chrono::Utc::now().date_naive(),
    };

    // The conversation gets whatever remains of the full budget.
    let mut inputs = inputs;
    let without_conversation = act_user_prompt(&inputs, &status);
    let used = estimate_tokens(&without_conversation);
    let remaining = ctx.config.context.full_token_budget.saturating_sub(used);
    if remaining > 0 {
        inputs.conversation = alfred_context::fit_to_budget(
            &[alfred_context::PromptSection::new(
                "history",
                conversation_history(&state.conversation),
            )],
            remaining,
        );
    }

    let user_prompt = act_user_prompt(&inputs, &status);
    let system_prompt = super::full_system_prompt(
        ctx,
        &act_system_prompt(
            ctx.domain.as_ref(),
            step.step_type,
            ctx.config.prompts.template_dir.as_deref(),
        ),
    );

    let complexity = match step.step_type {
        StepType::Generate | StepType::Analyze => Complexity::High,
        _ => Complexity::Medium,
    };

    let (decision, usage) = ctx
        .llm
        .call_structured::<ActDecision>("act", &system_prompt, &user_prompt, None, complexity)
        .await?;
    state.usage.add(&usage);
    Ok(decision)
}

//! ActQuick: the single-read fast path.
//!
//! Same prompt scaffolding and CRUD executor as Act, but the decision
//! model is restricted to one `tool_call` and the node always routes to
//! Reply.

use serde_json::json;

use alfred_context::StepResult;
use alfred_domain::contract::NodeKind;
use alfred_domain::error::{Error, Result};
use alfred_domain::event::{ToolCallSummary, TurnEvent};
use alfred_domain::filter::CrudTool;
use alfred_domain::trace::NodeTrace;
use alfred_llm::Complexity;
use alfred_prompts::node_system_prompt;

use crate::engine::NodeCtx;
use crate::outputs::ActQuickDecision;
use crate::state::{CancelToken, EventSink, PipelineState, StepMetadata};

pub async fn run(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<()> {
    let span = tracing::info_span!("node.act_quick", turn = state.current_turn);
    tracing::Instrument::instrument(run_inner(ctx, state, events, cancel), span).await
}

async fn run_inner(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    events: &EventSink,
    cancel: &CancelToken,
) -> Result<()> {
    let mut trace = NodeTrace::start("act_quick");

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let subdomain = state
        .understand_output
        .as_ref()
        .and_then(|u| u.quick_subdomain.clone())
        .unwrap_or_default();
    let subdomain = canonical_subdomain(ctx, &subdomain);

    events
        .emit(TurnEvent::Working {
            message: format!("Looking up {subdomain}"),
        })
        .await;

    // Prompt: quick template + schema + the condensed context.
    let schema = ctx
        .domain
        .subdomains()
        .get(&subdomain)
        .and_then(|sd| ctx.domain.fallback_schemas().get(&sd.primary_table).cloned())
        .map(|s| serde_json::to_string_pretty(&s).unwrap_or_default())
        .unwrap_or_default();

    let context = alfred_context::build_understand_context(&super::context_inputs(ctx, state));
    let user_prompt = format!("## Subdomain: {subdomain}\n\n## Schema\n{schema}\n\n{context}");
    let system_prompt = super::full_system_prompt(
        ctx,
        &node_system_prompt(
            ctx.domain.as_ref(),
            NodeKind::ActQuick,
            ctx.config.prompts.template_dir.as_deref(),
        ),
    );

    let (decision, usage) = ctx
        .llm
        .call_structured::<ActQuickDecision>(
            "act_quick",
            &system_prompt,
            &user_prompt,
            None,
            Complexity::Low,
        )
        .await?;
    state.usage.add(&usage);

    // The fast path reads; anything else the model asked for is coerced.
    let params = if decision.tool == CrudTool::DbRead {
        decision.params
    } else {
        tracing::warn!(tool = decision.tool.as_str(), "quick path only reads; coercing");
        let table = ctx
            .domain
            .subdomains()
            .get(&subdomain)
            .map(|sd| sd.primary_table.clone())
            .unwrap_or_default();
        json!({"table": table})
    };

    let outcome = ctx
        .executor
        .execute_crud(CrudTool::DbRead, params, &state.user_id, &mut state.registry)
        .await?;

    let result = StepResult {
        step_index: 0,
        step_type: "read".into(),
        description: format!("quick lookup in {subdomain}"),
        data: outcome.data.clone(),
        tool_calls: vec![ToolCallSummary {
            tool: outcome.tool.as_str().to_string(),
            table: outcome.table.clone(),
            count: outcome.count,
        }],
        note: None,
    };
    state.step_results.insert(0, result.clone());
    state
        .conversation
        .record_step_result(state.current_turn, result);
    state.step_metadata.push(StepMetadata {
        description: format!("quick lookup in {subdomain}"),
        step_type: "read".into(),
        subdomain,
        outcome: format!("read {} row(s) from {}", outcome.count, outcome.table),
        tool_calls: vec![ToolCallSummary {
            tool: outcome.tool.as_str().to_string(),
            table: outcome.table,
            count: outcome.count,
        }],
        blocked_reason: None,
    });

    trace.finish(false);
    state.trace.push(trace);
    Ok(())
}

fn canonical_subdomain(ctx: &NodeCtx, name: &str) -> String {
    ctx.domain
        .subdomain_aliases()
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

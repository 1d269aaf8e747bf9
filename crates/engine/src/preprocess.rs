//! Pre-Understand ingestion: UI changes and @-mentions.
//!
//! Both run before any LLM sees the turn, so Understand and Act reason
//! over fresh rows instead of stale caches.

use serde_json::{json, Value};

use alfred_context::StepResult;
use alfred_domain::error::Result;
use alfred_domain::filter::CrudTool;
use alfred_domain::refs::ActionTag;
use alfred_domain::turn::{MentionedEntity, UiChange};

use crate::engine::NodeCtx;
use crate::state::PipelineState;

/// Ingest frontend-reported entity changes into the registry with the
/// `:user` action suffix. Rows that arrive with data are injected into
/// this turn's step results so Act sees them without a read.
pub fn ingest_ui_changes(state: &mut PipelineState, changes: &[UiChange]) {
    for change in changes {
        let Some(action) = ActionTag::from_ui_verb(&change.action) else {
            tracing::warn!(action = %change.action, "unknown UI change verb; skipped");
            continue;
        };
        match state.registry.register_from_ui(
            &change.id,
            &change.entity_type,
            change.label.clone(),
            action,
        ) {
            Ok(entity_ref) => {
                if let Some(data) = &change.data {
                    let mut row = data.clone();
                    if let Some(obj) = row.as_object_mut() {
                        obj.insert("id".into(), json!(entity_ref.clone()));
                    }
                    attach_step_result(
                        state,
                        format!("UI {} {}", change.action, change.label),
                        json!([row]),
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "UI change ingestion failed"),
        }
    }
}

/// Resolve @-mentions: register each as `mentioned:user`, then read the
/// full row by id so the turn starts with its data attached.
pub async fn resolve_mentions(
    ctx: &NodeCtx,
    state: &mut PipelineState,
    mentions: &[MentionedEntity],
) -> Result<()> {
    for mention in mentions {
        state.registry.register_from_ui(
            &mention.id,
            &mention.entity_type,
            mention.label.clone(),
            ActionTag::MentionedUser,
        )?;

        let Some(table) = ctx
            .domain
            .entity_index()
            .table_for_type(&mention.entity_type)
            .map(str::to_string)
        else {
            tracing::warn!(entity_type = %mention.entity_type, "mention of unknown type; no data fetched");
            continue;
        };

        let params = json!({
            "table": table,
            "filters": [{"field": "id", "op": "=", "value": mention.id}]
        });
        match ctx
            .executor
            .execute_crud(CrudTool::DbRead, params, &state.user_id, &mut state.registry)
            .await
        {
            Ok(outcome) => {
                attach_step_result(
                    state,
                    format!("mentioned {}", mention.label),
                    outcome.data,
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, label = %mention.label, "mention data fetch failed");
            }
        }
    }
    Ok(())
}

/// Append a synthetic step result to the current turn.
fn attach_step_result(state: &mut PipelineState, description: String, data: Value) {
    let next_index = state
        .conversation
        .step_results_for(state.current_turn)
        .map(|steps| steps.len())
        .unwrap_or(0);
    state.conversation.record_step_result(
        state.current_turn,
        StepResult {
            step_index: next_index,
            step_type: "read".into(),
            description,
            data,
            tool_calls: vec![],
            note: None,
        },
    );
}

//! The engine: construction, the turn driver, and the entry points.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use alfred_context::{render_active_entities, Conversation};
use alfred_crud::CrudExecutor;
use alfred_db::DbAdapter;
use alfred_domain::config::{ConfigSeverity, EngineConfig};
use alfred_domain::contract::DomainConfig;
use alfred_domain::error::{Error, Result};
use alfred_domain::event::{BoxStream, ContextChanges, TurnEvent, Usage};
use alfred_domain::mode::ModeContext;
use alfred_domain::trace::TurnTrace;
use alfred_domain::turn::{parse_mentions, MentionedEntity, UiChange};
use alfred_llm::{LlmBoundary, LlmClient};
use alfred_registry::SessionIdRegistry;

use crate::nodes;
use crate::outputs::ThinkDecision;
use crate::preprocess::{ingest_ui_changes, resolve_mentions};
use crate::state::{CancelToken, EventSink, PipelineState};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared node context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the nodes need, built once at engine construction.
pub(crate) struct NodeCtx {
    pub domain: Arc<dyn DomainConfig>,
    pub adapter: Arc<dyn DbAdapter>,
    pub llm: LlmBoundary,
    pub executor: CrudExecutor,
    pub config: EngineConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn's worth of input.
pub struct TurnRequest {
    pub user_message: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    /// Serialized conversation from the previous turn, if any.
    pub conversation: Option<Value>,
    pub mode: ModeContext,
    pub ui_changes: Vec<UiChange>,
    /// Pre-parsed mentions; `None` parses them from the message.
    pub mentioned_entities: Option<Vec<MentionedEntity>>,
    pub cancel: Option<CancelToken>,
}

impl TurnRequest {
    pub fn new(user_message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            user_id: user_id.into(),
            conversation_id: None,
            conversation: None,
            mode: ModeContext::default(),
            ui_changes: Vec::new(),
            mentioned_entities: None,
            cancel: None,
        }
    }
}

/// What a completed turn hands back.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    /// The updated serialized conversation; the caller persists it.
    pub conversation: Value,
    pub usage: Usage,
    pub trace: TurnTrace,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The conversational orchestration engine. Cheap to clone; all shared
/// pieces are behind `Arc`s and immutable after construction.
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<NodeCtx>,
}

impl Engine {
    /// Build an engine. The domain, adapter, and LLM client are
    /// explicit construction parameters; there is no global lookup.
    pub fn new(
        domain: Arc<dyn DomainConfig>,
        adapter: Arc<dyn DbAdapter>,
        llm_client: Arc<dyn LlmClient>,
        config: EngineConfig,
    ) -> Result<Self> {
        let errors: Vec<String> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }

        let llm = LlmBoundary::new(llm_client, config.llm.clone());
        let executor = CrudExecutor::new(adapter.clone(), domain.clone());
        Ok(Self {
            ctx: Arc::new(NodeCtx {
                domain,
                adapter,
                llm,
                executor,
                config,
            }),
        })
    }

    /// Run one turn, discarding intermediate events.
    pub async fn run(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let (tx, mut rx) = mpsc::channel::<TurnEvent>(256);
        let engine = self.clone();
        let driver =
            tokio::spawn(async move { engine.drive_turn(request, EventSink::new(tx)).await });
        while rx.recv().await.is_some() {}
        driver
            .await
            .map_err(|e| Error::Other(format!("turn task failed: {e}")))?
    }

    /// Run one turn as an event stream. The final `done` event carries
    /// the response and the updated conversation; `context_updated`
    /// follows it.
    pub fn run_streaming(&self, request: TurnRequest) -> BoxStream<'static, TurnEvent> {
        let (tx, mut rx) = mpsc::channel::<TurnEvent>(256);
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.drive_turn(request, EventSink::new(tx)).await {
                Ok(_) => {}
                Err(Error::Cancelled) => tracing::debug!("turn cancelled"),
                Err(e) => tracing::warn!(error = %e, "turn driver failed"),
            }
        });
        Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // The turn driver
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn drive_turn(&self, request: TurnRequest, events: EventSink) -> Result<TurnOutcome> {
        let ctx = &*self.ctx;
        let cancel = request.cancel.clone().unwrap_or_default();

        // ── Bypass modes replace the graph entirely ────────────────
        if let Some(name) = &request.mode.active_bypass_mode {
            if let Some(handler) = ctx.domain.bypass_modes().get(name) {
                tracing::info!(bypass = %name, "dispatching bypass mode");
                let conversation = request.conversation.clone().unwrap_or_else(|| json!({}));
                let (response, updated) = handler
                    .handle(
                        &request.user_message,
                        &request.user_id,
                        conversation,
                        events.sender(),
                    )
                    .await?;
                events
                    .emit(TurnEvent::Done {
                        response: response.clone(),
                        conversation: updated.clone(),
                        active_context: vec![],
                    })
                    .await;
                events.emit(TurnEvent::ContextUpdated).await;
                return Ok(TurnOutcome {
                    response,
                    conversation: updated,
                    usage: Usage::default(),
                    trace: TurnTrace::default(),
                });
            }
            tracing::warn!(bypass = %name, "unknown bypass mode; running the pipeline");
        }

        // ── Load cross-turn state ──────────────────────────────────
        let conversation = match request.conversation {
            Some(value) => Conversation::from_value(value)?,
            None => Conversation::default(),
        };
        let mut registry = if conversation.id_registry.is_null() {
            SessionIdRegistry::new(0)
        } else {
            SessionIdRegistry::from_dict(conversation.id_registry.clone())?
        };
        registry.advance_turn();

        let mut state = PipelineState::new(
            request.user_message,
            request.user_id,
            request.conversation_id,
            request.mode.clone(),
            conversation,
            registry,
        );

        tracing::debug!(turn = state.current_turn, "turn started");

        // ── Pre-processing: UI changes then @-mentions ─────────────
        ingest_ui_changes(&mut state, &request.ui_changes);
        let mentions = request
            .mentioned_entities
            .unwrap_or_else(|| parse_mentions(&state.user_message));
        if let Err(e) = resolve_mentions(ctx, &mut state, &mentions).await {
            tracing::warn!(error = %e, "mention resolution failed");
        }

        // ── Async domain context, fetched once per turn ────────────
        state.user_profile = ctx
            .domain
            .user_profile(&state.user_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "user profile fetch failed");
                String::new()
            });
        state.domain_snapshot = ctx
            .domain
            .domain_snapshot(&state.user_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "domain snapshot fetch failed");
                String::new()
            });

        // ── The graph ──────────────────────────────────────────────
        self.run_graph(ctx, &mut state, &events, &cancel).await?;

        // ── Reply and Summarize always run ─────────────────────────
        if let Err(e) = nodes::reply::run(ctx, &mut state).await {
            tracing::warn!(error = %e, "reply node failed; using fallback text");
            state.final_response = Some(
                "Something went wrong while putting the answer together.".to_string(),
            );
        }
        if let Err(e) = nodes::summarize::run(ctx, &mut state).await {
            tracing::warn!(error = %e, "summarize failed; conversation may be stale");
        }

        // ── Events: active_context, done, then context_updated ─────
        let entities = render_active_entities(
            &state.registry,
            ctx.domain.as_ref(),
            ctx.config.context.active_window_turns,
        );
        let rendered: Vec<String> = entities.iter().map(|e| e.entity_ref.clone()).collect();
        let (added, removed) = state.registry.snapshot_rendered(&rendered);
        events
            .emit(TurnEvent::ActiveContext {
                entities: entities.clone(),
                changes: ContextChanges { added, removed },
                current_turn: state.current_turn,
            })
            .await;

        let response = state.final_response.clone().unwrap_or_default();
        let conversation_value = state.conversation.to_value()?;
        events
            .emit(TurnEvent::Done {
                response: response.clone(),
                conversation: conversation_value.clone(),
                active_context: entities,
            })
            .await;
        events.emit(TurnEvent::ContextUpdated).await;

        Ok(TurnOutcome {
            response,
            conversation: conversation_value,
            usage: state.usage,
            trace: state.trace,
        })
    }

    /// Understand, then route: clarification → Reply, quick → ActQuick,
    /// else Think → Act. Node errors (other than cancellation) land in
    /// `state.error` so Reply can render them.
    async fn run_graph(
        &self,
        ctx: &NodeCtx,
        state: &mut PipelineState,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match nodes::understand::run(ctx, state, events).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                state.error = Some(e);
                return Ok(());
            }
        }

        let understand = state.understand_output.clone().unwrap_or_default();
        if understand.needs_clarification || understand.needs_disambiguation {
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let skip_think = understand.quick_mode
            || ctx
                .config
                .mode_settings(state.mode_context.selected_mode)
                .skip_think;
        if skip_think {
            match nodes::act_quick::run(ctx, state, events, cancel).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => state.error = Some(e),
            }
            return Ok(());
        }

        match nodes::think::run(ctx, state, events).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                state.error = Some(e);
                return Ok(());
            }
        }

        let plan_direct = state
            .think_output
            .as_ref()
            .is_some_and(|t| t.decision == ThinkDecision::PlanDirect);
        if plan_direct {
            match nodes::act::run_loop(ctx, state, events, cancel).await {
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => state.error = Some(e),
            }
        }

        Ok(())
    }
}

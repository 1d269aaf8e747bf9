//! The contract every domain implements.
//!
//! The engine is generic over a [`DomainConfig`] handle supplied at
//! construction; core crates never import a concrete domain. Most members
//! have defaults so a minimal domain only supplies its entities and data
//! access glue.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::entity::{EntityDefinition, EntityIndex, SubdomainDefinition};
use crate::error::Result;
use crate::event::TurnEvent;
use crate::filter::{CrudTool, DbReadParams, FilterClause};
use crate::refs::DetailLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The pipeline nodes a domain can customize prompts for.
///
/// `Router` is declared but never scheduled; its prompt hooks exist for
/// the reserved multi-agent dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Understand,
    Think,
    Act,
    ActQuick,
    Reply,
    Summarize,
    Router,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Understand => "understand",
            NodeKind::Think => "think",
            NodeKind::Act => "act",
            NodeKind::ActQuick => "act_quick",
            NodeKind::Reply => "reply",
            NodeKind::Summarize => "summarize",
            NodeKind::Router => "router",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CRUD middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a FK column's label should be fetched from during enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkEnrichTarget {
    pub table: String,
    pub name_column: String,
}

/// What `pre_read` hands back to the executor.
#[derive(Debug, Clone, Default)]
pub struct ReadPreprocess {
    /// Possibly-modified read params.
    pub params: DbReadParams,
    /// Extra join clauses appended to the select.
    pub select_additions: Vec<String>,
    /// Short-circuit intersection id set. The executor always honors
    /// these when present: intersected with an existing `id` equality
    /// filter, otherwise applied as an `id in (...)` filter. Whether a
    /// middleware produces them at all is per-middleware and must be
    /// documented on the implementation.
    pub pre_filter_ids: Option<Vec<String>>,
    /// Extra OR'd conditions.
    pub or_conditions: Vec<FilterClause>,
    /// When true, the executor returns `[]` without hitting the database.
    pub short_circuit_empty: bool,
}

impl ReadPreprocess {
    pub fn pass_through(params: DbReadParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }
}

/// Domain code that runs inside the CRUD executor to enrich reads and
/// writes with query intelligence.
#[async_trait::async_trait]
pub trait CrudMiddleware: Send + Sync {
    /// Rewrite read params before execution.
    async fn pre_read(&self, table: &str, params: DbReadParams, user_id: &str)
        -> Result<ReadPreprocess> {
        let _ = (table, user_id);
        Ok(ReadPreprocess::pass_through(params))
    }

    /// Rewrite write payloads before execution.
    async fn pre_write(
        &self,
        table: &str,
        tool: CrudTool,
        records: Vec<Value>,
        user_id: &str,
    ) -> Result<Vec<Value>> {
        let _ = (table, tool, user_id);
        Ok(records)
    }

    /// Post-process records coming back from a read.
    async fn post_read(&self, table: &str, records: Vec<Value>) -> Result<Vec<Value>> {
        let _ = table;
        Ok(records)
    }

    /// Drop duplicate records from a batch write.
    fn deduplicate_batch(&self, table: &str, records: Vec<Value>) -> Vec<Value> {
        let _ = table;
        records
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bypass modes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A domain-supplied flow that replaces the pipeline for specific
/// interaction shapes. Receives the message and the serialized
/// conversation, streams its own events, and returns the response plus
/// the updated conversation.
#[async_trait::async_trait]
pub trait BypassHandler: Send + Sync {
    async fn handle(
        &self,
        user_message: &str,
        user_id: &str,
        conversation: Value,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<(String, Value)>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DomainConfig
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the core needs from a domain.
///
/// Sync members are pure over the domain's static definition; the user
/// context members are async because they typically read the database.
#[async_trait::async_trait]
pub trait DomainConfig: Send + Sync {
    // ── Identity ───────────────────────────────────────────────────

    fn name(&self) -> &str;

    /// Entity definitions, keyed by table name.
    fn entities(&self) -> &HashMap<String, EntityDefinition>;

    /// Subdomain definitions, keyed by subdomain name.
    fn subdomains(&self) -> &HashMap<String, SubdomainDefinition>;

    /// The cached `table ↔ type_name` index derived from [`Self::entities`].
    fn entity_index(&self) -> &EntityIndex;

    // ── Labels ─────────────────────────────────────────────────────

    /// Compute the human label for a record. The default consults the
    /// entity's primary field, then `"title"`, then falls back to the ref.
    fn compute_entity_label(&self, record: &Value, type_name: &str, entity_ref: &str) -> String {
        let primary = self
            .entities()
            .values()
            .find(|def| def.type_name == type_name)
            .map(|def| def.primary_field.as_str())
            .unwrap_or("name");
        for field in [primary, "title"] {
            if let Some(label) = record.get(field).and_then(Value::as_str) {
                if !label.is_empty() {
                    return label.to_string();
                }
            }
        }
        entity_ref.to_string()
    }

    /// Classify a read as summary or full for detail-tracked types.
    /// `None` writes no detail entry.
    fn detect_detail_level(&self, type_name: &str, record: &Value) -> Option<DetailLevel> {
        let _ = (type_name, record);
        None
    }

    /// Guess the entity type of a generated artifact from its content.
    fn infer_entity_type_from_artifact(&self, content: &Value) -> Option<String> {
        let _ = content;
        None
    }

    /// Alternate names accepted for subdomains (alias → canonical).
    fn subdomain_aliases(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    // ── Schema ─────────────────────────────────────────────────────

    /// Enum-valued fields for a table, for prompt injection.
    fn field_enums(&self, table: &str) -> Option<Value> {
        let _ = table;
        None
    }

    /// Fallback schemas keyed by table, used when no live schema exists.
    fn fallback_schemas(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Free-text notes about semantic search behavior per table.
    fn semantic_notes(&self, table: &str) -> Option<String> {
        let _ = table;
        None
    }

    /// Domain-level scoping configuration, opaque to the core.
    fn scope_config(&self) -> Value {
        Value::Null
    }

    /// Tables whose rows are scoped to a user. Writes are force-scoped
    /// and unfiltered deletes rejected on these.
    fn user_owned_tables(&self) -> &HashSet<String>;

    /// Columns known to hold UUIDs. No value of these fields may reach
    /// the LLM untranslated; empty strings in payloads become null.
    fn uuid_fields(&self) -> &HashSet<String>;

    /// FK column → where to fetch its display label.
    fn fk_enrich_map(&self) -> &HashMap<String, FkEnrichTarget>;

    /// Rendered subdomain table for planning prompts.
    fn subdomain_registry_text(&self) -> String {
        let mut out = String::new();
        for sd in self.subdomains().values() {
            out.push_str(&format!(
                "- {} (primary: {}): {}\n",
                sd.name, sd.primary_table, sd.description
            ));
        }
        out
    }

    /// Worked examples injected into Act for a subdomain.
    fn subdomain_examples(&self, subdomain: &str) -> Option<String> {
        let _ = subdomain;
        None
    }

    /// Preferred presentation format for a table's rows.
    fn table_format(&self, table: &str) -> Option<String> {
        let _ = table;
        None
    }

    /// Canned response when a subdomain read returns nothing.
    fn empty_response(&self, subdomain: &str) -> Option<String> {
        let _ = subdomain;
        None
    }

    // ── CRUD ───────────────────────────────────────────────────────

    fn crud_middleware(&self) -> Option<Arc<dyn CrudMiddleware>> {
        None
    }

    // ── Prompts ────────────────────────────────────────────────────

    /// The engine-wide system prompt prefix.
    fn system_prompt(&self) -> String;

    /// Full-replacement prompt for a node. Non-empty `Some` wins over
    /// the built-in template.
    fn node_prompt_content(&self, node: NodeKind) -> Option<String> {
        let _ = node;
        None
    }

    /// Text substituted into the built-in template's domain slot.
    fn node_domain_context(&self, node: NodeKind) -> Option<String> {
        let _ = node;
        None
    }

    /// Text appended after template assembly.
    fn node_prompt_injection(&self, node: NodeKind) -> Option<String> {
        let _ = node;
        None
    }

    fn think_planning_guide(&self) -> Option<String> {
        None
    }

    fn reply_subdomain_guide(&self) -> Option<String> {
        None
    }

    fn router_prompt_injection(&self) -> Option<String> {
        None
    }

    // ── User context (async: typically reads the database) ─────────

    async fn user_profile(&self, user_id: &str) -> Result<String>;

    async fn domain_snapshot(&self, user_id: &str) -> Result<String>;

    /// Per-subdomain user-preference guidance. Capped by the context
    /// layer before injection.
    async fn subdomain_guidance(&self, user_id: &str, subdomain: &str) -> Result<Option<String>> {
        let _ = (user_id, subdomain);
        Ok(None)
    }

    // ── Modes ──────────────────────────────────────────────────────

    fn bypass_modes(&self) -> HashMap<String, Arc<dyn BypassHandler>> {
        HashMap::new()
    }

    fn default_agent(&self) -> &str {
        "core"
    }

    /// JSON schema a bypass handler's handoff result must satisfy.
    fn handoff_result_schema(&self) -> Option<Value> {
        None
    }

    // ── Reply formatting ───────────────────────────────────────────

    /// Deterministic quick-read formatter. `None` = fall back to the LLM.
    fn format_quick_response(
        &self,
        subdomain: &str,
        intent: &str,
        records: &[Value],
    ) -> Option<String> {
        let _ = (subdomain, intent, records);
        None
    }

    /// Fields stripped from records before prompt rendering.
    fn strip_fields(&self) -> HashSet<String> {
        HashSet::new()
    }

    /// Fields rendered first for a table.
    fn priority_fields(&self, table: &str) -> Vec<String> {
        let _ = table;
        Vec::new()
    }

    /// Custom one-line rendering of an entity for context tables.
    fn format_entity_for_context(
        &self,
        entity_ref: &str,
        label: &str,
        action: &str,
    ) -> Option<String> {
        let _ = (entity_ref, label, action);
        None
    }

    /// Custom rendering of a full record for data sections.
    fn format_record_for_context(&self, table: &str, record: &Value) -> Option<String> {
        let _ = (table, record);
        None
    }

    /// Confirmation line for a quick-mode write.
    fn quick_write_confirmation(&self, subdomain: &str, count: usize) -> Option<String> {
        let _ = (subdomain, count);
        None
    }

    /// Markers that identify generated content blocks in replies.
    fn generated_content_markers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Entity types worth rendering for a subdomain.
    fn relevant_entity_types(&self, subdomain: &str) -> Vec<String> {
        let _ = subdomain;
        Vec::new()
    }

    /// Legend explaining entity-table annotations, injected once.
    fn entity_data_legend(&self) -> Option<String> {
        None
    }

    /// Archive keys whose content is surfaced for a subdomain.
    fn archive_keys_for_subdomain(&self, subdomain: &str) -> Vec<String> {
        let _ = subdomain;
        Vec::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process-wide registration (embedder convenience)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static CURRENT_DOMAIN: OnceLock<Arc<dyn DomainConfig>> = OnceLock::new();

/// Register the process-wide domain handle. The engine itself never
/// consults this (it takes the domain as a constructor parameter), but
/// embedders with one domain per process can park it here.
///
/// Fails if a domain was already registered.
pub fn register_domain(domain: Arc<dyn DomainConfig>) -> Result<()> {
    CURRENT_DOMAIN
        .set(domain)
        .map_err(|_| crate::Error::Config("a domain is already registered".into()))
}

/// The registered domain, if any.
pub fn get_current_domain() -> Option<Arc<dyn DomainConfig>> {
    CURRENT_DOMAIN.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_names() {
        assert_eq!(NodeKind::ActQuick.as_str(), "act_quick");
        assert_eq!(NodeKind::Router.as_str(), "router");
    }

    #[test]
    fn read_preprocess_pass_through_keeps_params() {
        let params = DbReadParams {
            table: "things".into(),
            ..Default::default()
        };
        let pre = ReadPreprocess::pass_through(params);
        assert_eq!(pre.params.table, "things");
        assert!(!pre.short_circuit_empty);
        assert!(pre.pre_filter_ids.is_none());
    }
}

//! `execute_crud` and the per-tool execution paths.

use std::sync::Arc;

use serde_json::{json, Value};

use alfred_db::{encode_or, DbAdapter, QueryBuilder};
use alfred_domain::contract::DomainConfig;
use alfred_domain::error::{Error, Result};
use alfred_domain::filter::{
    CrudTool, DbCreateParams, DbDeleteParams, DbReadParams, DbUpdateParams, FilterClause,
    FilterOp,
};
use alfred_domain::refs::{is_gen_ref, is_ref, is_uuid_shape};
use alfred_registry::SessionIdRegistry;

use crate::enrich::enrich_fk_labels;
use crate::sanitize::sanitize_strings;

/// Per-record hint field naming the `gen_*` artifact a create realizes.
/// Stripped before the row reaches the adapter.
const SOURCE_REF_FIELD: &str = "_source_ref";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one CRUD execution produced. `data` is always an array of
/// ref-translated records.
#[derive(Debug, Clone)]
pub struct CrudOutcome {
    pub tool: CrudTool,
    pub table: String,
    pub data: Value,
    pub count: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes LLM tool calls against the adapter, with the registry as
/// the translation oracle.
pub struct CrudExecutor {
    adapter: Arc<dyn DbAdapter>,
    domain: Arc<dyn DomainConfig>,
}

impl CrudExecutor {
    pub fn new(adapter: Arc<dyn DbAdapter>, domain: Arc<dyn DomainConfig>) -> Self {
        Self { adapter, domain }
    }

    /// Execute one tool call.
    pub async fn execute_crud(
        &self,
        tool: CrudTool,
        params: Value,
        user_id: &str,
        registry: &mut SessionIdRegistry,
    ) -> Result<CrudOutcome> {
        let span = tracing::info_span!("crud.execute", tool = tool.as_str());
        let call = async {
            match tool {
                CrudTool::DbRead => self.execute_read(params, user_id, registry).await,
                CrudTool::DbCreate => self.execute_create(params, user_id, registry).await,
                CrudTool::DbUpdate => self.execute_update(params, user_id, registry).await,
                CrudTool::DbDelete => self.execute_delete(params, user_id, registry).await,
            }
        };
        tracing::Instrument::instrument(call, span).await
    }

    // ── Read ───────────────────────────────────────────────────────

    async fn execute_read(
        &self,
        params: Value,
        user_id: &str,
        registry: &mut SessionIdRegistry,
    ) -> Result<CrudOutcome> {
        let mut params: DbReadParams = serde_json::from_value(params)?;
        let table = params.table.clone();

        // "Generate now, read later": a read targeting a pending ref is
        // answered from the registry without touching the database.
        if let Some(artifacts) = self.reroute_pending(&params, registry) {
            return Ok(CrudOutcome {
                tool: CrudTool::DbRead,
                table,
                count: artifacts.len(),
                data: Value::Array(artifacts),
            });
        }

        // Input translation.
        params.filters = registry.translate_filters(&params.filters)?;
        params.or_filters = registry.translate_filters(&params.or_filters)?;

        // Middleware pre-read.
        let mut select_additions = Vec::new();
        let mut or_conditions = Vec::new();
        let mut pre_filter_ids = None;
        if let Some(middleware) = self.domain.crud_middleware() {
            let pre = middleware.pre_read(&table, params, user_id).await?;
            if pre.short_circuit_empty {
                return Ok(CrudOutcome {
                    tool: CrudTool::DbRead,
                    table,
                    data: json!([]),
                    count: 0,
                });
            }
            params = pre.params;
            select_additions = pre.select_additions;
            or_conditions = pre.or_conditions;
            pre_filter_ids = pre.pre_filter_ids;
        }

        // The intersection id set always wins when present.
        if let Some(ids) = pre_filter_ids {
            apply_pre_filter_ids(&mut params.filters, ids);
        }

        // User scoping.
        if self.domain.user_owned_tables().contains(&table) {
            params
                .filters
                .push(FilterClause::eq("user_id", json!(user_id)));
        }

        // Build and run the query.
        let mut columns = params.columns.clone().map(|c| c.join(",")).unwrap_or_else(|| "*".to_string());
        for addition in &select_additions {
            columns.push(',');
            columns.push_str(addition);
        }
        let mut query = self.adapter.table(&table).select(&columns);
        query = apply_filters(query, &params.filters);

        let mut or_all = params.or_filters.clone();
        or_all.extend(or_conditions);
        if !or_all.is_empty() {
            query = query.or_(&encode_or(&or_all));
        }
        if let Some(order_by) = &params.order_by {
            query = query.order(order_by, params.order_dir);
        }
        if let Some(limit) = params.limit {
            query = query.limit(limit);
        }

        let result = query.execute().await?;
        let mut records: Vec<Value> = result.rows().to_vec();

        // Middleware post-read.
        if let Some(middleware) = self.domain.crud_middleware() {
            records = middleware.post_read(&table, records).await?;
        }

        // Output translation + FK enrichment.
        let mut records = registry.translate_read_output(records, &table, self.domain.as_ref());
        enrich_fk_labels(&self.adapter, &self.domain, registry, &mut records).await?;

        Ok(CrudOutcome {
            tool: CrudTool::DbRead,
            table,
            count: records.len(),
            data: Value::Array(records),
        })
    }

    /// Collect pending artifacts for refs this read targets, if any.
    fn reroute_pending(
        &self,
        params: &DbReadParams,
        registry: &SessionIdRegistry,
    ) -> Option<Vec<Value>> {
        let mut artifacts = Vec::new();
        for clause in params.filters.iter().chain(&params.or_filters) {
            for candidate in clause_ref_values(clause) {
                if registry.is_pending(&candidate) {
                    if let Some(content) = registry.get_entity_data(&candidate) {
                        let mut content = content.clone();
                        if let Some(obj) = content.as_object_mut() {
                            obj.entry("id").or_insert(json!(candidate.clone()));
                        }
                        artifacts.push(content);
                    }
                }
            }
        }
        if artifacts.is_empty() {
            None
        } else {
            Some(artifacts)
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    async fn execute_create(
        &self,
        params: Value,
        user_id: &str,
        registry: &mut SessionIdRegistry,
    ) -> Result<CrudOutcome> {
        let params: DbCreateParams = serde_json::from_value(params)?;
        let table = params.table.clone();
        let type_name = self
            .domain
            .entity_index()
            .type_for_table(&table)
            .map(str::to_string);

        // Expand gen-ref records to their artifact content and collect
        // promotion hints, in record order.
        let mut hints: Vec<Option<String>> = Vec::new();
        let mut records: Vec<Value> = Vec::new();
        for record in params.records() {
            let (record, hint) = resolve_source(record, registry)?;
            hints.push(hint);
            records.push(record);
        }

        // Sanitize and translate.
        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            sanitize_strings(&mut record);
            prepared.push(registry.translate_payload(&record, self.domain.as_ref())?);
        }
        let mut records = prepared;

        // Middleware pre-write.
        if let Some(middleware) = self.domain.crud_middleware() {
            records = middleware
                .pre_write(&table, CrudTool::DbCreate, records, user_id)
                .await?;
        }

        // User scoping.
        if self.domain.user_owned_tables().contains(&table) {
            for record in &mut records {
                if let Some(obj) = record.as_object_mut() {
                    obj.insert("user_id".into(), json!(user_id));
                }
            }
        }

        // Batch deduplication.
        if let Some(middleware) = self.domain.crud_middleware() {
            let before = records.len();
            records = middleware.deduplicate_batch(&table, records);
            if records.len() < before {
                tracing::debug!(
                    table,
                    dropped = before - records.len(),
                    "batch deduplication removed records"
                );
            }
        }

        let result = self
            .adapter
            .table(&table)
            .insert(Value::Array(records))
            .execute()
            .await?;

        // Register each created row; hints line up with input order as
        // long as dedup dropped nothing (dedup clears the alignment).
        let mut rows: Vec<Value> = result.rows().to_vec();
        let aligned = rows.len() == hints.len();
        for (i, row) in rows.iter().enumerate() {
            let Some(uuid) = row.get("id").and_then(Value::as_str) else {
                continue;
            };
            let Some(type_name) = type_name.as_deref() else {
                continue;
            };
            let label = self.domain.compute_entity_label(row, type_name, "");
            let hint = if aligned {
                hints[i].as_deref()
            } else {
                None
            };
            registry.register_created(hint, uuid, type_name, label);
        }

        scrub_output_uuids(&mut rows, registry, self.domain.as_ref());

        Ok(CrudOutcome {
            tool: CrudTool::DbCreate,
            table,
            count: rows.len(),
            data: Value::Array(rows),
        })
    }

    // ── Update ─────────────────────────────────────────────────────

    async fn execute_update(
        &self,
        params: Value,
        user_id: &str,
        registry: &mut SessionIdRegistry,
    ) -> Result<CrudOutcome> {
        let params: DbUpdateParams = serde_json::from_value(params)?;
        let table = params.table.clone();

        if params.filters.is_empty() {
            return Err(Error::InvalidFilter(
                "update requires at least one filter".into(),
            ));
        }

        let mut data = params.data.clone();
        sanitize_strings(&mut data);
        let data = registry.translate_payload(&data, self.domain.as_ref())?;
        let mut filters = registry.translate_filters(&params.filters)?;

        let mut records = vec![data];
        if let Some(middleware) = self.domain.crud_middleware() {
            records = middleware
                .pre_write(&table, CrudTool::DbUpdate, records, user_id)
                .await?;
        }
        let data = records.into_iter().next().unwrap_or(Value::Null);

        if self.domain.user_owned_tables().contains(&table) {
            filters.push(FilterClause::eq("user_id", json!(user_id)));
        }

        let mut query = self.adapter.table(&table).update(data);
        query = apply_filters(query, &filters);
        let result = query.execute().await?;

        let mut rows: Vec<Value> = result.rows().to_vec();
        for row in &rows {
            if let Some(uuid) = row.get("id").and_then(Value::as_str) {
                let label = self
                    .domain
                    .entity_index()
                    .type_for_table(&table)
                    .map(|t| self.domain.compute_entity_label(row, t, ""));
                registry.register_updated(uuid, label);
            }
        }

        scrub_output_uuids(&mut rows, registry, self.domain.as_ref());

        Ok(CrudOutcome {
            tool: CrudTool::DbUpdate,
            table,
            count: rows.len(),
            data: Value::Array(rows),
        })
    }

    // ── Delete ─────────────────────────────────────────────────────

    async fn execute_delete(
        &self,
        params: Value,
        user_id: &str,
        registry: &mut SessionIdRegistry,
    ) -> Result<CrudOutcome> {
        let params: DbDeleteParams = serde_json::from_value(params)?;
        let table = params.table.clone();
        let user_owned = self.domain.user_owned_tables().contains(&table);

        // A delete with no conditions is never allowed; on user-owned
        // tables it is the dedicated unsafe-delete failure.
        if params.filters.is_empty() {
            if user_owned {
                return Err(Error::UnsafeDelete { table });
            }
            return Err(Error::InvalidFilter(
                "delete requires at least one filter".into(),
            ));
        }

        let mut filters = registry.translate_filters(&params.filters)?;
        if user_owned {
            filters.push(FilterClause::eq("user_id", json!(user_id)));
        }

        let mut query = self.adapter.table(&table).delete();
        query = apply_filters(query, &filters);
        let result = query.execute().await?;

        let rows = result.rows().to_vec();
        let mut removed_refs = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(uuid) = row.get("id").and_then(Value::as_str) {
                if let Some(entity_ref) = registry.register_deleted(uuid) {
                    removed_refs.push(json!({"ref": entity_ref}));
                }
            }
        }

        Ok(CrudOutcome {
            tool: CrudTool::DbDelete,
            table,
            count: rows.len(),
            data: Value::Array(removed_refs),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ref-shaped string values inside a clause (scalar or array).
fn clause_ref_values(clause: &FilterClause) -> Vec<String> {
    match &clause.value {
        Value::String(s) if is_ref(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| is_ref(s))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Expand a create record: a bare `gen_*` ref string becomes its
/// artifact content; an embedded `_source_ref` field is stripped and
/// kept as the promotion hint.
fn resolve_source(
    record: Value,
    registry: &SessionIdRegistry,
) -> Result<(Value, Option<String>)> {
    match record {
        Value::String(s) if is_gen_ref(&s) => {
            let content = registry
                .get_entity_data(&s)
                .cloned()
                .ok_or_else(|| Error::UnknownRef(s.clone()))?;
            Ok((content, Some(s)))
        }
        Value::Object(mut obj) => {
            let hint = obj
                .remove(SOURCE_REF_FIELD)
                .and_then(|v| v.as_str().map(str::to_string));
            Ok((Value::Object(obj), hint))
        }
        other => Ok((other, None)),
    }
}

/// Map translated filter clauses onto the adapter's fluent surface.
///
/// Operator notes: `not_in` supports a single value only (rewritten to
/// `neq`); multi-value `not_in` is a no-op with a warning. Semantic
/// clauses that middleware left behind are dropped.
fn apply_filters(
    mut query: Box<dyn QueryBuilder>,
    filters: &[FilterClause],
) -> Box<dyn QueryBuilder> {
    for clause in filters {
        if clause.is_semantic() {
            tracing::debug!(field = %clause.field, "semantic clause not consumed by middleware; dropped");
            continue;
        }
        let field = clause.field.as_str();
        let value = clause.value.clone();
        query = match clause.op {
            FilterOp::Eq => query.eq(field, value),
            FilterOp::Neq => query.neq(field, value),
            FilterOp::Gt => query.gt(field, value),
            FilterOp::Lt => query.lt(field, value),
            FilterOp::Gte => query.gte(field, value),
            FilterOp::Lte => query.lte(field, value),
            FilterOp::In => {
                let values = match value {
                    Value::Array(items) => items,
                    scalar => vec![scalar],
                };
                query.in_(field, values)
            }
            FilterOp::NotIn => match value {
                Value::Array(items) if items.len() == 1 => {
                    query.neq(field, items.into_iter().next().unwrap_or(Value::Null))
                }
                Value::Array(items) => {
                    tracing::warn!(
                        field,
                        count = items.len(),
                        "multi-value not_in is unsupported; clause ignored"
                    );
                    query
                }
                scalar => query.neq(field, scalar),
            },
            FilterOp::Ilike => {
                let pattern = value.as_str().unwrap_or_default().to_string();
                query.ilike(field, &pattern)
            }
            FilterOp::IsNull => query.is_(field, Value::Null),
            FilterOp::IsNotNull => query.not_(field, Value::Null),
            FilterOp::Contains => query.contains(field, value),
            FilterOp::Similar => {
                tracing::warn!(field, "similar outside _semantic; clause ignored");
                query
            }
        };
    }
    query
}

/// Honor middleware's intersection id set: narrow an existing `id`
/// equality, otherwise add an `id in (...)` clause.
fn apply_pre_filter_ids(filters: &mut Vec<FilterClause>, ids: Vec<String>) {
    let id_values: Vec<Value> = ids.iter().map(|i| json!(i)).collect();
    if let Some(existing) = filters
        .iter_mut()
        .find(|c| c.field == "id" && c.op == FilterOp::Eq)
    {
        if let Some(current) = existing.value.as_str() {
            if !ids.iter().any(|i| i == current) {
                // Intersection is empty; no row can match.
                existing.value = json!("");
            }
        }
        return;
    }
    filters.push(FilterClause::new("id", FilterOp::In, Value::Array(id_values)));
}

/// Replace UUID strings in write outputs with refs. Known UUIDs use
/// their mapped ref; unknown UUIDs in declared UUID columns get a
/// `linked` ref. Arbitrary unknown UUID-shaped data is left alone.
fn scrub_output_uuids(
    rows: &mut [Value],
    registry: &mut SessionIdRegistry,
    domain: &dyn DomainConfig,
) {
    for row in rows {
        let Some(map) = row.as_object_mut() else {
            continue;
        };
        let fields: Vec<String> = map.keys().cloned().collect();
        for field in fields {
            let Some(text) = map.get(&field).and_then(Value::as_str) else {
                continue;
            };
            if !is_uuid_shape(text) {
                continue;
            }
            let replacement = match registry.ref_for_uuid(text) {
                Some(existing) => existing.to_string(),
                None if domain.uuid_fields().contains(&field) => {
                    let type_name = field.strip_suffix("_id").unwrap_or(&field).to_string();
                    registry.register_linked_untracked(text, &type_name)
                }
                None => continue,
            };
            map.insert(field, Value::String(replacement));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_testing::{MemoryAdapter, StubDomain};

    const UUID_A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
    const UUID_B: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";
    const USER: &str = "99999999-9999-9999-9999-999999999999";

    fn setup() -> (CrudExecutor, MemoryAdapter, SessionIdRegistry) {
        let adapter = MemoryAdapter::new();
        adapter.seed(
            "things",
            vec![json!({"id": UUID_A, "name": "Alpha", "owner_id": UUID_B, "user_id": USER})],
        );
        adapter.seed("owners", vec![json!({"id": UUID_B, "name": "Ann"})]);
        let executor = CrudExecutor::new(
            Arc::new(adapter.clone()),
            Arc::new(StubDomain::new()),
        );
        let mut registry = SessionIdRegistry::new(1);
        registry.advance_turn();
        (executor, adapter, registry)
    }

    #[tokio::test]
    async fn read_translates_and_enriches() {
        let (executor, _, mut registry) = setup();
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({"table": "things"}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        let row = &outcome.data[0];
        assert_eq!(row["id"], json!("thing_1"));
        assert_eq!(row["owner_id"], json!("owner_1"));
        assert_eq!(row["_owner_id_label"], json!("Ann"));
        // Nothing UUID-shaped remains anywhere in the output.
        let text = serde_json::to_string(&outcome.data).unwrap();
        assert!(!text.contains(UUID_A) && !text.contains(UUID_B) && !text.contains(USER));
    }

    #[tokio::test]
    async fn read_scopes_user_owned_tables() {
        let (executor, adapter, mut registry) = setup();
        adapter.seed(
            "things",
            vec![
                json!({"id": UUID_A, "name": "Mine", "user_id": USER}),
                json!({"id": "cccccccc-cccc-cccc-cccc-cccccccccccc", "name": "Theirs",
                       "user_id": "88888888-8888-8888-8888-888888888888"}),
            ],
        );
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({"table": "things"}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.data[0]["name"], json!("Mine"));
    }

    #[tokio::test]
    async fn read_of_pending_ref_skips_database() {
        let (executor, adapter, mut registry) = setup();
        let gen = registry.register_generated(
            "thing",
            json!({"name": "Beta", "notes": "generated"}),
            "Beta".into(),
            0,
        );

        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({"table": "things", "filters": [{"field": "id", "op": "=", "value": gen}]}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.data[0]["name"], json!("Beta"));
        assert_eq!(outcome.data[0]["id"], json!("gen_thing_1"));
        assert_eq!(adapter.call_count("things", "select"), 0);
    }

    #[tokio::test]
    async fn create_promotes_gen_ref_by_source_field() {
        let (executor, _, mut registry) = setup();
        let gen = registry.register_generated("thing", json!({"name": "Beta"}), "Beta".into(), 0);

        let outcome = executor
            .execute_crud(
                CrudTool::DbCreate,
                json!({"table": "things", "data": {"name": "Beta", "_source_ref": gen}}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.data[0]["id"], json!("gen_thing_1"));
        assert!(!registry.is_pending("gen_thing_1"));
        assert_eq!(
            registry.action_of("gen_thing_1"),
            Some(alfred_domain::refs::ActionTag::Created)
        );
    }

    #[tokio::test]
    async fn create_expands_bare_gen_ref_record() {
        let (executor, adapter, mut registry) = setup();
        let gen = registry.register_generated(
            "thing",
            json!({"name": "Gamma", "notes": "rich"}),
            "Gamma".into(),
            0,
        );

        let outcome = executor
            .execute_crud(
                CrudTool::DbCreate,
                json!({"table": "things", "data": [gen]}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        // Row landed in the table with the artifact's content plus scoping.
        let rows = adapter.rows("things");
        let created = rows.iter().find(|r| r["name"] == json!("Gamma")).unwrap();
        assert_eq!(created["notes"], json!("rich"));
        assert_eq!(created["user_id"], json!(USER));
        assert_eq!(outcome.data[0]["id"], json!("gen_thing_1"));
    }

    #[tokio::test]
    async fn update_requires_filters() {
        let (executor, _, mut registry) = setup();
        let err = executor
            .execute_crud(
                CrudTool::DbUpdate,
                json!({"table": "things", "data": {"name": "X"}}),
                USER,
                &mut registry,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn update_translates_ref_filter_and_registers() {
        let (executor, adapter, mut registry) = setup();
        // Read first so thing_1 exists.
        executor
            .execute_crud(CrudTool::DbRead, json!({"table": "things"}), USER, &mut registry)
            .await
            .unwrap();

        let outcome = executor
            .execute_crud(
                CrudTool::DbUpdate,
                json!({
                    "table": "things",
                    "data": {"name": "Gamma"},
                    "filters": [{"field": "id", "op": "=", "value": "thing_1"}]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.data[0]["id"], json!("thing_1"));
        assert_eq!(adapter.rows("things")[0]["name"], json!("Gamma"));
        assert_eq!(
            registry.action_of("thing_1"),
            Some(alfred_domain::refs::ActionTag::Updated)
        );
        assert_eq!(registry.label_of("thing_1"), Some("Gamma"));
    }

    #[tokio::test]
    async fn unsafe_delete_on_user_owned_table() {
        let (executor, adapter, mut registry) = setup();
        let err = executor
            .execute_crud(
                CrudTool::DbDelete,
                json!({"table": "things", "filters": []}),
                USER,
                &mut registry,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeDelete { table } if table == "things"));
        assert_eq!(adapter.call_count("things", "delete"), 0);
    }

    #[tokio::test]
    async fn empty_delete_fails_everywhere() {
        let (executor, _, mut registry) = setup();
        let err = executor
            .execute_crud(
                CrudTool::DbDelete,
                json!({"table": "owners", "filters": []}),
                USER,
                &mut registry,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn delete_removes_ref_mapping() {
        let (executor, adapter, mut registry) = setup();
        executor
            .execute_crud(CrudTool::DbRead, json!({"table": "things"}), USER, &mut registry)
            .await
            .unwrap();
        assert!(registry.contains_ref("thing_1"));

        let outcome = executor
            .execute_crud(
                CrudTool::DbDelete,
                json!({
                    "table": "things",
                    "filters": [{"field": "id", "op": "=", "value": "thing_1"}]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.count, 1);
        assert!(!registry.contains_ref("thing_1"));
        assert!(adapter.rows("things").is_empty());
        // Counters never rewind.
        assert_eq!(registry.counter("thing"), 1);
    }

    #[tokio::test]
    async fn not_in_single_value_behaves_as_neq() {
        let (executor, adapter, mut registry) = setup();
        adapter.seed(
            "things",
            vec![
                json!({"id": UUID_A, "name": "Alpha", "user_id": USER}),
                json!({"id": "cccccccc-cccc-cccc-cccc-cccccccccccc", "name": "Beta", "user_id": USER}),
            ],
        );
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({
                    "table": "things",
                    "filters": [{"field": "name", "op": "not_in", "value": ["Alpha"]}]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.data[0]["name"], json!("Beta"));
    }

    #[tokio::test]
    async fn not_in_multi_value_is_a_noop() {
        let (executor, _, mut registry) = setup();
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({
                    "table": "things",
                    "filters": [{"field": "name", "op": "not_in", "value": ["Alpha", "Beta"]}]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        // The clause was dropped, so the seeded row still matches.
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn unknown_ref_in_filter_fails() {
        let (executor, _, mut registry) = setup();
        let err = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({
                    "table": "things",
                    "filters": [{"field": "id", "op": "=", "value": "thing_42"}]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownRef(_)));
    }

    #[tokio::test]
    async fn or_filters_reach_the_adapter() {
        let (executor, adapter, mut registry) = setup();
        adapter.seed(
            "things",
            vec![
                json!({"id": UUID_A, "name": "Alpha", "user_id": USER}),
                json!({"id": "cccccccc-cccc-cccc-cccc-cccccccccccc", "name": "Beta", "user_id": USER}),
                json!({"id": "dddddddd-dddd-dddd-dddd-dddddddddddd", "name": "Gamma", "user_id": USER}),
            ],
        );
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({
                    "table": "things",
                    "or_filters": [
                        {"field": "name", "op": "=", "value": "Alpha"},
                        {"field": "name", "op": "=", "value": "Gamma"}
                    ]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 2);
    }

    // ── Middleware dispatch ────────────────────────────────────────

    use alfred_domain::contract::{CrudMiddleware, ReadPreprocess};
    use alfred_domain::entity::{EntityDefinition, EntityIndex, SubdomainDefinition};
    use alfred_domain::contract::FkEnrichTarget;
    use std::collections::{HashMap, HashSet};

    /// Consumes `_semantic` clauses into a pre-filter id set, empties
    /// reads on the `empty` table, and dedups batches by name.
    struct ThingsMiddleware;

    #[async_trait::async_trait]
    impl CrudMiddleware for ThingsMiddleware {
        async fn pre_read(
            &self,
            table: &str,
            mut params: alfred_domain::filter::DbReadParams,
            _user_id: &str,
        ) -> alfred_domain::Result<ReadPreprocess> {
            if table == "empty" {
                let mut pre = ReadPreprocess::pass_through(params);
                pre.short_circuit_empty = true;
                return Ok(pre);
            }
            let had_semantic = params.filters.iter().any(FilterClause::is_semantic);
            params.filters.retain(|c| !c.is_semantic());
            let mut pre = ReadPreprocess::pass_through(params);
            if had_semantic {
                pre.pre_filter_ids = Some(vec![UUID_A.to_string()]);
            }
            Ok(pre)
        }

        fn deduplicate_batch(&self, _table: &str, records: Vec<Value>) -> Vec<Value> {
            let mut seen = HashSet::new();
            records
                .into_iter()
                .filter(|r| {
                    let name = r.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    seen.insert(name)
                })
                .collect()
        }
    }

    struct MiddlewareDomain {
        inner: alfred_testing::StubDomain,
        middleware: Arc<ThingsMiddleware>,
    }

    #[async_trait::async_trait]
    impl DomainConfig for MiddlewareDomain {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn entities(&self) -> &HashMap<String, EntityDefinition> {
            self.inner.entities()
        }
        fn subdomains(&self) -> &HashMap<String, SubdomainDefinition> {
            self.inner.subdomains()
        }
        fn entity_index(&self) -> &EntityIndex {
            self.inner.entity_index()
        }
        fn user_owned_tables(&self) -> &HashSet<String> {
            self.inner.user_owned_tables()
        }
        fn uuid_fields(&self) -> &HashSet<String> {
            self.inner.uuid_fields()
        }
        fn fk_enrich_map(&self) -> &HashMap<String, FkEnrichTarget> {
            self.inner.fk_enrich_map()
        }
        fn crud_middleware(&self) -> Option<Arc<dyn CrudMiddleware>> {
            Some(self.middleware.clone())
        }
        fn system_prompt(&self) -> String {
            self.inner.system_prompt()
        }
        async fn user_profile(&self, u: &str) -> alfred_domain::Result<String> {
            self.inner.user_profile(u).await
        }
        async fn domain_snapshot(&self, u: &str) -> alfred_domain::Result<String> {
            self.inner.domain_snapshot(u).await
        }
    }

    fn setup_with_middleware() -> (CrudExecutor, MemoryAdapter, SessionIdRegistry) {
        let adapter = MemoryAdapter::new();
        adapter.seed(
            "things",
            vec![
                json!({"id": UUID_A, "name": "Alpha", "user_id": USER}),
                json!({"id": "cccccccc-cccc-cccc-cccc-cccccccccccc", "name": "Beta", "user_id": USER}),
            ],
        );
        let domain = MiddlewareDomain {
            inner: alfred_testing::StubDomain::new(),
            middleware: Arc::new(ThingsMiddleware),
        };
        let executor = CrudExecutor::new(Arc::new(adapter.clone()), Arc::new(domain));
        let mut registry = SessionIdRegistry::new(1);
        registry.advance_turn();
        (executor, adapter, registry)
    }

    #[tokio::test]
    async fn middleware_short_circuit_skips_the_database() {
        let (executor, adapter, mut registry) = setup_with_middleware();
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({"table": "empty"}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 0);
        assert_eq!(adapter.call_count("empty", "select"), 0);
    }

    #[tokio::test]
    async fn semantic_clause_becomes_pre_filter_ids() {
        let (executor, _, mut registry) = setup_with_middleware();
        let outcome = executor
            .execute_crud(
                CrudTool::DbRead,
                json!({
                    "table": "things",
                    "filters": [{"field": "_semantic", "op": "similar", "value": "alpha-ish"}]
                }),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        // Only the row named by the middleware's id set came back.
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.data[0]["name"], json!("Alpha"));
    }

    #[tokio::test]
    async fn batch_dedup_drops_repeated_names() {
        let (executor, adapter, mut registry) = setup_with_middleware();
        let outcome = executor
            .execute_crud(
                CrudTool::DbCreate,
                json!({"table": "things", "data": [
                    {"name": "Gamma"}, {"name": "Gamma"}, {"name": "Delta"}
                ]}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 2);
        let names: Vec<_> = adapter
            .rows("things")
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(names.iter().filter(|n| *n == "Gamma").count(), 1);
    }

    #[tokio::test]
    async fn nul_bytes_are_stripped_from_payloads() {
        let (executor, adapter, mut registry) = setup();
        executor
            .execute_crud(
                CrudTool::DbCreate,
                json!({"table": "things", "data": {"name": "Be\u{0}ta"}}),
                USER,
                &mut registry,
            )
            .await
            .unwrap();
        let rows = adapter.rows("things");
        assert!(rows.iter().any(|r| r["name"] == json!("Beta")));
    }
}

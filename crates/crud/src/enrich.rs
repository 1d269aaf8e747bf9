//! Batched FK label enrichment.
//!
//! After a read, the registry's queue holds `linked` refs whose display
//! names are unknown. One lookup per table (fanned out concurrently)
//! resolves them, and `_{fk_field}_label` annotations are injected into
//! the output records alongside the refs. The annotations are read-only
//! hints for the LLM; they are never persisted.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{json, Value};

use alfred_db::DbAdapter;
use alfred_domain::contract::DomainConfig;
use alfred_domain::error::Result;
use alfred_domain::refs::is_ref;
use alfred_registry::SessionIdRegistry;

/// Resolve queued FK names and annotate `records` in place.
pub async fn enrich_fk_labels(
    adapter: &Arc<dyn DbAdapter>,
    domain: &Arc<dyn DomainConfig>,
    registry: &mut SessionIdRegistry,
    records: &mut [Value],
) -> Result<()> {
    let queue = registry.take_lazy_enrich_queue();

    if !queue.is_empty() {
        // Group pending lookups by table.
        let mut by_table: HashMap<String, (String, Vec<(String, String)>)> = HashMap::new();
        for (entity_ref, request) in queue {
            by_table
                .entry(request.table.clone())
                .or_insert_with(|| (request.name_column.clone(), Vec::new()))
                .1
                .push((entity_ref, request.uuid));
        }

        // One query per table, all tables in flight at once.
        let mut lookups = Vec::with_capacity(by_table.len());
        let mut shapes = Vec::with_capacity(by_table.len());
        for (table, (name_column, entries)) in by_table {
            let ids: Vec<Value> = entries.iter().map(|(_, uuid)| json!(uuid)).collect();
            let query = adapter
                .table(&table)
                .select(&format!("id,{name_column}"))
                .in_("id", ids);
            lookups.push(query.execute());
            shapes.push((name_column, entries));
        }

        let results = join_all(lookups).await;

        let mut labels: HashMap<String, String> = HashMap::new();
        for (result, (name_column, entries)) in results.into_iter().zip(shapes) {
            let rows = match result {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "FK enrichment lookup failed; labels stay placeholders");
                    continue;
                }
            };
            let by_uuid: HashMap<&str, &str> = rows
                .rows()
                .iter()
                .filter_map(|row| {
                    Some((
                        row.get("id")?.as_str()?,
                        row.get(&name_column)?.as_str()?,
                    ))
                })
                .collect();
            for (entity_ref, uuid) in entries {
                if let Some(name) = by_uuid.get(uuid.as_str()) {
                    labels.insert(entity_ref, name.to_string());
                }
            }
        }

        registry.apply_enrichment(&labels);
    }

    inject_labels(domain.as_ref(), registry, records);
    Ok(())
}

/// Add `_{field}_label` beside every enrichable FK ref whose label is
/// known. Placeholder labels (ref == label) are skipped.
fn inject_labels(domain: &dyn DomainConfig, registry: &SessionIdRegistry, records: &mut [Value]) {
    for record in records {
        let Some(map) = record.as_object_mut() else {
            continue;
        };
        let mut annotations = Vec::new();
        for field in domain.fk_enrich_map().keys() {
            let Some(entity_ref) = map.get(field).and_then(Value::as_str) else {
                continue;
            };
            if !is_ref(entity_ref) {
                continue;
            }
            if let Some(label) = registry.label_of(entity_ref) {
                if label != entity_ref {
                    annotations.push((format!("_{field}_label"), label.to_string()));
                }
            }
        }
        for (key, label) in annotations {
            map.insert(key, Value::String(label));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_testing::{MemoryAdapter, StubDomain};

    const UUID_A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
    const UUID_B: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";

    fn setup() -> (Arc<dyn DbAdapter>, Arc<dyn DomainConfig>, MemoryAdapter) {
        let adapter = MemoryAdapter::new();
        adapter.seed("owners", vec![json!({"id": UUID_B, "name": "Ann"})]);
        let handle: Arc<dyn DbAdapter> = Arc::new(adapter.clone());
        let domain: Arc<dyn DomainConfig> = Arc::new(StubDomain::new());
        (handle, domain, adapter)
    }

    #[tokio::test]
    async fn resolves_labels_and_annotates() {
        let (adapter, domain, raw) = setup();
        let mut registry = SessionIdRegistry::new(1);
        registry.advance_turn();

        let records = vec![json!({"id": UUID_A, "name": "Alpha", "owner_id": UUID_B})];
        let mut records = registry.translate_read_output(records, "things", domain.as_ref());

        enrich_fk_labels(&adapter, &domain, &mut registry, &mut records)
            .await
            .unwrap();

        assert_eq!(records[0]["owner_id"], json!("owner_1"));
        assert_eq!(records[0]["_owner_id_label"], json!("Ann"));
        assert_eq!(registry.label_of("owner_1"), Some("Ann"));
        assert_eq!(raw.call_count("owners", "select"), 1);
    }

    #[tokio::test]
    async fn second_pass_changes_nothing() {
        let (adapter, domain, raw) = setup();
        let mut registry = SessionIdRegistry::new(1);
        registry.advance_turn();

        let records = vec![json!({"id": UUID_A, "name": "Alpha", "owner_id": UUID_B})];
        let mut records = registry.translate_read_output(records, "things", domain.as_ref());

        enrich_fk_labels(&adapter, &domain, &mut registry, &mut records)
            .await
            .unwrap();
        let snapshot = records.clone();

        // Queue is empty now; a second pass only re-injects identical labels.
        enrich_fk_labels(&adapter, &domain, &mut registry, &mut records)
            .await
            .unwrap();
        assert_eq!(records, snapshot);
        assert_eq!(raw.call_count("owners", "select"), 1);
    }

    #[tokio::test]
    async fn unknown_owner_keeps_placeholder_without_annotation() {
        let (adapter, domain, _) = setup();
        let mut registry = SessionIdRegistry::new(1);
        registry.advance_turn();

        let missing = "dddddddd-dddd-dddd-dddd-dddddddddddd";
        let records = vec![json!({"id": UUID_A, "name": "Alpha", "owner_id": missing})];
        let mut records = registry.translate_read_output(records, "things", domain.as_ref());

        enrich_fk_labels(&adapter, &domain, &mut registry, &mut records)
            .await
            .unwrap();

        // Ref allocated, but no label annotation for the unresolvable row.
        assert_eq!(records[0]["owner_id"], json!("owner_1"));
        assert!(records[0].get("_owner_id_label").is_none());
    }
}

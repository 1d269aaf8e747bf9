//! Protocol-level translation between refs and UUIDs.
//!
//! Inputs from the LLM (filters, payloads) travel ref → UUID; outputs
//! from the database travel UUID → ref. The output guarantee is strict:
//! no UUID survives in translated records for the `id` column, for any
//! column in the domain's `uuid_fields` set, or for any UUID already
//! mapped in the registry.

use serde_json::Value;

use alfred_domain::contract::DomainConfig;
use alfred_domain::error::{Error, Result};
use alfred_domain::filter::FilterClause;
use alfred_domain::refs::{is_ref, is_uuid_shape, DetailLevel};

use crate::registry::{compute_label, SessionIdRegistry};

impl SessionIdRegistry {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Input translation (ref → UUID)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Rewrite ref-shaped filter values to their UUIDs. Raw UUIDs pass
    /// through; an unknown ref fails the call.
    pub fn translate_filters(&self, filters: &[FilterClause]) -> Result<Vec<FilterClause>> {
        filters
            .iter()
            .map(|clause| {
                Ok(FilterClause {
                    field: clause.field.clone(),
                    op: clause.op,
                    value: self.translate_in_value(&clause.value)?,
                })
            })
            .collect()
    }

    /// Rewrite ref-shaped values in a write payload to UUIDs.
    /// Additionally, empty strings in UUID columns become null.
    pub fn translate_payload(&self, data: &Value, domain: &dyn DomainConfig) -> Result<Value> {
        self.translate_payload_value(data, None, domain)
    }

    fn translate_payload_value(
        &self,
        value: &Value,
        field: Option<&str>,
        domain: &dyn DomainConfig,
    ) -> Result<Value> {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    out.insert(key.clone(), self.translate_payload_value(v, Some(key), domain)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.translate_payload_value(v, field, domain))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::String(s) => {
                if s.is_empty() {
                    if field.is_some_and(|f| domain.uuid_fields().contains(f)) {
                        return Ok(Value::Null);
                    }
                    return Ok(value.clone());
                }
                self.translate_in_value(value)
            }
            _ => Ok(value.clone()),
        }
    }

    /// Translate one scalar or array value, ref → UUID.
    fn translate_in_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) if is_ref(s) => match self.uuid_for(s) {
                Some(uuid) => Ok(Value::String(uuid.to_string())),
                None => Err(Error::UnknownRef(s.clone())),
            },
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.translate_in_value(v))
                    .collect::<Result<Vec<_>>>()?,
            )),
            _ => Ok(value.clone()),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Output translation (UUID → ref)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Rewrite a batch of read results: the `id` becomes this entity's
    /// ref, FK columns become refs (allocating `linked` refs and queuing
    /// name enrichment as needed), and nested relations are traversed.
    pub fn translate_read_output(
        &mut self,
        records: Vec<Value>,
        table: &str,
        domain: &dyn DomainConfig,
    ) -> Vec<Value> {
        records
            .into_iter()
            .map(|record| self.translate_record(record, table, domain))
            .collect()
    }

    fn translate_record(&mut self, mut record: Value, table: &str, domain: &dyn DomainConfig) -> Value {
        let Some(map) = record.as_object_mut() else {
            return record;
        };

        let type_name = domain
            .entity_index()
            .type_for_table(table)
            .map(str::to_string);
        let entity_def = domain.entities().get(table).cloned();

        // The row's own id.
        if let Some(type_name) = type_name.as_deref() {
            let uuid = map.get("id").and_then(Value::as_str).map(str::to_string);
            if let Some(uuid) = uuid.filter(|u| is_uuid_shape(u)) {
                let probe = Value::Object(map.clone());
                let label = compute_label(domain, &probe, type_name, "");
                let detail = self.detect_detail(&probe, type_name, entity_def.as_ref(), domain);
                let entity_ref = self.register_read(&uuid, type_name, label, detail);
                map.insert("id".into(), Value::String(entity_ref));
            }
        }

        // FK and UUID columns.
        let field_names: Vec<String> = map.keys().cloned().collect();
        for field in field_names {
            if field == "id" {
                continue;
            }
            let is_declared_fk = entity_def
                .as_ref()
                .is_some_and(|def| def.fk_fields.iter().any(|f| f == &field));
            let is_enrichable = domain.fk_enrich_map().contains_key(&field);
            let is_uuid_field = domain.uuid_fields().contains(&field);
            if !is_declared_fk && !is_enrichable && !is_uuid_field {
                continue;
            }

            let Some(uuid) = map.get(&field).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if !is_uuid_shape(&uuid) {
                continue;
            }

            let entity_ref = self.ref_or_link(&uuid, &field, domain);
            map.insert(field, Value::String(entity_ref));
        }

        // Nested relations.
        if let Some(def) = entity_def {
            for rel in &def.nested_relations {
                let Some(nested) = map.remove(rel) else {
                    continue;
                };
                let translated = match nested {
                    Value::Array(children) => Value::Array(
                        self.translate_read_output(children, rel, domain),
                    ),
                    child @ Value::Object(_) => self.translate_record(child, rel, domain),
                    other => other,
                };
                map.insert(rel.clone(), translated);
            }
        }

        record
    }

    /// The ref for a FK UUID, allocating a `linked` ref on first sight.
    fn ref_or_link(&mut self, uuid: &str, field: &str, domain: &dyn DomainConfig) -> String {
        if let Some(existing) = self.ref_for_uuid(uuid) {
            return existing.to_string();
        }

        match domain.fk_enrich_map().get(field) {
            Some(target) => {
                let type_name = domain
                    .entity_index()
                    .type_for_table(&target.table)
                    .map(str::to_string)
                    .unwrap_or_else(|| trimmed_field_type(field));
                self.register_linked(uuid, &type_name, &target.table, &target.name_column)
            }
            None => {
                // No enrichment target known; still never leak the UUID.
                self.register_linked_untracked(uuid, &trimmed_field_type(field))
            }
        }
    }

    fn detect_detail(
        &self,
        record: &Value,
        type_name: &str,
        entity_def: Option<&alfred_domain::entity::EntityDefinition>,
        domain: &dyn DomainConfig,
    ) -> Option<DetailLevel> {
        let detected = domain.detect_detail_level(type_name, record);
        match (detected, entity_def) {
            (Some(level), _) => Some(level),
            // Detail-tracked types always get an entry after a read.
            (None, Some(def)) if def.detail_tracking => Some(DetailLevel::Summary),
            _ => None,
        }
    }
}

/// `owner_id` → `owner`; fields without the suffix are used as-is.
fn trimmed_field_type(field: &str) -> String {
    field.strip_suffix("_id").unwrap_or(field).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_domain::contract::FkEnrichTarget;
    use alfred_domain::entity::{EntityDefinition, EntityIndex, SubdomainDefinition};
    use alfred_domain::filter::FilterOp;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    const UUID_A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
    const UUID_B: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";

    struct TestDomain {
        entities: HashMap<String, EntityDefinition>,
        subdomains: HashMap<String, SubdomainDefinition>,
        index: EntityIndex,
        user_owned: HashSet<String>,
        uuid_fields: HashSet<String>,
        fk_map: HashMap<String, FkEnrichTarget>,
    }

    impl TestDomain {
        fn new() -> Self {
            let mut entities = HashMap::new();
            entities.insert("things".to_string(), EntityDefinition::new("thing", "things"));
            entities.insert("owners".to_string(), EntityDefinition::new("owner", "owners"));
            let index = EntityIndex::build(&entities);
            let mut uuid_fields = HashSet::new();
            uuid_fields.insert("owner_id".to_string());
            uuid_fields.insert("parent_id".to_string());
            let mut fk_map = HashMap::new();
            fk_map.insert(
                "owner_id".to_string(),
                FkEnrichTarget {
                    table: "owners".into(),
                    name_column: "name".into(),
                },
            );
            Self {
                entities,
                subdomains: HashMap::new(),
                index,
                user_owned: HashSet::new(),
                uuid_fields,
                fk_map,
            }
        }
    }

    #[async_trait::async_trait]
    impl DomainConfig for TestDomain {
        fn name(&self) -> &str {
            "test"
        }
        fn entities(&self) -> &HashMap<String, EntityDefinition> {
            &self.entities
        }
        fn subdomains(&self) -> &HashMap<String, SubdomainDefinition> {
            &self.subdomains
        }
        fn entity_index(&self) -> &EntityIndex {
            &self.index
        }
        fn user_owned_tables(&self) -> &HashSet<String> {
            &self.user_owned
        }
        fn uuid_fields(&self) -> &HashSet<String> {
            &self.uuid_fields
        }
        fn fk_enrich_map(&self) -> &HashMap<String, FkEnrichTarget> {
            &self.fk_map
        }
        fn system_prompt(&self) -> String {
            String::new()
        }
        async fn user_profile(&self, _user_id: &str) -> alfred_domain::Result<String> {
            Ok(String::new())
        }
        async fn domain_snapshot(&self, _user_id: &str) -> alfred_domain::Result<String> {
            Ok(String::new())
        }
    }

    fn registry() -> SessionIdRegistry {
        let mut r = SessionIdRegistry::new(1);
        r.advance_turn();
        r
    }

    #[test]
    fn filters_translate_refs_to_uuids() {
        let mut reg = registry();
        reg.register_read(UUID_A, "thing", "Alpha".into(), None);

        let out = reg
            .translate_filters(&[FilterClause::eq("id", json!("thing_1"))])
            .unwrap();
        assert_eq!(out[0].value, json!(UUID_A));
    }

    #[test]
    fn filters_pass_raw_uuids_through() {
        let reg = registry();
        let out = reg
            .translate_filters(&[FilterClause::eq("id", json!(UUID_A))])
            .unwrap();
        assert_eq!(out[0].value, json!(UUID_A));
    }

    #[test]
    fn filters_fail_on_unknown_ref() {
        let reg = registry();
        let err = reg
            .translate_filters(&[FilterClause::eq("id", json!("thing_9"))])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownRef(r) if r == "thing_9"));
    }

    #[test]
    fn filters_translate_in_arrays_elementwise() {
        let mut reg = registry();
        reg.register_read(UUID_A, "thing", "Alpha".into(), None);
        let out = reg
            .translate_filters(&[FilterClause::new(
                "id",
                FilterOp::In,
                json!(["thing_1", UUID_B]),
            )])
            .unwrap();
        assert_eq!(out[0].value, json!([UUID_A, UUID_B]));
    }

    #[test]
    fn payload_translates_refs_and_nulls_empty_uuid_fields() {
        let domain = TestDomain::new();
        let mut reg = registry();
        reg.register_read(UUID_B, "owner", "Ann".into(), None);

        let payload = json!({
            "name": "Alpha",
            "owner_id": "owner_1",
            "parent_id": "",
            "note": ""
        });
        let out = reg.translate_payload(&payload, &domain).unwrap();
        assert_eq!(out["owner_id"], json!(UUID_B));
        assert_eq!(out["parent_id"], Value::Null);
        // Empty strings in non-UUID columns survive.
        assert_eq!(out["note"], json!(""));
    }

    #[test]
    fn read_output_rewrites_id_and_fk() {
        let domain = TestDomain::new();
        let mut reg = registry();

        let records = vec![json!({"id": UUID_A, "name": "Alpha", "owner_id": UUID_B})];
        let out = reg.translate_read_output(records, "things", &domain);

        assert_eq!(out[0]["id"], json!("thing_1"));
        assert_eq!(out[0]["owner_id"], json!("owner_1"));
        assert_eq!(reg.label_of("thing_1"), Some("Alpha"));
        // The FK was queued for enrichment.
        let queue = reg.take_lazy_enrich_queue();
        assert_eq!(queue["owner_1"].table, "owners");
        assert_eq!(queue["owner_1"].uuid, UUID_B);
    }

    #[test]
    fn read_output_reuses_known_fk_ref_without_queueing() {
        let domain = TestDomain::new();
        let mut reg = registry();
        reg.register_read(UUID_B, "owner", "Ann".into(), None);

        let records = vec![json!({"id": UUID_A, "name": "Alpha", "owner_id": UUID_B})];
        let out = reg.translate_read_output(records, "things", &domain);
        assert_eq!(out[0]["owner_id"], json!("owner_1"));
        assert!(reg.take_lazy_enrich_queue().is_empty());
    }

    #[test]
    fn no_uuid_survives_translation() {
        let domain = TestDomain::new();
        let mut reg = registry();

        let records = vec![json!({
            "id": UUID_A,
            "name": "Alpha",
            "owner_id": UUID_B,
            "parent_id": "cccccccc-cccc-cccc-cccc-cccccccccccc"
        })];
        let out = reg.translate_read_output(records, "things", &domain);
        let text = serde_json::to_string(&out).unwrap();
        assert!(!text.contains(UUID_A));
        assert!(!text.contains(UUID_B));
        assert!(!text.contains("cccccccc"));
    }

    #[test]
    fn same_uuid_reads_to_same_ref() {
        let domain = TestDomain::new();
        let mut reg = registry();
        let first = reg.translate_read_output(vec![json!({"id": UUID_A, "name": "A"})], "things", &domain);
        let second = reg.translate_read_output(vec![json!({"id": UUID_A, "name": "A"})], "things", &domain);
        assert_eq!(first[0]["id"], second[0]["id"]);
        assert_eq!(reg.counter("thing"), 1);
    }

    #[test]
    fn nested_relations_are_traversed() {
        let mut domain = TestDomain::new();
        domain
            .entities
            .get_mut("things")
            .unwrap()
            .nested_relations
            .push("owners".into());
        domain.index = EntityIndex::build(&domain.entities);

        let mut reg = registry();
        let records = vec![json!({
            "id": UUID_A,
            "name": "Alpha",
            "owners": [{"id": UUID_B, "name": "Ann"}]
        })];
        let out = reg.translate_read_output(records, "things", &domain);
        assert_eq!(out[0]["owners"][0]["id"], json!("owner_1"));
        assert_eq!(reg.label_of("owner_1"), Some("Ann"));
    }

    #[test]
    fn detail_tracked_type_gets_summary_entry_by_default() {
        let mut domain = TestDomain::new();
        domain.entities.get_mut("things").unwrap().detail_tracking = true;

        let mut reg = registry();
        reg.translate_read_output(vec![json!({"id": UUID_A, "name": "A"})], "things", &domain);
        let entry = reg.detail_of("thing_1").unwrap();
        assert_eq!(entry.level, DetailLevel::Summary);
    }
}

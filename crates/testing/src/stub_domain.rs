//! A minimal domain used across the engine's test suites.
//!
//! One user-owned `things` table (type `thing`), one `owners` table the
//! FK enricher resolves labels from, and a deterministic quick-read
//! formatter so quick-mode scenarios don't need an LLM.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use alfred_domain::contract::{DomainConfig, FkEnrichTarget, NodeKind};
use alfred_domain::entity::{EntityDefinition, EntityIndex, SubdomainDefinition};
use alfred_domain::error::Result;

pub struct StubDomain {
    entities: HashMap<String, EntityDefinition>,
    subdomains: HashMap<String, SubdomainDefinition>,
    index: EntityIndex,
    user_owned: HashSet<String>,
    uuid_fields: HashSet<String>,
    fk_map: HashMap<String, FkEnrichTarget>,
}

impl Default for StubDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDomain {
    pub fn new() -> Self {
        let mut entities = HashMap::new();
        let mut thing = EntityDefinition::new("thing", "things");
        thing.fk_fields = vec!["owner_id".into()];
        entities.insert("things".to_string(), thing);
        entities.insert(
            "owners".to_string(),
            EntityDefinition::new("owner", "owners"),
        );

        let mut subdomains = HashMap::new();
        subdomains.insert(
            "things".to_string(),
            SubdomainDefinition {
                name: "things".into(),
                primary_table: "things".into(),
                related_tables: vec!["owners".into()],
                description: "The user's things and who owns them.".into(),
            },
        );

        let index = EntityIndex::build(&entities);

        let mut user_owned = HashSet::new();
        user_owned.insert("things".to_string());

        let mut uuid_fields = HashSet::new();
        uuid_fields.insert("owner_id".to_string());
        uuid_fields.insert("user_id".to_string());

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
            subdomains,
            index,
            user_owned,
            uuid_fields,
            fk_map,
        }
    }
}

#[async_trait::async_trait]
impl DomainConfig for StubDomain {
    fn name(&self) -> &str {
        "stub"
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

    fn fallback_schemas(&self) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert(
            "things".to_string(),
            json!({
                "table": "things",
                "columns": {
                    "id": "uuid",
                    "name": "text",
                    "owner_id": "uuid",
                    "user_id": "uuid"
                }
            }),
        );
        m
    }

    fn system_prompt(&self) -> String {
        "You are Alfred, an assistant that manages the user's things.".into()
    }

    fn node_domain_context(&self, node: NodeKind) -> Option<String> {
        match node {
            NodeKind::Think => Some("Plan over the things subdomain.".into()),
            _ => None,
        }
    }

    async fn user_profile(&self, _user_id: &str) -> Result<String> {
        Ok("The user keeps a small collection of things.".into())
    }

    async fn domain_snapshot(&self, _user_id: &str) -> Result<String> {
        Ok("Tables: things, owners.".into())
    }

    async fn subdomain_guidance(&self, _user_id: &str, subdomain: &str) -> Result<Option<String>> {
        if subdomain == "things" {
            Ok(Some("Prefer showing names over ids.".into()))
        } else {
            Ok(None)
        }
    }

    fn format_quick_response(
        &self,
        subdomain: &str,
        _intent: &str,
        records: &[Value],
    ) -> Option<String> {
        if subdomain != "things" {
            return None;
        }
        if records.is_empty() {
            return Some("You don't have any things yet.".into());
        }
        let names: Vec<&str> = records
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str))
            .collect();
        Some(format!("You have: {}.", names.join(", ")))
    }

    fn strip_fields(&self) -> HashSet<String> {
        let mut s = HashSet::new();
        s.insert("user_id".to_string());
        s
    }

    fn priority_fields(&self, table: &str) -> Vec<String> {
        match table {
            "things" => vec!["name".into(), "owner_id".into()],
            _ => Vec::new(),
        }
    }

    fn quick_write_confirmation(&self, subdomain: &str, count: usize) -> Option<String> {
        if subdomain == "things" {
            Some(format!("Saved {count} thing(s)."))
        } else {
            None
        }
    }

    fn relevant_entity_types(&self, subdomain: &str) -> Vec<String> {
        if subdomain == "things" {
            vec!["thing".into(), "owner".into()]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_formatter_lists_names() {
        let domain = StubDomain::new();
        let records = vec![json!({"name": "Alpha"}), json!({"name": "Beta"})];
        let text = domain
            .format_quick_response("things", "list", &records)
            .unwrap();
        assert_eq!(text, "You have: Alpha, Beta.");
    }

    #[test]
    fn quick_formatter_declines_unknown_subdomain() {
        let domain = StubDomain::new();
        assert!(domain.format_quick_response("other", "list", &[]).is_none());
    }

    #[test]
    fn label_defaults_use_primary_field() {
        let domain = StubDomain::new();
        let label = domain.compute_entity_label(&json!({"name": "Alpha"}), "thing", "thing_1");
        assert_eq!(label, "Alpha");
        let label = domain.compute_entity_label(&json!({"title": "T"}), "thing", "thing_1");
        assert_eq!(label, "T");
        let label = domain.compute_entity_label(&json!({}), "thing", "thing_1");
        assert_eq!(label, "thing_1");
    }
}

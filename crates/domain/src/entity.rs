//! Entity and subdomain definitions supplied by the domain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Planning weight hint for Think.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    High,
    #[default]
    Medium,
    None,
}

/// Describes one domain entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Short string used as the ref prefix (`"recipe"` ⇒ `recipe_1`).
    pub type_name: String,
    /// Physical table name; unique across entities.
    pub table: String,
    /// Field used to compute human labels.
    #[serde(default = "default_primary_field")]
    pub primary_field: String,
    /// Foreign-key column names on this table, in order.
    #[serde(default)]
    pub fk_fields: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
    /// Fields consulted when computing a label.
    #[serde(default)]
    pub label_fields: Vec<String>,
    /// Related tables to auto-join on reads.
    #[serde(default)]
    pub nested_relations: Vec<String>,
    /// When true, reads of this type are classified summary vs full.
    #[serde(default)]
    pub detail_tracking: bool,
}

fn default_primary_field() -> String {
    "name".into()
}

impl EntityDefinition {
    /// Minimal definition: everything defaulted except the two names.
    pub fn new(type_name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: table.into(),
            primary_field: default_primary_field(),
            fk_fields: Vec::new(),
            complexity: Complexity::default(),
            label_fields: Vec::new(),
            nested_relations: Vec::new(),
            detail_tracking: false,
        }
    }
}

/// A subdomain groups tables for planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdomainDefinition {
    pub name: String,
    pub primary_table: String,
    #[serde(default)]
    pub related_tables: Vec<String>,
    /// Human text injected into planning prompts.
    #[serde(default)]
    pub description: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Derived index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `table → type_name` mapping and its inverse, derived once from the
/// domain's entity map and cached for the life of the domain handle.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    table_to_type: HashMap<String, String>,
    type_to_table: HashMap<String, String>,
}

impl EntityIndex {
    pub fn build(entities: &HashMap<String, EntityDefinition>) -> Self {
        let mut table_to_type = HashMap::with_capacity(entities.len());
        let mut type_to_table = HashMap::with_capacity(entities.len());
        for def in entities.values() {
            table_to_type.insert(def.table.clone(), def.type_name.clone());
            type_to_table.insert(def.type_name.clone(), def.table.clone());
        }
        Self {
            table_to_type,
            type_to_table,
        }
    }

    pub fn type_for_table(&self, table: &str) -> Option<&str> {
        self.table_to_type.get(table).map(String::as_str)
    }

    pub fn table_for_type(&self, type_name: &str) -> Option<&str> {
        self.type_to_table.get(type_name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entities() -> HashMap<String, EntityDefinition> {
        let mut m = HashMap::new();
        m.insert("recipes".into(), EntityDefinition::new("recipe", "recipes"));
        m.insert(
            "meal_plans".into(),
            EntityDefinition::new("meal_plan", "meal_plans"),
        );
        m
    }

    #[test]
    fn index_maps_both_directions() {
        let idx = EntityIndex::build(&sample_entities());
        assert_eq!(idx.type_for_table("recipes"), Some("recipe"));
        assert_eq!(idx.table_for_type("meal_plan"), Some("meal_plans"));
        assert_eq!(idx.type_for_table("unknown"), None);
    }

    #[test]
    fn definition_defaults() {
        let def = EntityDefinition::new("recipe", "recipes");
        assert_eq!(def.primary_field, "name");
        assert_eq!(def.complexity, Complexity::Medium);
        assert!(!def.detail_tracking);
    }

    #[test]
    fn definition_deserializes_with_defaults() {
        let def: EntityDefinition = serde_json::from_str(
            r#"{"type_name": "recipe", "table": "recipes", "detail_tracking": true}"#,
        )
        .unwrap();
        assert_eq!(def.primary_field, "name");
        assert!(def.detail_tracking);
        assert!(def.fk_fields.is_empty());
    }
}

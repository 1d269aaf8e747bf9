//! CRUD wire format: filter clauses and per-tool parameter shapes.
//!
//! These types are exactly what the LLM emits in `tool_call` decisions,
//! so every field is serde-tolerant: unknown operators fail loudly at
//! parse time, missing optional fields default.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The 14 filter operators the executor accepts.
///
/// `Similar` only appears under the pseudo-field `_semantic` and is
/// handled entirely by domain middleware, never by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "neq")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "ilike")]
    Ilike,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "similar")]
    Similar,
}

/// Pseudo-field whose clauses are consumed by middleware.
pub const SEMANTIC_FIELD: &str = "_semantic";

/// One filter condition. AND is implied between clauses in a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// True when this clause targets the semantic pseudo-field.
    pub fn is_semantic(&self) -> bool {
        self.field == SEMANTIC_FIELD
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool parameter shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sort direction for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbReadParams {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    /// OR'd clauses, serialized into the adapter's single-string form.
    #[serde(default)]
    pub or_filters: Vec<FilterClause>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_dir: OrderDir,
}

/// Create accepts one record or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCreateParams {
    pub table: String,
    pub data: Value,
}

impl DbCreateParams {
    /// Normalize `data` to a batch. A single object becomes a one-element
    /// batch; anything else is rejected upstream.
    pub fn records(&self) -> Vec<Value> {
        match &self.data {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbUpdateParams {
    pub table: String,
    pub data: Value,
    /// Update requires a non-empty filter list.
    #[serde(default)]
    pub filters: Vec<FilterClause>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbDeleteParams {
    pub table: String,
    /// Delete requires a non-empty filter list; on a user-owned table, at
    /// least one filter must remain after auto-scoping.
    #[serde(default)]
    pub filters: Vec<FilterClause>,
}

/// The four CRUD tools the Act node may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudTool {
    DbRead,
    DbCreate,
    DbUpdate,
    DbDelete,
}

impl CrudTool {
    pub fn as_str(self) -> &'static str {
        match self {
            CrudTool::DbRead => "db_read",
            CrudTool::DbCreate => "db_create",
            CrudTool::DbUpdate => "db_update",
            CrudTool::DbDelete => "db_delete",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, CrudTool::DbRead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operators_accept_symbol_and_word_forms() {
        let eq: FilterOp = serde_json::from_str("\"=\"").unwrap();
        assert_eq!(eq, FilterOp::Eq);
        let eq2: FilterOp = serde_json::from_str("\"eq\"").unwrap();
        assert_eq!(eq2, FilterOp::Eq);
        let neq: FilterOp = serde_json::from_str("\"neq\"").unwrap();
        assert_eq!(neq, FilterOp::Neq);
        let neq2: FilterOp = serde_json::from_str("\"!=\"").unwrap();
        assert_eq!(neq2, FilterOp::Neq);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let res: std::result::Result<FilterOp, _> = serde_json::from_str("\"between\"");
        assert!(res.is_err());
    }

    #[test]
    fn read_params_default_optionals() {
        let params: DbReadParams =
            serde_json::from_value(json!({"table": "things"})).unwrap();
        assert!(params.filters.is_empty());
        assert!(params.or_filters.is_empty());
        assert_eq!(params.order_dir, OrderDir::Asc);
        assert!(params.limit.is_none());
    }

    #[test]
    fn create_params_normalize_single_record_to_batch() {
        let single = DbCreateParams {
            table: "things".into(),
            data: json!({"name": "Beta"}),
        };
        assert_eq!(single.records().len(), 1);

        let batch = DbCreateParams {
            table: "things".into(),
            data: json!([{"name": "a"}, {"name": "b"}]),
        };
        assert_eq!(batch.records().len(), 2);
    }

    #[test]
    fn semantic_clause_detection() {
        let clause = FilterClause::new(SEMANTIC_FIELD, FilterOp::Similar, json!("thai food"));
        assert!(clause.is_semantic());
        assert!(!FilterClause::eq("name", json!("x")).is_semantic());
    }

    #[test]
    fn crud_tool_names() {
        assert_eq!(CrudTool::DbRead.as_str(), "db_read");
        assert!(CrudTool::DbDelete.is_write());
        assert!(!CrudTool::DbRead.is_write());
        let t: CrudTool = serde_json::from_str("\"db_update\"").unwrap();
        assert_eq!(t, CrudTool::DbUpdate);
    }
}

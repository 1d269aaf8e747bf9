//! The database adapter protocol.
//!
//! This is the ONLY database boundary in the engine. Row-level security,
//! pooling, and transactions are the adapter's concern; everything above
//! speaks the fluent [`QueryBuilder`] surface and nothing else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use alfred_domain::error::Result;
use alfred_domain::filter::{FilterClause, FilterOp, OrderDir};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What every executed query returns: a JSON array of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Value,
}

impl QueryResult {
    pub fn rows(&self) -> &[Value] {
        self.data.as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fluent query surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed fluent surface every adapter's query builder supports.
///
/// Builder methods consume and return the boxed builder so call chains
/// read the same over any backend:
///
/// ```ignore
/// adapter.table("recipes").select("*").eq("user_id", uid).limit(20).execute().await?
/// ```
#[async_trait::async_trait]
pub trait QueryBuilder: Send {
    fn select(self: Box<Self>, columns: &str) -> Box<dyn QueryBuilder>;
    fn insert(self: Box<Self>, records: Value) -> Box<dyn QueryBuilder>;
    fn update(self: Box<Self>, data: Value) -> Box<dyn QueryBuilder>;
    fn delete(self: Box<Self>) -> Box<dyn QueryBuilder>;

    fn eq(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn neq(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn gt(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn gte(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn lt(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn lte(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn in_(self: Box<Self>, column: &str, values: Vec<Value>) -> Box<dyn QueryBuilder>;
    /// `IS` check: value is `null` / `true` / `false`.
    fn is_(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    /// Negated `IS` check.
    fn not_(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    fn ilike(self: Box<Self>, column: &str, pattern: &str) -> Box<dyn QueryBuilder>;
    fn contains(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder>;
    /// OR-combined conditions in the adapter's single-string form
    /// (see [`encode_or`]).
    fn or_(self: Box<Self>, conditions: &str) -> Box<dyn QueryBuilder>;

    fn order(self: Box<Self>, column: &str, dir: OrderDir) -> Box<dyn QueryBuilder>;
    fn limit(self: Box<Self>, n: u32) -> Box<dyn QueryBuilder>;

    async fn execute(self: Box<Self>) -> Result<QueryResult>;
}

/// A pending RPC invocation.
#[async_trait::async_trait]
pub trait RpcCall: Send {
    async fn execute(self: Box<Self>) -> Result<QueryResult>;
}

/// The adapter itself.
pub trait DbAdapter: Send + Sync {
    fn table(&self, name: &str) -> Box<dyn QueryBuilder>;
    fn rpc(&self, name: &str, params: Value) -> Box<dyn RpcCall>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OR-string encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a list of clauses into the adapter's `or_(...)` form:
/// `field.op.value` joined with commas, e.g.
/// `name.ilike.%curry%,cuisine.eq.thai`.
///
/// Only the operators meaningful inside an OR group are encoded; clauses
/// with other operators are skipped with a warning.
pub fn encode_or(clauses: &[FilterClause]) -> String {
    let mut parts = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let op = match clause.op {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::Ilike => "ilike",
            FilterOp::Contains => "cs",
            FilterOp::IsNull => {
                parts.push(format!("{}.is.null", clause.field));
                continue;
            }
            other => {
                tracing::warn!(field = %clause.field, ?other, "operator not encodable in or-group; skipped");
                continue;
            }
        };
        parts.push(format!("{}.{op}.{}", clause.field, scalar_text(&clause.value)));
    }
    parts.join(",")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! In-memory database adapter.
//!
//! Backs the adapter protocol with `RwLock`-guarded JSON tables. Inserts
//! assign UUIDs, filters are evaluated in Rust, and every executed
//! operation is counted per `(table, op)` so scenario tests can assert
//! "the database was not touched".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use alfred_db::{DbAdapter, QueryBuilder, QueryResult, RpcCall};
use alfred_domain::error::{Error, Result};
use alfred_domain::filter::OrderDir;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Store {
    tables: HashMap<String, Vec<Value>>,
    call_counts: HashMap<(String, String), usize>,
    rpc_responses: HashMap<String, Value>,
}

/// In-memory [`DbAdapter`] for tests.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: Arc<RwLock<Store>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with rows.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.store.write().tables.insert(table.to_string(), rows);
    }

    /// Current rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.store
            .read()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times `op` ran against `table` (`select`, `insert`,
    /// `update`, `delete`, `rpc`).
    pub fn call_count(&self, table: &str, op: &str) -> usize {
        self.store
            .read()
            .call_counts
            .get(&(table.to_string(), op.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Register a canned RPC response.
    pub fn stub_rpc(&self, name: &str, response: Value) {
        self.store
            .write()
            .rpc_responses
            .insert(name.to_string(), response);
    }
}

impl DbAdapter for MemoryAdapter {
    fn table(&self, name: &str) -> Box<dyn QueryBuilder> {
        Box::new(MemoryQuery {
            store: self.store.clone(),
            table: name.to_string(),
            op: Op::Select,
            conditions: Vec::new(),
            or_groups: Vec::new(),
            order: None,
            limit: None,
            payload: Value::Null,
        })
    }

    fn rpc(&self, name: &str, params: Value) -> Box<dyn RpcCall> {
        Box::new(MemoryRpc {
            store: self.store.clone(),
            name: name.to_string(),
            _params: params,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Select,
    Insert,
    Update,
    Delete,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Select => "select",
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }
}

#[derive(Clone)]
enum Cond {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    Is(String, Value),
    NotIs(String, Value),
    Ilike(String, String),
    Contains(String, Value),
}

struct MemoryQuery {
    store: Arc<RwLock<Store>>,
    table: String,
    op: Op,
    conditions: Vec<Cond>,
    /// Each entry is one `or_(...)` string; a row matches an entry when
    /// any of its comma-separated `field.op.value` parts match.
    or_groups: Vec<String>,
    order: Option<(String, OrderDir)>,
    limit: Option<u32>,
    payload: Value,
}

impl MemoryQuery {
    fn push(mut self: Box<Self>, cond: Cond) -> Box<dyn QueryBuilder> {
        self.conditions.push(cond);
        self
    }

    fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|c| eval_cond(c, row))
            && self
                .or_groups
                .iter()
                .all(|group| eval_or_group(group, row))
    }
}

#[async_trait::async_trait]
impl QueryBuilder for MemoryQuery {
    fn select(self: Box<Self>, _columns: &str) -> Box<dyn QueryBuilder> {
        // Column projection is ignored; rows come back whole.
        self
    }

    fn insert(mut self: Box<Self>, records: Value) -> Box<dyn QueryBuilder> {
        self.op = Op::Insert;
        self.payload = records;
        self
    }

    fn update(mut self: Box<Self>, data: Value) -> Box<dyn QueryBuilder> {
        self.op = Op::Update;
        self.payload = data;
        self
    }

    fn delete(mut self: Box<Self>) -> Box<dyn QueryBuilder> {
        self.op = Op::Delete;
        self
    }

    fn eq(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Eq(column.to_string(), value))
    }
    fn neq(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Neq(column.to_string(), value))
    }
    fn gt(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Gt(column.to_string(), value))
    }
    fn gte(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Gte(column.to_string(), value))
    }
    fn lt(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Lt(column.to_string(), value))
    }
    fn lte(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Lte(column.to_string(), value))
    }
    fn in_(self: Box<Self>, column: &str, values: Vec<Value>) -> Box<dyn QueryBuilder> {
        self.push(Cond::In(column.to_string(), values))
    }
    fn is_(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Is(column.to_string(), value))
    }
    fn not_(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::NotIs(column.to_string(), value))
    }
    fn ilike(self: Box<Self>, column: &str, pattern: &str) -> Box<dyn QueryBuilder> {
        self.push(Cond::Ilike(column.to_string(), pattern.to_string()))
    }
    fn contains(self: Box<Self>, column: &str, value: Value) -> Box<dyn QueryBuilder> {
        self.push(Cond::Contains(column.to_string(), value))
    }
    fn or_(mut self: Box<Self>, conditions: &str) -> Box<dyn QueryBuilder> {
        self.or_groups.push(conditions.to_string());
        self
    }

    fn order(mut self: Box<Self>, column: &str, dir: OrderDir) -> Box<dyn QueryBuilder> {
        self.order = Some((column.to_string(), dir));
        self
    }

    fn limit(mut self: Box<Self>, n: u32) -> Box<dyn QueryBuilder> {
        self.limit = Some(n);
        self
    }

    async fn execute(self: Box<Self>) -> Result<QueryResult> {
        let mut store = self.store.write();
        *store
            .call_counts
            .entry((self.table.clone(), self.op.name().to_string()))
            .or_insert(0) += 1;

        match self.op {
            Op::Select => {
                let rows = store.tables.get(&self.table).cloned().unwrap_or_default();
                let mut matched: Vec<Value> =
                    rows.into_iter().filter(|r| self.matches(r)).collect();
                if let Some((col, dir)) = &self.order {
                    matched.sort_by(|a, b| {
                        let ord = compare(a.get(col), b.get(col));
                        match dir {
                            OrderDir::Asc => ord,
                            OrderDir::Desc => ord.reverse(),
                        }
                    });
                }
                if let Some(n) = self.limit {
                    matched.truncate(n as usize);
                }
                Ok(QueryResult {
                    data: Value::Array(matched),
                })
            }
            Op::Insert => {
                let records = match self.payload {
                    Value::Array(items) => items,
                    Value::Object(obj) => vec![Value::Object(obj)],
                    other => {
                        return Err(Error::AdapterFailure(format!(
                            "insert payload must be object or array, got {other}"
                        )))
                    }
                };
                let mut inserted = Vec::with_capacity(records.len());
                let table = store.tables.entry(self.table.clone()).or_default();
                for mut record in records {
                    if let Some(obj) = record.as_object_mut() {
                        if !obj.contains_key("id") {
                            obj.insert("id".into(), json!(uuid::Uuid::new_v4().to_string()));
                        }
                    }
                    table.push(record.clone());
                    inserted.push(record);
                }
                Ok(QueryResult {
                    data: Value::Array(inserted),
                })
            }
            Op::Update => {
                let patch = self
                    .payload
                    .as_object()
                    .cloned()
                    .ok_or_else(|| Error::AdapterFailure("update payload must be object".into()))?;
                let mut updated = Vec::new();
                // Collect matches against an immutable view first.
                let matches: Vec<usize> = store
                    .tables
                    .get(&self.table)
                    .map(|rows| {
                        rows.iter()
                            .enumerate()
                            .filter(|(_, r)| self.matches(r))
                            .map(|(i, _)| i)
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(rows) = store.tables.get_mut(&self.table) {
                    for i in matches {
                        if let Some(obj) = rows[i].as_object_mut() {
                            for (k, v) in &patch {
                                obj.insert(k.clone(), v.clone());
                            }
                        }
                        updated.push(rows[i].clone());
                    }
                }
                Ok(QueryResult {
                    data: Value::Array(updated),
                })
            }
            Op::Delete => {
                let mut removed = Vec::new();
                if let Some(rows) = store.tables.get_mut(&self.table) {
                    let mut kept = Vec::with_capacity(rows.len());
                    for row in rows.drain(..) {
                        if self.matches(&row) {
                            removed.push(row);
                        } else {
                            kept.push(row);
                        }
                    }
                    *rows = kept;
                }
                Ok(QueryResult {
                    data: Value::Array(removed),
                })
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RPC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MemoryRpc {
    store: Arc<RwLock<Store>>,
    name: String,
    _params: Value,
}

#[async_trait::async_trait]
impl RpcCall for MemoryRpc {
    async fn execute(self: Box<Self>) -> Result<QueryResult> {
        let mut store = self.store.write();
        *store
            .call_counts
            .entry((self.name.clone(), "rpc".to_string()))
            .or_insert(0) += 1;
        let data = store
            .rpc_responses
            .get(&self.name)
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        Ok(QueryResult { data })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Condition evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn eval_cond(cond: &Cond, row: &Value) -> bool {
    match cond {
        Cond::Eq(f, v) => row.get(f) == Some(v),
        Cond::Neq(f, v) => row.get(f) != Some(v),
        Cond::Gt(f, v) => compare(row.get(f), Some(v)) == std::cmp::Ordering::Greater,
        Cond::Gte(f, v) => compare(row.get(f), Some(v)) != std::cmp::Ordering::Less,
        Cond::Lt(f, v) => compare(row.get(f), Some(v)) == std::cmp::Ordering::Less,
        Cond::Lte(f, v) => compare(row.get(f), Some(v)) != std::cmp::Ordering::Greater,
        Cond::In(f, vs) => row.get(f).is_some_and(|rv| vs.contains(rv)),
        Cond::Is(f, v) => {
            let cell = row.get(f).unwrap_or(&Value::Null);
            cell == v
        }
        Cond::NotIs(f, v) => {
            let cell = row.get(f).unwrap_or(&Value::Null);
            cell != v
        }
        Cond::Ilike(f, pattern) => row
            .get(f)
            .and_then(Value::as_str)
            .is_some_and(|s| ilike(s, pattern)),
        Cond::Contains(f, v) => match row.get(f) {
            Some(Value::Array(items)) => items.contains(v),
            Some(Value::String(s)) => v.as_str().is_some_and(|needle| s.contains(needle)),
            _ => false,
        },
    }
}

/// Case-insensitive match with `%` wildcards at either end.
fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pat = pattern.to_lowercase();
    let starts = pat.starts_with('%');
    let ends = pat.ends_with('%');
    let core = pat.trim_matches('%');
    match (starts, ends) {
        (true, true) => text.contains(core),
        (true, false) => text.ends_with(core),
        (false, true) => text.starts_with(core),
        (false, false) => text == core,
    }
}

/// Evaluate one `or_(...)` group string: `field.op.value,...`.
fn eval_or_group(group: &str, row: &Value) -> bool {
    group.split(',').any(|part| {
        let mut pieces = part.splitn(3, '.');
        let (Some(field), Some(op), value) = (pieces.next(), pieces.next(), pieces.next()) else {
            return false;
        };
        let value = value.unwrap_or("");
        let cell = row.get(field);
        match op {
            "eq" => cell.is_some_and(|c| scalar_eq(c, value)),
            "neq" => !cell.is_some_and(|c| scalar_eq(c, value)),
            "ilike" => cell
                .and_then(Value::as_str)
                .is_some_and(|s| ilike(s, value)),
            "is" if value == "null" => cell.map_or(true, Value::is_null),
            "gt" => compare_scalar(cell, value) == Some(std::cmp::Ordering::Greater),
            "lt" => compare_scalar(cell, value) == Some(std::cmp::Ordering::Less),
            "gte" => matches!(
                compare_scalar(cell, value),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            "lte" => matches!(
                compare_scalar(cell, value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            "cs" => match cell {
                Some(Value::Array(items)) => items.iter().any(|i| scalar_eq(i, value)),
                Some(Value::String(s)) => s.contains(value),
                _ => false,
            },
            _ => false,
        }
    })
}

fn scalar_eq(cell: &Value, text: &str) -> bool {
    match cell {
        Value::String(s) => s == text,
        other => other.to_string() == text,
    }
}

fn compare_scalar(cell: Option<&Value>, text: &str) -> Option<std::cmp::Ordering> {
    let cell = cell?;
    if let (Some(a), Ok(b)) = (cell.as_f64(), text.parse::<f64>()) {
        return a.partial_cmp(&b);
    }
    cell.as_str().map(|s| s.cmp(text))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
            } else if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
                x.cmp(y)
            } else {
                std::cmp::Ordering::Equal
            }
        }
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryAdapter {
        let adapter = MemoryAdapter::new();
        adapter.seed(
            "things",
            vec![
                json!({"id": "a", "name": "Alpha", "servings": 2}),
                json!({"id": "b", "name": "Beta", "servings": 4}),
                json!({"id": "c", "name": "Gamma", "servings": 6}),
            ],
        );
        adapter
    }

    #[tokio::test]
    async fn select_with_eq_filter() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .select("*")
            .eq("name", json!("Beta"))
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.rows()[0]["id"], json!("b"));
        assert_eq!(adapter.call_count("things", "select"), 1);
    }

    #[tokio::test]
    async fn insert_assigns_uuid() {
        let adapter = MemoryAdapter::new();
        let result = adapter
            .table("things")
            .insert(json!({"name": "New"}))
            .execute()
            .await
            .unwrap();
        let id = result.rows()[0]["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(adapter.rows("things").len(), 1);
    }

    #[tokio::test]
    async fn update_patches_matching_rows() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .update(json!({"servings": 10}))
            .eq("id", json!("a"))
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.rows()[0]["servings"], json!(10));
        assert_eq!(adapter.rows("things")[0]["servings"], json!(10));
    }

    #[tokio::test]
    async fn delete_removes_and_returns_rows() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .delete()
            .gt("servings", json!(3))
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 2);
        assert_eq!(adapter.rows("things").len(), 1);
    }

    #[tokio::test]
    async fn ilike_is_case_insensitive() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .ilike("name", "%alph%")
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 1);
    }

    #[tokio::test]
    async fn or_group_matches_any_part() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .or_("name.eq.Alpha,name.eq.Gamma")
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 2);
    }

    #[tokio::test]
    async fn in_filter() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .in_("id", vec![json!("a"), json!("c")])
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 2);
    }

    #[tokio::test]
    async fn order_and_limit() {
        let adapter = seeded();
        let result = adapter
            .table("things")
            .order("servings", OrderDir::Desc)
            .limit(2)
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 2);
        assert_eq!(result.rows()[0]["name"], json!("Gamma"));
    }

    #[tokio::test]
    async fn rpc_returns_stub() {
        let adapter = MemoryAdapter::new();
        adapter.stub_rpc("match_embeddings", json!([{"id": "x"}]));
        let result = adapter
            .rpc("match_embeddings", json!({"q": [0.1]}))
            .execute()
            .await
            .unwrap();
        assert_eq!(result.rows().len(), 1);
        assert_eq!(adapter.call_count("match_embeddings", "rpc"), 1);
    }
}

//! In-memory wide-column store
//!
//! Interprets [`Statement`]s over insertion-ordered rows. Tables are
//! registered from a [`Schema`]; materialized views are re-keyed aliases of
//! a base table. Failures are reported with native protocol codes so they
//! travel through the same classifier as a real store's.
//!
//! Semantics kept from the real thing:
//! - INSERT and UPDATE are upserts; a null value deletes the cell
//! - A row created by INSERT survives with every regular column null; a
//!   row created only by UPDATE disappears once its cells are gone
//! - UPDATE must restrict every primary key column with `=` or `IN`
//! - DELETE may only restrict primary key columns
//! - Conditional writes answer with an `[applied]` row
//! - `USING TTL` expires rows (INSERT) or cells (UPDATE)

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{Driver, DriverError, ResultSet, Row, APPLIED};
use crate::error::codes;
use crate::query::filter::{compare_values, evaluate, matches, values_equal};
use crate::query::reconcile::{apply_delta, normalize_set};
use crate::query::{CompiledPredicate, MaterializedView, Statement, StatementKind};
use crate::schema::{FieldType, Schema};
use cqlq::{Assignment, Operator, SelectItem, SortOrder};

type Tables = HashMap<String, Table>;

#[derive(Debug, Clone)]
struct Table {
    schema: Schema,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Clone, Copy)]
struct CellMeta {
    writetime: i64,
    expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct StoredRow {
    cells: Map<String, Value>,
    meta: HashMap<String, CellMeta>,
    /// Set by INSERT; keeps the row alive without regular cells
    marker: Option<Option<i64>>,
}

impl StoredRow {
    fn write(&mut self, column: &str, value: Value, writetime: i64, expires_at: Option<i64>) {
        if value.is_null() {
            self.cells.remove(column);
            self.meta.remove(column);
        } else {
            self.cells.insert(column.to_string(), value);
            self.meta.insert(column.to_string(), CellMeta { writetime, expires_at });
        }
    }

    fn cell_live(&self, column: &str, now: i64) -> bool {
        self.meta
            .get(column)
            .map_or(true, |m| m.expires_at.map_or(true, |e| e > now))
    }

    /// Cells that have not expired
    fn visible(&self, now: i64) -> Row {
        self.cells
            .iter()
            .filter(|(column, _)| self.cell_live(column, now))
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect()
    }

    fn is_live(&self, key_columns: &[String], now: i64) -> bool {
        let marker = matches!(self.marker, Some(expires) if expires.map_or(true, |e| e > now));
        marker
            || self
                .cells
                .keys()
                .any(|c| !key_columns.contains(c) && self.cell_live(c, now))
    }

    fn has_key(&self, key_columns: &[String], key: &[Value]) -> bool {
        key_columns
            .iter()
            .zip(key)
            .all(|(c, v)| values_equal(self.cells.get(c).unwrap_or(&Value::Null), v))
    }
}

#[derive(Debug, Clone)]
struct ViewDef {
    base: String,
    keys: Vec<String>,
}

/// Process-local [`Driver`] with batch support
pub struct MemoryStore {
    tables: RwLock<Tables>,
    views: HashMap<String, ViewDef>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            views: HashMap::new(),
        }
    }

    /// Register the table described by `schema`
    pub fn with_schema(mut self, schema: &Schema) -> Self {
        self.tables.get_mut().insert(
            qualified(&schema.keyspace, &schema.table_name),
            Table {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        self
    }

    /// Register a materialized view over the table of `schema`
    pub fn with_view(mut self, schema: &Schema, view: &MaterializedView) -> Self {
        self.views.insert(
            qualified(&schema.keyspace, &view.view),
            ViewDef {
                base: qualified(&schema.keyspace, &schema.table_name),
                keys: view.keys.clone(),
            },
        );
        self
    }

    /// Number of live rows in a table
    pub async fn row_count(&self, keyspace: &str, table: &str) -> usize {
        let now = now_micros();
        self.tables
            .read()
            .await
            .get(&qualified(keyspace, table))
            .map(|t| {
                let keys = t.schema.key_columns();
                t.rows.iter().filter(|r| r.is_live(&keys, now)).count()
            })
            .unwrap_or(0)
    }

    fn select(&self, tables: &Tables, stmt: &Statement, now: i64) -> Result<ResultSet, DriverError> {
        let name = qualified(&stmt.keyspace, &stmt.table);
        let (table, view_keys) = match self.views.get(&name) {
            Some(view) => (
                tables.get(&view.base).ok_or_else(|| unconfigured(&view.base))?,
                Some(&view.keys),
            ),
            None => (tables.get(&name).ok_or_else(|| unconfigured(&name))?, None),
        };
        let schema = &table.schema;
        let key_columns = schema.key_columns();

        for cmp in stmt.predicate.where_clauses.iter() {
            check_column(schema, &cmp.column)?;
        }
        for item in stmt.select.iter().flatten() {
            match item {
                SelectItem::Column(c) | SelectItem::Ttl(c) | SelectItem::Writetime(c) => check_column(schema, c)?,
            }
        }

        let mut rows: Vec<(Row, &StoredRow)> = table
            .rows
            .iter()
            .filter(|r| r.is_live(&key_columns, now))
            .map(|r| (r.visible(now), r))
            .filter(|(visible, _)| {
                view_keys.map_or(true, |keys| keys.iter().all(|k| visible.get(k).map_or(false, |v| !v.is_null())))
            })
            .filter(|(visible, _)| matches(&stmt.predicate, visible))
            .collect();

        if stmt.kind == StatementKind::Count {
            let mut row = Row::new();
            row.insert("count".to_string(), Value::from(rows.len() as u64));
            return Ok(ResultSet::new(vec![row]));
        }

        if !stmt.order_by.is_empty() {
            rows.sort_by(|(a, _), (b, _)| {
                for key in &stmt.order_by {
                    let ord = compare_values(
                        a.get(&key.column).unwrap_or(&Value::Null),
                        b.get(&key.column).unwrap_or(&Value::Null),
                    );
                    if ord != std::cmp::Ordering::Equal {
                        return match key.order {
                            SortOrder::Asc => ord,
                            SortOrder::Desc => ord.reverse(),
                        };
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(per_partition) = stmt.per_partition_limit {
            let partition = schema.partition_columns();
            let mut seen: HashMap<String, usize> = HashMap::new();
            rows.retain(|(visible, _)| {
                let key: Vec<&Value> = partition.iter().map(|c| visible.get(c).unwrap_or(&Value::Null)).collect();
                let count = seen.entry(serde_json::to_string(&key).unwrap_or_default()).or_insert(0);
                *count += 1;
                *count <= per_partition
            });
        }

        if let Some(limit) = stmt.limit {
            rows.truncate(limit);
        }

        let rows = rows
            .into_iter()
            .map(|(visible, stored)| shape(schema, &key_columns, stored, visible, stmt.select.as_deref(), now))
            .collect();
        Ok(ResultSet::new(rows))
    }

    fn apply(&self, tables: &mut Tables, stmt: &Statement, now: i64) -> Result<ResultSet, DriverError> {
        let name = qualified(&stmt.keyspace, &stmt.table);
        if self.views.contains_key(&name) {
            return Err(DriverError::response(
                codes::INVALID,
                format!("Cannot directly modify a materialized view {}", name),
            ));
        }
        let table = tables.get_mut(&name).ok_or_else(|| unconfigured(&name))?;

        match stmt.kind {
            StatementKind::Insert => insert(table, stmt, now),
            StatementKind::Update => update(table, stmt, now),
            StatementKind::Delete => delete(table, stmt, now),
            StatementKind::Select | StatementKind::Count => Err(DriverError::response(
                codes::SYNTAX_ERROR,
                "Only INSERT, UPDATE and DELETE statements are allowed here",
            )),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStore {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let now = now_micros();
        if statement.is_write() {
            let mut tables = self.tables.write().await;
            self.apply(&mut tables, statement, now)
        } else {
            let tables = self.tables.read().await;
            self.select(&tables, statement, now)
        }
    }

    async fn batch(&self, statements: &[Statement]) -> Result<ResultSet, DriverError> {
        if statements.iter().any(|s| !s.is_write()) {
            return Err(DriverError::response(
                codes::INVALID,
                "Only INSERT, UPDATE and DELETE statements are allowed in a batch",
            ));
        }

        let now = now_micros();
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for statement in statements {
            let result = self.apply(&mut staged, statement, now)?;
            if !result.applied() {
                return Ok(result);
            }
        }
        *tables = staged;
        Ok(ResultSet::default())
    }

    fn supports_batch(&self) -> bool {
        true
    }
}

fn insert(table: &mut Table, stmt: &Statement, now: i64) -> Result<ResultSet, DriverError> {
    let schema = &table.schema;
    let key_columns = schema.key_columns();

    let mut values = Map::new();
    for assignment in &stmt.assignments {
        let Assignment::Set { column, value } = assignment else {
            return Err(DriverError::response(
                codes::SYNTAX_ERROR,
                "Collection operations are not allowed in INSERT",
            ));
        };
        check_column(schema, column)?;
        check_type(schema, column, value)?;
        values.insert(column.clone(), stored_value(schema, column, value));
    }

    let mut key = Vec::with_capacity(key_columns.len());
    for column in &key_columns {
        match values.get(column) {
            Some(v) if !v.is_null() => key.push(v.clone()),
            _ => {
                return Err(DriverError::response(
                    codes::INVALID,
                    format!("Missing mandatory PRIMARY KEY part {}", column),
                ))
            }
        }
    }

    let position = table
        .rows
        .iter()
        .position(|r| r.has_key(&key_columns, &key) && r.is_live(&key_columns, now));

    if stmt.predicate.if_not_exists {
        if let Some(i) = position {
            let mut row = applied_row(false);
            row.extend(table.rows[i].visible(now));
            return Ok(ResultSet::new(vec![row]));
        }
    }

    let writetime = stmt.timestamp.unwrap_or(now);
    let expires_at = expiry(stmt.ttl, now);

    let row = match position {
        Some(i) => &mut table.rows[i],
        None => {
            table.rows.retain(|r| !r.has_key(&key_columns, &key));
            table.rows.push(StoredRow::default());
            let last = table.rows.len() - 1;
            &mut table.rows[last]
        }
    };
    row.marker = Some(expires_at);
    for (column, value) in values {
        row.write(&column, value, writetime, expires_at);
    }

    Ok(if stmt.predicate.if_not_exists {
        ResultSet::new(vec![applied_row(true)])
    } else {
        ResultSet::default()
    })
}

fn update(table: &mut Table, stmt: &Statement, now: i64) -> Result<ResultSet, DriverError> {
    let schema = table.schema.clone();
    let key_columns = schema.key_columns();
    let predicate = &stmt.predicate;

    reject_non_key_restrictions(predicate, &key_columns)?;
    let keys = key_tuples(&schema, predicate, &key_columns)?;

    for assignment in &stmt.assignments {
        let column = assignment.column();
        check_column(&schema, column)?;
        if key_columns.iter().any(|k| k == column) {
            return Err(DriverError::response(
                codes::INVALID,
                format!("PRIMARY KEY part {} found in SET part", column),
            ));
        }
        match assignment {
            Assignment::Set { value, .. } => check_type(&schema, column, value)?,
            Assignment::Delta { .. } => {
                let supported = schema
                    .field_type(column)
                    .map_or(true, |t| t.is_collection() || *t == FieldType::Counter);
                if !supported {
                    return Err(DriverError::response(
                        codes::INVALID,
                        format!("Invalid operation on non collection, non counter column {}", column),
                    ));
                }
            }
        }
    }

    if predicate.is_conditional() {
        if keys.len() != 1 {
            return Err(DriverError::response(
                codes::INVALID,
                "IN on the primary key is not supported with conditional updates",
            ));
        }
        let current = current_row(table, &key_columns, &keys[0], now);
        if !conditions_hold(predicate, current.as_ref()) {
            return Ok(rejected(predicate, current));
        }
    }

    let writetime = stmt.timestamp.unwrap_or(now);
    let expires_at = expiry(stmt.ttl, now);

    for key in keys {
        let position = table.rows.iter().position(|r| r.has_key(&key_columns, &key));
        let row = match position {
            Some(i) => &mut table.rows[i],
            None => {
                let mut row = StoredRow::default();
                for (column, value) in key_columns.iter().zip(&key) {
                    row.write(column, value.clone(), writetime, None);
                }
                table.rows.push(row);
                let last = table.rows.len() - 1;
                &mut table.rows[last]
            }
        };

        for assignment in &stmt.assignments {
            match assignment {
                Assignment::Set { column, value } => {
                    row.write(column, stored_value(&schema, column, value), writetime, expires_at);
                }
                Assignment::Delta { column, op, value } => {
                    let field_type = schema.field_type(column).cloned().unwrap_or(FieldType::List);
                    let old = if row.cell_live(column, now) {
                        row.cells.get(column).cloned().unwrap_or(Value::Null)
                    } else {
                        Value::Null
                    };
                    row.write(column, apply_delta(&field_type, &old, *op, value), writetime, expires_at);
                }
            }
        }
    }

    Ok(if predicate.is_conditional() {
        ResultSet::new(vec![applied_row(true)])
    } else {
        ResultSet::default()
    })
}

fn delete(table: &mut Table, stmt: &Statement, now: i64) -> Result<ResultSet, DriverError> {
    let key_columns = table.schema.key_columns();
    let predicate = &stmt.predicate;

    reject_non_key_restrictions(predicate, &key_columns)?;
    // The partition must be named; clustering columns may narrow it down
    key_tuples(&table.schema, predicate, &table.schema.partition_columns())?;

    let targets: HashSet<usize> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_live(&key_columns, now) && matches(predicate, &r.visible(now)))
        .map(|(i, _)| i)
        .collect();

    if predicate.is_conditional() {
        let current = match targets.len() {
            1 => targets.iter().next().map(|i| table.rows[*i].visible(now)),
            _ => None,
        };
        if !conditions_hold(predicate, current.as_ref()) {
            return Ok(rejected(predicate, current));
        }
    }

    let mut index = 0;
    table.rows.retain(|_| {
        let keep = !targets.contains(&index);
        index += 1;
        keep
    });

    Ok(if predicate.is_conditional() {
        ResultSet::new(vec![applied_row(true)])
    } else {
        ResultSet::default()
    })
}

/// Every primary key combination named by `=`/`IN` restrictions on `columns`
fn key_tuples(schema: &Schema, predicate: &CompiledPredicate, columns: &[String]) -> Result<Vec<Vec<Value>>, DriverError> {
    let mut tuples: Vec<Vec<Value>> = vec![Vec::new()];

    for column in columns {
        let restriction = predicate
            .where_clauses
            .iter()
            .find(|c| &c.column == column && matches!(c.op, Operator::Eq | Operator::In));
        let candidates: Vec<Value> = match restriction.and_then(|c| c.operand.as_value().map(|v| (c.op, v))) {
            Some((Operator::In, Value::Array(items))) => items.clone(),
            Some((Operator::Eq, value)) if !value.is_null() => vec![value.clone()],
            _ => {
                return Err(DriverError::response(
                    codes::INVALID,
                    format!("Some primary key parts are missing: {}", column),
                ))
            }
        };

        let field_type = schema.field_type(column);
        tuples = tuples
            .into_iter()
            .flat_map(|prefix| {
                candidates.iter().map(move |candidate| {
                    let mut tuple = prefix.clone();
                    tuple.push(field_type.map_or_else(|| candidate.clone(), |t| t.coerce(candidate)));
                    tuple
                })
            })
            .collect();
    }

    Ok(tuples)
}

fn reject_non_key_restrictions(predicate: &CompiledPredicate, key_columns: &[String]) -> Result<(), DriverError> {
    if predicate.token.is_some() {
        return Err(DriverError::response(
            codes::INVALID,
            "Token restrictions are only allowed in SELECT",
        ));
    }
    match predicate
        .where_clauses
        .iter()
        .find(|c| !key_columns.contains(&c.column))
    {
        Some(c) => Err(DriverError::response(
            codes::INVALID,
            format!("Non PRIMARY KEY columns found in where clause: {}", c.column),
        )),
        None => Ok(()),
    }
}

fn current_row(table: &Table, key_columns: &[String], key: &[Value], now: i64) -> Option<Row> {
    table
        .rows
        .iter()
        .find(|r| r.has_key(key_columns, key) && r.is_live(key_columns, now))
        .map(|r| r.visible(now))
}

fn conditions_hold(predicate: &CompiledPredicate, current: Option<&Row>) -> bool {
    if predicate.if_not_exists {
        return current.is_none();
    }
    match current {
        None => false,
        Some(row) => predicate.conditions.iter().all(|c| evaluate(c, row)),
    }
}

/// `[applied] = false` plus the current values of the checked columns
fn rejected(predicate: &CompiledPredicate, current: Option<Row>) -> ResultSet {
    let mut row = applied_row(false);
    if let Some(current) = current {
        for cmp in &predicate.conditions {
            row.insert(
                cmp.column.clone(),
                current.get(&cmp.column).cloned().unwrap_or(Value::Null),
            );
        }
    }
    ResultSet::new(vec![row])
}

fn shape(
    schema: &Schema,
    key_columns: &[String],
    stored: &StoredRow,
    visible: Row,
    select: Option<&[SelectItem]>,
    now: i64,
) -> Row {
    let Some(items) = select.filter(|items| !items.is_empty()) else {
        let mut row = Row::new();
        for column in key_columns.iter().chain(schema.fields.keys()) {
            row.insert(column.clone(), Value::Null);
        }
        row.extend(visible);
        return row;
    };

    items
        .iter()
        .map(|item| {
            let value = match item {
                SelectItem::Column(c) => visible.get(c).cloned().unwrap_or(Value::Null),
                SelectItem::Ttl(c) => stored
                    .meta
                    .get(c)
                    .filter(|_| visible.contains_key(c))
                    .and_then(|m| m.expires_at)
                    .map(|e| Value::from((e - now) / 1_000_000))
                    .unwrap_or(Value::Null),
                SelectItem::Writetime(c) => stored
                    .meta
                    .get(c)
                    .filter(|_| visible.contains_key(c))
                    .map(|m| Value::from(m.writetime))
                    .unwrap_or(Value::Null),
            };
            (item.alias(), value)
        })
        .collect()
}

fn check_column(schema: &Schema, column: &str) -> Result<(), DriverError> {
    let known = schema.fields.is_empty()
        || schema.fields.contains_key(column)
        || schema.key_columns().iter().any(|k| k == column);
    if known {
        Ok(())
    } else {
        Err(DriverError::response(
            codes::INVALID,
            format!("Undefined column name {}", column),
        ))
    }
}

fn check_type(schema: &Schema, column: &str, value: &Value) -> Result<(), DriverError> {
    match schema.field_type(column) {
        Some(field_type) if !field_type.accepts(value) => Err(DriverError::TypeMismatch(format!(
            "Invalid value {} for column {} of type {}",
            value, column, field_type
        ))),
        _ => Ok(()),
    }
}

fn stored_value(schema: &Schema, column: &str, value: &Value) -> Value {
    match schema.field_type(column) {
        Some(FieldType::Set) => normalize_set(value),
        Some(FieldType::Map | FieldType::List | FieldType::Set) if is_empty_collection(value) => Value::Null,
        _ => value.clone(),
    }
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn applied_row(applied: bool) -> Row {
    let mut row = Row::new();
    row.insert(APPLIED.to_string(), Value::Bool(applied));
    row
}

fn expiry(ttl: Option<i64>, now: i64) -> Option<i64> {
    ttl.filter(|t| *t > 0).map(|t| now + t * 1_000_000)
}

fn unconfigured(name: &str) -> DriverError {
    DriverError::response(codes::INVALID, format!("unconfigured table {}", name))
}

fn qualified(keyspace: &str, table: &str) -> String {
    format!("{}.{}", keyspace, table)
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

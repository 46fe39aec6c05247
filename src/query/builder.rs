//! Statements handed to the driver
//!
//! A [`Statement`] is the structured form of one CQL statement. Drivers
//! may interpret it directly or render it with [`Statement::to_cql`],
//! which produces the statement text with `?` placeholders plus the bound
//! values in placeholder order.

use serde_json::{Map, Value};

use super::compiler::CompiledPredicate;
use cqlq::{Assignment, Comparison, DeltaOp, Operand, Operator, SelectItem, SortKey, SortOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Count,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub keyspace: String,
    pub table: String,
    /// Projection; `None` selects every column
    pub select: Option<Vec<SelectItem>>,
    pub predicate: CompiledPredicate,
    /// Column values of an INSERT, or the SET clause of an UPDATE
    pub assignments: Vec<Assignment>,
    pub order_by: Vec<SortKey>,
    pub limit: Option<usize>,
    pub per_partition_limit: Option<usize>,
    pub allow_filtering: bool,
    pub ttl: Option<i64>,
    pub timestamp: Option<i64>,
}

impl Statement {
    fn new(kind: StatementKind, keyspace: &str, table: &str) -> Self {
        Self {
            kind,
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            select: None,
            predicate: CompiledPredicate::default(),
            assignments: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            per_partition_limit: None,
            allow_filtering: false,
            ttl: None,
            timestamp: None,
        }
    }

    pub fn select(keyspace: &str, table: &str) -> Self {
        Self::new(StatementKind::Select, keyspace, table)
    }

    pub fn count(keyspace: &str, table: &str) -> Self {
        Self::new(StatementKind::Count, keyspace, table)
    }

    pub fn insert(keyspace: &str, table: &str, row: &Map<String, Value>) -> Self {
        let mut stmt = Self::new(StatementKind::Insert, keyspace, table);
        stmt.assignments = row
            .iter()
            .map(|(column, value)| Assignment::Set {
                column: column.clone(),
                value: value.clone(),
            })
            .collect();
        stmt
    }

    pub fn update(keyspace: &str, table: &str, assignments: Vec<Assignment>) -> Self {
        let mut stmt = Self::new(StatementKind::Update, keyspace, table);
        stmt.assignments = assignments;
        stmt
    }

    pub fn delete(keyspace: &str, table: &str) -> Self {
        Self::new(StatementKind::Delete, keyspace, table)
    }

    pub fn with_predicate(mut self, predicate: CompiledPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Read from a materialized view instead of the base table
    pub fn from_view(mut self, view: &str) -> Self {
        self.table = view.to_string();
        self
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, StatementKind::Insert | StatementKind::Update | StatementKind::Delete)
    }

    /// Render as CQL text with positional placeholders
    pub fn to_cql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let target = format!("{}.{}", quote(&self.keyspace), quote(&self.table));

        let cql = match self.kind {
            StatementKind::Select | StatementKind::Count => {
                let columns = match (&self.kind, &self.select) {
                    (StatementKind::Count, _) => "COUNT(*)".to_string(),
                    (_, Some(items)) if !items.is_empty() => {
                        items.iter().map(render_select_item).collect::<Vec<_>>().join(", ")
                    }
                    _ => "*".to_string(),
                };
                let mut cql = format!("SELECT {} FROM {}", columns, target);
                cql.push_str(&self.render_where(&mut params));
                if self.kind == StatementKind::Select {
                    if !self.order_by.is_empty() {
                        let order = self
                            .order_by
                            .iter()
                            .map(|k| {
                                let dir = match k.order {
                                    SortOrder::Asc => "ASC",
                                    SortOrder::Desc => "DESC",
                                };
                                format!("{} {}", quote(&k.column), dir)
                            })
                            .collect::<Vec<_>>()
                            .join(", ");
                        cql.push_str(&format!(" ORDER BY {}", order));
                    }
                    if let Some(n) = self.per_partition_limit {
                        cql.push_str(&format!(" PER PARTITION LIMIT {}", n));
                    }
                    if let Some(n) = self.limit {
                        cql.push_str(&format!(" LIMIT {}", n));
                    }
                }
                if self.allow_filtering {
                    cql.push_str(" ALLOW FILTERING");
                }
                cql
            }

            StatementKind::Insert => {
                let columns: Vec<String> = self.assignments.iter().map(|a| quote(a.column())).collect();
                for assignment in &self.assignments {
                    if let Assignment::Set { value, .. } = assignment {
                        params.push(value.clone());
                    }
                }
                let placeholders = vec!["?"; columns.len()].join(", ");
                let mut cql = format!("INSERT INTO {} ({}) VALUES ({})", target, columns.join(", "), placeholders);
                if self.predicate.if_not_exists {
                    cql.push_str(" IF NOT EXISTS");
                }
                cql.push_str(&self.render_using(&mut params));
                cql
            }

            StatementKind::Update => {
                let mut cql = format!("UPDATE {}", target);
                cql.push_str(&self.render_using(&mut params));
                let sets = self
                    .assignments
                    .iter()
                    .map(|a| render_assignment(a, &mut params))
                    .collect::<Vec<_>>()
                    .join(", ");
                cql.push_str(&format!(" SET {}", sets));
                cql.push_str(&self.render_where(&mut params));
                cql.push_str(&self.render_conditions(&mut params));
                cql
            }

            StatementKind::Delete => {
                let mut cql = format!("DELETE FROM {}", target);
                cql.push_str(&self.render_using(&mut params));
                cql.push_str(&self.render_where(&mut params));
                cql.push_str(&self.render_conditions(&mut params));
                cql
            }
        };

        (cql, params)
    }

    fn render_where(&self, params: &mut Vec<Value>) -> String {
        let mut parts: Vec<String> = self
            .predicate
            .where_clauses
            .iter()
            .map(|c| render_comparison(c, params))
            .collect();

        if let Some(token) = &self.predicate.token {
            let keys = token.keys.iter().map(|k| quote(k)).collect::<Vec<_>>().join(", ");
            let placeholders = vec!["?"; token.values.len()].join(", ");
            params.extend(token.values.iter().cloned());
            parts.push(format!("token({}) {} token({})", keys, token.op.symbol(), placeholders));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }

    fn render_conditions(&self, params: &mut Vec<Value>) -> String {
        if self.predicate.if_not_exists && self.kind != StatementKind::Insert {
            return " IF NOT EXISTS".to_string();
        }
        if self.predicate.if_exists {
            return " IF EXISTS".to_string();
        }
        if self.predicate.conditions.is_empty() {
            return String::new();
        }
        let conditions = self
            .predicate
            .conditions
            .iter()
            .map(|c| render_comparison(c, params))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(" IF {}", conditions)
    }

    fn render_using(&self, params: &mut Vec<Value>) -> String {
        let mut using = Vec::new();
        if let Some(ttl) = self.ttl {
            using.push("TTL ?");
            params.push(Value::from(ttl));
        }
        if let Some(ts) = self.timestamp {
            using.push("TIMESTAMP ?");
            params.push(Value::from(ts));
        }
        if using.is_empty() {
            String::new()
        } else {
            format!(" USING {}", using.join(" AND "))
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn render_select_item(item: &SelectItem) -> String {
    match item {
        SelectItem::Column(c) => quote(c),
        SelectItem::Ttl(c) => format!("TTL({}) AS {}", quote(c), quote(&item.alias())),
        SelectItem::Writetime(c) => format!("WRITETIME({}) AS {}", quote(c), quote(&item.alias())),
    }
}

fn render_comparison(cmp: &Comparison, params: &mut Vec<Value>) -> String {
    let column = quote(&cmp.column);
    match &cmp.operand {
        Operand::Value(Value::Null) if cmp.op == Operator::IsNot => format!("{} IS NOT NULL", column),
        Operand::Value(value) => {
            params.push(value.clone());
            format!("{} {} ?", column, cmp.op.symbol())
        }
        Operand::Function { func, arg } => {
            params.push(arg.clone());
            format!("{} {} {}(?)", column, cmp.op.symbol(), func.name())
        }
    }
}

fn render_assignment(assignment: &Assignment, params: &mut Vec<Value>) -> String {
    match assignment {
        Assignment::Set { column, value } => {
            params.push(value.clone());
            format!("{} = ?", quote(column))
        }
        Assignment::Delta { column, op, value } => {
            let column = quote(column);
            params.push(value.clone());
            match op {
                DeltaOp::Add | DeltaOp::Increment => format!("{} = {} + ?", column, column),
                DeltaOp::Remove | DeltaOp::Decrement => format!("{} = {} - ?", column, column),
            }
        }
    }
}

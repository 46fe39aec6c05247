//! Predicate compiler
//!
//! Folds parsed [`Clause`]s into a [`CompiledPredicate`]. The accumulator is
//! built fresh for every call and only turned into a statement by the
//! builder, so the compiler can be tested without a store.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::schema::{FieldType, Schema};
use cqlq::{Clause, Combinator, Comparison, ConditionalWrite, Operand, Operator, Query, TokenRange};

/// Server-side predicate injector selectable through `$filters`
pub type NamedFilter = Arc<dyn Fn(&mut CompiledPredicate) + Send + Sync>;

/// Everything a query object contributes to a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPredicate {
    /// WHERE restrictions, all conjoined
    pub where_clauses: Vec<Comparison>,
    /// IF conditions of a conditional write
    pub conditions: Vec<Comparison>,
    pub if_exists: bool,
    pub if_not_exists: bool,
    pub token: Option<TokenRange>,
}

impl CompiledPredicate {
    pub fn push_where(&mut self, comparison: Comparison) {
        self.where_clauses.push(comparison);
    }

    /// `column = value`
    pub fn where_eq(&mut self, column: impl Into<String>, value: Value) {
        self.push_where(Comparison::new(column, Operator::Eq, value));
    }

    /// Distinct columns restricted by the WHERE clause
    pub fn columns(&self) -> BTreeSet<String> {
        self.where_clauses.iter().map(|c| c.column.clone()).collect()
    }

    pub fn is_conditional(&self) -> bool {
        !self.conditions.is_empty() || self.if_exists || self.if_not_exists
    }
}

/// Compile a parsed query against `schema`
pub fn compile(query: &Query, schema: &Schema) -> CompiledPredicate {
    query
        .clauses
        .iter()
        .fold(CompiledPredicate::default(), |acc, clause| fold_clause(acc, clause, schema))
}

fn fold_clause(mut acc: CompiledPredicate, clause: &Clause, schema: &Schema) -> CompiledPredicate {
    match clause {
        Clause::Comparison(cmp) => acc.where_clauses.push(coerce_booleans(cmp, schema)),
        Clause::Combinator(Combinator::And(branches)) => {
            return branches
                .iter()
                .flatten()
                .fold(acc, |acc, clause| fold_clause(acc, clause, schema));
        }
        Clause::ConditionalWrite(ConditionalWrite::If(conditions)) => acc
            .conditions
            .extend(conditions.iter().map(|c| coerce_booleans(c, schema))),
        Clause::ConditionalWrite(ConditionalWrite::IfExists) => acc.if_exists = true,
        Clause::ConditionalWrite(ConditionalWrite::IfNotExists) => acc.if_not_exists = true,
        Clause::Token(range) => acc.token = Some(range.clone()),
    }
    acc
}

/// Apply the named filters in request order. Unknown names are ignored.
pub fn apply_filters(predicate: &mut CompiledPredicate, names: &[String], schema: &Schema) {
    for name in names {
        match schema.filters.get(name) {
            Some(filter) => filter(predicate),
            None => tracing::debug!(filter = %name, table = %schema.table_name, "no such named filter"),
        }
    }
}

fn coerce_booleans(cmp: &Comparison, schema: &Schema) -> Comparison {
    if schema.field_type(&cmp.column) != Some(&FieldType::Boolean) {
        return cmp.clone();
    }

    let operand = match &cmp.operand {
        Operand::Value(Value::String(s)) => Operand::Value(Value::Bool(string_to_bool(s))),
        Operand::Value(Value::Array(items)) => Operand::Value(Value::Array(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Value::Bool(string_to_bool(s)),
                    other => other.clone(),
                })
                .collect(),
        )),
        other => other.clone(),
    };

    Comparison {
        column: cmp.column.clone(),
        op: cmp.op,
        operand,
    }
}

fn string_to_bool(s: &str) -> bool {
    !matches!(s, "false" | "0" | "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use cqlq::ParseOptions;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new("test", "people", &["id"])
            .field("id", FieldDef::new(FieldType::Int))
            .field("age", FieldDef::new(FieldType::Int))
            .field("created", FieldDef::new(FieldType::Boolean))
            .filter("old", |p| p.where_eq("age", json!(32)))
    }

    fn compile_json(value: Value) -> CompiledPredicate {
        let query = cqlq::parse(value.as_object().unwrap(), &ParseOptions::default()).unwrap();
        compile(&query, &schema())
    }

    #[test]
    fn test_and_branches_flatten() {
        let p = compile_json(json!({"id": 1, "$and": [{"age": {"$gt": 2}}, {"age": {"$lt": 9}}]}));
        assert_eq!(p.where_clauses.len(), 3);
        assert_eq!(p.where_clauses[1], Comparison::new("age", Operator::Gt, json!(2)));
        assert_eq!(p.columns().into_iter().collect::<Vec<_>>(), vec!["age", "id"]);
    }

    #[test]
    fn test_boolean_strings_coerced() {
        for (raw, expected) in [("false", false), ("0", false), ("", false), ("yes", true), ("true", true)] {
            let p = compile_json(json!({ "created": raw }));
            assert_eq!(p.where_clauses[0].operand, Operand::Value(json!(expected)), "raw {:?}", raw);
        }
    }

    #[test]
    fn test_non_boolean_strings_untouched() {
        let p = compile_json(json!({"age": "0"}));
        assert_eq!(p.where_clauses[0].operand, Operand::Value(json!("0")));
    }

    #[test]
    fn test_conditional_parts() {
        let p = compile_json(json!({"id": 1, "$if": {"age": 3}, "$ifExists": true}));
        assert_eq!(p.conditions, vec![Comparison::new("age", Operator::Eq, json!(3))]);
        assert!(p.if_exists);
        assert!(p.is_conditional());
    }

    #[test]
    fn test_named_filters() {
        let mut p = compile_json(json!({}));
        apply_filters(&mut p, &["old".to_string(), "missing".to_string()], &schema());
        assert_eq!(p.where_clauses, vec![Comparison::new("age", Operator::Eq, json!(32))]);
    }

    #[test]
    fn test_compile_is_pure() {
        let query = cqlq::parse(json!({"id": 1}).as_object().unwrap(), &ParseOptions::default()).unwrap();
        assert_eq!(compile(&query, &schema()), compile(&query, &schema()));
    }
}

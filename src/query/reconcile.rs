//! Client-side reconciliation of collection deltas
//!
//! Writes do not return the merged value of a collection column, so after
//! an update the new logical value is computed from the old row and the
//! delta that was sent.

use serde_json::{Map, Value};

use super::filter::{compare_values, values_equal};
use crate::schema::{FieldType, Schema};
use cqlq::DeltaOp;

/// Fold the collection fields of `data` into `new`, using `old` as the
/// value before the write
pub fn reconcile(schema: &Schema, data: &Map<String, Value>, old: &Map<String, Value>, new: &mut Map<String, Value>) {
    for assignment in cqlq::parse_data(data) {
        let column = assignment.column().to_string();
        let Some(field_type) = schema.field_type(&column) else {
            continue;
        };

        match assignment {
            cqlq::Assignment::Delta { op, value, .. }
                if field_type.is_collection() || *field_type == FieldType::Counter =>
            {
                let previous = old.get(&column).unwrap_or(&Value::Null);
                new.insert(column, apply_delta(field_type, previous, op, &value));
            }
            cqlq::Assignment::Set { value, .. } if *field_type == FieldType::Set => {
                new.insert(column, normalize_set(&value));
            }
            _ => {}
        }
    }
}

/// The value of a collection column after applying `op operand` to `old`
pub fn apply_delta(field_type: &FieldType, old: &Value, op: DeltaOp, operand: &Value) -> Value {
    match (field_type, op) {
        (FieldType::Map, DeltaOp::Add) => {
            let mut merged = old.as_object().cloned().unwrap_or_default();
            if let Some(entries) = operand.as_object() {
                merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Value::Object(merged)
        }
        (FieldType::Map, DeltaOp::Remove) => {
            let mut remaining = old.as_object().cloned().unwrap_or_default();
            for key in as_list(operand) {
                if let Some(key) = key.as_str() {
                    remaining.remove(key);
                }
            }
            non_empty_object(remaining)
        }
        (FieldType::List, DeltaOp::Add) => {
            let mut items = old.as_array().cloned().unwrap_or_default();
            items.extend(as_list(operand));
            Value::Array(items)
        }
        (FieldType::Set, DeltaOp::Add) => {
            let mut items = old.as_array().cloned().unwrap_or_default();
            items.extend(as_list(operand));
            normalize_set(&Value::Array(items))
        }
        (FieldType::List | FieldType::Set, DeltaOp::Remove) => {
            let removed = as_list(operand);
            let items: Vec<Value> = old
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| !removed.iter().any(|r| values_equal(item, r)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            non_empty_array(items)
        }
        (FieldType::Counter, DeltaOp::Increment | DeltaOp::Decrement) => {
            let base = as_integer(old).unwrap_or(0);
            let step = as_integer(operand).unwrap_or(0);
            let total = if op == DeltaOp::Increment {
                base.checked_add(step)
            } else {
                base.checked_sub(step)
            };
            match total {
                Some(total) => i64::try_from(total)
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(total.to_string())),
                // Out of range even for the string form: keep what the store had
                None => old.clone(),
            }
        }
        _ => old.clone(),
    }
}

/// Deduplicate and sort a set value
pub fn normalize_set(value: &Value) -> Value {
    let Some(items) = value.as_array() else {
        return value.clone();
    };
    let mut items = items.clone();
    items.sort_by(compare_values);
    items.dedup_by(|a, b| values_equal(a, b));
    Value::Array(items)
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n.as_i64().map(i128::from),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_object(map: Map<String, Value>) -> Value {
    if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    }
}

fn non_empty_array(items: Vec<Value>) -> Value {
    if items.is_empty() {
        Value::Null
    } else {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new("test", "people", &["id"])
            .field("attrs", FieldDef::new(FieldType::Map))
            .field("history", FieldDef::new(FieldType::List))
            .field("tags", FieldDef::new(FieldType::Set))
            .field("visits", FieldDef::new(FieldType::Counter))
            .field("name", FieldDef::new(FieldType::Text))
    }

    fn run(old: Value, data: Value) -> Map<String, Value> {
        let mut new = Map::new();
        reconcile(&schema(), data.as_object().unwrap(), old.as_object().unwrap(), &mut new);
        new
    }

    #[test]
    fn test_map_remove() {
        let new = run(json!({"attrs": {"a": "b", "c": "d"}}), json!({"attrs": {"$remove": ["a", "z"]}}));
        assert_eq!(new["attrs"], json!({"c": "d"}));

        let new = run(json!({"attrs": {"a": "b", "c": "d"}}), json!({"attrs": {"$remove": ["a", "c"]}}));
        assert_eq!(new["attrs"], Value::Null);
    }

    #[test]
    fn test_map_add_merges() {
        let new = run(json!({"attrs": {"a": "b"}}), json!({"attrs": {"$add": {"a": "x", "c": "d"}}}));
        assert_eq!(new["attrs"], json!({"a": "x", "c": "d"}));
    }

    #[test]
    fn test_list_deltas() {
        let new = run(json!({"history": [1, 2]}), json!({"history": {"$add": [2, 3]}}));
        assert_eq!(new["history"], json!([1, 2, 2, 3]));

        let new = run(json!({"history": [1, 2, 1]}), json!({"history": {"$remove": [1]}}));
        assert_eq!(new["history"], json!([2]));

        let new = run(json!({"history": [1]}), json!({"history": {"$remove": [1]}}));
        assert_eq!(new["history"], Value::Null);
    }

    #[test]
    fn test_set_deltas_and_assignment() {
        let new = run(json!({"tags": ["b", "c"]}), json!({"tags": {"$add": ["a", "b"]}}));
        assert_eq!(new["tags"], json!(["a", "b", "c"]));

        let new = run(json!({"tags": ["a", "b"]}), json!({"tags": {"$remove": ["a", "b"]}}));
        assert_eq!(new["tags"], Value::Null);

        let new = run(json!({}), json!({"tags": ["z", "a", "z"]}));
        assert_eq!(new["tags"], json!(["a", "z"]));
    }

    #[test]
    fn test_counter() {
        let new = run(json!({"visits": 5}), json!({"visits": {"$increment": 2}}));
        assert_eq!(new["visits"], json!(7));

        let new = run(json!({"visits": "9223372036854775807"}), json!({"visits": {"$increment": 1}}));
        assert_eq!(new["visits"], json!("9223372036854775808"));

        let new = run(json!({}), json!({"visits": {"$decrement": 3}}));
        assert_eq!(new["visits"], json!(-3));
    }

    #[test]
    fn test_counter_overflow_keeps_old_value() {
        let max = i128::MAX.to_string();
        let new = run(json!({"visits": max.clone()}), json!({"visits": {"$increment": 1}}));
        assert_eq!(new["visits"], json!(max));

        let min = i128::MIN.to_string();
        let new = run(json!({"visits": min.clone()}), json!({"visits": {"$decrement": 1}}));
        assert_eq!(new["visits"], json!(min));
    }

    #[test]
    fn test_plain_fields_untouched() {
        let new = run(json!({"name": "a"}), json!({"name": "b"}));
        assert!(new.is_empty());
    }
}

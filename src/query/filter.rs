//! Predicate evaluation against a row
//!
//! Used by the in-memory store to interpret WHERE and IF clauses and by the
//! reconciler to order set elements.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::compiler::CompiledPredicate;
use cqlq::{Comparison, Operand, Operator, TimeuuidFn};

/// Whether `row` satisfies every WHERE restriction and the token range
pub fn matches(predicate: &CompiledPredicate, row: &Map<String, Value>) -> bool {
    predicate.where_clauses.iter().all(|c| evaluate(c, row))
        && predicate.token.as_ref().map_or(true, |range| {
            let keys: Vec<Value> = range
                .keys
                .iter()
                .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
                .collect();
            compare_op(token(&keys).cmp(&token(&range.values)), range.op)
        })
}

/// Evaluate a single comparison against a row
pub fn evaluate(cmp: &Comparison, row: &Map<String, Value>) -> bool {
    let value = row.get(&cmp.column).unwrap_or(&Value::Null);

    let operand = match &cmp.operand {
        Operand::Value(v) => v,
        Operand::Function { func, arg } => return evaluate_timeuuid(value, cmp.op, *func, arg),
    };

    match cmp.op {
        Operator::Eq => values_equal(value, operand),
        Operator::Ne => !values_equal(value, operand),
        Operator::IsNot => {
            if operand.is_null() {
                !value.is_null()
            } else {
                !values_equal(value, operand)
            }
        }
        Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
            !value.is_null() && !operand.is_null() && compare_op(compare_values(value, operand), cmp.op)
        }
        Operator::In => operand
            .as_array()
            .map(|items| items.iter().any(|item| values_equal(value, item)))
            .unwrap_or(false),
        Operator::NotIn => operand
            .as_array()
            .map(|items| !items.iter().any(|item| values_equal(value, item)))
            .unwrap_or(true),
        Operator::Like => match (value, operand) {
            (Value::String(s), Value::String(pattern)) => matches_pattern(s, pattern),
            _ => false,
        },
        Operator::Contains => match value {
            Value::Array(items) => items.iter().any(|item| values_equal(item, operand)),
            Value::Object(map) => map.values().any(|item| values_equal(item, operand)),
            _ => false,
        },
        Operator::ContainsKey => match (value, operand) {
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

fn compare_op(ord: Ordering, op: Operator) -> bool {
    match op {
        Operator::Eq => ord == Ordering::Equal,
        Operator::Ne | Operator::IsNot => ord != Ordering::Equal,
        Operator::Gt => ord == Ordering::Greater,
        Operator::Gte => ord != Ordering::Less,
        Operator::Lt => ord == Ordering::Less,
        Operator::Lte => ord != Ordering::Greater,
        _ => false,
    }
}

/// Equality that tolerates numbers travelling as strings
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .map(|(x, y)| x == y)
            .unwrap_or(false),
        _ => a == b,
    }
}

/// Total order over stored values: null first, then booleans, numbers,
/// strings, and everything else by its JSON text
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::Number(n), Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(y) => n.as_f64().and_then(|x| x.partial_cmp(&y)).unwrap_or(Ordering::Equal),
            Err(_) => Ordering::Less,
        },
        (Value::String(_), Value::Number(_)) => compare_values(b, a).reverse(),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// LIKE with `%` wildcards
fn matches_pattern(value: &str, pattern: &str) -> bool {
    let regex_pattern = regex::escape(pattern).replace('%', ".*");
    regex::Regex::new(&format!("^{}$", regex_pattern))
        .map(|r| r.is_match(value))
        .unwrap_or(false)
}

/// Stable partition token for a tuple of key values (64-bit FNV-1a)
pub fn token(values: &[Value]) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for value in values {
        for byte in value.to_string().bytes().chain(std::iter::once(0x1f)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash as i64
}

fn evaluate_timeuuid(value: &Value, op: Operator, func: TimeuuidFn, arg: &Value) -> bool {
    let (Some(stored), Some(bound)) = (timeuuid_millis(value), instant_millis(arg)) else {
        return false;
    };
    // minTimeuuid sorts before every uuid of its millisecond, maxTimeuuid after
    let ord = match stored.cmp(&bound) {
        Ordering::Equal if func == TimeuuidFn::MinTimeuuid => Ordering::Greater,
        Ordering::Equal => Ordering::Less,
        other => other,
    };
    compare_op(ord, op)
}

fn timeuuid_millis(value: &Value) -> Option<i64> {
    let uuid = uuid::Uuid::parse_str(value.as_str()?).ok()?;
    let (secs, nanos) = uuid.get_timestamp()?.to_unix();
    Some(secs as i64 * 1000 + i64::from(nanos / 1_000_000))
}

fn instant_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp_millis())
            }),
        _ => None,
    }
}

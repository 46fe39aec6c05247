//! Query-object parser
//!
//! Walks a JSON query object once, classifying every key through
//! [`classify_key`] and producing tagged [`Clause`]s plus [`Controls`].

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map},
    sequence::{delimited, tuple},
};
use serde_json::{Map, Value};

use crate::ast::*;
use crate::error::ParseError;

/// Knobs that change how unknown operator keys are treated
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Extra `$` keys accepted beyond the built-in set
    pub whitelist: Vec<String>,
}

impl ParseOptions {
    fn is_whitelisted(&self, key: &str) -> bool {
        self.whitelist.iter().any(|w| w == key)
    }
}

pub fn parse_query(query: &Map<String, Value>, options: &ParseOptions) -> Result<Query, ParseError> {
    let mut parsed = Query::default();

    for (key, value) in query {
        match classify_key(key) {
            KeyClass::Control(control) => apply_control(&mut parsed.controls, control, key, value)?,
            KeyClass::Unknown if options.is_whitelisted(key) => {
                parsed.controls.extra.insert(key.clone(), value.clone());
            }
            _ => parse_entry(key, value, options, &mut parsed.clauses)?,
        }
    }

    Ok(parsed)
}

/// Split a data object into plain assignments and collection deltas.
///
/// Only the first key of a nested object is inspected, so
/// `{"tags": {"$add": ["a"]}}` is a delta while `{"meta": {"a": 1}}` is a
/// plain map value.
pub fn parse_data(data: &Map<String, Value>) -> Vec<Assignment> {
    data.iter()
        .map(|(column, value)| {
            let delta = value
                .as_object()
                .and_then(|obj| obj.iter().next())
                .and_then(|(k, v)| DeltaOp::from_key(k).map(|op| (op, v)));

            match delta {
                Some((op, v)) => Assignment::Delta {
                    column: column.clone(),
                    op,
                    value: v.clone(),
                },
                None => Assignment::Set {
                    column: column.clone(),
                    value: value.clone(),
                },
            }
        })
        .collect()
}

fn parse_entry(
    key: &str,
    value: &Value,
    options: &ParseOptions,
    out: &mut Vec<Clause>,
) -> Result<(), ParseError> {
    match classify_key(key) {
        KeyClass::Column => parse_column(key, value, options, out),

        KeyClass::And => {
            let conditions = value
                .as_array()
                .ok_or_else(|| ParseError::invalid_value(key, "expected an array of query objects"))?;
            let mut branches = Vec::with_capacity(conditions.len());
            for condition in conditions {
                let obj = condition
                    .as_object()
                    .ok_or_else(|| ParseError::invalid_value(key, "expected an array of query objects"))?;
                let mut branch = Vec::new();
                for (k, v) in obj {
                    parse_entry(k, v, options, &mut branch)?;
                }
                branches.push(branch);
            }
            out.push(Clause::Combinator(Combinator::And(branches)));
            Ok(())
        }

        KeyClass::Or => Err(ParseError::Unsupported("$or".into())),
        KeyClass::Comparison(Operator::NotIn) => Err(ParseError::Unsupported("$nin".into())),

        KeyClass::If => {
            let obj = value
                .as_object()
                .ok_or_else(|| ParseError::invalid_value(key, "expected an object of conditions"))?;
            let mut conditions = Vec::new();
            for (column, v) in obj {
                if classify_key(column) != KeyClass::Column {
                    return Err(ParseError::InvalidParameter(column.clone()));
                }
                let mut nested = Vec::new();
                parse_column(column, v, options, &mut nested)?;
                conditions.extend(nested.into_iter().filter_map(|c| match c {
                    Clause::Comparison(cmp) => Some(cmp),
                    _ => None,
                }));
            }
            out.push(Clause::ConditionalWrite(ConditionalWrite::If(conditions)));
            Ok(())
        }

        KeyClass::IfExists => {
            if truthy(value) {
                out.push(Clause::ConditionalWrite(ConditionalWrite::IfExists));
            }
            Ok(())
        }

        KeyClass::IfNotExists => {
            if truthy(value) {
                out.push(Clause::ConditionalWrite(ConditionalWrite::IfNotExists));
            }
            Ok(())
        }

        KeyClass::Token => {
            out.push(Clause::Token(parse_token(value)?));
            Ok(())
        }

        KeyClass::Control(_) => {
            tracing::warn!(key, "control key ignored inside a nested query object");
            Ok(())
        }

        KeyClass::Unknown => {
            tracing::warn!(key, "dropping unrecognised query operator");
            Ok(())
        }

        KeyClass::Comparison(_)
        | KeyClass::CollectionDelta(_)
        | KeyClass::TokenKeys
        | KeyClass::TokenCondition
        | KeyClass::Function(_) => Err(ParseError::InvalidParameter(key.to_string())),
    }
}

/// Parse `column: value` or `column: {op: value, ...}`
fn parse_column(
    column: &str,
    value: &Value,
    options: &ParseOptions,
    out: &mut Vec<Clause>,
) -> Result<(), ParseError> {
    let obj = match value.as_object() {
        Some(obj) if obj.keys().any(|k| k.starts_with(OPERATOR_MARKER)) => obj,
        _ => {
            out.push(Clause::Comparison(Comparison {
                column: column.to_string(),
                op: Operator::Eq,
                operand: operand(value),
            }));
            return Ok(());
        }
    };

    // A lone timeuuid function is an operand, not an operator list
    if obj.len() == 1 {
        if let Some((k, _)) = obj.iter().next() {
            if matches!(classify_key(k), KeyClass::Function(_)) {
                out.push(Clause::Comparison(Comparison {
                    column: column.to_string(),
                    op: Operator::Eq,
                    operand: operand(value),
                }));
                return Ok(());
            }
        }
    }

    for (k, v) in obj {
        match classify_key(k) {
            KeyClass::Comparison(Operator::NotIn) => return Err(ParseError::Unsupported("$nin".into())),
            KeyClass::Or => return Err(ParseError::Unsupported("$or".into())),
            KeyClass::Comparison(op) => {
                let rhs = if op == Operator::In && !v.is_array() {
                    Operand::Value(Value::Array(vec![null_literal(v)]))
                } else {
                    operand(v)
                };
                out.push(Clause::Comparison(Comparison {
                    column: column.to_string(),
                    op,
                    operand: rhs,
                }));
            }
            KeyClass::Unknown if options.is_whitelisted(k) => {
                tracing::debug!(column, key = %k, "whitelisted operator has no predicate form");
            }
            KeyClass::Unknown | KeyClass::Column => {
                tracing::warn!(column, key = %k, "dropping unrecognised field operator");
            }
            _ => return Err(ParseError::InvalidParameter(k.clone())),
        }
    }

    Ok(())
}

fn parse_token(value: &Value) -> Result<TokenRange, ParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::invalid_value("$token", "expected {$keys, $condition}"))?;

    let keys = obj
        .get("$keys")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::invalid_value("$token", "missing $keys array"))?
        .iter()
        .map(|k| {
            k.as_str()
                .map(str::to_string)
                .ok_or_else(|| ParseError::invalid_value("$keys", "expected column names"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (op_key, operand) = obj
        .get("$condition")
        .and_then(Value::as_object)
        .and_then(|c| c.iter().next())
        .ok_or_else(|| ParseError::invalid_value("$token", "missing $condition object"))?;

    let op = match classify_key(op_key) {
        KeyClass::Comparison(Operator::NotIn) => return Err(ParseError::Unsupported("$nin".into())),
        KeyClass::Comparison(op) => op,
        _ => return Err(ParseError::InvalidParameter(op_key.clone())),
    };

    let values = match operand {
        Value::Array(values) => values.iter().map(null_literal).collect(),
        other => vec![null_literal(other)],
    };

    if values.len() != keys.len() {
        return Err(ParseError::invalid_value("$condition", "needs one value per token key"));
    }

    Ok(TokenRange { keys, op, values })
}

fn operand(value: &Value) -> Operand {
    if let Some(obj) = value.as_object() {
        if let Some((k, arg)) = obj.iter().next() {
            if let Some(func) = TimeuuidFn::from_key(k) {
                return Operand::Function {
                    func,
                    arg: arg.clone(),
                };
            }
        }
    }
    Operand::Value(null_literal(value))
}

/// String transports cannot carry null; `"null"` stands in for it
fn null_literal(value: &Value) -> Value {
    match value {
        Value::String(s) if s == "null" => Value::Null,
        Value::Array(items) => Value::Array(items.iter().map(null_literal).collect()),
        other => other.clone(),
    }
}

/// Truthiness for flags that may arrive query-string encoded
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn apply_control(
    controls: &mut Controls,
    control: ControlKey,
    key: &str,
    value: &Value,
) -> Result<(), ParseError> {
    match control {
        ControlKey::Select => {
            let items = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .ok_or_else(|| ParseError::invalid_value(key, "expected column names"))
                            .and_then(parse_select_item)
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Value::String(s) => s
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(parse_select_item)
                    .collect::<Result<Vec<_>, _>>()?,
                _ => return Err(ParseError::invalid_value(key, "expected column names")),
            };
            controls.select = Some(items);
        }
        ControlKey::Sort => {
            let obj = value
                .as_object()
                .ok_or_else(|| ParseError::invalid_value(key, "expected {column: 1 | -1}"))?;
            controls.sort = obj
                .iter()
                .map(|(column, dir)| {
                    let asc = match dir {
                        Value::Number(n) => n.as_i64() == Some(1),
                        Value::String(s) => s.trim() == "1",
                        _ => false,
                    };
                    SortKey {
                        column: column.clone(),
                        order: if asc { SortOrder::Asc } else { SortOrder::Desc },
                    }
                })
                .collect();
        }
        ControlKey::Limit => controls.limit = Some(as_count(key, value)?),
        ControlKey::Skip => controls.skip = Some(as_count(key, value)?),
        ControlKey::LimitPerPartition => controls.limit_per_partition = Some(as_count(key, value)?),
        ControlKey::AllowFiltering => controls.allow_filtering = truthy(value),
        ControlKey::NoSelect => controls.no_select = truthy(value),
        ControlKey::Batch => controls.batch = truthy(value),
        ControlKey::Filters => {
            let names: Vec<String> = match value {
                Value::String(s) => s.split(',').map(str::to_string).collect(),
                Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
                _ => return Err(ParseError::invalid_value(key, "expected a comma-separated list")),
            };
            controls.filters = names
                .iter()
                .map(|n| sanitize_filter_name(n))
                .filter(|n| !n.is_empty())
                .collect();
        }
        ControlKey::Ttl => controls.ttl = as_integer(value),
        ControlKey::Timestamp => controls.timestamp = as_integer(value),
    }
    Ok(())
}

fn sanitize_filter_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_count(key: &str, value: &Value) -> Result<usize, ParseError> {
    match as_integer(value) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(ParseError::invalid_value(key, "expected a non-negative integer")),
    }
}

// ============================================================================
// $select items
// ============================================================================

/// Parse `name`, `ttl(name)` or `writetime(name)`
pub fn parse_select_item(input: &str) -> Result<SelectItem, ParseError> {
    all_consuming(delimited(multispace0, select_item, multispace0))(input)
        .map(|(_, item)| item)
        .map_err(|_| ParseError::InvalidSelect(input.to_string()))
}

fn select_item(input: &str) -> IResult<&str, SelectItem> {
    alt((
        map(ttl_call, SelectItem::Ttl),
        map(writetime_call, SelectItem::Writetime),
        map(identifier, |s| SelectItem::Column(s.to_string())),
    ))(input)
}

fn ttl_call(input: &str) -> IResult<&str, String> {
    function_call("ttl", input)
}

fn writetime_call(input: &str) -> IResult<&str, String> {
    function_call("writetime", input)
}

fn function_call<'a>(name: &'static str, input: &'a str) -> IResult<&'a str, String> {
    let (input, (_, _, _, _, column, _, _)) = tuple((
        tag_no_case(name),
        multispace0,
        char('('),
        multispace0,
        identifier,
        multispace0,
        char(')'),
    ))(input)?;
    Ok((input, column.to_string()))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

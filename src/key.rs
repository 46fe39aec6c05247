//! Composite primary key codec
//!
//! A record identifier reaches the service as a single value. For tables
//! with a composite key it is decoded into one value per key column:
//!
//! 1. An object is projected through the key columns
//! 2. An array is used positionally
//! 3. `"[1,2,3]"` is parsed as a JSON array
//! 4. `"{\"a\":1,\"b\":2}"` is parsed as a JSON object, values in its own key order
//! 5. `"1,2,3"` is split on the configured separator
//!
//! Anything else is rejected.

use serde_json::{Map, Value};

use crate::schema::{IdField, Schema};
use crate::{Error, Result};

const INCOMPLETE_ID: &str = "When using composite primary key, id must contain values for all primary keys";

fn incomplete() -> Error {
    Error::BadRequest(INCOMPLETE_ID.to_string())
}

/// Decode `id` into one value per entry of `columns`, untyped.
pub fn decode(id: &Value, columns: &[String], separator: &str) -> Result<Vec<Value>> {
    let parts = match id {
        Value::Object(obj) => columns
            .iter()
            .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
            .collect(),
        Value::Array(items) => items.clone(),
        Value::String(s) if s.starts_with('[') && s.ends_with(']') => match serde_json::from_str::<Value>(s)? {
            Value::Array(items) => items,
            _ => return Err(incomplete()),
        },
        Value::String(s) if s.starts_with('{') && s.ends_with('}') => {
            let obj: Map<String, Value> = serde_json::from_str(s)?;
            obj.into_iter().map(|(_, v)| v).collect()
        }
        Value::String(s) if !separator.is_empty() && s.contains(separator) => {
            s.split(separator).map(|p| Value::String(p.to_string())).collect()
        }
        _ => return Err(incomplete()),
    };

    Ok(parts)
}

/// Decode `id` for `schema`, coercing each part to its key column's type.
///
/// Single-column keys pass through unchanged apart from the coercion.
pub fn decode_id(schema: &Schema, id: &Value, separator: &str) -> Result<Vec<Value>> {
    match schema.id_field() {
        IdField::Single(column) => Ok(vec![coerce(schema, &column, id)]),
        IdField::Composite(columns) => {
            let parts = decode(id, &columns, separator)?;
            if parts.len() < columns.len() {
                return Err(incomplete());
            }
            Ok(columns
                .iter()
                .zip(parts.iter())
                .map(|(column, part)| coerce(schema, column, part))
                .collect())
        }
    }
}

fn coerce(schema: &Schema, column: &str, value: &Value) -> Value {
    match schema.field_type(column) {
        Some(t) => t.coerce(value),
        None => value.clone(),
    }
}

/// Build the query fragment selecting the given identifier.
///
/// - With an `id`, every key column gets an equality on its decoded part
/// - Without one, `id_list` holds the distinct values seen per key column;
///   a single value becomes an equality, several become `$in`
/// - With neither, every key column is set to null ("not known yet")
pub fn ids_query(
    schema: &Schema,
    separator: &str,
    id: Option<&Value>,
    id_list: Option<&[Vec<Value>]>,
) -> Result<Map<String, Value>> {
    let columns = schema.key_columns();
    let mut query = Map::new();

    if let Some(id) = id.filter(|v| !v.is_null()) {
        let parts = decode_id(schema, id, separator)?;
        for (column, part) in columns.iter().zip(parts) {
            if part.is_null() {
                return Err(incomplete());
            }
            query.insert(column.clone(), part);
        }
        return Ok(query);
    }

    for (index, column) in columns.iter().enumerate() {
        let value = match id_list {
            Some(list) => match list.get(index).map(Vec::as_slice) {
                Some([single]) => single.clone(),
                Some(values) if !values.is_empty() => {
                    let mut filter = Map::new();
                    filter.insert("$in".to_string(), Value::Array(values.to_vec()));
                    Value::Object(filter)
                }
                _ => continue,
            },
            None => Value::Null,
        };
        query.insert(column.clone(), value);
    }

    Ok(query)
}

/// Render decoded key parts back into an identifier for messages
pub fn display_id(parts: &[Value], separator: &str) -> String {
    parts
        .iter()
        .map(|p| match p {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

/// Pull the key tuple of a row
pub fn row_key(schema: &Schema, row: &Map<String, Value>) -> Vec<Value> {
    schema
        .key_columns()
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType, KeyPart};
    use serde_json::json;

    fn people_rooms() -> Schema {
        Schema::new("test", "people_rooms", &[])
            .with_key(vec![
                KeyPart::Partition(vec!["people_id".into(), "room_id".into()]),
                KeyPart::Column("time".into()),
            ])
            .field("people_id", FieldDef::new(FieldType::Int))
            .field("room_id", FieldDef::new(FieldType::Int))
            .field("time", FieldDef::new(FieldType::Int))
    }

    fn columns() -> Vec<String> {
        vec!["people_id".into(), "room_id".into(), "time".into()]
    }

    #[test]
    fn test_decode_every_encoding() {
        let schema = people_rooms();
        let expected = vec![json!(2), json!(2), json!(2)];
        for id in [
            json!([2, 2, 2]),
            json!("2,2,2"),
            json!("[2,2,2]"),
            json!("{\"people_id\":2,\"room_id\":2,\"time\":2}"),
            json!({"time": 2, "room_id": 2, "people_id": 2}),
        ] {
            assert_eq!(decode_id(&schema, &id, ",").unwrap(), expected, "id {}", id);
        }
    }

    #[test]
    fn test_json_object_uses_its_own_order() {
        let parts = decode(&json!("{\"b\":1,\"a\":2}"), &columns(), ",").unwrap();
        assert_eq!(parts, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_custom_separator() {
        let schema = people_rooms();
        assert_eq!(
            decode_id(&schema, &json!("1|2|3"), "|").unwrap(),
            vec![json!(1), json!(2), json!(3)]
        );
        assert!(decode_id(&schema, &json!("1,2,3"), "|").is_err());
    }

    #[test]
    fn test_scalar_composite_id_rejected() {
        let err = decode_id(&people_rooms(), &json!("7"), ",").unwrap_err();
        assert_eq!(err, Error::BadRequest(INCOMPLETE_ID.to_string()));
        assert!(decode_id(&people_rooms(), &json!(7), ",").is_err());
    }

    #[test]
    fn test_round_trip() {
        let schema = people_rooms();
        let query = ids_query(&schema, ",", Some(&json!("1,2,3")), None).unwrap();
        assert_eq!(query, *json!({"people_id": 1, "room_id": 2, "time": 3}).as_object().unwrap());

        let parts = row_key(&schema, &query);
        let again = ids_query(&schema, ",", Some(&Value::Array(parts.clone())), None).unwrap();
        assert_eq!(again, query);
        assert_eq!(display_id(&parts, ","), "1,2,3");
    }

    #[test]
    fn test_ids_query_missing_part() {
        let err = ids_query(&people_rooms(), ",", Some(&json!({"people_id": 1, "room_id": 2})), None).unwrap_err();
        assert_eq!(err.to_string(), INCOMPLETE_ID);
    }

    #[test]
    fn test_ids_query_from_list() {
        let schema = people_rooms();
        let list = vec![vec![json!(1)], vec![json!(2), json!(3)], vec![json!(4)]];
        let query = ids_query(&schema, ",", None, Some(&list)).unwrap();
        assert_eq!(
            query,
            *json!({"people_id": 1, "room_id": {"$in": [2, 3]}, "time": 4}).as_object().unwrap()
        );
    }

    #[test]
    fn test_ids_query_unknown_is_null() {
        let schema = Schema::new("test", "people", &["id"]);
        let query = ids_query(&schema, ",", None, None).unwrap();
        assert_eq!(query, *json!({"id": null}).as_object().unwrap());
    }

    #[test]
    fn test_single_key_coerced() {
        let schema = Schema::new("test", "people", &["id"]).field("id", FieldDef::new(FieldType::Int));
        let query = ids_query(&schema, ",", Some(&json!("999")), None).unwrap();
        assert_eq!(query.get("id"), Some(&json!(999)));
    }
}

//! Input validation for cassandra-service
//!
//! Checks a data object against the schema before it is written:
//! required fields, CQL type compatibility and custom validators.

use serde_json::{Map, Value};

use crate::schema::{FieldType, Schema, ValidationError};
use cqlq::DeltaOp;

/// Which write is being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every schema field is checked
    Create,
    /// Every schema field except the primary key
    Update,
    /// Only the fields present in the data
    Patch,
}

/// Validate `data` against `schema`.
///
/// Rules:
/// - A required field fails when missing or null; present falsy values
///   (`0`, `false`, `""`) pass
/// - Values must be compatible with the declared column type
/// - Delta operators are validated on their operand, except `$remove` on
///   maps whose operand is a list of keys
/// - Custom validators run on non-null values
pub fn validate(schema: &Schema, data: &Map<String, Value>, mode: ValidationMode) -> Result<(), ValidationError> {
    let fields: Vec<&String> = match mode {
        ValidationMode::Create => schema.fields.keys().collect(),
        ValidationMode::Update => {
            let id_field = schema.id_field();
            schema.fields.keys().filter(|f| !id_field.contains(f)).collect()
        }
        ValidationMode::Patch => data.keys().collect(),
    };

    for field in fields {
        let Some(def) = schema.fields.get(field) else {
            continue;
        };

        let value = data.get(field).unwrap_or(&Value::Null);
        if value.is_null() {
            if def.required {
                return Err(ValidationError::MissingRequired(field.clone()));
            }
            continue;
        }

        let (delta, operand) = split_delta(value);
        if delta == Some(DeltaOp::Remove) && def.field_type == FieldType::Map {
            continue;
        }

        if !operand_accepted(&def.field_type, delta, operand) {
            return Err(ValidationError::TypeMismatch {
                field: field.clone(),
                expected: def.field_type.to_string(),
                value: render(operand),
            });
        }

        if operand.is_null() {
            continue;
        }

        for validator in &def.validators {
            if !(validator.check)(operand) {
                return Err(ValidationError::Rule {
                    field: field.clone(),
                    message: validator.message.clone(),
                });
            }
        }
    }

    Ok(())
}

fn split_delta(value: &Value) -> (Option<DeltaOp>, &Value) {
    value
        .as_object()
        .and_then(|obj| obj.iter().next())
        .and_then(|(k, v)| DeltaOp::from_key(k).map(|op| (Some(op), v)))
        .unwrap_or((None, value))
}

fn operand_accepted(field_type: &FieldType, delta: Option<DeltaOp>, operand: &Value) -> bool {
    match delta {
        Some(DeltaOp::Increment | DeltaOp::Decrement) => {
            *field_type == FieldType::Counter && (operand.is_i64() || operand.as_str().map(|s| s.parse::<i64>().is_ok()).unwrap_or(false))
        }
        Some(DeltaOp::Add | DeltaOp::Remove) => field_type.is_collection() && field_type.accepts(operand),
        None => field_type.accepts(operand),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

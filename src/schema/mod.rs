//! Model descriptors for cassandra-service
//!
//! A schema describes one table:
//! - Primary key (partition key may be composite)
//! - Field definitions with CQL types
//! - Required flags and custom validators
//! - Timestamp and version stamp options
//! - Named filters and lifecycle hooks (attached in code)
//!
//! The declarative part loads from YAML:
//!
//! ```yaml
//! keyspace: app
//! table_name: people_rooms
//! key: [[people_id, room_id], time]
//! fields:
//!   people_id: int
//!   room_id: int
//!   time: int
//!   admin: { type: boolean, rule: { required: true } }
//! options:
//!   timestamps: { createdAt: created_at, updatedAt: true }
//!   versions: { key: __v }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::lifecycle::Hooks;
use crate::query::NamedFilter;

/// A CQL column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Ascii,
    Varchar,
    Int,
    Bigint,
    Smallint,
    Tinyint,
    Varint,
    Counter,
    Float,
    Double,
    Decimal,
    Boolean,
    Uuid,
    Timeuuid,
    Timestamp,
    Date,
    Time,
    Blob,
    Inet,
    Map,
    List,
    Set,
    Frozen,
    Tuple,
    /// Types the service does not check
    Other(String),
}

impl Default for FieldType {
    fn default() -> Self {
        Self::Text
    }
}

impl From<String> for FieldType {
    fn from(raw: String) -> Self {
        // `map<text, int>` and friends are keyed by their outer type
        let base = raw.split('<').next().unwrap_or(&raw).trim().to_lowercase();
        match base.as_str() {
            "text" => Self::Text,
            "ascii" => Self::Ascii,
            "varchar" => Self::Varchar,
            "int" => Self::Int,
            "bigint" => Self::Bigint,
            "smallint" => Self::Smallint,
            "tinyint" => Self::Tinyint,
            "varint" => Self::Varint,
            "counter" => Self::Counter,
            "float" => Self::Float,
            "double" => Self::Double,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "uuid" => Self::Uuid,
            "timeuuid" => Self::Timeuuid,
            "timestamp" => Self::Timestamp,
            "date" => Self::Date,
            "time" => Self::Time,
            "blob" => Self::Blob,
            "inet" => Self::Inet,
            "map" => Self::Map,
            "list" => Self::List,
            "set" => Self::Set,
            "frozen" => Self::Frozen,
            "tuple" => Self::Tuple,
            _ => Self::Other(raw),
        }
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Ascii => "ascii",
            FieldType::Varchar => "varchar",
            FieldType::Int => "int",
            FieldType::Bigint => "bigint",
            FieldType::Smallint => "smallint",
            FieldType::Tinyint => "tinyint",
            FieldType::Varint => "varint",
            FieldType::Counter => "counter",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::Timeuuid => "timeuuid",
            FieldType::Timestamp => "timestamp",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Blob => "blob",
            FieldType::Inet => "inet",
            FieldType::Map => "map",
            FieldType::List => "list",
            FieldType::Set => "set",
            FieldType::Frozen => "frozen",
            FieldType::Tuple => "tuple",
            FieldType::Other(raw) => raw.as_str(),
        };
        f.write_str(name)
    }
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int
                | FieldType::Bigint
                | FieldType::Smallint
                | FieldType::Tinyint
                | FieldType::Varint
                | FieldType::Counter
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, FieldType::Map | FieldType::List | FieldType::Set)
    }

    /// Whether `value` is acceptable for a column of this type
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            FieldType::Text | FieldType::Ascii | FieldType::Varchar | FieldType::Inet | FieldType::Blob => {
                value.is_string()
            }
            FieldType::Int | FieldType::Smallint | FieldType::Tinyint => value.is_i64() || value.is_u64(),
            // 64-bit and arbitrary precision integers may travel as strings
            FieldType::Bigint | FieldType::Varint | FieldType::Counter => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_str().map(|s| s.parse::<i128>().is_ok()).unwrap_or(false)
            }
            FieldType::Float | FieldType::Double => value.is_number(),
            FieldType::Decimal => {
                value.is_number() || value.as_str().map(|s| s.parse::<f64>().is_ok()).unwrap_or(false)
            }
            FieldType::Boolean => value.is_boolean(),
            FieldType::Uuid => value
                .as_str()
                .map(|s| uuid::Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldType::Timeuuid => value
                .as_str()
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
                .map(|u| u.get_version_num() == 1)
                .unwrap_or(false),
            FieldType::Timestamp | FieldType::Date | FieldType::Time => value.is_string() || value.is_number(),
            FieldType::Map => value.is_object(),
            FieldType::List | FieldType::Set => value.is_array(),
            FieldType::Frozen | FieldType::Tuple | FieldType::Other(_) => true,
        }
    }

    /// Convert a string-encoded value (e.g. a split identifier part) to
    /// the column's native JSON shape. Values that do not parse stay as-is.
    pub fn coerce(&self, value: &Value) -> Value {
        let Some(s) = value.as_str() else {
            return value.clone();
        };
        let s = s.trim();
        match self {
            t if t.is_integer() => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| value.clone()),
            FieldType::Float | FieldType::Double => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            FieldType::Boolean => match s {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => value.clone(),
            },
            _ => value.clone(),
        }
    }
}

/// A custom validation rule attached in code
#[derive(Clone)]
pub struct Validator {
    pub check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    pub message: String,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").field("message", &self.message).finish()
    }
}

/// Definition of a single field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RawFieldDef")]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip)]
    pub validators: Vec<Validator>,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn validator<F>(mut self, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validators.push(Validator {
            check: Arc::new(check),
            message: message.into(),
        });
        self
    }
}

/// Field definitions as written in schema files: `age: int` or
/// `age: { type: int, rule: { required: true } }`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldDef {
    Short(String),
    Full {
        #[serde(rename = "type")]
        field_type: String,
        #[serde(default)]
        rule: Rule,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Rule {
    #[serde(default)]
    required: bool,
}

impl From<RawFieldDef> for FieldDef {
    fn from(raw: RawFieldDef) -> Self {
        match raw {
            RawFieldDef::Short(t) => FieldDef::new(t.into()),
            RawFieldDef::Full { field_type, rule } => FieldDef {
                field_type: field_type.into(),
                required: rule.required,
                validators: Vec::new(),
            },
        }
    }
}

/// One element of the `key` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Column(String),
    /// Composite partition key
    Partition(Vec<String>),
}

/// The identifier column(s) of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdField {
    Single(String),
    Composite(Vec<String>),
}

impl IdField {
    pub fn columns(&self) -> Vec<String> {
        match self {
            IdField::Single(c) => vec![c.clone()],
            IdField::Composite(cols) => cols.clone(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        match self {
            IdField::Single(c) => c == column,
            IdField::Composite(cols) => cols.iter().any(|c| c == column),
        }
    }
}

/// `true` for the default column name, or a custom name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldToggle {
    Enabled(bool),
    Named(String),
}

impl FieldToggle {
    fn resolve(&self, default: &str) -> Option<String> {
        match self {
            FieldToggle::Enabled(true) => Some(default.to_string()),
            FieldToggle::Enabled(false) => None,
            FieldToggle::Named(name) => Some(name.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    #[serde(default)]
    pub created_at: Option<FieldToggle>,
    #[serde(default)]
    pub updated_at: Option<FieldToggle>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaOptions {
    #[serde(default)]
    pub timestamps: Option<Timestamps>,
    #[serde(default)]
    pub versions: Option<Versions>,
}

/// Schema for a table
#[derive(Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    pub table_name: String,
    pub key: Vec<KeyPart>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
    #[serde(default)]
    pub options: SchemaOptions,
    /// Server-side predicate injectors selectable through `$filters`
    #[serde(skip)]
    pub filters: BTreeMap<String, NamedFilter>,
    #[serde(skip)]
    pub hooks: Hooks,
}

fn default_keyspace() -> String {
    "default".to_string()
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("keyspace", &self.keyspace)
            .field("table_name", &self.table_name)
            .field("key", &self.key)
            .field("fields", &self.fields)
            .field("options", &self.options)
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Schema {
    /// Create a schema with a single-column primary key
    pub fn new(keyspace: impl Into<String>, table_name: impl Into<String>, key: &[&str]) -> Self {
        Self {
            keyspace: keyspace.into(),
            table_name: table_name.into(),
            key: key.iter().map(|k| KeyPart::Column(k.to_string())).collect(),
            fields: BTreeMap::new(),
            options: SchemaOptions::default(),
            filters: BTreeMap::new(),
            hooks: Hooks::default(),
        }
    }

    /// Replace the key declaration, e.g. with a composite partition key
    pub fn with_key(mut self, key: Vec<KeyPart>) -> Self {
        self.key = key;
        self
    }

    /// Add a field definition
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Register a named filter
    pub fn filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&mut crate::query::CompiledPredicate) + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_timestamps(mut self, created_at: FieldToggle, updated_at: FieldToggle) -> Self {
        self.options.timestamps = Some(Timestamps {
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        });
        self
    }

    pub fn with_versions(mut self, key: Option<String>) -> Self {
        self.options.versions = Some(Versions { key });
        self
    }

    pub fn from_yaml_str(content: &str) -> crate::Result<Self> {
        let schema: Schema = serde_yaml::from_str(content)?;
        schema.check()?;
        Ok(schema)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn check(&self) -> crate::Result<()> {
        if self.key_columns().is_empty() {
            return Err(crate::Error::GeneralError(format!(
                "Table '{}' must declare a primary key",
                self.table_name
            )));
        }
        Ok(())
    }

    /// All primary key columns in declaration order
    pub fn key_columns(&self) -> Vec<String> {
        self.key
            .iter()
            .flat_map(|part| match part {
                KeyPart::Column(c) => vec![c.clone()],
                KeyPart::Partition(cols) => cols.clone(),
            })
            .collect()
    }

    /// Columns that make up the partition key
    pub fn partition_columns(&self) -> Vec<String> {
        match self.key.first() {
            Some(KeyPart::Column(c)) => vec![c.clone()],
            Some(KeyPart::Partition(cols)) => cols.clone(),
            None => Vec::new(),
        }
    }

    pub fn id_field(&self) -> IdField {
        let mut cols = self.key_columns();
        if cols.len() == 1 {
            IdField::Single(cols.remove(0))
        } else {
            IdField::Composite(cols)
        }
    }

    pub fn field_type(&self, column: &str) -> Option<&FieldType> {
        self.fields.get(column).map(|f| &f.field_type)
    }

    pub fn created_at_field(&self) -> Option<String> {
        self.options
            .timestamps
            .as_ref()
            .and_then(|t| t.created_at.as_ref())
            .and_then(|t| t.resolve("createdAt"))
    }

    pub fn updated_at_field(&self) -> Option<String> {
        self.options
            .timestamps
            .as_ref()
            .and_then(|t| t.updated_at.as_ref())
            .and_then(|t| t.resolve("updatedAt"))
    }

    pub fn version_field(&self) -> Option<String> {
        self.options
            .versions
            .as_ref()
            .map(|v| v.key.clone().unwrap_or_else(|| "__v".to_string()))
    }
}

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("`{0}` field is required")]
    MissingRequired(String),
    #[error("Invalid Value: \"{value}\" for Field: {field} (Type: {expected})")]
    TypeMismatch {
        field: String,
        expected: String,
        value: String,
    },
    #[error("{message}")]
    Rule { field: String, message: String },
}

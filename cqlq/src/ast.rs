//! Abstract syntax for query and data objects

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker that distinguishes operator keys from column names
pub const OPERATOR_MARKER: char = '$';

/// Comparison operators accepted in value position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    /// Only meaningful inside `$if` conditions
    Ne,
    /// Only meaningful for materialized view filters
    IsNot,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    /// Recognised so it can be rejected
    NotIn,
    /// Requires a SASI index
    Like,
    Contains,
    ContainsKey,
}

impl Operator {
    pub fn from_key(key: &str) -> Option<Self> {
        let op = match key {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$isnt" => Self::IsNot,
            "$gt" => Self::Gt,
            "$lt" => Self::Lt,
            "$gte" => Self::Gte,
            "$lte" => Self::Lte,
            "$in" => Self::In,
            "$nin" => Self::NotIn,
            "$like" => Self::Like,
            "$contains" => Self::Contains,
            "$containsKey" => Self::ContainsKey,
            _ => return None,
        };
        Some(op)
    }

    /// The CQL spelling of the operator
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::IsNot => "IS NOT",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Like => "LIKE",
            Self::Contains => "CONTAINS",
            Self::ContainsKey => "CONTAINS KEY",
        }
    }
}

/// Server-side timeuuid helpers usable as operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeuuidFn {
    MinTimeuuid,
    MaxTimeuuid,
}

impl TimeuuidFn {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "$minTimeuuid" => Some(Self::MinTimeuuid),
            "$maxTimeuuid" => Some(Self::MaxTimeuuid),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MinTimeuuid => "minTimeuuid",
            Self::MaxTimeuuid => "maxTimeuuid",
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Value(Value),
    Function { func: TimeuuidFn, arg: Value },
}

impl Operand {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Operand::Value(v) => Some(v),
            Operand::Function { .. } => None,
        }
    }
}

/// `column op operand`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub column: String,
    pub op: Operator,
    pub operand: Operand,
}

impl Comparison {
    pub fn new(column: impl Into<String>, op: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            operand: Operand::Value(value),
        }
    }
}

/// Boolean combinators. Only conjunction exists; `$or` is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Combinator {
    And(Vec<Vec<Clause>>),
}

/// Lightweight-transaction clauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionalWrite {
    If(Vec<Comparison>),
    IfExists,
    IfNotExists,
}

/// `token(keys...) op token(values...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRange {
    pub keys: Vec<String>,
    pub op: Operator,
    pub values: Vec<Value>,
}

/// One classified entry of a query object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    Comparison(Comparison),
    Combinator(Combinator),
    ConditionalWrite(ConditionalWrite),
    Token(TokenRange),
}

/// A parsed query object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub clauses: Vec<Clause>,
    pub controls: Controls,
}

impl Query {
    /// Whether the query carries an explicit `$if` clause
    pub fn has_if(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, Clause::ConditionalWrite(ConditionalWrite::If(_))))
    }

    pub fn if_not_exists(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, Clause::ConditionalWrite(ConditionalWrite::IfNotExists)))
    }
}

/// Reserved keys that steer execution instead of filtering rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    Select,
    Sort,
    Limit,
    Skip,
    AllowFiltering,
    Filters,
    Ttl,
    Timestamp,
    NoSelect,
    LimitPerPartition,
    Batch,
}

/// Control keys lifted out of a query object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    pub select: Option<Vec<SelectItem>>,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub allow_filtering: bool,
    /// Named filters, in request order
    pub filters: Vec<String>,
    pub ttl: Option<i64>,
    pub timestamp: Option<i64>,
    pub no_select: bool,
    pub limit_per_partition: Option<usize>,
    pub batch: bool,
    /// Whitelisted operator keys passed through untouched
    pub extra: Map<String, Value>,
}

/// An entry of `$select`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectItem {
    Column(String),
    Ttl(String),
    Writetime(String),
}

impl SelectItem {
    /// Name under which the item appears in a result row
    pub fn alias(&self) -> String {
        match self {
            SelectItem::Column(c) => c.clone(),
            SelectItem::Ttl(c) => format!("{}_ttl", c),
            SelectItem::Writetime(c) => format!("{}_writetime", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

/// Collection mutation operators used in data objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    Add,
    Remove,
    Increment,
    Decrement,
}

impl DeltaOp {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "$add" => Some(Self::Add),
            "$remove" => Some(Self::Remove),
            "$increment" => Some(Self::Increment),
            "$decrement" => Some(Self::Decrement),
            _ => None,
        }
    }
}

/// One column of a data object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Assignment {
    Set { column: String, value: Value },
    Delta { column: String, op: DeltaOp, value: Value },
}

impl Assignment {
    pub fn column(&self) -> &str {
        match self {
            Assignment::Set { column, .. } | Assignment::Delta { column, .. } => column,
        }
    }
}

/// Classification of a single object key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// A plain column name
    Column,
    Comparison(Operator),
    And,
    /// `$or`: recognised, never accepted
    Or,
    If,
    IfExists,
    IfNotExists,
    CollectionDelta(DeltaOp),
    Token,
    TokenKeys,
    TokenCondition,
    Function(TimeuuidFn),
    Control(ControlKey),
    Unknown,
}

/// Classify an object key through a closed lookup
pub fn classify_key(key: &str) -> KeyClass {
    if !key.starts_with(OPERATOR_MARKER) {
        return KeyClass::Column;
    }
    if let Some(op) = Operator::from_key(key) {
        return KeyClass::Comparison(op);
    }
    if let Some(op) = DeltaOp::from_key(key) {
        return KeyClass::CollectionDelta(op);
    }
    if let Some(func) = TimeuuidFn::from_key(key) {
        return KeyClass::Function(func);
    }
    match key {
        "$and" => KeyClass::And,
        "$or" => KeyClass::Or,
        "$if" => KeyClass::If,
        "$ifExists" => KeyClass::IfExists,
        "$ifNotExists" => KeyClass::IfNotExists,
        "$token" => KeyClass::Token,
        "$keys" => KeyClass::TokenKeys,
        "$condition" => KeyClass::TokenCondition,
        "$select" => KeyClass::Control(ControlKey::Select),
        "$sort" => KeyClass::Control(ControlKey::Sort),
        "$limit" => KeyClass::Control(ControlKey::Limit),
        "$skip" => KeyClass::Control(ControlKey::Skip),
        "$allowFiltering" => KeyClass::Control(ControlKey::AllowFiltering),
        "$filters" => KeyClass::Control(ControlKey::Filters),
        "$ttl" => KeyClass::Control(ControlKey::Ttl),
        "$timestamp" => KeyClass::Control(ControlKey::Timestamp),
        "$noSelect" => KeyClass::Control(ControlKey::NoSelect),
        "$limitPerPartition" => KeyClass::Control(ControlKey::LimitPerPartition),
        "$batch" => KeyClass::Control(ControlKey::Batch),
        _ => KeyClass::Unknown,
    }
}

//! CQLQ - the query-object language of cassandra-service
//!
//! Queries arrive as JSON objects. Keys are column names or `$`-prefixed
//! operators; values are literals or nested operator objects.
//!
//! ```json
//! {
//!   "name": "Dave",
//!   "age": { "$gte": 18, "$lt": 65 },
//!   "$and": [ { "tags": { "$contains": "admin" } } ],
//!   "$token": { "$keys": ["people_id", "room_id"], "$condition": { "$gt": [1, 2] } },
//!   "$if": { "version": "abc" },
//!   "$select": ["name", "ttl(age)"],
//!   "$sort": { "age": -1 },
//!   "$limit": 10,
//!   "$allowFiltering": true
//! }
//! ```
//!
//! # Special Features
//!
//! - `"null"` - string stand-in for a null literal
//! - `$minTimeuuid` / `$maxTimeuuid` - timeuuid bounds in value position
//! - `$or` / `$nin` - recognised and always rejected
//!
//! Data objects (the payload of writes) use the collection delta operators
//! `$add`, `$remove`, `$increment` and `$decrement` in value position.

mod ast;
mod error;
mod parser;

pub use ast::*;
pub use error::ParseError;
pub use parser::{parse_select_item, truthy, ParseOptions};

use serde_json::{Map, Value};

/// Parse a query object into clauses and control keys
pub fn parse(query: &Map<String, Value>, options: &ParseOptions) -> Result<Query, ParseError> {
    parser::parse_query(query, options)
}

/// Parse a data object into assignments
pub fn parse_data(data: &Map<String, Value>) -> Vec<Assignment> {
    parser::parse_data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_empty() {
        let q = parse(&Map::new(), &ParseOptions::default()).unwrap();
        assert!(q.clauses.is_empty());
        assert_eq!(q.controls, Controls::default());
    }

    #[test]
    fn test_parse_mixed() {
        let q = parse(
            json!({"name": "Dave", "age": {"$gte": 18}, "$limit": 5}).as_object().unwrap(),
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(q.clauses.len(), 2);
        assert_eq!(q.controls.limit, Some(5));
    }

    #[test]
    fn test_classify_key() {
        assert_eq!(classify_key("name"), KeyClass::Column);
        assert_eq!(classify_key("$in"), KeyClass::Comparison(Operator::In));
        assert_eq!(classify_key("$add"), KeyClass::CollectionDelta(DeltaOp::Add));
        assert_eq!(classify_key("$limit"), KeyClass::Control(ControlKey::Limit));
        assert_eq!(classify_key("$or"), KeyClass::Or);
        assert_eq!(classify_key("$nope"), KeyClass::Unknown);
    }

    #[test]
    fn test_operator_symbols() {
        assert_eq!(Operator::ContainsKey.symbol(), "CONTAINS KEY");
        assert_eq!(Operator::IsNot.symbol(), "IS NOT");
        assert_eq!(Operator::from_key("$lte"), Some(Operator::Lte));
    }
}

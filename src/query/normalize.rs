//! Filter and pagination normalization
//!
//! Splits a raw query object into predicates and control keys and works
//! out the effective page size.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cqlq::{ParseError, ParseOptions, Query};

/// Page size policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginate {
    #[serde(default)]
    pub default: Option<usize>,
    #[serde(default)]
    pub max: Option<usize>,
}

impl Paginate {
    pub fn new(default: usize, max: usize) -> Self {
        Self {
            default: Some(default),
            max: Some(max),
        }
    }

    /// Whether finds return `{total, limit, data}` pages
    pub fn is_active(&self) -> bool {
        self.default.is_some()
    }

    /// Effective `$limit`: the requested value, falling back to the
    /// default, capped by the maximum. Without a default the request stands.
    pub fn limit(&self, requested: Option<usize>) -> Option<usize> {
        let Some(default) = self.default else {
            return requested;
        };
        let lower = requested.unwrap_or(default);
        Some(match self.max {
            Some(max) => lower.min(max),
            None => lower,
        })
    }
}

/// Parse `raw` and apply the page size policy
pub fn normalize(raw: &Map<String, Value>, paginate: &Paginate, options: &ParseOptions) -> Result<Query, ParseError> {
    let mut query = cqlq::parse(raw, options)?;
    query.controls.limit = paginate.limit(query.controls.limit);

    if let Some(skip) = query.controls.skip {
        tracing::warn!(skip, "$skip has no equivalent in the store and is ignored");
    }

    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_limit_policy() {
        let none = Paginate::default();
        assert_eq!(none.limit(None), None);
        assert_eq!(none.limit(Some(7)), Some(7));

        let paged = Paginate::new(10, 50);
        assert_eq!(paged.limit(None), Some(10));
        assert_eq!(paged.limit(Some(20)), Some(20));
        assert_eq!(paged.limit(Some(500)), Some(50));
        assert_eq!(paged.limit(Some(0)), Some(0));

        // max alone is not a policy
        let capped = Paginate { default: None, max: Some(5) };
        assert_eq!(capped.limit(None), None);
        assert_eq!(capped.limit(Some(9)), Some(9));
        assert!(!capped.is_active());

        let uncapped = Paginate { default: Some(3), max: None };
        assert_eq!(uncapped.limit(None), Some(3));
        assert_eq!(uncapped.limit(Some(100)), Some(100));
    }

    #[test]
    fn test_normalize_splits_controls() {
        let raw = json!({"name": "Dave", "$limit": 100, "$skip": 2, "$sort": {"age": 1}});
        let query = normalize(raw.as_object().unwrap(), &Paginate::new(10, 25), &ParseOptions::default()).unwrap();
        assert_eq!(query.clauses.len(), 1);
        assert_eq!(query.controls.limit, Some(25));
        assert_eq!(query.controls.skip, Some(2));
        assert_eq!(query.controls.sort.len(), 1);
    }

    #[test]
    fn test_paginate_from_yaml() {
        let paginate: Paginate = serde_yaml::from_str("default: 2\nmax: 4\n").unwrap();
        assert_eq!(paginate, Paginate::new(2, 4));
    }
}

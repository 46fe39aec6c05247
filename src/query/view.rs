//! Materialized view routing

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A store-maintained copy of the table, keyed differently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedView {
    pub view: String,
    pub keys: Vec<String>,
}

impl MaterializedView {
    pub fn new(view: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            view: view.into(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Pick the first view whose key set equals `columns` exactly.
///
/// Subsets and supersets never match, nor does an empty column set.
pub fn resolve<'a>(columns: &BTreeSet<String>, views: &'a [MaterializedView]) -> Option<&'a str> {
    if columns.is_empty() {
        return None;
    }

    views
        .iter()
        .find(|mv| mv.keys.iter().cloned().collect::<BTreeSet<_>>() == *columns)
        .map(|mv| mv.view.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(cols: &[&str]) -> BTreeSet<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn views() -> Vec<MaterializedView> {
        vec![
            MaterializedView::new("people_by_name", &["name", "id"]),
            MaterializedView::new("people_by_name_again", &["id", "name"]),
            MaterializedView::new("people_by_age", &["age"]),
        ]
    }

    #[test]
    fn test_exact_match_in_any_order() {
        let views = views();
        assert_eq!(resolve(&set(&["id", "name"]), &views), Some("people_by_name"));
        assert_eq!(resolve(&set(&["age"]), &views), Some("people_by_age"));
    }

    #[test]
    fn test_subset_and_superset_do_not_match() {
        let views = views();
        assert_eq!(resolve(&set(&["name"]), &views), None);
        assert_eq!(resolve(&set(&["age", "name"]), &views), None);
        assert_eq!(resolve(&set(&["age", "id", "name"]), &views), None);
    }

    #[test]
    fn test_empty_never_matches() {
        let views = vec![MaterializedView::new("everything", &[])];
        assert_eq!(resolve(&BTreeSet::new(), &views), None);
    }
}

//! Result projection.

use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use tessera_codec::Record;

/// Which attributes a search returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Whole rows.
    Whole,
    /// Only these attributes, in this order.
    Attributes(Vec<String>),
}

impl Projection {
    /// Parses a `get_attributes` list. Any `*` entry selects whole rows.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty list.
    pub fn parse(attributes: &[String]) -> CoreResult<Self> {
        if attributes.is_empty() {
            return Err(CoreError::validation("get_attributes cannot be empty"));
        }
        if attributes.iter().any(|a| a == "*") {
            return Ok(Self::Whole);
        }
        let mut list: Vec<String> = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            if !list.contains(attribute) {
                list.push(attribute.clone());
            }
        }
        Ok(Self::Attributes(list))
    }

    /// Whether index entries of `search_attribute` alone can answer this
    /// projection.
    #[must_use]
    pub fn covered_by(&self, search_attribute: &str, hash_attribute: &str) -> bool {
        match self {
            Self::Whole => false,
            Self::Attributes(list) => list
                .iter()
                .all(|a| a == search_attribute || a == hash_attribute),
        }
    }

    /// Projects a full row. Missing attributes are left out.
    #[must_use]
    pub fn apply(&self, mut row: Record) -> Record {
        match self {
            Self::Whole => row,
            Self::Attributes(list) => list
                .iter()
                .filter_map(|a| row.remove(a).map(|v| (a.clone(), v)))
                .collect(),
        }
    }

    /// Builds a row from one index entry.
    #[must_use]
    pub fn synthesize(
        &self,
        search_attribute: &str,
        key: Value,
        hash_attribute: &str,
        hash: Value,
    ) -> Record {
        let Self::Attributes(list) = self else {
            return Record::new();
        };
        list.iter()
            .filter_map(|a| {
                if a == search_attribute {
                    Some((a.clone(), key.clone()))
                } else if a == hash_attribute {
                    Some((a.clone(), hash.clone()))
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn star_selects_whole_rows() {
        assert_eq!(Projection::parse(&attrs(&["name", "*"])).unwrap(), Projection::Whole);
        assert!(Projection::parse(&[]).is_err());
    }

    #[test]
    fn coverage() {
        let p = Projection::parse(&attrs(&["id", "name"])).unwrap();
        assert!(p.covered_by("name", "id"));
        assert!(!p.covered_by("age", "id"));
        assert!(!Projection::Whole.covered_by("name", "id"));
    }

    #[test]
    fn apply_keeps_requested_order() {
        let row = json!({"id": 1, "name": "Penny", "age": 5}).as_object().unwrap().clone();
        let p = Projection::parse(&attrs(&["name", "ghost", "id"])).unwrap();
        let projected = p.apply(row);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected["name"], json!("Penny"));
    }

    #[test]
    fn synthesize_from_entry() {
        let p = Projection::parse(&attrs(&["name"])).unwrap();
        let row = p.synthesize("name", json!("Penny"), "id", json!(1));
        assert_eq!(Value::Object(row), json!({"name": "Penny"}));
    }
}

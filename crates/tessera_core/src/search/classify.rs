//! Search classification.
//!
//! Turns a search value (plus optional end value and comparator) into a
//! [`Classified`] search: the access pattern and the values it compares
//! against. Classification also provides the row-level predicate used when
//! a condition is applied as a filter instead of an index probe.

use crate::error::{CoreError, CoreResult};
use crate::request::Comparator;
use serde_json::Value;
use std::cmp::Ordering;
use tessera_codec::{auto_cast, IndexKey, KeyBracket};

/// Wildcard characters.
pub const WILDCARDS: [char; 2] = ['*', '%'];

/// Access pattern of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchType {
    /// Every entry of the index.
    All,
    /// Key equals the value.
    Equals,
    /// Rendered key starts with the pattern.
    StartsWith,
    /// Rendered key ends with the pattern.
    EndsWith,
    /// Rendered key contains the pattern.
    Contains,
    /// Key greater than the value.
    GreaterThan,
    /// Key greater than or equal to the value.
    GreaterThanEqual,
    /// Key less than the value.
    LessThan,
    /// Key less than or equal to the value.
    LessThanEqual,
    /// Key between the value and the end value, inclusive.
    Between,
}

impl SearchType {
    /// Whether this is an ordered range comparison.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(
            self,
            Self::GreaterThan
                | Self::GreaterThanEqual
                | Self::LessThan
                | Self::LessThanEqual
                | Self::Between
        )
    }

    /// Whether this matches rendered keys against a string pattern.
    #[must_use]
    pub fn is_pattern(self) -> bool {
        matches!(self, Self::StartsWith | Self::EndsWith | Self::Contains)
    }
}

impl From<Comparator> for SearchType {
    fn from(comparator: Comparator) -> Self {
        match comparator {
            Comparator::Between => Self::Between,
            Comparator::Greater => Self::GreaterThan,
            Comparator::GreaterOrEq => Self::GreaterThanEqual,
            Comparator::Less => Self::LessThan,
            Comparator::LessOrEq => Self::LessThanEqual,
        }
    }
}

/// A classified search.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    /// Access pattern.
    pub kind: SearchType,
    /// Keys an `Equals` search probes: the cast value, plus the raw string
    /// when casting changed it.
    pub keys: Vec<IndexKey>,
    /// Pattern for `StartsWith`/`EndsWith`/`Contains`.
    pub pattern: String,
    /// Range start (or the bound of a one-sided comparison).
    pub start: Option<IndexKey>,
    /// Range end for `Between`.
    pub end: Option<IndexKey>,
}

impl Classified {
    fn new(kind: SearchType) -> Self {
        Self {
            kind,
            keys: Vec::new(),
            pattern: String::new(),
            start: None,
            end: None,
        }
    }

    /// Bracket the range bounds live in.
    #[must_use]
    pub fn range_bracket(&self) -> Option<KeyBracket> {
        self.start.as_ref().map(IndexKey::bracket)
    }

    /// Whether a row value satisfies the search. A missing value never
    /// does.
    #[must_use]
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(key) = value.and_then(IndexKey::from_value) else {
            return false;
        };
        self.matches_key(&key)
    }

    /// Whether an index key satisfies the search.
    #[must_use]
    pub fn matches_key(&self, key: &IndexKey) -> bool {
        match self.kind {
            SearchType::All => true,
            SearchType::Equals => self.keys.iter().any(|k| keys_equal(k, key)),
            SearchType::StartsWith => key.render().starts_with(&self.pattern),
            SearchType::EndsWith => key.render().ends_with(&self.pattern),
            SearchType::Contains => key.render().contains(&self.pattern),
            SearchType::GreaterThan => self.cmp_start(key) == Some(Ordering::Greater),
            SearchType::GreaterThanEqual => {
                matches!(self.cmp_start(key), Some(Ordering::Greater | Ordering::Equal))
            }
            SearchType::LessThan => self.cmp_start(key) == Some(Ordering::Less),
            SearchType::LessThanEqual => {
                matches!(self.cmp_start(key), Some(Ordering::Less | Ordering::Equal))
            }
            SearchType::Between => {
                matches!(self.cmp_start(key), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(
                        self.end.as_ref().and_then(|end| compare_in_bracket(key, end)),
                        Some(Ordering::Less | Ordering::Equal)
                    )
            }
        }
    }

    fn cmp_start(&self, key: &IndexKey) -> Option<Ordering> {
        self.start
            .as_ref()
            .and_then(|start| compare_in_bracket(key, start))
    }
}

/// Orders two keys of the same bracket; keys of different brackets are
/// incomparable.
#[must_use]
pub fn compare_in_bracket(a: &IndexKey, b: &IndexKey) -> Option<Ordering> {
    match (a, b) {
        (IndexKey::Null, IndexKey::Null) => Some(Ordering::Equal),
        (IndexKey::Bool(x), IndexKey::Bool(y)) => Some(x.cmp(y)),
        (IndexKey::Number(x), IndexKey::Number(y)) => x.partial_cmp(y),
        (IndexKey::Text(x), IndexKey::Text(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        _ => None,
    }
}

fn keys_equal(a: &IndexKey, b: &IndexKey) -> bool {
    compare_in_bracket(a, b) == Some(Ordering::Equal)
}

/// Classifies a search.
///
/// With a comparator the comparator decides. Without one the value's shape
/// decides: a bare wildcard scans everything, wildcards at both ends make
/// a substring search, a leading wildcard a suffix search, a trailing
/// wildcard a prefix search, and anything else an exact match.
///
/// # Errors
///
/// Returns `UnknownSearchType` for arrays and objects, and for `between`
/// without an end value. Returns `Validation` when `between` bounds have
/// different types.
pub fn classify(
    value: &Value,
    end_value: Option<&Value>,
    comparator: Option<Comparator>,
) -> CoreResult<Classified> {
    let unknown = || CoreError::UnknownSearchType {
        value: value.to_string(),
    };

    if let Some(comparator) = comparator {
        let kind = SearchType::from(comparator);
        let mut classified = Classified::new(kind);
        classified.start = Some(IndexKey::from_value(&auto_cast(value)).ok_or_else(unknown)?);
        if kind == SearchType::Between {
            let end = end_value.ok_or_else(unknown)?;
            let end = IndexKey::from_value(&auto_cast(end)).ok_or_else(unknown)?;
            if classified.range_bracket() != Some(end.bracket()) {
                return Err(CoreError::validation(format!(
                    "between bounds {value} and {} have different types",
                    end.render()
                )));
            }
            classified.end = Some(end);
        }
        return Ok(classified);
    }

    match value {
        Value::Array(_) | Value::Object(_) => Err(unknown()),
        Value::String(s) if s.len() == 1 && s.starts_with(WILDCARDS) => {
            Ok(Classified::new(SearchType::All))
        }
        Value::String(s) => {
            let leading = s.starts_with(WILDCARDS);
            let trailing = s.len() > 1 && s.ends_with(WILDCARDS);
            let kind = match (leading, trailing) {
                (true, true) => SearchType::Contains,
                (true, false) => SearchType::EndsWith,
                (false, true) => SearchType::StartsWith,
                (false, false) => return Ok(equals(value)),
            };
            let mut classified = Classified::new(kind);
            let pattern = if leading { &s[1..] } else { s.as_str() };
            let pattern = if trailing {
                &pattern[..pattern.len() - 1]
            } else {
                pattern
            };
            classified.pattern = pattern.to_string();
            Ok(classified)
        }
        _ => Ok(equals(value)),
    }
}

fn equals(value: &Value) -> Classified {
    let mut classified = Classified::new(SearchType::Equals);
    let cast = auto_cast(value);
    if let Some(key) = IndexKey::from_value(&cast) {
        classified.keys.push(key);
    }
    if cast != *value {
        if let Some(raw) = IndexKey::from_value(value) {
            classified.keys.push(raw);
        }
    }
    classified
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn kind(value: Value) -> SearchType {
        classify(&value, None, None).unwrap().kind
    }

    #[test]
    fn wildcard_shapes() {
        assert_eq!(kind(json!("*")), SearchType::All);
        assert_eq!(kind(json!("%")), SearchType::All);
        assert_eq!(kind(json!("Pen*")), SearchType::StartsWith);
        assert_eq!(kind(json!("%ny")), SearchType::EndsWith);
        assert_eq!(kind(json!("*en%")), SearchType::Contains);
        assert_eq!(kind(json!("Penny")), SearchType::Equals);
        assert_eq!(kind(json!(12)), SearchType::Equals);
        assert_eq!(kind(json!(null)), SearchType::Equals);
    }

    #[test]
    fn patterns_are_stripped() {
        let c = classify(&json!("*en*"), None, None).unwrap();
        assert_eq!(c.pattern, "en");
        let c = classify(&json!("Pen%"), None, None).unwrap();
        assert_eq!(c.pattern, "Pen");
    }

    #[test]
    fn comparator_overrides_shape() {
        let c = classify(&json!("5*"), None, Some(Comparator::Greater)).unwrap();
        assert_eq!(c.kind, SearchType::GreaterThan);
        assert_eq!(c.start, Some(IndexKey::Text("5*".into())));

        let c = classify(&json!("5"), None, Some(Comparator::LessOrEq)).unwrap();
        assert_eq!(c.start, Some(IndexKey::Number(5.0)));
    }

    #[test]
    fn unclassifiable_values() {
        assert!(matches!(
            classify(&json!([1]), None, None),
            Err(CoreError::UnknownSearchType { .. })
        ));
        assert!(matches!(
            classify(&json!(1), None, Some(Comparator::Between)),
            Err(CoreError::UnknownSearchType { .. })
        ));
        assert!(matches!(
            classify(&json!(1), Some(&json!("z")), Some(Comparator::Between)),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn equality_probes_cast_and_raw() {
        let c = classify(&json!("42"), None, None).unwrap();
        assert_eq!(
            c.keys,
            vec![IndexKey::Number(42.0), IndexKey::Text("42".into())]
        );
        assert!(c.matches(Some(&json!(42))));
        assert!(c.matches(Some(&json!("42"))));
        assert!(!c.matches(None));
    }

    #[test]
    fn ranges_stay_in_bracket() {
        let c = classify(&json!(10), None, Some(Comparator::Greater)).unwrap();
        assert!(c.matches(Some(&json!(11))));
        assert!(!c.matches(Some(&json!(10))));
        assert!(!c.matches(Some(&json!("zzz"))));

        let c = classify(&json!(1), Some(&json!(3)), Some(Comparator::Between)).unwrap();
        assert!(c.matches(Some(&json!(1))));
        assert!(c.matches(Some(&json!(3))));
        assert!(!c.matches(Some(&json!(3.5))));
    }

    #[test]
    fn patterns_match_rendered_numbers() {
        let c = classify(&json!("12*"), None, None).unwrap();
        assert!(c.matches(Some(&json!(123))));
        assert!(c.matches(Some(&json!("12ab"))));
        assert!(!c.matches(Some(&json!(312))));
    }

    proptest! {
        #[test]
        fn plain_strings_are_exact(s in "[a-zA-Z ]{1,16}") {
            prop_assert_eq!(kind(json!(s)), SearchType::Equals);
        }

        #[test]
        fn trailing_wildcard_is_prefix(s in "[a-z]{1,16}") {
            let c = classify(&json!(format!("{s}*")), None, None).unwrap();
            prop_assert_eq!(c.kind, SearchType::StartsWith);
            prop_assert_eq!(c.pattern, s);
        }

        #[test]
        fn surrounded_is_substring(s in "[a-z]{1,16}") {
            let c = classify(&json!(format!("%{s}*")), None, None).unwrap();
            prop_assert_eq!(c.kind, SearchType::Contains);
            let haystack = json!(format!("xx{s}yy"));
            prop_assert!(c.matches(Some(&haystack)));
        }
    }
}

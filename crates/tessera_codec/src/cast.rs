//! Casting of loosely typed input values.
//!
//! Values arriving from SQL or CSV front ends are often strings holding a
//! number or a literal. The search engine and write path cast them before
//! they meet an index.

use crate::key::{number_to_value, render_number};
use serde_json::Value;

/// Casts string literals to the JSON value they spell.
///
/// `"true"`/`"false"` become booleans, `"null"` becomes null, and a string
/// that is exactly a finite decimal number becomes that number. Strings
/// with surrounding whitespace, a leading `+`, or a leading zero before
/// another digit (`"007"`) stay strings. Non-strings are returned as-is.
#[must_use]
pub fn auto_cast(value: &Value) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    match s.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if !looks_numeric(s) {
        return value.clone();
    }
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() => number_to_value(n),
        _ => value.clone(),
    }
}

/// Casts a primary-key value: only a string holding a canonical integer
/// (`"42"`, `"-3"`) becomes a number. Everything else is returned as-is so
/// ids such as `"007"` or `"1.50"` keep their identity.
#[must_use]
pub fn auto_cast_hash(value: &Value) -> Value {
    if let Value::String(s) = value {
        if let Ok(n) = s.parse::<i64>() {
            if n.to_string() == *s {
                return Value::from(n);
            }
        }
    }
    value.clone()
}

/// String rendering of a scalar row value, matching
/// [`crate::IndexKey::render`]. Arrays and objects render as `None`.
#[must_use]
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => n.as_f64().map(render_number),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn looks_numeric(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut chars = digits.chars();
    match (chars.next(), chars.next()) {
        (Some(first), _) if !first.is_ascii_digit() => false,
        (Some('0'), Some(second)) if second.is_ascii_digit() => false,
        (Some(_), _) => digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+')),
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn casts_literals() {
        assert_eq!(auto_cast(&json!("true")), json!(true));
        assert_eq!(auto_cast(&json!("false")), json!(false));
        assert_eq!(auto_cast(&json!("null")), Value::Null);
    }

    #[test]
    fn casts_numbers() {
        assert_eq!(auto_cast(&json!("42")), json!(42));
        assert_eq!(auto_cast(&json!("-3.5")), json!(-3.5));
        assert_eq!(auto_cast(&json!("1e3")), json!(1000));
    }

    #[test]
    fn leaves_non_canonical_strings() {
        assert_eq!(auto_cast(&json!("007")), json!("007"));
        assert_eq!(auto_cast(&json!(" 4")), json!(" 4"));
        assert_eq!(auto_cast(&json!("+4")), json!("+4"));
        assert_eq!(auto_cast(&json!("inf")), json!("inf"));
        assert_eq!(auto_cast(&json!("abc")), json!("abc"));
        assert_eq!(auto_cast(&json!("")), json!(""));
    }

    #[test]
    fn passes_non_strings_through() {
        assert_eq!(auto_cast(&json!(5)), json!(5));
        assert_eq!(auto_cast(&json!([1])), json!([1]));
    }

    #[test]
    fn hash_cast_is_strict() {
        assert_eq!(auto_cast_hash(&json!("42")), json!(42));
        assert_eq!(auto_cast_hash(&json!("007")), json!("007"));
        assert_eq!(auto_cast_hash(&json!("1.50")), json!("1.50"));
        assert_eq!(auto_cast_hash(&json!("abc")), json!("abc"));
        assert_eq!(auto_cast_hash(&json!(9)), json!(9));
    }

    #[test]
    fn renders_scalars() {
        assert_eq!(render_value(&json!(12)), Some("12".to_string()));
        assert_eq!(render_value(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(render_value(&json!("x")), Some("x".to_string()));
        assert_eq!(render_value(&json!({"a": 1})), None);
    }
}

//! Cheap comparison keys for array elements.

use serde_json::Value;

use crate::core::ContentHash;

/// Comparison key of one array element.
///
/// Two elements with equal keys are structurally equal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParsedValue {
    Null,
    True,
    False,
    Number(String),
    String(String),
    Array(ContentHash),
    Object(ContentHash),
}

impl ParsedValue {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(true) => Self::True,
            Value::Bool(false) => Self::False,
            Value::Number(n) => Self::Number(n.to_string()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(_) => Self::Array(ContentHash::of_value(value)),
            Value::Object(_) => Self::Object(ContentHash::of_value(value)),
        }
    }

    #[inline]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    /// Both composites of the same shape (array/array or object/object).
    #[inline]
    pub fn same_composite_kind(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Array(_), Self::Array(_)) | (Self::Object(_), Self::Object(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinels() {
        assert_eq!(ParsedValue::of(&json!(null)), ParsedValue::Null);
        assert_eq!(ParsedValue::of(&json!(true)), ParsedValue::True);
        assert_eq!(ParsedValue::of(&json!(false)), ParsedValue::False);
    }

    #[test]
    fn test_literal_kinds_do_not_collide() {
        assert_ne!(ParsedValue::of(&json!(1)), ParsedValue::of(&json!("1")));
        assert_ne!(ParsedValue::of(&json!("null")), ParsedValue::of(&json!(null)));
    }

    #[test]
    fn test_composites_compare_structurally() {
        let a = ParsedValue::of(&json!({"x": 1, "y": 2}));
        let b = ParsedValue::of(&json!({"y": 2, "x": 1}));
        assert_eq!(a, b);
        assert!(a.is_composite());
        assert!(a.same_composite_kind(&ParsedValue::of(&json!({}))));
        assert!(!a.same_composite_kind(&ParsedValue::of(&json!([]))));
    }
}

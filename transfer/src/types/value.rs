use std::collections::HashMap;
use std::mem::size_of;

use serde_json::Value;
use tracing::warn;

use crate::constants::TOAST_UNAVAILABLE_VALUE_PLACEHOLDER;

/// Column name to raw value for one row.
pub type RowData = HashMap<String, Value>;

/// Largest integer a JSON float carries without precision loss.
const MAX_SAFE_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Renders a value for use in a primary key string.
///
/// Strings are rendered without quotes. Floats with no fractional part are rendered as
/// integers so `1` and `1.0` produce the same key.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(float)
                if !number.is_i64()
                    && !number.is_u64()
                    && float.fract() == 0.0
                    && float.abs() < MAX_SAFE_FLOAT_INTEGER =>
            {
                format!("{}", float as i64)
            }
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}

/// Returns `true` if `value` is the TOAST placeholder.
pub fn is_toast_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(value) if value == TOAST_UNAVAILABLE_VALUE_PLACEHOLDER)
}

/// Detects TOAST placeholders, collapsing object-shaped ones to the plain placeholder string.
///
/// Returns `true` if `value` is (now) the placeholder.
pub fn collapse_toast_placeholder(value: &mut Value) -> bool {
    if is_toast_placeholder(value) {
        return true;
    }

    if let Value::Object(map) = value
        && map.contains_key(TOAST_UNAVAILABLE_VALUE_PLACEHOLDER)
    {
        *value = Value::String(TOAST_UNAVAILABLE_VALUE_PLACEHOLDER.to_string());
        return true;
    }

    false
}

/// Returns an estimate of the bytes held by a row.
pub fn estimate_row_bytes(row: &RowData) -> usize {
    row.iter().fold(0usize, |acc, (key, value)| {
        let with_key = checked_add_or_saturating(acc, key.len(), "row.add_key_bytes");
        checked_add_or_saturating(
            with_key,
            estimate_value_bytes(value),
            "row.add_value_bytes",
        )
    })
}

/// Returns an estimate of the bytes held by a JSON value, including its own slot.
fn estimate_value_bytes(value: &Value) -> usize {
    let heap = match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
        Value::String(value) => value.len(),
        Value::Array(values) => values.iter().fold(0usize, |acc, value| {
            checked_add_or_saturating(acc, estimate_value_bytes(value), "json.add_array_value")
        }),
        Value::Object(values) => values.iter().fold(0usize, |acc, (key, value)| {
            let with_key = checked_add_or_saturating(acc, key.len(), "json.add_object_key");
            checked_add_or_saturating(
                with_key,
                estimate_value_bytes(value),
                "json.add_object_value",
            )
        }),
    };

    checked_add_or_saturating(size_of::<Value>(), heap, "json.add_value_slot")
}

/// Returns `left + right`, saturating on overflow while emitting a warning.
fn checked_add_or_saturating(left: usize, right: usize, context: &'static str) -> usize {
    match left.checked_add(right) {
        Some(value) => value,
        None => {
            warn!(
                context,
                left, right, "size estimate addition overflowed, saturating to usize::MAX"
            );

            usize::MAX
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn value_to_string_normalizes_numbers() {
        assert_eq!(value_to_string(&json!(1)), "1");
        assert_eq!(value_to_string(&json!(1.0)), "1");
        assert_eq!(value_to_string(&json!(1.5)), "1.5");
        assert_eq!(value_to_string(&json!("abc")), "abc");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "null");
    }

    #[test]
    fn toast_placeholders_are_collapsed() {
        let mut plain = json!(TOAST_UNAVAILABLE_VALUE_PLACEHOLDER);
        assert!(collapse_toast_placeholder(&mut plain));

        let mut nested = json!({ TOAST_UNAVAILABLE_VALUE_PLACEHOLDER: TOAST_UNAVAILABLE_VALUE_PLACEHOLDER });
        assert!(collapse_toast_placeholder(&mut nested));
        assert!(is_toast_placeholder(&nested));

        let mut regular = json!({"key": "value"});
        assert!(!collapse_toast_placeholder(&mut regular));
        assert_eq!(regular, json!({"key": "value"}));
    }

    #[test]
    fn row_size_grows_with_content() {
        let small = RowData::from([("id".to_string(), json!(1))]);
        let large = RowData::from([
            ("id".to_string(), json!(1)),
            ("name".to_string(), json!("a much longer value than before")),
        ]);

        assert!(estimate_row_bytes(&small) > 0);
        assert!(estimate_row_bytes(&large) > estimate_row_bytes(&small));
        assert_eq!(estimate_row_bytes(&RowData::new()), 0);
    }
}

//! Comparison helpers for loosely typed row values.

use crate::catalog::ColumnType;
use serde_json::{Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Numeric view of a value. Numeric strings count as numbers.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Order two values: numerically when both are numeric, otherwise as
/// strings or booleans of the same kind. Mixed kinds do not compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => match (as_f64(a), as_f64(b)) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy),
            _ => Some(x.cmp(y)),
        },
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            as_f64(a)?.partial_cmp(&as_f64(b)?)
        }
        _ => None,
    }
}

/// Order two values held in a column of `column_type`. Numeric columns
/// compare loosely; text, enum and date columns compare as plain strings,
/// the way SQLite's BINARY collation does.
pub fn compare_typed(a: &Value, b: &Value, column_type: ColumnType) -> Option<Ordering> {
    match column_type {
        ColumnType::Text | ColumnType::Enum | ColumnType::Date => {
            Some(text_form(a)?.cmp(&text_form(b)?))
        }
        _ => compare_values(a, b),
    }
}

pub fn values_equal(a: &Value, b: &Value, column_type: ColumnType) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => compare_typed(a, b, column_type) == Some(Ordering::Equal),
    }
}

/// Total order used for sorting a column of `column_type`: nulls last,
/// then values the column understands, then anything else by its JSON form.
pub fn sort_order(a: &Value, b: &Value, column_type: ColumnType) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    match column_type {
        ColumnType::Text | ColumnType::Enum | ColumnType::Date => {
            sort_key(a).cmp(&sort_key(b))
        }
        ColumnType::Boolean => ranked(a.as_bool(), b.as_bool(), a, b, bool::cmp),
        _ => ranked(as_f64(a), as_f64(b), a, b, f64::total_cmp),
    }
}

/// Strings as-is and numbers in their printed form. SQLite stores numbers
/// written to TEXT columns the same way.
fn text_form(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        _ => None,
    }
}

fn sort_key(value: &Value) -> Cow<'_, str> {
    text_form(value).unwrap_or_else(|| Cow::Owned(value.to_string()))
}

fn ranked<T>(
    x: Option<T>,
    y: Option<T>,
    a: &Value,
    b: &Value,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (x, y) {
        (Some(x), Some(y)) => cmp(&x, &y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_string().cmp(&b.to_string()),
    }
}

/// Wrap an f64 as a JSON number, collapsing non-finite results to null.
pub fn number_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Key used to bucket group-by values, so `1` and `1.0` land together.
pub fn group_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => format!("n:{f}"),
            None => format!("n:{n}"),
        },
        Value::String(s) => format!("s:{s}"),
        Value::Bool(b) => format!("b:{b}"),
        Value::Null => "null".to_string(),
        other => format!("j:{other}"),
    }
}

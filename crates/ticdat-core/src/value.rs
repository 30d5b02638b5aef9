use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single cell value.
///
/// Numbers compare by magnitude across `Int` and `Float`, so `Int(1)` and
/// `Float(1.0)` address the same primary key. NaN compares equal to itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value; booleans count as 0/1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(value) => Some(*value),
            Value::Text(value) => parse_datetime(value),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::DateTime(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

/// Parse the date-time spellings accepted in text cells.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(value);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Exact comparison of an integer with a float. Casting the integer to `f64`
/// would round above 2^53 and make distinct integers equal to the same float.
fn cmp_int_f64(int: i64, float: f64) -> Ordering {
    // 2^63, the first float past i64::MAX
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return (int as f64).total_cmp(&float);
    }
    if float >= LIMIT {
        return Ordering::Less;
    }
    if float < -LIMIT {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&float).unwrap_or(Ordering::Equal),
        other => other,
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => cmp_int_f64(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_f64(*b, *a).reverse(),
            (Value::Float(a), Value::Float(b)) => cmp_f64(*a, *b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(value) => value.hash(state),
            Value::Int(value) => value.hash(state),
            Value::Float(value) => {
                // integral floats hash like the matching Int
                if value.fract() == 0.0 && *value >= i64::MIN as f64 && *value < i64::MAX as f64 {
                    (*value as i64).hash(state);
                } else if value.is_nan() {
                    f64::NAN.to_bits().hash(state);
                } else {
                    value.to_bits().hash(state);
                }
            }
            Value::DateTime(value) => value.hash(state),
            Value::Text(value) => value.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value:?}"),
            Value::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Primary key of a row: a bare value for single-field keys, a tuple otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Scalar(Value),
    Tuple(Vec<Value>),
}

impl Key {
    /// Build the canonical key for a list of primary key values.
    pub fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            Key::Scalar(values.remove(0))
        } else {
            Key::Tuple(values)
        }
    }

    pub fn values(&self) -> &[Value] {
        match self {
            Key::Scalar(value) => std::slice::from_ref(value),
            Key::Tuple(values) => values,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Key::Scalar(value) => vec![value],
            Key::Tuple(values) => values,
        }
    }

    pub fn arity(&self) -> usize {
        self.values().len()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Scalar(value) => write!(f, "{value}"),
            Key::Tuple(values) => {
                write!(f, "(")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key::Scalar(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Scalar(value.into())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Scalar(value.into())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Scalar(value.into())
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Scalar(value.into())
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::Scalar(value.into())
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key::Tuple(vec![a.into(), b.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Key::Tuple(vec![a.into(), b.into(), c.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>, D: Into<Value>> From<(A, B, C, D)> for Key {
    fn from((a, b, c, d): (A, B, C, D)) -> Self {
        Key::Tuple(vec![a.into(), b.into(), c.into(), d.into()])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashSet};

    use super::*;

    #[test]
    fn integral_float_matches_int() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        let mut keys = HashSet::new();
        keys.insert(Key::from(3));
        assert!(keys.contains(&Key::from(3.0)));
    }

    #[test]
    fn large_integers_compare_exactly_with_floats() {
        let big = 1_i64 << 53;
        let float = Value::Float(big as f64);
        assert_eq!(Value::Int(big), float);
        assert_ne!(Value::Int(big + 1), float);
        assert!(Value::Int(big + 1) > float);
        assert!(Value::Int(i64::MAX) < Value::Float(i64::MAX as f64));
        assert!(Value::Int(i64::MIN) == Value::Float(i64::MIN as f64));
        assert!(Value::Int(-3) > Value::Float(-3.5));
        assert!(Value::Int(3) < Value::Float(3.5));

        let values: BTreeSet<Value> = [Value::Int(big), Value::Int(big + 1), float.clone()]
            .into_iter()
            .collect();
        assert_eq!(values.len(), 2);

        let mut keys = HashSet::new();
        keys.insert(Key::from(big + 1));
        assert!(!keys.contains(&Key::from(big as f64)));
        keys.insert(Key::from(big));
        assert!(keys.contains(&Key::from(big as f64)));
    }

    #[test]
    fn ordering_groups_by_kind() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(2.5),
            Value::Null,
            Value::Int(1),
            Value::Bool(true),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(1),
                Value::Float(2.5),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn nan_is_self_equal() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn key_from_values_collapses_single_field() {
        assert_eq!(Key::from_values(vec![Value::from("a")]), Key::from("a"));
        assert_eq!(Key::from_values(vec![1.into(), 2.into()]), Key::from((1, 2)));
        assert_eq!(Key::from((1, 2)).to_string(), "(1, 2)");
    }

    #[test]
    fn parses_datetime_spellings() {
        assert!(parse_datetime("2024-03-01").is_some());
        assert!(parse_datetime("2024-03-01 10:30:00").is_some());
        assert!(parse_datetime("2024-03-01T10:30").is_some());
        assert!(parse_datetime("not a date").is_none());
    }
}

//! Records: ordered `(field, value)` pairs.
//!
//! Field order is kept exactly as given. Positional append relies on it, so a
//! record never goes through a hash map.

use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

/// A scalar cell value.
///
/// Integers above `i64::MAX` land in `UInt`; only numbers with a fraction or
/// exponent, or beyond `u64`, become `Float`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl Value {
    /// String form used by positional append.
    pub fn to_cell_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One input row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `field`. A repeated field keeps its first position and takes the
    /// new value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

// Map entries arrive in document order, which is the order we keep.
impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut record = Record::new();
                while let Some((field, value)) = access.next_entry::<String, Value>()? {
                    record.insert(field, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

impl From<Record> for Vec<(String, Value)> {
    fn from(record: Record) -> Self {
        record.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_key_order_is_kept() -> anyhow::Result<()> {
        let record: Record = serde_json::from_str(r#"{"c": 3, "a": "x", "b": true, "d": null, "e": 1.5}"#)?;
        let pairs: Vec<(String, Value)> = record.into();
        assert_eq!(
            pairs,
            vec![
                ("c".into(), Value::Int(3)),
                ("a".into(), Value::from("x")),
                ("b".into(), Value::Bool(true)),
                ("d".into(), Value::Null),
                ("e".into(), Value::Float(1.5)),
            ]
        );
        Ok(())
    }

    #[test]
    fn large_integers_keep_precision() -> anyhow::Result<()> {
        let record: Record =
            serde_json::from_str(r#"{"max": 18446744073709551615, "neg": -9223372036854775808, "big": 1e20}"#)?;
        let values: Vec<&Value> = record.values().collect();
        assert_eq!(values[0], &Value::UInt(u64::MAX));
        assert_eq!(values[0].to_cell_string(), "18446744073709551615");
        assert_eq!(values[1], &Value::Int(i64::MIN));
        assert_eq!(values[2], &Value::Float(1e20));
        Ok(())
    }

    #[test]
    fn nested_values_are_rejected() {
        let res: Result<Record, _> = serde_json::from_str(r#"{"a": [1, 2]}"#);
        assert!(res.is_err());
    }

    #[test]
    fn repeated_field_keeps_first_position() {
        let mut record = Record::from([("a", 1), ("b", 2)]);
        record.insert("a", 9);
        let pairs: Vec<(String, Value)> = record.into();
        assert_eq!(pairs, vec![("a".into(), Value::Int(9)), ("b".into(), Value::Int(2))]);
    }

    #[test]
    fn cell_strings() {
        assert_eq!(Value::Int(1).to_cell_string(), "1");
        assert_eq!(Value::Float(2.5).to_cell_string(), "2.5");
        assert_eq!(Value::Float(3.0).to_cell_string(), "3");
        assert_eq!(Value::Bool(false).to_cell_string(), "false");
        assert_eq!(Value::Null.to_cell_string(), "");
    }
}

//! Metadata that can accompany a value list.
//!
//! Collectd attaches small typed key/value pairs to value lists. The network
//! protocol does not carry them, so this module is purely an in-memory (and
//! JSON) representation.

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// A single metadata entry. Collectd supports exactly these five types.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Float64(f64),
    Int64(i64),
    UInt64(u64),
    String(String),
}

// NaN entries compare equal so a JSON round trip (null <-> NaN) can be
// verified with plain equality.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => false,
        }
    }
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::String(ref v) => Some(v),
            _ => None,
        }
    }

    /// A stringified view of the entry, regardless of its type.
    pub fn as_string(&self) -> String {
        match *self {
            Value::Bool(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::UInt64(v) => v.to_string(),
            Value::String(ref v) => v.clone(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::Bool(v) => serializer.serialize_bool(v),
            Value::Int64(v) => serializer.serialize_i64(v),
            Value::UInt64(v) => serializer.serialize_u64(v),
            Value::String(ref v) => serializer.serialize_str(v),
            // JSON has no NaN; collectd maps it to null and back.
            Value::Float64(v) => {
                if v.is_nan() {
                    serializer.serialize_unit()
                } else {
                    serializer.serialize_f64(v)
                }
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a boolean, number, string or null")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int64(v))
    }

    // Integers probe as signed first; only values beyond i64 stay unsigned.
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        if v <= i64::max_value() as u64 {
            Ok(Value::Int64(v as i64))
        } else {
            Ok(Value::UInt64(v))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float64(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Float64(::std::f64::NAN))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// A map of metadata entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    entries: HashMap<String, Value>,
}

impl Data {
    pub fn new() -> Data {
        Data::default()
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys, sorted, so listings and serializations are deterministic.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges `other` into a copy of `self`; entries from `other` win on
    /// conflicting keys.
    pub fn clone_merge(&self, other: &Data) -> Data {
        let mut merged = self.clone();
        for (key, value) in &other.entries {
            merged.entries.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for key in self.keys() {
            map.serialize_entry(key, &self.entries[key])?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Data, D::Error> {
        let entries = HashMap::<String, Value>::deserialize(deserializer)?;
        Ok(Data { entries })
    }
}

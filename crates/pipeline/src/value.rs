//! Attribute values carried by resources and records.

use serde_json::Value as Json;

/// A value attached to a record attribute or used as a log body.
///
/// `Map` keeps insertion order; it is what structured log bodies become
/// (`kvlistValue` on the wire).
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<AttributeValue>),
    Map(Vec<(String, AttributeValue)>),
}

impl AttributeValue {
    /// Build a `Map` value from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<AttributeValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AttributeValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the string content if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v.into())
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(v.into())
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        // OTLP has no unsigned integer; values past i64::MAX degrade to doubles.
        match i64::try_from(v) {
            Ok(i) => AttributeValue::Int(i),
            Err(_) => AttributeValue::Double(v as f64),
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<f32> for AttributeValue {
    fn from(v: f32) -> Self {
        AttributeValue::Double(v.into())
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(v: Vec<AttributeValue>) -> Self {
        AttributeValue::Array(v)
    }
}

impl From<Json> for AttributeValue {
    fn from(v: Json) -> Self {
        match v {
            Json::Null => AttributeValue::String(String::new()),
            Json::Bool(b) => AttributeValue::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => AttributeValue::Double(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => AttributeValue::String(s),
            Json::Array(items) => {
                AttributeValue::Array(items.into_iter().map(AttributeValue::from).collect())
            }
            Json::Object(map) => AttributeValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// A single named attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered attribute list. Setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<KeyValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value,
            None => self.0.push(KeyValue { key, value }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<KeyValue> for Attributes {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        let mut attrs = Attributes::new();
        for kv in iter {
            attrs.set(kv.key, kv.value);
        }
        attrs
    }
}

impl<const N: usize> From<[KeyValue; N]> for Attributes {
    fn from(kvs: [KeyValue; N]) -> Self {
        kvs.into_iter().collect()
    }
}

impl From<Vec<KeyValue>> for Attributes {
    fn from(kvs: Vec<KeyValue>) -> Self {
        kvs.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// File: src/payload.rs
//
// Tagged payload value model shared by every store boundary
// Merging, structural comparison, and schema validation all operate on this
// representation instead of untyped JSON

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single field value carried by a sync payload.
///
/// Integer precedes Float so untagged deserialization keeps whole numbers
/// integral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Name of the variant, used by schema type checks.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Text(_) => "text",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }

    /// Interpret the value as a UTC timestamp.
    ///
    /// Integers are epoch milliseconds, floats are epoch seconds, and text
    /// must parse as RFC 3339.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Integer(ms) => Utc.timestamp_millis_opt(*ms).single(),
            FieldValue::Float(secs) => Utc.timestamp_millis_opt((secs * 1000.0) as i64).single(),
            FieldValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert from a JSON value, losslessly for everything JSON can carry.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Value::from(*f),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

/// A structural difference between two payloads at one field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Dotted path into nested maps, e.g. `address.city`
    pub path: String,
    pub value_a: Option<FieldValue>,
    pub value_b: Option<FieldValue>,
}

/// Ordered field map carried by sync events and adapter snapshots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub BTreeMap<String, FieldValue>);

impl Payload {
    pub fn new() -> Self {
        Payload(BTreeMap::new())
    }

    pub fn insert(&mut self, key: String, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }

    /// Timestamp of the most recent mutation, falling back to creation time.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.get("updated_at")
            .and_then(FieldValue::as_timestamp)
            .or_else(|| self.created_at())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.get("created_at").and_then(FieldValue::as_timestamp)
    }

    /// Convert from a JSON object. Non-object values produce an empty payload.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match FieldValue::from_json(value) {
            FieldValue::Map(map) => Payload(map),
            _ => Payload::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        FieldValue::Map(self.0.clone()).to_json()
    }

    /// Deep field-by-field comparison, descending into nested maps.
    ///
    /// Every divergent path yields one [`FieldDiff`]; identical payloads
    /// yield an empty list.
    pub fn diff(&self, other: &Payload) -> Vec<FieldDiff> {
        let mut diffs = Vec::new();
        diff_maps("", &self.0, &other.0, &mut diffs);
        diffs
    }
}

impl FromIterator<(String, FieldValue)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Payload(iter.into_iter().collect())
    }
}

fn diff_maps(
    prefix: &str,
    a: &BTreeMap<String, FieldValue>,
    b: &BTreeMap<String, FieldValue>,
    diffs: &mut Vec<FieldDiff>,
) {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match (a.get(key), b.get(key)) {
            (Some(FieldValue::Map(ma)), Some(FieldValue::Map(mb))) => {
                diff_maps(&path, ma, mb, diffs);
            }
            (Some(va), Some(vb)) if va == vb => {}
            (va, vb) => diffs.push(FieldDiff {
                path,
                value_a: va.cloned(),
                value_b: vb.cloned(),
            }),
        }
    }
}

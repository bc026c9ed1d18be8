//! Structured packet payloads
//!
//! A payload is a tree of scalars, maps, and sequences whose leaves may be
//! raw byte buffers. In the text log format a binary leaf is written as the
//! tagged object `{"type":"Buffer","data":[<byte>, ...]}` so it survives the
//! trip through JSON byte-for-byte. [`PayloadValue::from_json`] is the single
//! canonical restoration function: it walks arbitrarily nested maps and
//! sequences and rebuilds every tagged leaf, so no caller ever re-implements
//! the tag check.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Tag object key marking a serialized binary leaf.
const BUFFER_TAG: &str = "Buffer";

/// Tag marking a binary leaf that was redacted at record time.
const REDACTED_TAG: &str = "RedactedBuffer";

/// Structured payload tree with binary-capable leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Raw bytes; serialized as `{"type":"Buffer","data":[...]}`.
    Binary(Vec<u8>),
    Seq(Vec<PayloadValue>),
    /// Key/value pairs in insertion order.
    Map(Vec<(String, PayloadValue)>),
}

impl PayloadValue {
    /// Convert to the JSON representation used by the log format.
    pub fn to_json(&self) -> Value {
        match self {
            PayloadValue::Null => Value::Null,
            PayloadValue::Bool(b) => Value::Bool(*b),
            PayloadValue::Int(n) => Value::Number((*n).into()),
            PayloadValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            PayloadValue::Text(s) => Value::String(s.clone()),
            PayloadValue::Binary(bytes) => {
                let data: Vec<Value> = bytes.iter().map(|b| Value::Number((*b).into())).collect();
                let mut obj = serde_json::Map::new();
                obj.insert("type".into(), Value::String(BUFFER_TAG.into()));
                obj.insert("data".into(), Value::Array(data));
                Value::Object(obj)
            }
            PayloadValue::Seq(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            PayloadValue::Map(pairs) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in pairs {
                    obj.insert(k.clone(), v.to_json());
                }
                Value::Object(obj)
            }
        }
    }

    /// Restore a payload from its JSON representation.
    ///
    /// Recurses into nested maps and sequences and turns every tagged
    /// `{"type":"Buffer","data":[...]}` object back into a true byte buffer.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => PayloadValue::Null,
            Value::Bool(b) => PayloadValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PayloadValue::Int(i)
                } else {
                    // u64 beyond i64::MAX or a true float
                    PayloadValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => PayloadValue::Text(s.clone()),
            Value::Array(items) => {
                PayloadValue::Seq(items.iter().map(PayloadValue::from_json).collect())
            }
            Value::Object(obj) => {
                if let Some(bytes) = as_buffer_tag(obj) {
                    return PayloadValue::Binary(bytes);
                }
                PayloadValue::Map(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), PayloadValue::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Replace every binary leaf with a size-only redaction marker.
    ///
    /// Trades replayability for log size; used by the recorder's
    /// size-reduction mode.
    pub fn redacted(&self) -> PayloadValue {
        match self {
            PayloadValue::Binary(bytes) => PayloadValue::Map(vec![
                ("type".into(), PayloadValue::Text(REDACTED_TAG.into())),
                ("bytes".into(), PayloadValue::Int(bytes.len() as i64)),
            ]),
            PayloadValue::Seq(items) => {
                PayloadValue::Seq(items.iter().map(Self::redacted).collect())
            }
            PayloadValue::Map(pairs) => PayloadValue::Map(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.redacted()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// True when the payload is the null scalar.
    pub fn is_null(&self) -> bool {
        matches!(self, PayloadValue::Null)
    }

    /// Convenience constructor for map payloads.
    pub fn map(pairs: impl IntoIterator<Item = (&'static str, PayloadValue)>) -> Self {
        PayloadValue::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// Recognize the `{"type":"Buffer","data":[...]}` tag shape.
fn as_buffer_tag(obj: &serde_json::Map<String, Value>) -> Option<Vec<u8>> {
    if obj.len() != 2 {
        return None;
    }
    if obj.get("type").and_then(Value::as_str) != Some(BUFFER_TAG) {
        return None;
    }
    let data = obj.get("data")?.as_array()?;
    let mut bytes = Vec::with_capacity(data.len());
    for item in data {
        let n = item.as_u64()?;
        if n > u8::MAX as u64 {
            return None;
        }
        bytes.push(n as u8);
    }
    Some(bytes)
}

impl Serialize for PayloadValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PayloadValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(PayloadValue::from_json(&value))
    }
}

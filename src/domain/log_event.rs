use super::severity::Severity;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single structured journal record.
///
/// Produced by the reader and handed to the forwarder by value, so every
/// event is consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub severity: Severity,
    pub message: String,

    // Passthrough fields from the source, merged into the payload as-is
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl LogEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            severity,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Flat JSON object published for this event.
    ///
    /// Raw fields are merged at the top level; the four canonical keys
    /// always win over a raw field of the same name.
    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 4);

        for (key, value) in &self.fields {
            object.insert(key.clone(), Value::String(value.clone()));
        }

        object.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        object.insert("source".to_string(), Value::String(self.source.clone()));
        object.insert(
            "severity".to_string(),
            Value::String(self.severity.as_str().to_string()),
        );
        object.insert("message".to_string(), Value::String(self.message.clone()));

        Value::Object(object)
    }

    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(&self.to_json()).map(Bytes::from)
    }
}

//! Event payload model.
//!
//! An event is an opaque mapping of string keys to structured values. The
//! pipeline never interprets content except for the configured throttle key
//! field and the field subset hashed for deduplication.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A structured log record flowing through the pipeline.
///
/// Fields are stored sorted by name so that iteration order (and therefore
/// signature computation) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    fields: BTreeMap<String, Value>,
}

impl Event {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, consuming and returning the event.
    ///
    /// ```
    /// use logsluice::Event;
    ///
    /// let event = Event::new()
    ///     .with_field("level", "ERROR")
    ///     .with_field("attempt", 3);
    /// assert_eq!(event.len(), 2);
    /// ```
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Render a field as a plain string.
    ///
    /// String values are returned as-is; other values use their compact JSON
    /// rendering. Used for throttle key extraction, where `user_id = 42` and
    /// `user_id = "42"` should land in the same bucket.
    pub fn field_as_string(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Iterate over all fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the event carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for Event {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

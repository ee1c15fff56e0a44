use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provider-specific transformation parameters, e.g.
/// `{ "recolor": { "prompt": "car", "to": "blue" } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformationConfig(Map<String, Value>);

impl TransformationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` unless `value` is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Writes `self[section][field] = value`, turning a non-object `section` into an object.
    pub fn set_field(&mut self, section: &str, field: &str, value: impl Into<Value>) {
        let slot = self
            .0
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(fields) = slot {
            fields.insert(field.to_string(), value.into());
        }
    }
}

impl From<Map<String, Value>> for TransformationConfig {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

/// Merges `source` into `target`. Nested objects merge key by key, anything
/// else in `source` replaces the value in `target`. Keys only in `target`
/// survive. A missing `source` leaves `target` as is; a missing `target`
/// yields a copy of `source`.
pub fn deep_merge(
    source: Option<&TransformationConfig>,
    target: Option<&TransformationConfig>,
) -> Option<TransformationConfig> {
    match (source, target) {
        (None, target) => target.cloned(),
        (Some(source), None) => Some(source.clone()),
        (Some(source), Some(target)) => {
            let mut merged = target.0.clone();
            merge_into(&mut merged, &source.0);
            Some(TransformationConfig(merged))
        }
    }
}

fn merge_into(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_into(existing, nested),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/transformation_tests.rs"]
mod tests;

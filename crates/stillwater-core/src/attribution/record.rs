//! Attribution records and deep-link payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key the attribution provider uses for the install status.
pub const STATUS_KEY: &str = "af_status";
/// Status value for installs not driven by a campaign.
pub const ORGANIC_STATUS: &str = "Organic";

/// String-keyed attribution data for the current process.
///
/// Built from conversion data, the identity endpoint response, and deep-link
/// payloads. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributionRecord(Map<String, Value>);

/// Deep-link values share the record shape.
pub type DeepLinkPayload = AttributionRecord;

impl AttributionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts any JSON value; non-objects become an empty record.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Whether the install is marked as organic (non-paid).
    pub fn is_organic(&self) -> bool {
        self.get(STATUS_KEY).and_then(Value::as_str) == Some(ORGANIC_STATUS)
    }

    /// Fill keys missing from `self` with values from `other`.
    ///
    /// Existing keys are never overwritten.
    pub fn fill_missing_from(&mut self, other: &AttributionRecord) {
        for (key, value) in &other.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// `self` merged with `other`, `self` winning every conflict.
    pub fn merged_with(mut self, other: &AttributionRecord) -> Self {
        self.fill_missing_from(other);
        self
    }
}

impl From<Map<String, Value>> for AttributionRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(value: Value) -> AttributionRecord {
        AttributionRecord::from_value(value)
    }

    #[test]
    fn primary_wins_on_conflict() {
        let conversion = record(json!({"a": 1}));
        let deep_link = record(json!({"a": 2, "b": 3}));
        assert_eq!(conversion.merged_with(&deep_link), record(json!({"a": 1, "b": 3})));
    }

    #[test]
    fn non_object_values_become_empty() {
        assert!(record(json!([1, 2])).is_empty());
        assert!(record(Value::Null).is_empty());
    }

    #[test]
    fn organic_detection_requires_exact_string() {
        assert!(record(json!({"af_status": "Organic"})).is_organic());
        assert!(!record(json!({"af_status": "Non-organic"})).is_organic());
        assert!(!record(json!({"af_status": true})).is_organic());
        assert!(!AttributionRecord::new().is_organic());
    }

    proptest! {
        #[test]
        fn merge_keeps_every_primary_value(
            primary in proptest::collection::btree_map("[a-d]", 0i64..10, 0..4),
            secondary in proptest::collection::btree_map("[a-f]", 10i64..20, 0..6),
        ) {
            let p = AttributionRecord::from_value(json!(primary));
            let s = AttributionRecord::from_value(json!(secondary));
            let merged = p.clone().merged_with(&s);

            for (k, v) in p.as_map() {
                prop_assert_eq!(merged.get(k), Some(v));
            }
            for (k, v) in s.as_map() {
                if p.get(k).is_none() {
                    prop_assert_eq!(merged.get(k), Some(v));
                }
            }
        }
    }
}

//! Property bags with change tracking.
//!
//! A [`Properties`] bag remembers which keys were set and which were deleted
//! since it was loaded (or since the last [`Properties::clear_deltas`]). The
//! update paths of both backends render only these deltas.
//!
//! | Operation | Value map | Modified set | Deleted set |
//! |-----------|-----------|--------------|-------------|
//! | `set(k)`    | insert     | insert       | remove      |
//! | `delete(k)` | remove     | remove       | insert      |
//! | `merge(o)`  | overlay    | union o.modified, un-delete | apply o.deleted |

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::value::Value;

/// Error returned by typed property access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// The key is not present.
    #[error("property not found: {0}")]
    NotFound(String),
    /// The value exists but has a different type.
    #[error("expected property type {expected} but received {received}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Actual type of the stored value.
        received: &'static str,
    },
    /// An identity key was requested for an update with no identity properties.
    #[error("update has no identity properties")]
    MissingIdentity,
}

/// Mutable key/value bag carried by nodes and relationships.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Properties {
    map: BTreeMap<String, Value>,
    #[serde(skip)]
    modified: BTreeSet<String>,
    #[serde(skip)]
    deleted: BTreeSet<String>,
}

impl Properties {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing map without marking anything as modified.
    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self {
            map,
            ..Default::default()
        }
    }

    /// Builder form of [`Properties::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a value, marking the key modified.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        self.deleted.remove(&key);
        self.modified.insert(key.clone());
        self.map.insert(key, value.into());
        self
    }

    /// Set a value only if the key is absent.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if !self.map.contains_key(&key) {
            self.set(key, value);
        }
        self
    }

    /// Delete a key, marking it deleted.
    pub fn delete(&mut self, key: &str) -> &mut Self {
        self.map.remove(key);
        self.modified.remove(key);
        self.deleted.insert(key.to_string());
        self
    }

    /// Typed accessor for a key.
    pub fn get<'a>(&'a self, key: &'a str) -> PropertyValue<'a> {
        PropertyValue {
            key,
            value: self.map.get(key),
        }
    }

    /// Raw value for a key.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Whether a key is present.
    pub fn exists(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the bag holds no values.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The underlying map.
    pub fn map(&self) -> &BTreeMap<String, Value> {
        &self.map
    }

    /// Consume the bag, returning the value map.
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.map
    }

    /// Values of keys modified since load.
    pub fn modified(&self) -> BTreeMap<String, Value> {
        self.modified
            .iter()
            .filter_map(|key| self.map.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    /// Keys deleted since load.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.iter().cloned().collect()
    }

    /// Whether there are pending modifications or deletions.
    pub fn has_deltas(&self) -> bool {
        !self.modified.is_empty() || !self.deleted.is_empty()
    }

    /// Forget the modified and deleted sets. Values are kept.
    pub fn clear_deltas(&mut self) {
        self.modified.clear();
        self.deleted.clear();
    }

    /// Overlay another bag onto this one, including its deltas.
    pub fn merge(&mut self, other: &Properties) {
        for (key, value) in &other.map {
            self.map.insert(key.clone(), value.clone());
        }

        for key in &other.modified {
            self.modified.insert(key.clone());
            self.deleted.remove(key);
        }

        for key in &other.deleted {
            self.deleted.insert(key.clone());
            self.map.remove(key);
            self.modified.remove(key);
        }
    }

    /// The map as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Map(self.map.clone()).to_json()
    }
}

impl From<BTreeMap<String, Value>> for Properties {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Properties::from_map(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Properties::new();
        for (key, value) in iter {
            properties.set(key, value);
        }
        properties
    }
}

/// Typed view of a single property.
#[derive(Debug, Clone, Copy)]
pub struct PropertyValue<'a> {
    key: &'a str,
    value: Option<&'a Value>,
}

impl<'a> PropertyValue<'a> {
    fn present(&self) -> Result<&'a Value, PropertyError> {
        self.value.ok_or_else(|| PropertyError::NotFound(self.key.to_string()))
    }

    fn mismatch(expected: &'static str, value: &Value) -> PropertyError {
        PropertyError::TypeMismatch {
            expected,
            received: value.type_name(),
        }
    }

    /// Whether the key was present.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// The raw value.
    pub fn any(&self) -> Option<&'a Value> {
        self.value
    }

    /// Value as a boolean.
    pub fn as_bool(&self) -> Result<bool, PropertyError> {
        match self.present()? {
            Value::Bool(b) => Ok(*b),
            other => Err(Self::mismatch("bool", other)),
        }
    }

    /// Value as a signed integer. Integral floats are accepted.
    pub fn as_int(&self) -> Result<i64, PropertyError> {
        match self.present()? {
            Value::Int(i) => Ok(*i),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            other => Err(Self::mismatch("int64", other)),
        }
    }

    /// Value as a float. Integers are widened.
    pub fn as_float(&self) -> Result<f64, PropertyError> {
        match self.present()? {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            other => Err(Self::mismatch("float64", other)),
        }
    }

    /// Value as a string.
    pub fn as_string(&self) -> Result<&'a str, PropertyError> {
        match self.present()? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(Self::mismatch("string", other)),
        }
    }

    /// Value as a UTC instant.
    ///
    /// Accepts datetimes, RFC 3339 strings, and unix epoch seconds given as
    /// integers or floats.
    pub fn as_time(&self) -> Result<DateTime<Utc>, PropertyError> {
        let value = self.present()?;
        match value {
            Value::DateTime(dt) => Ok(*dt),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| Self::mismatch("time", value)),
            Value::Int(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| Self::mismatch("time", value)),
            Value::Float(secs) => {
                let whole = secs.trunc() as i64;
                let nanos = (secs.fract() * 1e9).round() as u32;
                Utc.timestamp_opt(whole, nanos)
                    .single()
                    .ok_or_else(|| Self::mismatch("time", value))
            }
            other => Err(Self::mismatch("time", other)),
        }
    }

    /// Value as a list of integers.
    pub fn as_int_slice(&self) -> Result<Vec<i64>, PropertyError> {
        match self.present()? {
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Int(i) => Ok(*i),
                    other => Err(Self::mismatch("[]int64", other)),
                })
                .collect(),
            other => Err(Self::mismatch("[]int64", other)),
        }
    }

    /// Value as a list of strings.
    pub fn as_string_slice(&self) -> Result<Vec<String>, PropertyError> {
        match self.present()? {
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(Self::mismatch("[]string", other)),
                })
                .collect(),
            other => Err(Self::mismatch("[]string", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_and_delete_are_exclusive() {
        let mut props = Properties::new();
        props.set("name", "alice");
        props.delete("name");

        assert!(props.modified().is_empty());
        assert_eq!(props.deleted(), vec!["name".to_string()]);

        props.set("name", "bob");
        assert!(props.deleted().is_empty());
        assert_eq!(props.modified().get("name"), Some(&Value::from("bob")));
    }

    #[test]
    fn test_loaded_properties_have_no_deltas() {
        let mut map = BTreeMap::new();
        map.insert("objectid".to_string(), Value::from("1-2-3"));

        let props = Properties::from_map(map);
        assert!(!props.has_deltas());
        assert_eq!(props.get("objectid").as_string().unwrap(), "1-2-3");
    }

    #[test]
    fn test_merge_applies_other_deltas() {
        let mut left = Properties::new().with("a", 1).with("b", 2);
        let mut right = Properties::new().with("c", 3);
        right.delete("a");

        left.merge(&right);

        assert!(!left.exists("a"));
        assert_eq!(left.get("c").as_int().unwrap(), 3);
        assert_eq!(left.deleted(), vec!["a".to_string()]);
        assert!(left.modified().contains_key("b"));
    }

    #[test]
    fn test_type_negotiation_errors() {
        let props = Properties::new().with("n", "text");

        assert_eq!(
            props.get("n").as_int().unwrap_err().to_string(),
            "expected property type int64 but received string"
        );
        assert_eq!(
            props.get("missing").as_bool().unwrap_err(),
            PropertyError::NotFound("missing".to_string())
        );
    }

    #[test]
    fn test_time_negotiation() {
        let props = Properties::new()
            .with("rfc", "2024-05-01T00:00:00Z")
            .with("unix", 1_714_521_600i64)
            .with("float", 1_714_521_600.5f64);

        let rfc = props.get("rfc").as_time().unwrap();
        assert_eq!(rfc, props.get("unix").as_time().unwrap());
        assert_eq!(props.get("float").as_time().unwrap().timestamp_subsec_millis(), 500);
    }

    proptest! {
        #[test]
        fn prop_modified_and_deleted_never_overlap(ops in proptest::collection::vec((0u8..4, any::<bool>()), 0..64)) {
            let mut props = Properties::new();
            for (key, set) in ops {
                let key = format!("k{key}");
                if set {
                    props.set(key, 1);
                } else {
                    props.delete(&key);
                }
            }

            let modified = props.modified();
            for deleted in props.deleted() {
                prop_assert!(!modified.contains_key(&deleted));
                prop_assert!(!props.exists(&deleted));
            }
        }
    }
}

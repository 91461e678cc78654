//! Dotted field paths and the document-map operations built on them.

use crate::constants::store::FIELD_PATH_SEPARATOR;
use crate::error::StoreError;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Document fields keyed by name
pub type DocumentData = Map<String, Value>;

/// Ordered field writes applied by an update
pub type FieldPatch = Vec<(FieldPath, FieldValue)>;

/// Address of a possibly nested field, e.g. `address.city`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        Self::from_segments(path.split(FIELD_PATH_SEPARATOR))
            .map_err(|_| StoreError::InvalidFieldPath(path.to_string()))
    }

    /// Build a path from raw segments, which may themselves contain dots.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(StoreError::InvalidFieldPath(segments.join(".")));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn get<'a>(&self, data: &'a DocumentData) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = data.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Write `value` at this path, creating or replacing intermediate maps.
    pub fn set(&self, data: &mut DocumentData, value: Value) {
        let (last, parents) = match self.segments.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut current = data;
        for segment in parents {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            current = map;
        }
        current.insert(last.clone(), value);
    }

    /// Remove the field at this path. Missing parents make this a no-op.
    pub fn delete(&self, data: &mut DocumentData) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = data;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(last)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for FieldPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

/// Value written to a field by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Removes the field.
    Delete,
}

impl FieldValue {
    pub fn apply(&self, path: &FieldPath, data: &mut DocumentData) {
        match self {
            FieldValue::Value(value) => path.set(data, value.clone()),
            FieldValue::Delete => {
                path.delete(data);
            }
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

/// Apply every write of `patch` in order; a later write to the same path wins.
pub fn apply_patch(data: &mut DocumentData, patch: &[(FieldPath, FieldValue)]) {
    for (path, value) in patch {
        value.apply(path, data);
    }
}

/// Recursively merge `source` into `target`. Nested maps merge; other values overwrite.
pub fn deep_merge(target: &mut DocumentData, source: &DocumentData) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> DocumentData {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(FieldPath::parse("a.b").is_ok());
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse(".a").is_err());
        assert_eq!(FieldPath::parse("a.b.c").unwrap().to_string(), "a.b.c");
    }

    #[test]
    fn test_segments_may_contain_dots() {
        let path = FieldPath::from_segments(["stats", "v1.2"]).unwrap();
        let data = doc(json!({"stats": {"v1.2": 7}}));
        assert_eq!(path.get(&data), Some(&json!(7)));
    }

    #[test]
    fn test_get_nested() {
        let data = doc(json!({"a": {"b": {"c": 1}}, "x": 2}));
        assert_eq!(FieldPath::parse("a.b.c").unwrap().get(&data), Some(&json!(1)));
        assert_eq!(FieldPath::parse("x.y").unwrap().get(&data), None);
        assert_eq!(FieldPath::parse("missing").unwrap().get(&data), None);
    }

    #[test]
    fn test_set_creates_and_replaces_parents() {
        let mut data = doc(json!({"a": 1}));
        FieldPath::parse("a.b").unwrap().set(&mut data, json!(true));
        FieldPath::parse("n.m").unwrap().set(&mut data, json!("v"));
        assert_eq!(Value::Object(data), json!({"a": {"b": true}, "n": {"m": "v"}}));
    }

    #[test]
    fn test_delete_leaves_siblings() {
        let mut data = doc(json!({"a": {"b": 1, "c": 2}, "d": 3}));
        let removed = FieldPath::parse("a.b").unwrap().delete(&mut data);
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(FieldPath::parse("q.r").unwrap().delete(&mut data), None);
        assert_eq!(Value::Object(data), json!({"a": {"c": 2}, "d": 3}));
    }

    #[test]
    fn test_patch_applies_in_order() {
        let mut data = doc(json!({"old": 5}));
        let patch = vec![
            (FieldPath::parse("old").unwrap(), FieldValue::Delete),
            (FieldPath::parse("new").unwrap(), json!(5).into()),
            (FieldPath::parse("new").unwrap(), json!(6).into()),
        ];
        apply_patch(&mut data, &patch);
        assert_eq!(Value::Object(data), json!({"new": 6}));
    }

    #[test]
    fn test_deep_merge() {
        let mut target = doc(json!({"a": {"b": 1, "c": 2}, "keep": true}));
        let source = doc(json!({"a": {"c": 3, "d": 4}, "e": 5}));
        deep_merge(&mut target, &source);
        assert_eq!(
            Value::Object(target),
            json!({"a": {"b": 1, "c": 3, "d": 4}, "keep": true, "e": 5})
        );
    }
}

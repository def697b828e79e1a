use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::types::DbValue;

/// An ordered mapping from column name to value.
///
/// Ordering is observable: it determines INSERT column order and CSV column
/// order, so the record keeps its entries in insertion order rather than
/// sorting or hashing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, DbValue)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Set a column value. Replaces in place when the column already exists,
    /// otherwise appends, preserving first-seen order.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<DbValue>) {
        let column = column.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(name, _)| *name == column) {
            slot.1 = value;
        } else {
            self.entries.push((column, value));
        }
    }

    /// Builder-style `set` for literal construction.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.set(column, value);
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Build a record from a JSON object, preserving key order.
    ///
    /// Non-object input yields an empty record.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        let mut record = Record::new();
        if let JsonValue::Object(map) = value {
            for (key, val) in map {
                record.set(key.clone(), DbValue::from(val.clone()));
            }
        }
        record
    }
}

impl FromIterator<(String, DbValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, DbValue)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a (String, DbValue);
    type IntoIter = std::slice::Iter<'a, (String, DbValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, &value_to_json(value))?;
        }
        map.end()
    }
}

/// Render a value as JSON for serialization and CSV/debug output.
#[must_use]
pub fn value_to_json(value: &DbValue) -> JsonValue {
    match value {
        DbValue::Int(i) => JsonValue::from(*i),
        DbValue::Float(f) => JsonValue::from(*f),
        DbValue::Text(s) => JsonValue::String(s.clone()),
        DbValue::Bool(b) => JsonValue::Bool(*b),
        DbValue::Date(d) => JsonValue::String(d.to_string()),
        DbValue::Timestamp(ts) => JsonValue::String(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        DbValue::Json(j) => j.clone(),
        DbValue::Blob(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
        DbValue::Array(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        DbValue::Null => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let record = Record::new()
            .with("zeta", 1)
            .with("alpha", 2)
            .with("mid", 3);
        let columns: Vec<&str> = record.columns().collect();
        assert_eq!(columns, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut record = Record::new().with("a", 1).with("b", 2);
        record.set("a", 10);
        assert_eq!(record.get("a"), Some(&DbValue::Int(10)));
        let columns: Vec<&str> = record.columns().collect();
        assert_eq!(columns, vec!["a", "b"]);
    }

    #[test]
    fn from_json_keeps_key_order() {
        let value: JsonValue = serde_json::from_str(r#"{"b": 1, "a": "x", "c": null}"#).unwrap();
        let record = Record::from_json(&value);
        let columns: Vec<&str> = record.columns().collect();
        assert_eq!(columns, vec!["b", "a", "c"]);
        assert!(record.get("c").unwrap().is_null());
    }
}

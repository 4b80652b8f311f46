use std::collections::BTreeMap;

use quiver_common::{PropertyId, PropertyValue};
use serde::{Deserialize, Serialize};

/// Property map of a vertex or edge. An absent key and an explicit
/// `Null` are the same thing: storing `Null` removes the key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyRecord(BTreeMap<PropertyId, PropertyValue>);

impl PropertyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: PropertyId) -> Option<&PropertyValue> {
        self.0.get(&key)
    }

    /// Stores `value` under `key` and returns the previous value
    /// (`Null` when the key was absent). Storing `Null` removes the
    /// key.
    pub fn set(&mut self, key: PropertyId, value: PropertyValue) -> PropertyValue {
        let previous = if value.is_null() {
            self.0.remove(&key)
        } else {
            self.0.insert(key, value)
        };
        previous.unwrap_or(PropertyValue::Null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PropertyId, PropertyValue)> for PropertyRecord {
    fn from_iter<I: IntoIterator<Item = (PropertyId, PropertyValue)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (key, value) in iter {
            record.set(key, value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_returns_previous_value() {
        let mut record = PropertyRecord::new();
        assert_eq!(record.set(1, PropertyValue::Int(1)), PropertyValue::Null);
        assert_eq!(record.set(1, PropertyValue::Int(2)), PropertyValue::Int(1));
        assert_eq!(record.get(1), Some(&PropertyValue::Int(2)));
    }

    #[test]
    fn null_removes_the_key() {
        let mut record = PropertyRecord::new();
        record.set(1, PropertyValue::String("x".into()));
        let prev = record.set(1, PropertyValue::Null);
        assert_eq!(prev, PropertyValue::String("x".into()));
        assert_eq!(record.get(1), None);
        assert!(record.is_empty());
        // Removing an absent key is a no-op.
        assert_eq!(record.set(2, PropertyValue::Null), PropertyValue::Null);
    }
}

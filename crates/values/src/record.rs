use indexmap::IndexMap;

use crate::data_type::DataType;
use crate::errors::{ValueError, ValueResult};
use crate::value::Value;

/// An ordered set of named values, such as one row of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordValue {
    fields: IndexMap<String, Value>,
}

impl RecordValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from `(name, value)` pairs, rejecting duplicate names.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> ValueResult<Self> {
        let mut record = Self::new();
        for (name, value) in pairs {
            record.insert(name, value)?;
        }
        Ok(record)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> ValueResult<()> {
        let name = name.into();
        if self.fields.contains_key(&name) {
            return Err(ValueError::DuplicateField(name));
        }
        self.fields.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    pub fn field_types(&self) -> impl Iterator<Item = (&str, DataType)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v.data_type()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let rec = RecordValue::from_pairs([
            ("name".to_owned(), Value::text("Alice")),
            ("age".to_owned(), Value::int(30)),
        ])
        .unwrap();
        let names: Vec<_> = rec.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["name", "age"]);
        assert_eq!(rec.get("age"), Some(&Value::int(30)));
        assert!(rec.get("missing").is_none());
    }

    #[test]
    fn rejects_duplicates() {
        let mut rec = RecordValue::new();
        rec.insert("a", Value::int(1)).unwrap();
        assert_eq!(rec.insert("a", Value::int(2)), Err(ValueError::DuplicateField("a".into())));
    }
}

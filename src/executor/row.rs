use indexmap::IndexMap;

use crate::executor::Value;

/// One result record. Keys are qualified as `alias.attribute` for
/// fetched columns and bare names for aliased or computed columns.
#[derive(Debug, Clone, Default)]
pub struct Row(pub IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a column, unwrapping stored platform forms (money, choice).
    pub fn get(&self, key: &str) -> Value {
        self.0.get(key).cloned().map(Value::unwrap_platform).unwrap_or(Value::Null)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn from_json(obj: &serde_json::Map<String, serde_json::Value>) -> Row {
        let mut row = Row::new();
        for (k, v) in obj {
            row.insert(k.clone(), Value::from_json(v));
        }
        row
    }

    /// Canonical key over every column, used by the Distinct operator.
    pub fn distinct_key(&self) -> String {
        let mut parts: Vec<String> =
            self.0.iter().map(|(k, v)| format!("{k}={}", v.group_key())).collect();
        parts.sort();
        parts.join("\u{1f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn get_unwraps_platform_values() {
        let mut row = Row::new();
        row.insert("contact.creditlimit", Value::Money(Decimal::from(100)));
        assert_eq!(row.get("contact.creditlimit"), Value::Decimal(Decimal::from(100)));
        assert_eq!(row.get("missing"), Value::Null);
    }

    #[test]
    fn distinct_key_is_case_insensitive_for_strings() {
        let mut a = Row::new();
        a.insert("name", Value::String("Data".into()));
        let mut b = Row::new();
        b.insert("name", Value::String("DATA".into()));
        assert_eq!(a.distinct_key(), b.distinct_key());
    }
}

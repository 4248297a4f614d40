use std::cmp::Ordering;

use chrono::NaiveDateTime;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Three-valued SQL truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    pub fn of(b: bool) -> Truth {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }
}

/// Nullable domain types a column or expression can yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Decimal,
    Float,
    String,
    Guid,
    DateTime,
    EntityRef,
}

/// A platform value. `Money` and `Choice` are the wrapped forms raw
/// records carry; column reads unwrap them to their underlying scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Float(f64),
    String(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
    EntityRef { id: Uuid, logical_name: String },
    Money(Decimal),
    Choice(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Unwrap the stored platform form to its underlying scalar.
    pub fn unwrap_platform(self) -> Value {
        match self {
            Value::Money(d) => Value::Decimal(d),
            Value::Choice(i) => Value::Int(i),
            other => other,
        }
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) | Value::Choice(_) => Some(ValueType::Int),
            Value::Decimal(_) | Value::Money(_) => Some(ValueType::Decimal),
            Value::Float(_) => Some(ValueType::Float),
            Value::String(_) => Some(ValueType::String),
            Value::Guid(_) => Some(ValueType::Guid),
            Value::DateTime(_) => Some(ValueType::DateTime),
            Value::EntityRef { .. } => Some(ValueType::EntityRef),
        }
    }

    /// Records arrive from the platform as JSON documents; lookups come
    /// over as `{ "id": ..., "logical_name": ... }` objects.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Object(m) => {
                let id = m.get("id").and_then(|x| x.as_str()).and_then(|s| Uuid::parse_str(s).ok());
                let name = m.get("logical_name").and_then(|x| x.as_str());
                match (id, name) {
                    (Some(id), Some(name)) => {
                        Value::EntityRef { id, logical_name: name.to_string() }
                    }
                    _ => Value::Null,
                }
            }
            serde_json::Value::Array(_) => Value::Null,
        }
    }

    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) | Value::Choice(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) | Value::Money(d) => Some(*d),
            Value::Float(f) => Decimal::from_f64(*f),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) | Value::Choice(i) => Some(*i as f64),
            Value::Decimal(d) | Value::Money(d) => d.to_f64(),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_)
                | Value::Choice(_)
                | Value::Decimal(_)
                | Value::Money(_)
                | Value::Float(_)
        )
    }

    /// Parse the datetime string forms the platform round-trips.
    pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .ok()
            .or_else(|| {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    /// SQL comparison with T-SQL coercion. `None` when either side is
    /// null or the pair has no common domain.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        let a = self.clone().unwrap_platform();
        let b = other.clone().unwrap_platform();

        if a.is_null() || b.is_null() {
            return None;
        }

        // entity reference compares by its id
        let a = match a {
            Value::EntityRef { id, .. } => Value::Guid(id),
            other => other,
        };
        let b = match b {
            Value::EntityRef { id, .. } => Value::Guid(id),
            other => other,
        };

        match (&a, &b) {
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            (Value::String(x), Value::String(y)) => {
                Some(x.to_lowercase().cmp(&y.to_lowercase()))
            }
            (Value::Guid(x), Value::Guid(y)) => Some(x.cmp(y)),
            (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
            // string coercions: the literal side converts to the typed side
            (Value::String(s), Value::DateTime(d)) => {
                Self::parse_datetime(s).map(|x| x.cmp(d))
            }
            (Value::DateTime(d), Value::String(s)) => {
                Self::parse_datetime(s).map(|x| d.cmp(&x))
            }
            (Value::String(s), Value::Guid(g)) => {
                Uuid::parse_str(s).ok().map(|x| x.cmp(g))
            }
            (Value::Guid(g), Value::String(s)) => {
                Uuid::parse_str(s).ok().map(|x| g.cmp(&x))
            }
            (Value::String(s), y) if y.is_numeric() => {
                let parsed = s.trim().parse::<Decimal>().ok()?;
                parsed.partial_cmp(&y.as_decimal()?)
            }
            (x, Value::String(s)) if x.is_numeric() => {
                let parsed = s.trim().parse::<Decimal>().ok()?;
                x.as_decimal()?.partial_cmp(&parsed)
            }
            (x, y) if x.is_numeric() && y.is_numeric() => {
                // exact where both sides are exact, float otherwise
                if matches!(x, Value::Float(_)) || matches!(y, Value::Float(_)) {
                    x.as_float()?.partial_cmp(&y.as_float()?)
                } else {
                    x.as_decimal()?.partial_cmp(&y.as_decimal()?)
                }
            }
            _ => None,
        }
    }

    /// SQL equality as three-valued truth.
    pub fn sql_eq(&self, other: &Value) -> Truth {
        if self.is_null() || other.is_null() {
            return Truth::Unknown;
        }
        match self.sql_cmp(other) {
            Some(Ordering::Equal) => Truth::True,
            Some(_) => Truth::False,
            None => Truth::False,
        }
    }

    /// Total order used by the Sort operator: nulls sort first
    /// ascending, last descending, matching the SQL endpoint.
    pub fn cmp_for_sort(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.sql_cmp(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Canonical key for grouping and DISTINCT: strings fold case,
    /// numerics normalize across Int/Decimal/Float.
    pub fn group_key(&self) -> String {
        match self.clone().unwrap_platform() {
            Value::Null => "∅".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("n:{}", Decimal::from(i).normalize()),
            Value::Decimal(d) => format!("n:{}", d.normalize()),
            Value::Float(f) => match Decimal::from_f64(f) {
                Some(d) => format!("n:{}", d.normalize()),
                None => format!("f:{f}"),
            },
            Value::String(s) => format!("s:{}", s.to_lowercase()),
            Value::Guid(g) => format!("g:{g}"),
            Value::DateTime(d) => format!("d:{d}"),
            Value::EntityRef { id, .. } => format!("g:{id}"),
            Value::Money(_) | Value::Choice(_) => unreachable!("unwrapped above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_tables() {
        assert_eq!(Truth::True.and(Truth::Unknown), Truth::Unknown);
        assert_eq!(Truth::False.and(Truth::Unknown), Truth::False);
        assert_eq!(Truth::True.or(Truth::Unknown), Truth::True);
        assert_eq!(Truth::False.or(Truth::Unknown), Truth::Unknown);
        assert_eq!(Truth::Unknown.not(), Truth::Unknown);
    }

    #[test]
    fn string_compare_is_case_insensitive() {
        let a = Value::String("Mark".into());
        let b = Value::String("MARK".into());
        assert_eq!(a.sql_eq(&b), Truth::True);
        assert_eq!(a.group_key(), b.group_key());
    }

    #[test]
    fn null_compare_is_unknown() {
        assert_eq!(Value::Null.sql_eq(&Value::Int(1)), Truth::Unknown);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Null), None);
    }

    #[test]
    fn numeric_tower_compares_across_types() {
        assert_eq!(
            Value::Int(2).sql_cmp(&Value::Decimal(Decimal::new(20, 1))),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Float(2.5).sql_cmp(&Value::Int(2)), Some(Ordering::Greater));
    }

    #[test]
    fn string_coerces_to_datetime_and_guid() {
        let d = Value::DateTime(Value::parse_datetime("2024-01-02").unwrap());
        assert_eq!(Value::String("2024-01-02".into()).sql_eq(&d), Truth::True);

        let id = Uuid::new_v4();
        let g = Value::Guid(id);
        assert_eq!(Value::String(id.to_string()).sql_eq(&g), Truth::True);
    }

    #[test]
    fn entity_ref_compares_by_id() {
        let id = Uuid::new_v4();
        let r = Value::EntityRef { id, logical_name: "account".into() };
        assert_eq!(r.sql_eq(&Value::Guid(id)), Truth::True);
    }

    #[test]
    fn wrapped_values_unwrap() {
        assert_eq!(Value::Money(Decimal::from(5)).unwrap_platform(), Value::Decimal(Decimal::from(5)));
        assert_eq!(Value::Choice(3).unwrap_platform(), Value::Int(3));
        assert_eq!(Value::Choice(3).sql_eq(&Value::Int(3)), Truth::True);
    }

    #[test]
    fn from_json_maps_lookup_objects() {
        let id = Uuid::new_v4();
        let v = serde_json::json!({ "id": id.to_string(), "logical_name": "contact" });
        match Value::from_json(&v) {
            Value::EntityRef { id: got, logical_name } => {
                assert_eq!(got, id);
                assert_eq!(logical_name, "contact");
            }
            other => panic!("expected EntityRef, got {other:?}"),
        }
    }
}

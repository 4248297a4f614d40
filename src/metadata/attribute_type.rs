use serde::{Deserialize, Serialize};

use crate::executor::ValueType;

/// Platform attribute types as the metadata service reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    Integer,
    Money,
    Decimal,
    String,
    Memo,
    EntityName,
    Lookup,
    Customer,
    Owner,
    UniqueIdentifier,
    Picklist,
    State,
    Status,
    Boolean,
    DateTime,
    Double,
}

impl AttributeType {
    /// The nullable domain type a column of this attribute type yields.
    pub fn domain_type(&self) -> ValueType {
        use AttributeType::*;
        match self {
            Integer | Picklist | State | Status => ValueType::Int,
            Money | Decimal => ValueType::Decimal,
            String | Memo | EntityName => ValueType::String,
            Lookup | Customer | Owner => ValueType::EntityRef,
            UniqueIdentifier => ValueType::Guid,
            Boolean => ValueType::Bool,
            DateTime => ValueType::DateTime,
            Double => ValueType::Float,
        }
    }
}

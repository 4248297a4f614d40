use serde::{Deserialize, Serialize};

use crate::metadata::AttributeType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    pub logical_name: String,
    pub attribute_type: AttributeType,
    pub is_valid_for_read: bool,
}

/// One many-to-many relationship descriptor. Deletions against an
/// intersect entity resolve their key pair through this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToManyRelationship {
    pub schema_name: String,
    pub entity1_intersect_attribute: String,
    pub entity2_intersect_attribute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub logical_name: String,
    pub primary_id_attribute: String,
    pub is_intersect: bool,
    pub many_to_many_relationships: Vec<ManyToManyRelationship>,
    pub attributes: Vec<AttributeMetadata>,
    /// For messages only.
    pub display_name: String,
    /// For messages only.
    pub display_collection_name: String,
}

impl EntityMetadata {
    pub fn attribute(&self, logical_name: &str) -> Option<&AttributeMetadata> {
        self.attributes.iter().find(|a| a.logical_name == logical_name)
    }

    /// Readable attributes in name order, the shape `SELECT *` expands to.
    pub fn readable_attributes(&self) -> Vec<&AttributeMetadata> {
        let mut attrs: Vec<&AttributeMetadata> =
            self.attributes.iter().filter(|a| a.is_valid_for_read).collect();
        attrs.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, readable: bool) -> AttributeMetadata {
        AttributeMetadata {
            logical_name: name.into(),
            attribute_type: AttributeType::String,
            is_valid_for_read: readable,
        }
    }

    #[test]
    fn readable_attributes_are_sorted_and_filtered() {
        let meta = EntityMetadata {
            logical_name: "account".into(),
            primary_id_attribute: "accountid".into(),
            is_intersect: false,
            many_to_many_relationships: vec![],
            attributes: vec![attr("name", true), attr("accountid", true), attr("secret", false)],
            display_name: "Account".into(),
            display_collection_name: "Accounts".into(),
        };
        let names: Vec<&str> =
            meta.readable_attributes().iter().map(|a| a.logical_name.as_str()).collect();
        assert_eq!(names, vec!["accountid", "name"]);
    }
}

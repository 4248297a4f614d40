use indexmap::IndexMap;

use crate::compiler::tables::{container_at, Container, EntityTable, TableList};
use crate::compiler::{CompileError, CompileOptions};
use crate::executor::{Expr, QueryExtension, ValueType};
use crate::fetch::{Fetch, Item};
use crate::metadata::{AttributeType, MetadataProvider};
use crate::parser::ast::ColumnRef;

/// Shared state of one compilation: the FetchXML under construction,
/// the table arena, the operator pipeline, and the name tables.
pub(crate) struct QueryContext<'a> {
    pub meta: &'a dyn MetadataProvider,
    pub options: &'a CompileOptions,
    pub fetch: Fetch,
    pub tables: TableList,
    pub extensions: Vec<QueryExtension>,
    /// Calculated columns declared in the SELECT list. Visible only to
    /// ORDER BY and HAVING, never to FROM or WHERE.
    pub shadow: IndexMap<String, ValueType>,
    /// Names minted by aggregate lowering; visible to every later step.
    pub generated: IndexMap<String, ValueType>,
}

/// Result of binding one SQL column reference.
#[derive(Debug, Clone)]
pub(crate) struct ColumnBinding {
    pub table_index: usize,
    pub attribute: String,
    pub attr_type: AttributeType,
}

#[derive(Debug, Clone)]
pub(crate) enum Bound {
    Column(ColumnBinding),
    /// A FetchXML attribute alias already declared somewhere in the
    /// tree; rows key it bare.
    FetchAlias { alias: String, attribute: String, table_index: usize, ty: ValueType },
    /// A calculated or aggregate-generated name; rows key it bare.
    Computed { name: String, ty: ValueType },
}

impl<'a> QueryContext<'a> {
    pub fn new(
        meta: &'a dyn MetadataProvider,
        options: &'a CompileOptions,
        entity_name: &str,
    ) -> Result<Self, CompileError> {
        let metadata = meta
            .entity(&entity_name.to_lowercase())
            .ok_or_else(|| CompileError::UnknownTable(entity_name.to_string()))?
            .clone();
        let fetch = Fetch::for_entity(metadata.logical_name.clone());
        let mut tables = TableList::default();
        tables.add(EntityTable {
            entity_name: metadata.logical_name.clone(),
            alias: None,
            node: vec![],
            metadata,
        })?;
        Ok(QueryContext {
            meta,
            options,
            fetch,
            tables,
            extensions: Vec::new(),
            shadow: IndexMap::new(),
            generated: IndexMap::new(),
        })
    }

    /// Later steps must take the expression path once this is true.
    pub fn post_processing_started(&self) -> bool {
        !self.extensions.is_empty()
    }

    /// Resolve a column reference per the binding rules: a qualifier
    /// must name exactly one table (alias preferred); unqualified names
    /// search declared aliases, generated names, the shadow table when
    /// visible, and every table's metadata.
    pub fn bind_column(&self, col: &ColumnRef, shadow_visible: bool) -> Result<Bound, CompileError> {
        if col.parts.len() > 2 {
            return Err(CompileError::not_supported("multi-part name too deep", col));
        }

        if let Some(qualifier) = col.qualifier() {
            let table_index = self.tables.find(qualifier)?;
            let table = self.tables.get(table_index);
            let name = col.name().to_lowercase();
            if let Some(attr) = table.metadata.attribute(&name) {
                return Ok(Bound::Column(ColumnBinding {
                    table_index,
                    attribute: attr.logical_name.clone(),
                    attr_type: attr.attribute_type,
                }));
            }
            if let Some(found) = self.find_declared_alias_in(table_index, &name) {
                return Ok(found);
            }
            return Err(CompileError::UnknownAttribute(col.to_string()));
        }

        let name = col.name().to_lowercase();

        // names minted by aggregate lowering shadow everything else
        if let Some(ty) = self.generated.get(&name) {
            return Ok(Bound::Computed { name, ty: *ty });
        }
        if shadow_visible {
            if let Some(ty) = self.shadow.get(&name) {
                return Ok(Bound::Computed { name, ty: *ty });
            }
        }

        let alias_matches: Vec<Bound> = (0..self.tables.tables.len())
            .filter_map(|i| self.find_declared_alias_in(i, &name))
            .collect();
        match alias_matches.as_slice() {
            [single] => return Ok(single.clone()),
            [] => {}
            _ => return Err(CompileError::AmbiguousAttribute(col.to_string())),
        }

        let mut matches: Vec<ColumnBinding> = Vec::new();
        for (i, table) in self.tables.tables.iter().enumerate() {
            if let Some(attr) = table.metadata.attribute(&name) {
                matches.push(ColumnBinding {
                    table_index: i,
                    attribute: attr.logical_name.clone(),
                    attr_type: attr.attribute_type,
                });
            }
        }
        match matches.len() {
            1 => Ok(Bound::Column(matches.remove(0))),
            0 => Err(CompileError::UnknownAttribute(col.to_string())),
            _ => Err(CompileError::AmbiguousAttribute(col.to_string())),
        }
    }

    fn find_declared_alias_in(&self, table_index: usize, name: &str) -> Option<Bound> {
        let table = self.tables.get(table_index);
        // re-walk the node path immutably
        let mut items = &self.fetch.entity.items;
        for &index in &table.node {
            match &items[index] {
                Item::Link(link) => items = &link.items,
                _ => return None,
            }
        }
        for item in items {
            if let Item::Attribute(a) = item {
                if a.alias.as_deref() == Some(name) {
                    let ty = match a.aggregate.as_deref() {
                        Some("count") | Some("countcolumn") => ValueType::Int,
                        Some("avg") => ValueType::Decimal,
                        _ => table
                            .metadata
                            .attribute(&a.name)
                            .map(|m| m.attribute_type.domain_type())
                            .unwrap_or(ValueType::String),
                    };
                    return Some(Bound::FetchAlias {
                        alias: name.to_string(),
                        attribute: a.name.clone(),
                        table_index,
                        ty,
                    });
                }
            }
        }
        None
    }

    /// Bind a column and turn it into a row-reading expression, adding
    /// the attribute to its table's FetchXML items when needed.
    pub fn column_expr(
        &mut self,
        col: &ColumnRef,
        shadow_visible: bool,
    ) -> Result<Expr, CompileError> {
        match self.bind_column(col, shadow_visible)? {
            Bound::Column(binding) => {
                let table = self.tables.get(binding.table_index);
                let key = table.row_key(&binding.attribute);
                let node = table.node.clone();
                container_at(&mut self.fetch, &node).ensure_attribute(&binding.attribute);
                Ok(Expr::Column { key, ty: binding.attr_type.domain_type() })
            }
            Bound::FetchAlias { alias, ty, .. } => Ok(Expr::Column { key: alias, ty }),
            Bound::Computed { name, ty } => Ok(Expr::Column { key: name, ty }),
        }
    }

    pub fn container_for(&mut self, table_index: usize) -> Container<'_> {
        let node = self.tables.get(table_index).node.clone();
        container_at(&mut self.fetch, &node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchAttribute;
    use crate::metadata::{AttributeMetadata, EntityMetadata, StaticMetadata};

    fn attr(name: &str, ty: AttributeType) -> AttributeMetadata {
        AttributeMetadata { logical_name: name.into(), attribute_type: ty, is_valid_for_read: true }
    }

    fn provider() -> StaticMetadata {
        StaticMetadata::new()
            .with(EntityMetadata {
                logical_name: "account".into(),
                primary_id_attribute: "accountid".into(),
                is_intersect: false,
                many_to_many_relationships: vec![],
                attributes: vec![
                    attr("accountid", AttributeType::UniqueIdentifier),
                    attr("name", AttributeType::String),
                    attr("createdon", AttributeType::DateTime),
                ],
                display_name: "Account".into(),
                display_collection_name: "Accounts".into(),
            })
            .with(EntityMetadata {
                logical_name: "contact".into(),
                primary_id_attribute: "contactid".into(),
                is_intersect: false,
                many_to_many_relationships: vec![],
                attributes: vec![
                    attr("contactid", AttributeType::UniqueIdentifier),
                    attr("firstname", AttributeType::String),
                    attr("createdon", AttributeType::DateTime),
                ],
                display_name: "Contact".into(),
                display_collection_name: "Contacts".into(),
            })
    }

    fn ctx<'a>(meta: &'a StaticMetadata, options: &'a CompileOptions) -> QueryContext<'a> {
        QueryContext::new(meta, options, "account").expect("context")
    }

    #[test]
    fn unqualified_unique_column_binds() {
        let meta = provider();
        let options = CompileOptions::default();
        let ctx = ctx(&meta, &options);
        match ctx.bind_column(&ColumnRef::single("name"), false).unwrap() {
            Bound::Column(b) => {
                assert_eq!(b.attribute, "name");
                assert_eq!(b.table_index, 0);
            }
            other => panic!("expected column, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_across_tables_fails() {
        let meta = provider();
        let options = CompileOptions::default();
        let mut ctx = ctx(&meta, &options);
        let contact = meta.entity("contact").unwrap().clone();
        ctx.fetch.entity.items.push(Item::Link(crate::fetch::LinkEntity {
            name: "contact".into(),
            alias: Some("c".into()),
            from: "accountid".into(),
            to: "parentcustomerid".into(),
            link_type: crate::fetch::LinkType::Inner,
            items: vec![],
        }));
        ctx.tables
            .add(EntityTable {
                entity_name: "contact".into(),
                alias: Some("c".into()),
                node: vec![0],
                metadata: contact,
            })
            .unwrap();

        // createdon exists on both tables
        let result = ctx.bind_column(&ColumnRef::single("createdon"), false);
        assert!(matches!(result, Err(CompileError::AmbiguousAttribute(_))));

        // qualified reference resolves
        let bound = ctx
            .bind_column(&ColumnRef { parts: vec!["c".into(), "createdon".into()] }, false)
            .unwrap();
        match bound {
            Bound::Column(b) => assert_eq!(b.table_index, 1),
            other => panic!("expected column, got {other:?}"),
        }
    }

    #[test]
    fn declared_alias_wins_over_metadata() {
        let meta = provider();
        let options = CompileOptions::default();
        let mut ctx = ctx(&meta, &options);
        ctx.fetch.entity.items.push(Item::Attribute(FetchAttribute {
            name: "name".into(),
            alias: Some("name".into()),
            group_by: Some(true),
            ..Default::default()
        }));
        match ctx.bind_column(&ColumnRef::single("name"), false).unwrap() {
            Bound::FetchAlias { alias, .. } => assert_eq!(alias, "name"),
            other => panic!("expected alias binding, got {other:?}"),
        }
    }

    #[test]
    fn shadow_names_only_visible_when_allowed() {
        let meta = provider();
        let options = CompileOptions::default();
        let mut ctx = ctx(&meta, &options);
        ctx.shadow.insert("expr1".into(), ValueType::Int);
        assert!(ctx.bind_column(&ColumnRef::single("expr1"), false).is_err());
        assert!(matches!(
            ctx.bind_column(&ColumnRef::single("expr1"), true).unwrap(),
            Bound::Computed { .. }
        ));
    }

    #[test]
    fn column_expr_requests_the_attribute() {
        let meta = provider();
        let options = CompileOptions::default();
        let mut ctx = ctx(&meta, &options);
        let expr = ctx.column_expr(&ColumnRef::single("name"), false).unwrap();
        match expr {
            Expr::Column { key, ty } => {
                assert_eq!(key, "name");
                assert_eq!(ty, ValueType::String);
            }
            other => panic!("expected column expr, got {other:?}"),
        }
        assert!(ctx.fetch.entity.items.iter().any(
            |i| matches!(i, Item::Attribute(a) if a.name == "name" && a.alias.is_none())
        ));
    }
}

use crate::compiler::CompileError;
use crate::fetch::{Entity, Fetch, Item, ItemContainer, LinkEntity};
use crate::metadata::EntityMetadata;

/// One table participating in the query. The root entity has no link
/// node; every other table is a link-entity addressed by an index path
/// through the `items` vectors (no back-pointers into the tree).
#[derive(Debug, Clone)]
pub(crate) struct EntityTable {
    pub entity_name: String,
    pub alias: Option<String>,
    /// Indexes of `Item::Link` entries from the root entity down to
    /// this table's node; empty for the root.
    pub node: Vec<usize>,
    pub metadata: EntityMetadata,
}

impl EntityTable {
    pub fn is_root(&self) -> bool {
        self.node.is_empty()
    }

    /// The name column references resolve against; alias wins.
    pub fn visible_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.entity_name)
    }

    /// Result rows key root attributes bare and linked attributes
    /// through the link alias.
    pub fn row_key(&self, attribute: &str) -> String {
        if self.is_root() {
            attribute.to_string()
        } else {
            format!("{}.{}", self.visible_name(), attribute)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TableList {
    pub tables: Vec<EntityTable>,
}

impl TableList {
    pub fn root(&self) -> &EntityTable {
        &self.tables[0]
    }

    pub fn get(&self, index: usize) -> &EntityTable {
        &self.tables[index]
    }

    /// Add a table, enforcing unique visible names.
    pub fn add(&mut self, table: EntityTable) -> Result<usize, CompileError> {
        if let Some(alias) = &table.alias {
            if self.tables.iter().any(|t| t.alias.as_deref() == Some(alias.as_str())) {
                return Err(CompileError::AmbiguousTable(alias.clone()));
            }
        }
        self.tables.push(table);
        Ok(self.tables.len() - 1)
    }

    /// Resolve a qualifier: exact alias match first, entity name next.
    pub fn find(&self, name: &str) -> Result<usize, CompileError> {
        if let Some(i) = self
            .tables
            .iter()
            .position(|t| t.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name)))
        {
            return Ok(i);
        }
        let matches: Vec<usize> = self
            .tables
            .iter()
            .enumerate()
            .filter(|(_, t)| t.alias.is_none() && t.entity_name.eq_ignore_ascii_case(name))
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [i] => Ok(*i),
            [] => Err(CompileError::UnknownTable(name.to_string())),
            _ => Err(CompileError::AmbiguousTable(name.to_string())),
        }
    }
}

/// Walk an index path to the item list it designates.
pub(crate) fn items_at<'a>(fetch: &'a mut Fetch, node: &[usize]) -> &'a mut Vec<Item> {
    let mut items = &mut fetch.entity.items;
    for &index in node {
        match &mut items[index] {
            Item::Link(link) => items = &mut link.items,
            other => unreachable!("node path hit a non-link item: {other:?}"),
        }
    }
    items
}

pub(crate) fn container_at<'a>(fetch: &'a mut Fetch, node: &[usize]) -> Container<'a> {
    if node.is_empty() {
        return Container::Entity(&mut fetch.entity);
    }
    let (last, prefix) = node.split_last().expect("non-empty node path");
    let items = items_at_inner(&mut fetch.entity, prefix);
    match &mut items[*last] {
        Item::Link(link) => Container::Link(link),
        other => unreachable!("node path hit a non-link item: {other:?}"),
    }
}

fn items_at_inner<'a>(entity: &'a mut Entity, node: &[usize]) -> &'a mut Vec<Item> {
    let mut items = &mut entity.items;
    for &index in node {
        match &mut items[index] {
            Item::Link(link) => items = &mut link.items,
            other => unreachable!("node path hit a non-link item: {other:?}"),
        }
    }
    items
}

pub(crate) enum Container<'a> {
    Entity(&'a mut Entity),
    Link(&'a mut LinkEntity),
}

impl Container<'_> {
    pub fn ensure_attribute(&mut self, name: &str) {
        match self {
            Container::Entity(e) => e.ensure_attribute(name),
            Container::Link(l) => l.ensure_attribute(name),
        }
    }

    pub fn items_mut(&mut self) -> &mut Vec<Item> {
        match self {
            Container::Entity(e) => &mut e.items,
            Container::Link(l) => &mut l.items,
        }
    }

    pub fn items(&self) -> &Vec<Item> {
        match self {
            Container::Entity(e) => &e.items,
            Container::Link(l) => &l.items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchAttribute;
    use crate::metadata::{AttributeMetadata, AttributeType};

    fn meta(name: &str) -> EntityMetadata {
        EntityMetadata {
            logical_name: name.into(),
            primary_id_attribute: format!("{name}id"),
            is_intersect: false,
            many_to_many_relationships: vec![],
            attributes: vec![AttributeMetadata {
                logical_name: format!("{name}id"),
                attribute_type: AttributeType::UniqueIdentifier,
                is_valid_for_read: true,
            }],
            display_name: name.into(),
            display_collection_name: format!("{name}s"),
        }
    }

    fn table(name: &str, alias: Option<&str>, node: Vec<usize>) -> EntityTable {
        EntityTable {
            entity_name: name.into(),
            alias: alias.map(String::from),
            node,
            metadata: meta(name),
        }
    }

    #[test]
    fn alias_wins_over_entity_name() {
        let mut list = TableList::default();
        list.add(table("account", None, vec![])).unwrap();
        list.add(table("contact", Some("account"), vec![0])).unwrap();
        // the alias "account" shadows the entity called account
        let found = list.find("account").unwrap();
        assert_eq!(list.get(found).entity_name, "contact");
    }

    #[test]
    fn duplicate_alias_is_ambiguous() {
        let mut list = TableList::default();
        list.add(table("account", Some("a"), vec![])).unwrap();
        let result = list.add(table("contact", Some("a"), vec![0]));
        assert!(matches!(result, Err(CompileError::AmbiguousTable(_))));
    }

    #[test]
    fn unknown_table() {
        let mut list = TableList::default();
        list.add(table("account", None, vec![])).unwrap();
        assert!(matches!(list.find("missing"), Err(CompileError::UnknownTable(_))));
    }

    #[test]
    fn row_keys_are_bare_for_root_and_qualified_for_links() {
        let root = table("account", None, vec![]);
        let link = table("contact", Some("c"), vec![0]);
        assert_eq!(root.row_key("name"), "name");
        assert_eq!(link.row_key("firstname"), "c.firstname");
    }

    #[test]
    fn node_paths_address_nested_links() {
        let mut fetch = Fetch::for_entity("account");
        fetch.entity.items.push(Item::Attribute(FetchAttribute::named("name")));
        fetch.entity.items.push(Item::Link(LinkEntity {
            name: "contact".into(),
            alias: Some("c".into()),
            from: "accountid".into(),
            to: "parentcustomerid".into(),
            link_type: crate::fetch::LinkType::Inner,
            items: vec![],
        }));
        let items = items_at(&mut fetch, &[1]);
        assert!(items.is_empty());
        items.push(Item::Attribute(FetchAttribute::named("firstname")));
        match container_at(&mut fetch, &[1]) {
            Container::Link(link) => assert_eq!(link.items.len(), 1),
            Container::Entity(_) => panic!("expected link container"),
        }
    }
}

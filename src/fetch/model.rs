/// Typed, mutable mirror of the FetchXML wire format. The compiler
/// builds this tree; `fetch::xml` prints and re-reads it.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    And,
    Or,
    /// Placeholder while the first AND/OR under the filter has not been
    /// seen; resolved to `And` when the filter closes.
    Indeterminate,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::And | FilterType::Indeterminate => "and",
            FilterType::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkType {
    #[default]
    Inner,
    Outer,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Inner => "inner",
            LinkType::Outer => "outer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchAttribute {
    pub name: String,
    pub alias: Option<String>,
    pub aggregate: Option<String>,
    pub distinct: Option<bool>,
    pub date_grouping: Option<String>,
    pub group_by: Option<bool>,
}

impl FetchAttribute {
    pub fn named(name: impl Into<String>) -> Self {
        FetchAttribute { name: name.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchOrder {
    pub attribute: Option<String>,
    pub alias: Option<String>,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub entity_name: Option<String>,
    pub attribute: String,
    pub operator: String,
    pub value: Option<String>,
    pub values: Vec<String>,
}

impl Condition {
    pub fn new(attribute: impl Into<String>, operator: impl Into<String>) -> Self {
        Condition {
            entity_name: None,
            attribute: attribute.into(),
            operator: operator.into(),
            value: None,
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterItem {
    Condition(Condition),
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    pub filter_type: FilterType,
    pub items: Vec<FilterItem>,
}

impl Filter {
    pub fn new(filter_type: FilterType) -> Self {
        Filter { filter_type, items: Vec::new() }
    }

    /// Empty after recursive pruning of empty child filters.
    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|i| match i {
            FilterItem::Condition(_) => false,
            FilterItem::Filter(f) => f.is_empty(),
        })
    }

    pub fn prune_empty(&mut self) {
        for item in &mut self.items {
            if let FilterItem::Filter(f) = item {
                f.prune_empty();
            }
        }
        self.items.retain(|i| match i {
            FilterItem::Condition(_) => true,
            FilterItem::Filter(f) => !f.items.is_empty(),
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Attribute(FetchAttribute),
    AllAttributes,
    Order(FetchOrder),
    Filter(Filter),
    Link(LinkEntity),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkEntity {
    pub name: String,
    pub alias: Option<String>,
    pub from: String,
    pub to: String,
    pub link_type: LinkType,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub items: Vec<Item>,
}

impl Entity {
    pub fn named(name: impl Into<String>) -> Self {
        Entity { name: name.into(), items: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetch {
    pub distinct: Option<bool>,
    pub top: Option<u32>,
    pub count: Option<u32>,
    pub page: Option<u32>,
    pub no_lock: Option<bool>,
    pub aggregate: Option<bool>,
    pub paging_cookie: Option<String>,
    pub entity: Entity,
}

impl Fetch {
    pub fn for_entity(name: impl Into<String>) -> Self {
        Fetch {
            distinct: None,
            top: None,
            count: None,
            page: None,
            no_lock: None,
            aggregate: None,
            paging_cookie: None,
            entity: Entity::named(name),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate == Some(true)
    }

    /// Normalize for emission: fixed item ordering, indeterminate
    /// filters resolved, empty filters removed.
    pub fn finalize(&mut self) {
        finalize_items(&mut self.entity.items);
    }
}

fn item_rank(item: &Item) -> u8 {
    match item {
        Item::Attribute(_) | Item::AllAttributes => 0,
        Item::Filter(_) => 1,
        Item::Link(_) => 2,
        Item::Order(_) => 3,
    }
}

fn finalize_items(items: &mut Vec<Item>) {
    for item in items.iter_mut() {
        match item {
            Item::Filter(f) => {
                f.prune_empty();
                resolve_indeterminate(f);
            }
            Item::Link(link) => finalize_items(&mut link.items),
            _ => {}
        }
    }
    items.retain(|i| match i {
        Item::Filter(f) => !f.items.is_empty(),
        _ => true,
    });
    items.sort_by_key(item_rank);
}

fn resolve_indeterminate(filter: &mut Filter) {
    if filter.filter_type == FilterType::Indeterminate {
        filter.filter_type = FilterType::And;
    }
    for item in &mut filter.items {
        if let FilterItem::Filter(f) = item {
            resolve_indeterminate(f);
        }
    }
}

/// Item-list helpers shared by the entity and link-entity containers.
pub trait ItemContainer {
    fn items(&self) -> &Vec<Item>;
    fn items_mut(&mut self) -> &mut Vec<Item>;

    fn has_all_attributes(&self) -> bool {
        self.items().iter().any(|i| matches!(i, Item::AllAttributes))
    }

    fn find_attribute(&self, name: &str) -> Option<&FetchAttribute> {
        self.items().iter().find_map(|i| match i {
            Item::Attribute(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    fn find_alias(&self, alias: &str) -> Option<&FetchAttribute> {
        self.items().iter().find_map(|i| match i {
            Item::Attribute(a) if a.alias.as_deref() == Some(alias) => Some(a),
            _ => None,
        })
    }

    /// Add a plain attribute read unless already requested or covered
    /// by all-attributes.
    fn ensure_attribute(&mut self, name: &str) {
        if self.has_all_attributes() {
            return;
        }
        let plain_exists = self.items().iter().any(|i| {
            matches!(i, Item::Attribute(a)
                if a.name == name && a.alias.is_none() && a.aggregate.is_none() && a.group_by.is_none())
        });
        if !plain_exists {
            self.items_mut().push(Item::Attribute(FetchAttribute::named(name)));
        }
    }

    fn has_order(&self) -> bool {
        self.items().iter().any(|i| matches!(i, Item::Order(_)))
    }
}

impl ItemContainer for Entity {
    fn items(&self) -> &Vec<Item> {
        &self.items
    }
    fn items_mut(&mut self) -> &mut Vec<Item> {
        &mut self.items
    }
}

impl ItemContainer for LinkEntity {
    fn items(&self) -> &Vec<Item> {
        &self.items
    }
    fn items_mut(&mut self) -> &mut Vec<Item> {
        &mut self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_are_pruned_recursively() {
        let mut f = Filter::new(FilterType::And);
        f.items.push(FilterItem::Filter(Filter::new(FilterType::Or)));
        assert!(f.is_empty());
        f.prune_empty();
        assert!(f.items.is_empty());

        let mut fetch = Fetch::for_entity("account");
        fetch.entity.items.push(Item::Filter(Filter::new(FilterType::Indeterminate)));
        fetch.finalize();
        assert!(fetch.entity.items.is_empty());
    }

    #[test]
    fn finalize_orders_items_and_resolves_indeterminate() {
        let mut fetch = Fetch::for_entity("account");
        fetch.entity.items.push(Item::Order(FetchOrder {
            attribute: Some("name".into()),
            alias: None,
            descending: false,
        }));
        let mut filter = Filter::new(FilterType::Indeterminate);
        filter
            .items
            .push(FilterItem::Condition(Condition::new("name", "eq").with_value("test")));
        fetch.entity.items.push(Item::Filter(filter));
        fetch.entity.items.push(Item::Attribute(FetchAttribute::named("name")));

        fetch.finalize();

        assert!(matches!(fetch.entity.items[0], Item::Attribute(_)));
        match &fetch.entity.items[1] {
            Item::Filter(f) => assert_eq!(f.filter_type, FilterType::And),
            other => panic!("expected filter, got {other:?}"),
        }
        assert!(matches!(fetch.entity.items[2], Item::Order(_)));
    }

    #[test]
    fn ensure_attribute_dedupes_and_respects_all_attributes() {
        let mut e = Entity::named("account");
        e.ensure_attribute("name");
        e.ensure_attribute("name");
        assert_eq!(e.items.len(), 1);

        let mut e2 = Entity::named("account");
        e2.items.push(Item::AllAttributes);
        e2.ensure_attribute("name");
        assert_eq!(e2.items.len(), 1);
    }
}

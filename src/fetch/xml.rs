use std::fmt::Write as _;

use thiserror::Error;

use crate::fetch::model::*;

#[derive(Debug, Clone, Error)]
#[error("fetchxml parse error at byte {position}: {message}")]
pub struct FetchParseError {
    pub message: String,
    pub position: usize,
}

impl Fetch {
    /// Pretty-print the tree in the platform's wire form.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let mut tag = String::from("<fetch");
        push_flag(&mut tag, "distinct", self.distinct);
        if let Some(top) = self.top {
            let _ = write!(tag, " top=\"{top}\"");
        }
        if let Some(count) = self.count {
            let _ = write!(tag, " count=\"{count}\"");
        }
        if let Some(page) = self.page {
            let _ = write!(tag, " page=\"{page}\"");
        }
        push_flag(&mut tag, "no-lock", self.no_lock);
        push_flag(&mut tag, "aggregate", self.aggregate);
        if let Some(cookie) = &self.paging_cookie {
            let _ = write!(tag, " paging-cookie=\"{}\"", escape(cookie));
        }
        tag.push('>');
        out.push_str(&tag);
        out.push('\n');

        let _ = writeln!(out, "  <entity name=\"{}\">", escape(&self.entity.name));
        for item in &self.entity.items {
            write_item(&mut out, item, 2);
        }
        out.push_str("  </entity>\n");
        out.push_str("</fetch>");
        out
    }

    /// Parse the wire form back into the tree (round-trip check and the
    /// inverse printer both come through here).
    pub fn parse(text: &str) -> Result<Fetch, FetchParseError> {
        let mut reader = Reader::new(text);
        let root = reader.element()?;
        if root.name != "fetch" {
            return Err(reader.error("expected <fetch> root"));
        }
        let entity_el = root
            .children
            .iter()
            .find(|c| c.name == "entity")
            .ok_or_else(|| reader.error("missing <entity>"))?;
        Ok(Fetch {
            distinct: root.flag("distinct"),
            top: root.number("top"),
            count: root.number("count"),
            page: root.number("page"),
            no_lock: root.flag("no-lock"),
            aggregate: root.flag("aggregate"),
            paging_cookie: root.attr("paging-cookie"),
            entity: Entity {
                name: entity_el.require("name", &reader)?,
                items: items_of(entity_el, &reader)?,
            },
        })
    }
}

fn push_flag(tag: &mut String, name: &str, value: Option<bool>) {
    if let Some(v) = value {
        let _ = write!(tag, " {name}=\"{v}\"");
    }
}

fn write_item(out: &mut String, item: &Item, depth: usize) {
    let pad = "  ".repeat(depth);
    match item {
        Item::AllAttributes => {
            let _ = writeln!(out, "{pad}<all-attributes />");
        }
        Item::Attribute(a) => {
            let mut tag = format!("{pad}<attribute name=\"{}\"", escape(&a.name));
            if let Some(alias) = &a.alias {
                let _ = write!(tag, " alias=\"{}\"", escape(alias));
            }
            if let Some(aggregate) = &a.aggregate {
                let _ = write!(tag, " aggregate=\"{aggregate}\"");
            }
            push_flag(&mut tag, "distinct", a.distinct);
            if let Some(grouping) = &a.date_grouping {
                let _ = write!(tag, " dategrouping=\"{grouping}\"");
            }
            push_flag(&mut tag, "groupby", a.group_by);
            tag.push_str(" />");
            out.push_str(&tag);
            out.push('\n');
        }
        Item::Order(o) => {
            let mut tag = format!("{pad}<order");
            if let Some(attribute) = &o.attribute {
                let _ = write!(tag, " attribute=\"{}\"", escape(attribute));
            }
            if let Some(alias) = &o.alias {
                let _ = write!(tag, " alias=\"{}\"", escape(alias));
            }
            if o.descending {
                tag.push_str(" descending=\"true\"");
            }
            tag.push_str(" />");
            out.push_str(&tag);
            out.push('\n');
        }
        Item::Filter(f) => write_filter(out, f, depth),
        Item::Link(link) => {
            let mut tag = format!("{pad}<link-entity name=\"{}\"", escape(&link.name));
            if let Some(alias) = &link.alias {
                let _ = write!(tag, " alias=\"{}\"", escape(alias));
            }
            let _ = write!(
                tag,
                " from=\"{}\" to=\"{}\" link-type=\"{}\"",
                escape(&link.from),
                escape(&link.to),
                link.link_type.as_str()
            );
            if link.items.is_empty() {
                tag.push_str(" />");
                out.push_str(&tag);
                out.push('\n');
            } else {
                tag.push('>');
                out.push_str(&tag);
                out.push('\n');
                for child in &link.items {
                    write_item(out, child, depth + 1);
                }
                let _ = writeln!(out, "{pad}</link-entity>");
            }
        }
    }
}

fn write_filter(out: &mut String, filter: &Filter, depth: usize) {
    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{pad}<filter type=\"{}\">", filter.filter_type.as_str());
    for item in &filter.items {
        match item {
            FilterItem::Filter(f) => write_filter(out, f, depth + 1),
            FilterItem::Condition(c) => {
                let inner = "  ".repeat(depth + 1);
                let mut tag = format!("{inner}<condition");
                if let Some(entity_name) = &c.entity_name {
                    let _ = write!(tag, " entityname=\"{}\"", escape(entity_name));
                }
                let _ = write!(
                    tag,
                    " attribute=\"{}\" operator=\"{}\"",
                    escape(&c.attribute),
                    escape(&c.operator)
                );
                if let Some(value) = &c.value {
                    let _ = write!(tag, " value=\"{}\"", escape(value));
                }
                if c.values.is_empty() {
                    tag.push_str(" />");
                    out.push_str(&tag);
                    out.push('\n');
                } else {
                    tag.push('>');
                    out.push_str(&tag);
                    out.push('\n');
                    let vpad = "  ".repeat(depth + 2);
                    for v in &c.values {
                        let _ = writeln!(out, "{vpad}<value>{}</value>", escape(v));
                    }
                    let _ = writeln!(out, "{inner}</condition>");
                }
            }
        }
    }
    let _ = writeln!(out, "{pad}</filter>");
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ---- minimal reader for the FetchXML dialect ----

struct RawElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<RawElement>,
    text: String,
}

impl RawElement {
    fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| unescape(v))
    }

    fn require(&self, name: &str, reader: &Reader) -> Result<String, FetchParseError> {
        self.attr(name)
            .ok_or_else(|| reader.error(&format!("<{}> missing {name}", self.name)))
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.attr(name).map(|v| v == "true" || v == "1")
    }

    fn number(&self, name: &str) -> Option<u32> {
        self.attr(name).and_then(|v| v.parse().ok())
    }
}

struct Reader {
    chars: Vec<char>,
    position: usize,
}

impl Reader {
    fn new(text: &str) -> Self {
        Reader { chars: text.chars().collect(), position: 0 }
    }

    fn error(&self, message: &str) -> FetchParseError {
        FetchParseError { message: message.to_string(), position: self.position }
    }

    fn skip_whitespace(&mut self) {
        while self.position < self.chars.len() && self.chars[self.position].is_whitespace() {
            self.position += 1;
        }
    }

    fn current(&self) -> char {
        *self.chars.get(self.position).unwrap_or(&'\0')
    }

    fn take_name(&mut self) -> String {
        let start = self.position;
        while self.position < self.chars.len() {
            let c = self.chars[self.position];
            if c.is_alphanumeric() || c == '-' || c == '_' {
                self.position += 1;
            } else {
                break;
            }
        }
        self.chars[start..self.position].iter().collect()
    }

    fn element(&mut self) -> Result<RawElement, FetchParseError> {
        self.skip_whitespace();
        if self.current() != '<' {
            return Err(self.error("expected element"));
        }
        self.position += 1;
        let name = self.take_name();
        if name.is_empty() {
            return Err(self.error("expected element name"));
        }
        let mut element =
            RawElement { name, attrs: Vec::new(), children: Vec::new(), text: String::new() };

        loop {
            self.skip_whitespace();
            match self.current() {
                '/' => {
                    self.position += 1;
                    if self.current() != '>' {
                        return Err(self.error("malformed self-closing tag"));
                    }
                    self.position += 1;
                    return Ok(element);
                }
                '>' => {
                    self.position += 1;
                    self.content(&mut element)?;
                    return Ok(element);
                }
                '\0' => return Err(self.error("unexpected end of input")),
                _ => {
                    let key = self.take_name();
                    if key.is_empty() {
                        return Err(self.error("expected attribute name"));
                    }
                    self.skip_whitespace();
                    if self.current() != '=' {
                        return Err(self.error("expected '='"));
                    }
                    self.position += 1;
                    self.skip_whitespace();
                    let quote = self.current();
                    if quote != '"' && quote != '\'' {
                        return Err(self.error("expected quoted attribute value"));
                    }
                    self.position += 1;
                    let start = self.position;
                    while self.position < self.chars.len() && self.chars[self.position] != quote {
                        self.position += 1;
                    }
                    if self.position >= self.chars.len() {
                        return Err(self.error("unterminated attribute value"));
                    }
                    let value: String = self.chars[start..self.position].iter().collect();
                    self.position += 1;
                    element.attrs.push((key, value));
                }
            }
        }
    }

    fn content(&mut self, element: &mut RawElement) -> Result<(), FetchParseError> {
        loop {
            let start = self.position;
            while self.position < self.chars.len() && self.chars[self.position] != '<' {
                self.position += 1;
            }
            let text: String = self.chars[start..self.position].iter().collect();
            element.text.push_str(text.trim());

            if self.position >= self.chars.len() {
                return Err(self.error("unterminated element"));
            }
            if self.chars.get(self.position + 1) == Some(&'/') {
                self.position += 2;
                let close = self.take_name();
                if close != element.name {
                    return Err(self.error(&format!(
                        "mismatched close tag: expected {}, got {close}",
                        element.name
                    )));
                }
                self.skip_whitespace();
                if self.current() != '>' {
                    return Err(self.error("malformed close tag"));
                }
                self.position += 1;
                return Ok(());
            }
            element.children.push(self.element()?);
        }
    }
}

fn items_of(element: &RawElement, reader: &Reader) -> Result<Vec<Item>, FetchParseError> {
    let mut items = Vec::new();
    for child in &element.children {
        items.push(match child.name.as_str() {
            "all-attributes" => Item::AllAttributes,
            "attribute" => Item::Attribute(FetchAttribute {
                name: child.require("name", reader)?,
                alias: child.attr("alias"),
                aggregate: child.attr("aggregate"),
                distinct: child.flag("distinct"),
                date_grouping: child.attr("dategrouping"),
                group_by: child.flag("groupby"),
            }),
            "order" => Item::Order(FetchOrder {
                attribute: child.attr("attribute"),
                alias: child.attr("alias"),
                descending: child.flag("descending").unwrap_or(false),
            }),
            "filter" => Item::Filter(filter_of(child, reader)?),
            "link-entity" => Item::Link(LinkEntity {
                name: child.require("name", reader)?,
                alias: child.attr("alias"),
                from: child.require("from", reader)?,
                to: child.require("to", reader)?,
                link_type: match child.attr("link-type").as_deref() {
                    Some("outer") => LinkType::Outer,
                    _ => LinkType::Inner,
                },
                items: items_of(child, reader)?,
            }),
            other => return Err(reader.error(&format!("unexpected element <{other}>"))),
        });
    }
    Ok(items)
}

fn filter_of(element: &RawElement, reader: &Reader) -> Result<Filter, FetchParseError> {
    let filter_type = match element.attr("type").as_deref() {
        Some("or") => FilterType::Or,
        _ => FilterType::And,
    };
    let mut items = Vec::new();
    for child in &element.children {
        items.push(match child.name.as_str() {
            "filter" => FilterItem::Filter(filter_of(child, reader)?),
            "condition" => FilterItem::Condition(Condition {
                entity_name: child.attr("entityname"),
                attribute: child.require("attribute", reader)?,
                operator: child.require("operator", reader)?,
                value: child.attr("value"),
                values: child
                    .children
                    .iter()
                    .filter(|v| v.name == "value")
                    .map(|v| unescape(&v.text))
                    .collect(),
            }),
            other => return Err(reader.error(&format!("unexpected element <{other}> in filter"))),
        });
    }
    Ok(Filter { filter_type, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fetch {
        let mut fetch = Fetch::for_entity("account");
        fetch.distinct = Some(true);
        fetch.top = Some(10);
        fetch.entity.items.push(Item::Attribute(FetchAttribute::named("accountid")));
        fetch.entity.items.push(Item::Attribute(FetchAttribute::named("name")));
        let mut filter = Filter::new(FilterType::And);
        filter
            .items
            .push(FilterItem::Condition(Condition::new("name", "eq").with_value("te<st")));
        filter.items.push(FilterItem::Condition(Condition {
            entity_name: None,
            attribute: "statecode".into(),
            operator: "in".into(),
            value: None,
            values: vec!["0".into(), "1".into()],
        }));
        fetch.entity.items.push(Item::Filter(filter));
        fetch.entity.items.push(Item::Link(LinkEntity {
            name: "contact".into(),
            alias: Some("c".into()),
            from: "parentcustomerid".into(),
            to: "accountid".into(),
            link_type: LinkType::Outer,
            items: vec![Item::Attribute(FetchAttribute::named("firstname"))],
        }));
        fetch.entity.items.push(Item::Order(FetchOrder {
            attribute: Some("name".into()),
            alias: None,
            descending: true,
        }));
        fetch
    }

    #[test]
    fn round_trips_through_text() {
        let fetch = sample();
        let xml = fetch.to_xml();
        let parsed = Fetch::parse(&xml).expect("re-parse");
        assert_eq!(parsed, fetch);
    }

    #[test]
    fn absent_flags_stay_absent() {
        let fetch = Fetch::for_entity("account");
        let xml = fetch.to_xml();
        assert!(!xml.contains("distinct"));
        assert!(!xml.contains("aggregate"));
        let parsed = Fetch::parse(&xml).expect("re-parse");
        assert_eq!(parsed.distinct, None);
        assert_eq!(parsed.aggregate, None);
    }

    #[test]
    fn escapes_attribute_values() {
        let fetch = sample();
        let xml = fetch.to_xml();
        assert!(xml.contains("value=\"te&lt;st\""));
    }

    #[test]
    fn rejects_mismatched_close_tags() {
        let err = Fetch::parse("<fetch><entity name='a'></fetch>").unwrap_err();
        assert!(err.message.contains("mismatched") || err.message.contains("unexpected"));
    }
}

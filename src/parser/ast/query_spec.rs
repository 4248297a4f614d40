use crate::parser::ast::{BoolExpr, ScalarExpr, TableReference};
use crate::parser::{QueryParseError, SqlCursor};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopClause {
    pub count: u64,
    pub percent: bool,
    pub with_ties: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetClause {
    pub skip: u64,
    pub fetch: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectElement {
    Wildcard,
    TableWildcard(String),
    Expr { expr: ScalarExpr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderByElement {
    pub expr: ScalarExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpecification {
    pub select_elements: Vec<SelectElement>,
    pub top: Option<TopClause>,
    pub unique_rows: bool,
    pub from: TableReference,
    pub where_clause: Option<BoolExpr>,
    pub group_by: Vec<ScalarExpr>,
    pub having: Option<BoolExpr>,
    pub order_by: Vec<OrderByElement>,
    pub offset: Option<OffsetClause>,
}

impl QuerySpecification {
    pub fn parse(cursor: &mut SqlCursor) -> Result<QuerySpecification, QueryParseError> {
        cursor.skip_whitespace();
        cursor.expect_keyword("select")?;

        let mut unique_rows = false;
        let mut top = None;
        loop {
            if cursor.take_keyword("distinct") {
                unique_rows = true;
                continue;
            }
            if cursor.take_keyword("all") {
                continue;
            }
            if cursor.take_keyword("top") {
                top = Some(Self::parse_top(cursor)?);
                continue;
            }
            break;
        }

        let mut select_elements = Vec::new();
        loop {
            select_elements.push(Self::parse_element(cursor)?);
            if !cursor.take_symbol(",") {
                break;
            }
        }

        cursor.expect_keyword("from")?;
        let from = TableReference::parse(cursor)?;

        let where_clause = if cursor.take_keyword("where") {
            Some(BoolExpr::parse(cursor)?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if cursor.take_keyword("group") {
            cursor.expect_keyword("by")?;
            loop {
                group_by.push(ScalarExpr::parse(cursor)?);
                if !cursor.take_symbol(",") {
                    break;
                }
            }
        }

        let having = if cursor.take_keyword("having") {
            Some(BoolExpr::parse(cursor)?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if cursor.take_keyword("order") {
            cursor.expect_keyword("by")?;
            loop {
                let expr = ScalarExpr::parse(cursor)?;
                let descending = if cursor.take_keyword("desc") {
                    true
                } else {
                    cursor.take_keyword("asc");
                    false
                };
                order_by.push(OrderByElement { expr, descending });
                if !cursor.take_symbol(",") {
                    break;
                }
            }
        }

        let offset = if cursor.take_keyword("offset") {
            Some(Self::parse_offset(cursor)?)
        } else {
            None
        };

        Ok(QuerySpecification {
            select_elements,
            top,
            unique_rows,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            offset,
        })
    }

    fn parse_top(cursor: &mut SqlCursor) -> Result<TopClause, QueryParseError> {
        let parenthesized = cursor.take_symbol("(");
        let count = Self::parse_count(cursor, "TOP")?;
        if parenthesized {
            cursor.expect_symbol(")")?;
        }
        let percent = cursor.take_keyword("percent");
        let with_ties = if cursor.take_keyword("with") {
            cursor.expect_keyword("ties")?;
            true
        } else {
            false
        };
        Ok(TopClause { count, percent, with_ties })
    }

    fn parse_offset(cursor: &mut SqlCursor) -> Result<OffsetClause, QueryParseError> {
        let skip = Self::parse_count(cursor, "OFFSET")?;
        if !cursor.take_keyword("rows") {
            cursor.expect_keyword("row")?;
        }
        let fetch = if cursor.take_keyword("fetch") {
            if !cursor.take_keyword("next") {
                cursor.expect_keyword("first")?;
            }
            let n = Self::parse_count(cursor, "FETCH")?;
            if !cursor.take_keyword("rows") {
                cursor.expect_keyword("row")?;
            }
            cursor.expect_keyword("only")?;
            Some(n)
        } else {
            None
        };
        Ok(OffsetClause { skip, fetch })
    }

    fn parse_count(cursor: &mut SqlCursor, clause: &str) -> Result<u64, QueryParseError> {
        let pivot = cursor.position;
        match crate::parser::ast::Literal::parse_number(cursor)? {
            crate::parser::ast::Literal::Int(n) if n >= 0 => Ok(n as u64),
            _ => cursor.error_at(pivot, format!("{clause} expects a whole number")).err(),
        }
    }

    fn parse_element(cursor: &mut SqlCursor) -> Result<SelectElement, QueryParseError> {
        cursor.skip_whitespace();
        if cursor.current() == '*' {
            cursor.advance();
            cursor.skip_whitespace();
            return Ok(SelectElement::Wildcard);
        }

        let expr = ScalarExpr::parse(cursor)?;

        // `table.*` parses as the table column followed by `.*`
        if cursor.current() == '.' && cursor.peek(1) == '*' {
            if let ScalarExpr::Column(col) = &expr {
                if col.parts.len() == 1 {
                    cursor.advance();
                    cursor.advance();
                    cursor.skip_whitespace();
                    return Ok(SelectElement::TableWildcard(col.parts[0].clone()));
                }
            }
            return cursor.error("misplaced wildcard").err();
        }

        let alias = if cursor.take_keyword("as") {
            Some(cursor.take_identifier()?)
        } else if cursor.at_identifier() {
            cursor.take_identifier().ok()
        } else {
            None
        };

        Ok(SelectElement::Expr { expr, alias })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::ColumnRef;

    fn parse(text: &str) -> QuerySpecification {
        QuerySpecification::parse(&mut SqlCursor::new(text, false)).expect("parse")
    }

    #[test]
    fn minimal_select() {
        let q = parse("SELECT accountid, name FROM account");
        assert_eq!(q.select_elements.len(), 2);
        assert!(q.where_clause.is_none());
        assert!(q.top.is_none());
        assert!(!q.unique_rows);
    }

    #[test]
    fn top_distinct_and_aliases() {
        let q = parse("SELECT DISTINCT TOP 10 name AS n, createdon stamp FROM account");
        assert!(q.unique_rows);
        assert_eq!(q.top, Some(TopClause { count: 10, percent: false, with_ties: false }));
        assert_eq!(
            q.select_elements[0],
            SelectElement::Expr {
                expr: ScalarExpr::Column(ColumnRef::single("name")),
                alias: Some("n".into())
            }
        );
        match &q.select_elements[1] {
            SelectElement::Expr { alias, .. } => assert_eq!(alias.as_deref(), Some("stamp")),
            other => panic!("expected aliased element, got {other:?}"),
        }
    }

    #[test]
    fn wildcards() {
        let q = parse("SELECT *, a.* FROM account a");
        assert_eq!(q.select_elements[0], SelectElement::Wildcard);
        assert_eq!(q.select_elements[1], SelectElement::TableWildcard("a".into()));
    }

    #[test]
    fn full_clause_chain() {
        let q = parse(
            "SELECT name, count(*) FROM account WHERE statecode = 0 \
             GROUP BY name HAVING count(*) > 3 ORDER BY 2 DESC \
             OFFSET 50 ROWS FETCH NEXT 25 ROWS ONLY",
        );
        assert!(q.where_clause.is_some());
        assert_eq!(q.group_by.len(), 1);
        assert!(q.having.is_some());
        assert_eq!(q.order_by.len(), 1);
        assert!(q.order_by[0].descending);
        assert_eq!(q.offset, Some(OffsetClause { skip: 50, fetch: Some(25) }));
    }

    #[test]
    fn top_percent_is_carried_for_rejection() {
        let q = parse("SELECT TOP 10 PERCENT name FROM account");
        assert!(q.top.as_ref().is_some_and(|t| t.percent));
    }

    #[test]
    fn parse_errors_carry_position() {
        let err =
            QuerySpecification::parse(&mut SqlCursor::new("SELECT name,\nFROM account", false))
                .unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.col, 1);
    }
}

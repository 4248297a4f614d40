use crate::parser::ast::{BoolExpr, QuerySpecification, ScalarExpr};
use crate::parser::{QueryParseError, SqlCursor};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectStatement {
    pub query: QuerySpecification,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateStatement {
    pub target: String,
    pub set: Vec<(String, ScalarExpr)>,
    pub where_clause: Option<BoolExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteStatement {
    pub target: String,
    pub where_clause: Option<BoolExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InsertSource {
    Values(Vec<Vec<ScalarExpr>>),
    Select(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsertStatement {
    pub target: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Insert(InsertStatement),
}

/// One statement of a batch together with its original text, which the
/// compiled query carries for the raw-SQL fallback and the aggregate
/// alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub statement: Statement,
    pub sql: String,
}

impl Statement {
    pub fn parse(cursor: &mut SqlCursor) -> Result<Statement, QueryParseError> {
        cursor.skip_whitespace();
        if cursor.match_keyword("select") {
            return Ok(Statement::Select(SelectStatement {
                query: QuerySpecification::parse(cursor)?,
            }));
        }
        if cursor.take_keyword("update") {
            return Self::parse_update(cursor).map(Statement::Update);
        }
        if cursor.take_keyword("delete") {
            return Self::parse_delete(cursor).map(Statement::Delete);
        }
        if cursor.take_keyword("insert") {
            return Self::parse_insert(cursor).map(Statement::Insert);
        }
        cursor.error("expected SELECT, UPDATE, DELETE or INSERT").err()
    }

    fn parse_update(cursor: &mut SqlCursor) -> Result<UpdateStatement, QueryParseError> {
        let target = cursor.take_identifier()?;
        cursor.expect_keyword("set")?;
        let mut set = Vec::new();
        loop {
            let column = cursor.take_identifier()?;
            cursor.expect_symbol("=")?;
            let value = ScalarExpr::parse(cursor)?;
            set.push((column, value));
            if !cursor.take_symbol(",") {
                break;
            }
        }
        let where_clause =
            if cursor.take_keyword("where") { Some(BoolExpr::parse(cursor)?) } else { None };
        Ok(UpdateStatement { target, set, where_clause })
    }

    fn parse_delete(cursor: &mut SqlCursor) -> Result<DeleteStatement, QueryParseError> {
        cursor.expect_keyword("from")?;
        let target = cursor.take_identifier()?;
        let where_clause =
            if cursor.take_keyword("where") { Some(BoolExpr::parse(cursor)?) } else { None };
        Ok(DeleteStatement { target, where_clause })
    }

    fn parse_insert(cursor: &mut SqlCursor) -> Result<InsertStatement, QueryParseError> {
        cursor.expect_keyword("into")?;
        let target = cursor.take_identifier()?;

        cursor.expect_symbol("(")?;
        let mut columns = Vec::new();
        loop {
            columns.push(cursor.take_identifier()?);
            if cursor.take_symbol(",") {
                continue;
            }
            cursor.expect_symbol(")")?;
            break;
        }

        if cursor.take_keyword("values") {
            let mut rows = Vec::new();
            loop {
                cursor.expect_symbol("(")?;
                let mut cells = Vec::new();
                loop {
                    cells.push(ScalarExpr::parse(cursor)?);
                    if cursor.take_symbol(",") {
                        continue;
                    }
                    cursor.expect_symbol(")")?;
                    break;
                }
                rows.push(cells);
                if !cursor.take_symbol(",") {
                    break;
                }
            }
            return Ok(InsertStatement { target, columns, source: InsertSource::Values(rows) });
        }

        if cursor.match_keyword("select") {
            let query = QuerySpecification::parse(cursor)?;
            return Ok(InsertStatement {
                target,
                columns,
                source: InsertSource::Select(Box::new(SelectStatement { query })),
            });
        }

        cursor.error("expected VALUES or SELECT").err()
    }

    /// Parse a whole batch, keeping each statement's original text.
    pub fn parse_batch(
        text: &str,
        quoted_identifiers: bool,
    ) -> Result<Vec<ParsedStatement>, QueryParseError> {
        let mut cursor = SqlCursor::new(text, quoted_identifiers);
        let mut out = Vec::new();
        loop {
            cursor.skip_whitespace();
            while cursor.take_symbol(";") {
                cursor.skip_whitespace();
            }
            if cursor.eof() {
                break;
            }
            let start = cursor.position;
            let statement = Self::parse(&mut cursor)?;
            let sql: String =
                text.chars().skip(start).take(cursor.position - start).collect();
            out.push(ParsedStatement { statement, sql: sql.trim().to_string() });
        }
        Ok(out)
    }
}

impl TryFrom<&str> for Statement {
    type Error = QueryParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut cursor = SqlCursor::new(value, false);
        let statement = Self::parse(&mut cursor)?;
        cursor.skip_whitespace();
        if !cursor.eof() && !cursor.take_symbol(";") {
            return cursor.error("unexpected trailing input").err();
        }
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_set_list() {
        match Statement::try_from("UPDATE contact SET firstname = 'Hello ' + lastname").unwrap() {
            Statement::Update(u) => {
                assert_eq!(u.target, "contact");
                assert_eq!(u.set.len(), 1);
                assert_eq!(u.set[0].0, "firstname");
                assert!(u.where_clause.is_none());
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn delete_with_where() {
        match Statement::try_from("DELETE FROM account WHERE name = 'x'").unwrap() {
            Statement::Delete(d) => {
                assert_eq!(d.target, "account");
                assert!(d.where_clause.is_some());
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[test]
    fn insert_values_multiple_rows() {
        match Statement::try_from(
            "INSERT INTO contact (firstname, lastname) VALUES ('A', 'B'), ('C', 'D')",
        )
        .unwrap()
        {
            Statement::Insert(i) => {
                assert_eq!(i.columns, vec!["firstname", "lastname"]);
                match i.source {
                    InsertSource::Values(rows) => assert_eq!(rows.len(), 2),
                    other => panic!("expected values, got {other:?}"),
                }
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn insert_select_source() {
        match Statement::try_from(
            "INSERT INTO contact (firstname) SELECT name FROM account",
        )
        .unwrap()
        {
            Statement::Insert(i) => assert!(matches!(i.source, InsertSource::Select(_))),
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn batch_splits_statements_and_keeps_text() {
        let batch = Statement::parse_batch(
            "SELECT name FROM account; DELETE FROM contact",
            false,
        )
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sql, "SELECT name FROM account");
        assert!(matches!(batch[1].statement, Statement::Delete(_)));
    }
}

use crate::parser::ast::BoolExpr;
use crate::parser::{QueryParseError, SqlCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableReference {
    Named {
        table: String,
        alias: Option<String>,
        hints: Vec<String>,
    },
    Join {
        left: Box<TableReference>,
        right: Box<TableReference>,
        join_type: JoinType,
        on: BoolExpr,
    },
}

impl TableReference {
    pub fn parse(cursor: &mut SqlCursor) -> Result<TableReference, QueryParseError> {
        let mut left = Self::parse_named(cursor)?;

        loop {
            let join_type = if cursor.take_keyword("inner") {
                cursor.expect_keyword("join")?;
                JoinType::Inner
            } else if cursor.take_keyword("left") {
                cursor.take_keyword("outer");
                cursor.expect_keyword("join")?;
                JoinType::LeftOuter
            } else if cursor.take_keyword("join") {
                JoinType::Inner
            } else if cursor.match_keyword("right") || cursor.match_keyword("full") {
                return cursor.error("only INNER and LEFT OUTER joins are supported").err();
            } else {
                break;
            };

            let right = Self::parse_named(cursor)?;
            cursor.expect_keyword("on")?;
            let on = BoolExpr::parse(cursor)?;
            left = TableReference::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                on,
            };
        }

        Ok(left)
    }

    fn parse_named(cursor: &mut SqlCursor) -> Result<TableReference, QueryParseError> {
        let table = cursor.take_identifier()?;

        let mut alias = None;
        if cursor.take_keyword("as") {
            alias = Some(cursor.take_identifier()?);
        } else if cursor.at_identifier() && !cursor.match_keyword("with") {
            // bare alias, unless the next word opens a hint or clause
            if let Ok(name) = cursor.take_identifier() {
                alias = Some(name);
            }
        }

        let mut hints = Vec::new();
        if cursor.take_keyword("with") {
            cursor.expect_symbol("(")?;
            loop {
                hints.push(cursor.take_word()?.to_lowercase());
                if cursor.take_symbol(",") {
                    continue;
                }
                cursor.expect_symbol(")")?;
                break;
            }
        }

        Ok(TableReference::Named { table, alias, hints })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> TableReference {
        TableReference::parse(&mut SqlCursor::new(text, false)).expect("parse")
    }

    #[test]
    fn named_with_alias_forms() {
        assert_eq!(
            parse("account AS a"),
            TableReference::Named { table: "account".into(), alias: Some("a".into()), hints: vec![] }
        );
        assert_eq!(
            parse("account a"),
            TableReference::Named { table: "account".into(), alias: Some("a".into()), hints: vec![] }
        );
    }

    #[test]
    fn nolock_hint_is_collected() {
        match parse("account WITH (NOLOCK)") {
            TableReference::Named { hints, .. } => assert_eq!(hints, vec!["nolock"]),
            other => panic!("expected named, got {other:?}"),
        }
    }

    #[test]
    fn joins_are_left_associative() {
        match parse(
            "account a INNER JOIN contact c ON a.accountid = c.parentcustomerid \
             LEFT OUTER JOIN systemuser u ON c.ownerid = u.systemuserid",
        ) {
            TableReference::Join { left, join_type, .. } => {
                assert_eq!(join_type, JoinType::LeftOuter);
                assert!(matches!(*left, TableReference::Join { join_type: JoinType::Inner, .. }));
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn right_join_is_rejected() {
        let result = TableReference::parse(&mut SqlCursor::new(
            "account RIGHT JOIN contact ON 1 = 1",
            false,
        ));
        assert!(result.is_err());
    }
}

use crate::parser::ast::{ComparisonOp, ScalarExpr};
use crate::parser::{QueryParseError, SqlCursor};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoolExpr {
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
    Not(Box<BoolExpr>),
    /// Explicit parentheses survive parsing: they open a nested filter
    /// during lowering.
    Paren(Box<BoolExpr>),
    Comparison { left: ScalarExpr, op: ComparisonOp, right: ScalarExpr },
    IsNull { expr: ScalarExpr, negated: bool },
    Like { expr: ScalarExpr, pattern: ScalarExpr, negated: bool },
    InList { expr: ScalarExpr, list: Vec<ScalarExpr>, negated: bool },
    /// Parsed far enough to be rejected with a rewrite hint.
    InSubquery { expr: ScalarExpr },
}

impl BoolExpr {
    pub fn parse(cursor: &mut SqlCursor) -> Result<BoolExpr, QueryParseError> {
        cursor.skip_whitespace();
        Self::parse_or(cursor)
    }

    /// True when any node in this expression is an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            BoolExpr::And(items) | BoolExpr::Or(items) => {
                items.iter().any(BoolExpr::contains_aggregate)
            }
            BoolExpr::Not(inner) | BoolExpr::Paren(inner) => inner.contains_aggregate(),
            BoolExpr::Comparison { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            BoolExpr::IsNull { expr, .. } => expr.contains_aggregate(),
            BoolExpr::Like { expr, pattern, .. } => {
                expr.contains_aggregate() || pattern.contains_aggregate()
            }
            BoolExpr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(ScalarExpr::contains_aggregate)
            }
            BoolExpr::InSubquery { expr } => expr.contains_aggregate(),
        }
    }

    fn parse_or(cursor: &mut SqlCursor) -> Result<BoolExpr, QueryParseError> {
        let mut items = vec![Self::parse_and(cursor)?];
        while cursor.take_keyword("or") {
            items.push(Self::parse_and(cursor)?);
        }
        Ok(if items.len() == 1 {
            items.pop().unwrap_or(BoolExpr::And(vec![]))
        } else {
            BoolExpr::Or(items)
        })
    }

    fn parse_and(cursor: &mut SqlCursor) -> Result<BoolExpr, QueryParseError> {
        let mut items = vec![Self::parse_not(cursor)?];
        while cursor.take_keyword("and") {
            items.push(Self::parse_not(cursor)?);
        }
        Ok(if items.len() == 1 {
            items.pop().unwrap_or(BoolExpr::And(vec![]))
        } else {
            BoolExpr::And(items)
        })
    }

    fn parse_not(cursor: &mut SqlCursor) -> Result<BoolExpr, QueryParseError> {
        if cursor.take_keyword("not") {
            return Ok(BoolExpr::Not(Box::new(Self::parse_not(cursor)?)));
        }
        Self::parse_primary(cursor)
    }

    fn parse_primary(cursor: &mut SqlCursor) -> Result<BoolExpr, QueryParseError> {
        cursor.skip_whitespace();
        if cursor.current() == '(' {
            // could be a predicate group or a parenthesized scalar;
            // try the group first and fall back
            let checkpoint = cursor.position;
            cursor.advance();
            cursor.skip_whitespace();
            if let Ok(inner) = Self::parse(cursor) {
                if cursor.take_symbol(")") {
                    return Ok(BoolExpr::Paren(Box::new(inner)));
                }
            }
            cursor.position = checkpoint;
        }
        Self::parse_comparison(cursor)
    }

    fn parse_comparison(cursor: &mut SqlCursor) -> Result<BoolExpr, QueryParseError> {
        let left = ScalarExpr::parse(cursor)?;
        cursor.skip_whitespace();
        let pivot = cursor.position;

        if let Some(op) = Self::take_comparison_op(cursor) {
            let right = ScalarExpr::parse(cursor)?;
            return Ok(BoolExpr::Comparison { left, op, right });
        }

        if cursor.take_keyword("is") {
            let negated = cursor.take_keyword("not");
            cursor.expect_keyword("null")?;
            return Ok(BoolExpr::IsNull { expr: left, negated });
        }

        let negated = cursor.take_keyword("not");

        if cursor.take_keyword("like") {
            let pattern = ScalarExpr::parse(cursor)?;
            return Ok(BoolExpr::Like { expr: left, pattern, negated });
        }

        if cursor.take_keyword("in") {
            cursor.expect_symbol("(")?;
            if cursor.match_keyword("select") {
                // consume up to the closing parenthesis so the batch
                // keeps its shape; the compiler rejects it
                let mut depth = 1;
                while !cursor.eof() && depth > 0 {
                    match cursor.current() {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    cursor.advance();
                }
                cursor.skip_whitespace();
                return Ok(BoolExpr::InSubquery { expr: left });
            }
            let mut list = Vec::new();
            loop {
                list.push(ScalarExpr::parse(cursor)?);
                if cursor.take_symbol(",") {
                    continue;
                }
                cursor.expect_symbol(")")?;
                break;
            }
            return Ok(BoolExpr::InList { expr: left, list, negated });
        }

        cursor.error_at(pivot, "expected comparison").err()
    }

    fn take_comparison_op(cursor: &mut SqlCursor) -> Option<ComparisonOp> {
        if cursor.take_symbol(">=") {
            Some(ComparisonOp::GtEq)
        } else if cursor.take_symbol("<=") {
            Some(ComparisonOp::LtEq)
        } else if cursor.take_symbol("<>") || cursor.take_symbol("!=") {
            Some(ComparisonOp::NotEq)
        } else if cursor.take_symbol("=") {
            Some(ComparisonOp::Eq)
        } else if cursor.take_symbol("<") {
            Some(ComparisonOp::Lt)
        } else if cursor.take_symbol(">") {
            Some(ComparisonOp::Gt)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Literal;

    fn parse(text: &str) -> BoolExpr {
        BoolExpr::parse(&mut SqlCursor::new(text, false)).expect("parse")
    }

    #[test]
    fn and_binds_tighter_than_or() {
        match parse("a = 1 OR b = 2 AND c = 3") {
            BoolExpr::Or(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[1], BoolExpr::And(_)));
            }
            other => panic!("expected Or at root, got {other:?}"),
        }
    }

    #[test]
    fn parentheses_are_preserved() {
        match parse("a = 1 AND (b = 2 OR c = 3)") {
            BoolExpr::And(items) => match &items[1] {
                BoolExpr::Paren(inner) => assert!(matches!(**inner, BoolExpr::Or(_))),
                other => panic!("expected Paren, got {other:?}"),
            },
            other => panic!("expected And at root, got {other:?}"),
        }
    }

    #[test]
    fn parenthesized_scalar_is_not_a_group() {
        match parse("(a + 1) = 2") {
            BoolExpr::Comparison { op: ComparisonOp::Eq, .. } => {}
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn is_null_and_negation() {
        assert!(matches!(parse("a IS NULL"), BoolExpr::IsNull { negated: false, .. }));
        assert!(matches!(parse("a IS NOT NULL"), BoolExpr::IsNull { negated: true, .. }));
        assert!(matches!(parse("NOT a = 1"), BoolExpr::Not(_)));
    }

    #[test]
    fn like_and_not_like() {
        assert!(matches!(parse("a LIKE 'x%'"), BoolExpr::Like { negated: false, .. }));
        assert!(matches!(parse("a NOT LIKE 'x%'"), BoolExpr::Like { negated: true, .. }));
    }

    #[test]
    fn in_list_collects_values() {
        match parse("a IN (1, 2, 3)") {
            BoolExpr::InList { list, negated, .. } => {
                assert_eq!(list.len(), 3);
                assert!(!negated);
                assert_eq!(list[0], ScalarExpr::Literal(Literal::Int(1)));
            }
            other => panic!("expected InList, got {other:?}"),
        }
    }

    #[test]
    fn in_subquery_is_recognized() {
        assert!(matches!(
            parse("a IN (SELECT accountid FROM account)"),
            BoolExpr::InSubquery { .. }
        ));
    }
}

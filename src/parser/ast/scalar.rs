use crate::parser::ast::{BinaryOp, BoolExpr, Literal, UnaryOp};
use crate::parser::{QueryParseError, SqlCursor};

/// A (possibly multi-part) column reference as written in the SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub parts: Vec<String>,
}

impl ColumnRef {
    pub fn single(name: impl Into<String>) -> Self {
        ColumnRef { parts: vec![name.into()] }
    }

    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    pub fn qualifier(&self) -> Option<&str> {
        if self.parts.len() > 1 {
            Some(self.parts[0].as_str())
        } else {
            None
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionArg {
    Star,
    Expr(ScalarExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarExpr {
    Literal(Literal),
    Column(ColumnRef),
    Unary { op: UnaryOp, operand: Box<ScalarExpr> },
    Binary { op: BinaryOp, left: Box<ScalarExpr>, right: Box<ScalarExpr> },
    Function(FunctionCall),
    SearchedCase {
        branches: Vec<(BoolExpr, ScalarExpr)>,
        else_expr: Option<Box<ScalarExpr>>,
    },
    SimpleCase {
        operand: Box<ScalarExpr>,
        branches: Vec<(ScalarExpr, ScalarExpr)>,
        else_expr: Option<Box<ScalarExpr>>,
    },
}

impl ScalarExpr {
    pub fn parse(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        cursor.skip_whitespace();
        Self::parse_additive(cursor)
    }

    fn parse_additive(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        let mut left = Self::parse_multiplicative(cursor)?;
        loop {
            let op = if cursor.take_symbol("+") {
                BinaryOp::Add
            } else if cursor.current() == '-' && cursor.peek(1) != '-' && cursor.take_symbol("-") {
                BinaryOp::Subtract
            } else if cursor.take_symbol("&") {
                BinaryOp::BitAnd
            } else if cursor.take_symbol("^") {
                BinaryOp::BitXor
            } else if cursor.take_symbol("|") {
                BinaryOp::BitOr
            } else {
                break;
            };
            let right = Self::parse_multiplicative(cursor)?;
            left = ScalarExpr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        let mut left = Self::parse_unary(cursor)?;
        loop {
            let op = if cursor.take_symbol("*") {
                BinaryOp::Multiply
            } else if cursor.current() == '/' && cursor.peek(1) != '*' && cursor.take_symbol("/") {
                BinaryOp::Divide
            } else if cursor.take_symbol("%") {
                BinaryOp::Modulo
            } else {
                break;
            };
            let right = Self::parse_unary(cursor)?;
            left = ScalarExpr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        cursor.skip_whitespace();
        let op = if cursor.current() == '-' {
            cursor.advance();
            cursor.skip_whitespace();
            Some(UnaryOp::Negate)
        } else if cursor.current() == '~' {
            cursor.advance();
            cursor.skip_whitespace();
            Some(UnaryOp::BitwiseNot)
        } else if cursor.current() == '+' {
            cursor.advance();
            cursor.skip_whitespace();
            Some(UnaryOp::Positive)
        } else {
            None
        };
        let operand = Self::parse_primary(cursor)?;
        Ok(match op {
            Some(op) => ScalarExpr::Unary { op, operand: Box::new(operand) },
            None => operand,
        })
    }

    fn parse_primary(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        cursor.skip_whitespace();

        if Literal::at_number(cursor) {
            return Ok(ScalarExpr::Literal(Literal::parse_number(cursor)?));
        }
        if Literal::at_string(cursor) {
            return Ok(ScalarExpr::Literal(Literal::parse_string(cursor)?));
        }
        if cursor.take_keyword("null") {
            return Ok(ScalarExpr::Literal(Literal::Null));
        }
        if cursor.match_keyword("case") {
            return Self::parse_case(cursor);
        }
        if cursor.current() == '(' {
            cursor.advance();
            cursor.skip_whitespace();
            let inner = Self::parse(cursor)?;
            cursor.expect_symbol(")")?;
            return Ok(inner);
        }
        if cursor.at_identifier() {
            return Self::parse_column_or_function(cursor);
        }
        cursor.error("expected expression").err()
    }

    fn parse_column_or_function(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        let mut parts = vec![cursor.take_identifier()?];
        while cursor.current() == '.' && cursor.peek(1) != '*' {
            cursor.advance();
            cursor.skip_whitespace();
            parts.push(cursor.take_identifier()?);
        }

        if cursor.current() == '(' && parts.len() == 1 {
            cursor.advance();
            cursor.skip_whitespace();
            let name = parts.pop().unwrap_or_default();
            return Self::parse_function(cursor, name);
        }

        Ok(ScalarExpr::Column(ColumnRef { parts }))
    }

    fn parse_function(cursor: &mut SqlCursor, name: String) -> Result<ScalarExpr, QueryParseError> {
        let distinct = cursor.take_keyword("distinct");
        let mut args = Vec::new();
        if !cursor.take_symbol(")") {
            loop {
                if cursor.current() == '*' {
                    cursor.advance();
                    cursor.skip_whitespace();
                    args.push(FunctionArg::Star);
                } else {
                    args.push(FunctionArg::Expr(Self::parse(cursor)?));
                }
                if cursor.take_symbol(",") {
                    continue;
                }
                cursor.expect_symbol(")")?;
                break;
            }
        }
        Ok(ScalarExpr::Function(FunctionCall { name, args, distinct }))
    }

    fn parse_case(cursor: &mut SqlCursor) -> Result<ScalarExpr, QueryParseError> {
        cursor.expect_keyword("case")?;

        if cursor.match_keyword("when") {
            let mut branches = Vec::new();
            while cursor.take_keyword("when") {
                let test = BoolExpr::parse(cursor)?;
                cursor.expect_keyword("then")?;
                let result = Self::parse(cursor)?;
                branches.push((test, result));
            }
            let else_expr = if cursor.take_keyword("else") {
                Some(Box::new(Self::parse(cursor)?))
            } else {
                None
            };
            cursor.expect_keyword("end")?;
            return Ok(ScalarExpr::SearchedCase { branches, else_expr });
        }

        let operand = Box::new(Self::parse(cursor)?);
        let mut branches = Vec::new();
        while cursor.take_keyword("when") {
            let test = Self::parse(cursor)?;
            cursor.expect_keyword("then")?;
            let result = Self::parse(cursor)?;
            branches.push((test, result));
        }
        let else_expr = if cursor.take_keyword("else") {
            Some(Box::new(Self::parse(cursor)?))
        } else {
            None
        };
        cursor.expect_keyword("end")?;
        Ok(ScalarExpr::SimpleCase { operand, branches, else_expr })
    }

    /// True when any node in this expression is an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            ScalarExpr::Function(f) => {
                is_aggregate_name(&f.name)
                    || f.args.iter().any(|a| match a {
                        FunctionArg::Expr(e) => e.contains_aggregate(),
                        FunctionArg::Star => false,
                    })
            }
            ScalarExpr::Unary { operand, .. } => operand.contains_aggregate(),
            ScalarExpr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            ScalarExpr::SearchedCase { branches, else_expr } => {
                branches.iter().any(|(t, r)| t.contains_aggregate() || r.contains_aggregate())
                    || else_expr.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            ScalarExpr::SimpleCase { operand, branches, else_expr } => {
                operand.contains_aggregate()
                    || branches
                        .iter()
                        .any(|(t, r)| t.contains_aggregate() || r.contains_aggregate())
                    || else_expr.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            ScalarExpr::Literal(_) | ScalarExpr::Column(_) => false,
        }
    }
}

pub fn is_aggregate_name(name: &str) -> bool {
    matches!(name.to_lowercase().as_str(), "count" | "sum" | "avg" | "min" | "max")
}

use ordered_float::NotNan;
use rust_decimal::Decimal;

use crate::parser::{QueryParseError, SqlCursor};

/// T-SQL literals. Whole numbers are Int, decimal-point numbers are
/// Numeric (exact), exponent forms are Real.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Numeric(Decimal),
    Real(NotNan<f64>),
    String(String),
    Null,
}

impl Literal {
    pub fn at_number(cursor: &SqlCursor) -> bool {
        cursor.current().is_ascii_digit()
            || (cursor.current() == '.' && cursor.peek(1).is_ascii_digit())
    }

    pub fn at_string(cursor: &SqlCursor) -> bool {
        cursor.current() == '\''
            || ((cursor.current() == 'N' || cursor.current() == 'n') && cursor.peek(1) == '\'')
    }

    pub fn parse_number(cursor: &mut SqlCursor) -> Result<Literal, QueryParseError> {
        let pivot = cursor.position;
        let mut text = String::new();
        let mut saw_dot = false;
        let mut saw_exp = false;
        while !cursor.eof() {
            let c = cursor.current();
            if c.is_ascii_digit() {
                text.push(c);
                cursor.advance();
            } else if c == '.' && !saw_dot && !saw_exp {
                saw_dot = true;
                text.push(c);
                cursor.advance();
            } else if (c == 'e' || c == 'E') && !saw_exp && cursor.peek(1).is_ascii_digit()
                || (c == 'e' || c == 'E')
                    && !saw_exp
                    && (cursor.peek(1) == '-' || cursor.peek(1) == '+')
                    && cursor.peek(2).is_ascii_digit()
            {
                saw_exp = true;
                text.push(c);
                cursor.advance();
                if cursor.current() == '-' || cursor.current() == '+' {
                    text.push(cursor.current());
                    cursor.advance();
                }
            } else {
                break;
            }
        }
        cursor.skip_whitespace();

        if saw_exp {
            let value: f64 = text
                .parse()
                .map_err(|_| cursor.error_at(pivot, "invalid float literal"))?;
            let value =
                NotNan::new(value).map_err(|_| cursor.error_at(pivot, "invalid float literal"))?;
            return Ok(Literal::Real(value));
        }
        if saw_dot {
            let value: Decimal = text
                .parse()
                .map_err(|_| cursor.error_at(pivot, "invalid numeric literal"))?;
            return Ok(Literal::Numeric(value));
        }
        let value: i64 = text
            .parse()
            .map_err(|_| cursor.error_at(pivot, "invalid integer literal"))?;
        Ok(Literal::Int(value))
    }

    /// `'text'` with doubled-quote escapes; `N'...'` strips the prefix.
    pub fn parse_string(cursor: &mut SqlCursor) -> Result<Literal, QueryParseError> {
        let pivot = cursor.position;
        if cursor.current() == 'N' || cursor.current() == 'n' {
            cursor.advance();
        }
        if cursor.current() != '\'' {
            return cursor.error_at(pivot, "expected string literal").err();
        }
        cursor.advance();
        let mut value = String::new();
        loop {
            if cursor.eof() {
                return cursor.error_at(pivot, "unterminated string literal").err();
            }
            if cursor.current() == '\'' {
                if cursor.peek(1) == '\'' {
                    value.push('\'');
                    cursor.advance();
                    cursor.advance();
                    continue;
                }
                cursor.advance();
                break;
            }
            value.push(cursor.current());
            cursor.advance();
        }
        cursor.skip_whitespace();
        Ok(Literal::String(value))
    }
}

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::executor::{Row, Truth, Value, ValueType};
use crate::parser::ast::{BinaryOp, ComparisonOp, UnaryOp};

/// Date-part symbol consumed (never evaluated) as the first parameter
/// of DATEADD/DATEDIFF/DATEPART and as a native date grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    FiscalPeriod,
    FiscalYear,
}

impl DatePart {
    pub fn parse(symbol: &str) -> Option<DatePart> {
        Some(match symbol.to_lowercase().as_str() {
            "year" | "yy" | "yyyy" => DatePart::Year,
            "quarter" | "qq" | "q" => DatePart::Quarter,
            "month" | "mm" | "m" => DatePart::Month,
            "week" | "wk" | "ww" => DatePart::Week,
            "day" | "dd" | "d" => DatePart::Day,
            "hour" | "hh" => DatePart::Hour,
            "minute" | "mi" | "n" => DatePart::Minute,
            "second" | "ss" | "s" => DatePart::Second,
            "fiscalperiod" => DatePart::FiscalPeriod,
            "fiscalyear" => DatePart::FiscalYear,
            _ => return None,
        })
    }

    /// The FetchXML `dategrouping` attribute value, when this part is a
    /// legal native grouping.
    pub fn date_grouping(self) -> Option<&'static str> {
        Some(match self {
            DatePart::Year => "year",
            DatePart::Quarter => "quarter",
            DatePart::Month => "month",
            DatePart::Week => "week",
            DatePart::Day => "day",
            DatePart::FiscalPeriod => "fiscal-period",
            DatePart::FiscalYear => "fiscal-year",
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunc {
    Left,
    Right,
    Substring,
    Trim,
    Len,
    Upper,
    Lower,
    DateAdd(DatePart),
    DateDiff(DatePart),
    DatePart(DatePart),
}

/// A compiled scalar expression, evaluated against one row.
#[derive(Debug, Clone)]
pub enum Expr {
    Column { key: String, ty: ValueType },
    Literal(Value),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    /// Searched CASE, right-folded: one test, one result, one fallthrough.
    Case { when: Box<PredExpr>, then: Box<Expr>, otherwise: Box<Expr> },
    Call { func: ScalarFunc, args: Vec<Expr> },
}

/// A compiled predicate. Comparisons with a null operand yield false,
/// matching the behavior observable through the native query form.
#[derive(Debug, Clone)]
pub enum PredExpr {
    Compare { op: ComparisonOp, left: Expr, right: Expr },
    And(Vec<PredExpr>),
    Or(Vec<PredExpr>),
    Not(Box<PredExpr>),
    IsNull { expr: Expr, negated: bool },
    Like { expr: Expr, pattern: Expr, negated: bool },
    InList { expr: Expr, list: Vec<Expr>, negated: bool },
}

impl Expr {
    pub fn eval(&self, row: &Row) -> Value {
        match self {
            Expr::Column { key, .. } => row.get(key),
            Expr::Literal(v) => v.clone(),
            Expr::Unary { op, operand } => eval_unary(*op, operand.eval(row)),
            Expr::Binary { op, left, right } => {
                eval_binary(*op, left.eval(row), right.eval(row))
            }
            Expr::Case { when, then, otherwise } => {
                if when.eval(row).is_true() {
                    then.eval(row)
                } else {
                    otherwise.eval(row)
                }
            }
            Expr::Call { func, args } => {
                let vals: Vec<Value> = args.iter().map(|a| a.eval(row)).collect();
                eval_call(*func, &vals)
            }
        }
    }

    /// Best-effort result type, used to type calculated columns.
    pub fn result_type(&self) -> Option<ValueType> {
        match self {
            Expr::Column { ty, .. } => Some(*ty),
            Expr::Literal(v) => v.value_type(),
            Expr::Unary { operand, .. } => operand.result_type(),
            Expr::Binary { op: BinaryOp::Add, left, right } => {
                if left.result_type() == Some(ValueType::String) {
                    Some(ValueType::String)
                } else {
                    numeric_result(left.result_type(), right.result_type())
                }
            }
            Expr::Binary { left, right, .. } => {
                numeric_result(left.result_type(), right.result_type())
            }
            Expr::Case { then, otherwise, .. } => {
                then.result_type().or_else(|| otherwise.result_type())
            }
            Expr::Call { func, .. } => Some(match func {
                ScalarFunc::Left
                | ScalarFunc::Right
                | ScalarFunc::Substring
                | ScalarFunc::Trim
                | ScalarFunc::Upper
                | ScalarFunc::Lower => ValueType::String,
                ScalarFunc::Len | ScalarFunc::DateDiff(_) | ScalarFunc::DatePart(_) => {
                    ValueType::Int
                }
                ScalarFunc::DateAdd(_) => ValueType::DateTime,
            }),
        }
    }
}

fn numeric_result(a: Option<ValueType>, b: Option<ValueType>) -> Option<ValueType> {
    match (a?, b?) {
        (ValueType::Float, _) | (_, ValueType::Float) => Some(ValueType::Float),
        (ValueType::Decimal, _) | (_, ValueType::Decimal) => Some(ValueType::Decimal),
        _ => Some(ValueType::Int),
    }
}

impl PredExpr {
    pub fn eval(&self, row: &Row) -> Truth {
        match self {
            PredExpr::And(items) => items
                .iter()
                .fold(Truth::True, |acc, p| acc.and(p.eval(row))),
            PredExpr::Or(items) => items
                .iter()
                .fold(Truth::False, |acc, p| acc.or(p.eval(row))),
            PredExpr::Not(p) => p.eval(row).not(),
            PredExpr::Compare { op, left, right } => {
                let l = left.eval(row);
                let r = right.eval(row);
                if l.is_null() || r.is_null() {
                    return Truth::False;
                }
                let Some(ord) = l.sql_cmp(&r) else { return Truth::False };
                Truth::of(match op {
                    ComparisonOp::Eq => ord.is_eq(),
                    ComparisonOp::NotEq => ord.is_ne(),
                    ComparisonOp::Lt => ord.is_lt(),
                    ComparisonOp::LtEq => ord.is_le(),
                    ComparisonOp::Gt => ord.is_gt(),
                    ComparisonOp::GtEq => ord.is_ge(),
                })
            }
            PredExpr::IsNull { expr, negated } => {
                let t = Truth::of(expr.eval(row).is_null());
                if *negated {
                    t.not()
                } else {
                    t
                }
            }
            PredExpr::Like { expr, pattern, negated } => {
                let t = match (expr.eval(row), pattern.eval(row)) {
                    (Value::String(s), Value::String(p)) => Truth::of(like_match(&s, &p)),
                    _ => Truth::False,
                };
                if *negated {
                    t.not()
                } else {
                    t
                }
            }
            PredExpr::InList { expr, list, negated } => {
                let v = expr.eval(row);
                if v.is_null() {
                    return Truth::False;
                }
                let found = list.iter().any(|e| v.sql_eq(&e.eval(row)).is_true());
                let t = Truth::of(found);
                if *negated {
                    t.not()
                } else {
                    t
                }
            }
        }
    }
}

fn eval_unary(op: UnaryOp, v: Value) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    match (op, v.unwrap_platform()) {
        (UnaryOp::Positive, v) => v,
        (UnaryOp::Negate, Value::Int(i)) => Value::Int(-i),
        (UnaryOp::Negate, Value::Decimal(d)) => Value::Decimal(-d),
        (UnaryOp::Negate, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::BitwiseNot, Value::Int(i)) => Value::Int(!i),
        _ => Value::Null,
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Value {
    if l.is_null() || r.is_null() {
        return Value::Null;
    }
    let l = l.unwrap_platform();
    let r = r.unwrap_platform();

    // string concatenation keys off the left operand
    if op == BinaryOp::Add {
        if let Value::String(a) = &l {
            return match value_to_text(&r) {
                Some(b) => Value::String(format!("{a}{b}")),
                None => Value::Null,
            };
        }
    }

    match op {
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => match (l, r) {
            (Value::Int(a), Value::Int(b)) => Value::Int(match op {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                _ => a ^ b,
            }),
            _ => Value::Null,
        },
        _ => numeric_binary(op, l, r),
    }
}

fn numeric_binary(op: BinaryOp, l: Value, r: Value) -> Value {
    // float contaminates; otherwise exact decimal; int only when both int
    match (&l, &r) {
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let (Some(a), Some(b)) = (as_f64(&l), as_f64(&r)) else { return Value::Null };
            match op {
                BinaryOp::Add => Value::Float(a + b),
                BinaryOp::Subtract => Value::Float(a - b),
                BinaryOp::Multiply => Value::Float(a * b),
                BinaryOp::Divide => {
                    if b == 0.0 {
                        Value::Null
                    } else {
                        Value::Float(a / b)
                    }
                }
                BinaryOp::Modulo => {
                    if b == 0.0 {
                        Value::Null
                    } else {
                        Value::Float(a % b)
                    }
                }
                _ => Value::Null,
            }
        }
        (Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => Value::Int(a + b),
            BinaryOp::Subtract => Value::Int(a - b),
            BinaryOp::Multiply => Value::Int(a * b),
            // integer division truncates
            BinaryOp::Divide => a.checked_div(*b).map(Value::Int).unwrap_or(Value::Null),
            BinaryOp::Modulo => a.checked_rem(*b).map(Value::Int).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        _ => {
            let (Some(a), Some(b)) = (as_decimal(&l), as_decimal(&r)) else {
                return Value::Null;
            };
            match op {
                BinaryOp::Add => Value::Decimal(a + b),
                BinaryOp::Subtract => Value::Decimal(a - b),
                BinaryOp::Multiply => Value::Decimal(a * b),
                BinaryOp::Divide => a.checked_div(b).map(Value::Decimal).unwrap_or(Value::Null),
                BinaryOp::Modulo => a.checked_rem(b).map(Value::Decimal).unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
    }
}

fn as_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Decimal(d) => Some(*d),
        Value::Float(f) => Decimal::from_f64(*f),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Decimal(d) => d.to_f64(),
        Value::Float(f) => Some(*f),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Decimal(d) => Some(d.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
        Value::Guid(g) => Some(g.to_string()),
        Value::DateTime(d) => Some(d.to_string()),
        _ => None,
    }
}

fn eval_call(func: ScalarFunc, args: &[Value]) -> Value {
    if args.iter().any(Value::is_null) {
        return Value::Null;
    }
    match func {
        ScalarFunc::Left => match args {
            [Value::String(s), n] => match as_int(n) {
                Some(n) if n >= 0 => Value::String(s.chars().take(n as usize).collect()),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        ScalarFunc::Right => match args {
            [Value::String(s), n] => match as_int(n) {
                Some(n) if n >= 0 => {
                    let chars: Vec<char> = s.chars().collect();
                    let start = chars.len().saturating_sub(n as usize);
                    Value::String(chars[start..].iter().collect())
                }
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        ScalarFunc::Substring => match args {
            [Value::String(s), start, len] => match (as_int(start), as_int(len)) {
                (Some(start), Some(len)) if len >= 0 => {
                    // 1-based, starts before 1 eat into the length
                    let chars: Vec<char> = s.chars().collect();
                    let from = (start - 1).max(0) as usize;
                    let take = (len + (start - 1).min(0)).max(0) as usize;
                    if from >= chars.len() {
                        Value::String(String::new())
                    } else {
                        Value::String(chars[from..].iter().take(take).collect())
                    }
                }
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        ScalarFunc::Trim => match args {
            [Value::String(s)] => Value::String(s.trim().to_string()),
            _ => Value::Null,
        },
        ScalarFunc::Len => match args {
            // LEN ignores trailing spaces
            [Value::String(s)] => Value::Int(s.trim_end_matches(' ').chars().count() as i64),
            _ => Value::Null,
        },
        ScalarFunc::Upper => match args {
            [Value::String(s)] => Value::String(s.to_uppercase()),
            _ => Value::Null,
        },
        ScalarFunc::Lower => match args {
            [Value::String(s)] => Value::String(s.to_lowercase()),
            _ => Value::Null,
        },
        ScalarFunc::DateAdd(part) => match args {
            [n, d] => match (as_int(n), as_datetime(d)) {
                (Some(n), Some(d)) => date_add(part, n, d).map(Value::DateTime).unwrap_or(Value::Null),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        ScalarFunc::DateDiff(part) => match args {
            [a, b] => match (as_datetime(a), as_datetime(b)) {
                (Some(a), Some(b)) => Value::Int(date_diff(part, a, b)),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        ScalarFunc::DatePart(part) => match args {
            [d] => match as_datetime(d) {
                Some(d) => Value::Int(date_part(part, d)),
                None => Value::Null,
            },
            _ => Value::Null,
        },
    }
}

fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Decimal(d) => d.to_i64(),
        Value::Float(f) => Some(*f as i64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_datetime(v: &Value) -> Option<NaiveDateTime> {
    match v {
        Value::DateTime(d) => Some(*d),
        Value::String(s) => Value::parse_datetime(s),
        _ => None,
    }
}

fn date_add(part: DatePart, n: i64, d: NaiveDateTime) -> Option<NaiveDateTime> {
    match part {
        DatePart::Year | DatePart::FiscalYear => add_months(d, n * 12),
        DatePart::Quarter => add_months(d, n * 3),
        DatePart::Month | DatePart::FiscalPeriod => add_months(d, n),
        DatePart::Week => d.checked_add_signed(Duration::days(n * 7)),
        DatePart::Day => d.checked_add_signed(Duration::days(n)),
        DatePart::Hour => d.checked_add_signed(Duration::hours(n)),
        DatePart::Minute => d.checked_add_signed(Duration::minutes(n)),
        DatePart::Second => d.checked_add_signed(Duration::seconds(n)),
    }
}

fn add_months(d: NaiveDateTime, n: i64) -> Option<NaiveDateTime> {
    let total = d.year() as i64 * 12 + d.month0() as i64 + n;
    let year = total.div_euclid(12) as i32;
    let month0 = total.rem_euclid(12) as u32;
    let mut day = d.day();
    loop {
        if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month0 + 1, day) {
            return Some(NaiveDateTime::new(date, d.time()));
        }
        if day == 1 {
            return None;
        }
        day -= 1; // clamp to the month's last day
    }
}

fn date_diff(part: DatePart, a: NaiveDateTime, b: NaiveDateTime) -> i64 {
    match part {
        DatePart::Year | DatePart::FiscalYear => (b.year() - a.year()) as i64,
        DatePart::Quarter => {
            let qa = a.year() as i64 * 4 + (a.month0() / 3) as i64;
            let qb = b.year() as i64 * 4 + (b.month0() / 3) as i64;
            qb - qa
        }
        DatePart::Month | DatePart::FiscalPeriod => {
            (b.year() as i64 * 12 + b.month0() as i64) - (a.year() as i64 * 12 + a.month0() as i64)
        }
        DatePart::Week => (b.date() - a.date()).num_days() / 7,
        DatePart::Day => (b.date() - a.date()).num_days(),
        DatePart::Hour => (b - a).num_hours(),
        DatePart::Minute => (b - a).num_minutes(),
        DatePart::Second => (b - a).num_seconds(),
    }
}

fn date_part(part: DatePart, d: NaiveDateTime) -> i64 {
    match part {
        DatePart::Year | DatePart::FiscalYear => d.year() as i64,
        DatePart::Quarter => (d.month0() / 3 + 1) as i64,
        DatePart::Month | DatePart::FiscalPeriod => d.month() as i64,
        DatePart::Week => d.iso_week().week() as i64,
        DatePart::Day => d.day() as i64,
        DatePart::Hour => d.hour() as i64,
        DatePart::Minute => d.minute() as i64,
        DatePart::Second => d.second() as i64,
    }
}

/// SQL LIKE with `%` and `_` wildcards, case-insensitive, no ESCAPE.
pub fn like_match(text: &str, pattern: &str) -> bool {
    fn matches(t: &[char], p: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('%') => {
                (0..=t.len()).any(|skip| matches(&t[skip..], &p[1..]))
            }
            Some('_') => !t.is_empty() && matches(&t[1..], &p[1..]),
            Some(c) => t.first() == Some(c) && matches(&t[1..], &p[1..]),
        }
    }
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    matches(&t, &p)
}

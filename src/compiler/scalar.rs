use crate::compiler::binder::QueryContext;
use crate::compiler::CompileError;
use crate::executor::{DatePart, Expr, ScalarFunc, Value};
use crate::parser::ast::{
    is_aggregate_name, ColumnRef, FunctionArg, FunctionCall, Literal, ScalarExpr,
};

pub(crate) fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(i) => Value::Int(*i),
        Literal::Numeric(d) => Value::Decimal(*d),
        Literal::Real(f) => Value::Float(f.into_inner()),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Null => Value::Null,
    }
}

impl QueryContext<'_> {
    /// Lower a SQL scalar into a row expression. `shadow_visible`
    /// extends binding to SELECT-list calculated names (ORDER BY and
    /// HAVING only).
    pub(crate) fn lower_scalar(
        &mut self,
        expr: &ScalarExpr,
        shadow_visible: bool,
    ) -> Result<Expr, CompileError> {
        match expr {
            ScalarExpr::Literal(l) => Ok(Expr::Literal(literal_value(l))),
            ScalarExpr::Column(col) => self.column_expr(col, shadow_visible),
            ScalarExpr::Unary { op, operand } => Ok(Expr::Unary {
                op: *op,
                operand: Box::new(self.lower_scalar(operand, shadow_visible)?),
            }),
            ScalarExpr::Binary { op, left, right } => Ok(Expr::Binary {
                op: *op,
                left: Box::new(self.lower_scalar(left, shadow_visible)?),
                right: Box::new(self.lower_scalar(right, shadow_visible)?),
            }),
            ScalarExpr::Function(f) => self.lower_function(f, shadow_visible),
            ScalarExpr::SearchedCase { branches, else_expr } => {
                let mut result = match else_expr {
                    Some(e) => self.lower_scalar(e, shadow_visible)?,
                    None => Expr::Literal(Value::Null),
                };
                for (test, then) in branches.iter().rev() {
                    let when = self.lower_pred_expr(test, shadow_visible)?;
                    let then = self.lower_scalar(then, shadow_visible)?;
                    result = Expr::Case {
                        when: Box::new(when),
                        then: Box::new(then),
                        otherwise: Box::new(result),
                    };
                }
                Ok(result)
            }
            ScalarExpr::SimpleCase { operand, branches, else_expr } => {
                let operand = self.lower_scalar(operand, shadow_visible)?;
                let mut result = match else_expr {
                    Some(e) => self.lower_scalar(e, shadow_visible)?,
                    None => Expr::Literal(Value::Null),
                };
                for (test, then) in branches.iter().rev() {
                    let test = self.lower_scalar(test, shadow_visible)?;
                    let then = self.lower_scalar(then, shadow_visible)?;
                    result = Expr::Case {
                        when: Box::new(crate::executor::PredExpr::Compare {
                            op: crate::parser::ast::ComparisonOp::Eq,
                            left: operand.clone(),
                            right: test,
                        }),
                        then: Box::new(then),
                        otherwise: Box::new(result),
                    };
                }
                Ok(result)
            }
        }
    }

    fn lower_function(
        &mut self,
        f: &FunctionCall,
        shadow_visible: bool,
    ) -> Result<Expr, CompileError> {
        let lname = f.name.to_lowercase();
        if is_aggregate_name(&lname) {
            // aggregate calls are rewritten to generated names before
            // scalar lowering ever sees them
            return Err(CompileError::not_supported(
                "aggregate not valid in this position",
                &f.name,
            ));
        }

        let func = match lname.as_str() {
            "left" => arity(f, 2).map(|_| ScalarFunc::Left)?,
            "right" => arity(f, 2).map(|_| ScalarFunc::Right)?,
            "substring" => arity(f, 3).map(|_| ScalarFunc::Substring)?,
            "trim" => arity(f, 1).map(|_| ScalarFunc::Trim)?,
            "len" => arity(f, 1).map(|_| ScalarFunc::Len)?,
            "upper" => arity(f, 1).map(|_| ScalarFunc::Upper)?,
            "lower" => arity(f, 1).map(|_| ScalarFunc::Lower)?,
            "dateadd" => ScalarFunc::DateAdd(date_part_symbol(f, 3)?),
            "datediff" => ScalarFunc::DateDiff(date_part_symbol(f, 3)?),
            "datepart" => ScalarFunc::DatePart(date_part_symbol(f, 2)?),
            _ => return Err(CompileError::UnknownFunction(f.name.clone())),
        };

        // the date-part symbol is consumed, not evaluated
        let value_args = match func {
            ScalarFunc::DateAdd(_) | ScalarFunc::DateDiff(_) | ScalarFunc::DatePart(_) => {
                &f.args[1..]
            }
            _ => &f.args[..],
        };

        let mut args = Vec::with_capacity(value_args.len());
        for arg in value_args {
            match arg {
                FunctionArg::Expr(e) => args.push(self.lower_scalar(e, shadow_visible)?),
                FunctionArg::Star => {
                    return Err(CompileError::not_supported("* is not a value", &f.name))
                }
            }
        }
        Ok(Expr::Call { func, args })
    }
}

fn arity(f: &FunctionCall, expected: usize) -> Result<(), CompileError> {
    if f.args.len() == expected {
        Ok(())
    } else {
        Err(CompileError::not_supported(
            format!("{} expects {expected} arguments", f.name.to_uppercase()),
            &f.name,
        ))
    }
}

/// First parameter of the date functions: an identifier consumed as a
/// date-part symbol.
fn date_part_symbol(f: &FunctionCall, expected: usize) -> Result<DatePart, CompileError> {
    arity(f, expected)?;
    match f.args.first() {
        Some(FunctionArg::Expr(ScalarExpr::Column(ColumnRef { parts }))) if parts.len() == 1 => {
            DatePart::parse(&parts[0]).ok_or_else(|| {
                CompileError::not_supported("unknown date part", &parts[0])
            })
        }
        _ => Err(CompileError::not_supported("expected a date part", &f.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::test_support::{account_contact_metadata, context_for};
    use crate::executor::{Row, ValueType};
    use crate::parser::SqlCursor;

    fn lower(sql: &str) -> Result<Expr, CompileError> {
        let meta = account_contact_metadata();
        let options = crate::compiler::CompileOptions::default();
        let mut ctx = context_for(&meta, &options, "contact");
        let ast = ScalarExpr::parse(&mut SqlCursor::new(sql, false)).expect("parse");
        ctx.lower_scalar(&ast, false)
    }

    #[test]
    fn concatenation_lowers_and_evaluates() {
        let expr = lower("'Hello ' + lastname").unwrap();
        let mut row = Row::new();
        row.insert("lastname", Value::String("Carrington".into()));
        assert_eq!(expr.eval(&row), Value::String("Hello Carrington".into()));
    }

    #[test]
    fn unknown_function_is_fatal() {
        assert!(matches!(lower("frobnicate(1)"), Err(CompileError::UnknownFunction(_))));
    }

    #[test]
    fn date_part_symbol_is_not_evaluated() {
        let expr = lower("datepart(year, createdon)").unwrap();
        match &expr {
            Expr::Call { func: ScalarFunc::DatePart(DatePart::Year), args } => {
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected datepart call, got {other:?}"),
        }
    }

    #[test]
    fn bad_date_part_is_rejected() {
        assert!(matches!(
            lower("datepart(fortnight, createdon)"),
            Err(CompileError::NotSupported { .. })
        ));
    }

    #[test]
    fn case_without_else_falls_through_to_null() {
        let expr = lower("case when statecode = 0 then 'active' end").unwrap();
        let mut row = Row::new();
        row.insert("statecode", Value::Int(1));
        assert_eq!(expr.eval(&row), Value::Null);
    }

    #[test]
    fn simple_case_compares_operand() {
        let expr = lower("case statecode when 0 then 'active' else 'inactive' end").unwrap();
        let mut row = Row::new();
        row.insert("statecode", Value::Choice(0));
        assert_eq!(expr.eval(&row), Value::String("active".into()));
    }

    #[test]
    fn column_type_comes_from_metadata() {
        let expr = lower("creditlimit").unwrap();
        match expr {
            Expr::Column { ty, .. } => assert_eq!(ty, ValueType::Decimal),
            other => panic!("expected column, got {other:?}"),
        }
    }
}

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::compiler::binder::{Bound, QueryContext};
use crate::compiler::error::{LowerFailure, LowerResult};
use crate::compiler::scalar::literal_value;
use crate::compiler::CompileError;
use crate::executor::{PredExpr, QueryExtension, Value};
use crate::fetch::{Condition, Filter, FilterItem, FilterType, Item};
use crate::parser::ast::{
    BoolExpr, ColumnRef, ComparisonOp, FunctionArg, FunctionCall, Literal, ScalarExpr,
};

/// Predicate-position functions that are sugar for FetchXML condition
/// operators, e.g. `createdon = lastxdays(3)`.
struct SugarOp {
    operator: &'static str,
    params: usize,
}

static FETCH_SUGAR: Lazy<HashMap<&'static str, SugarOp>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut op = |name: &'static str, operator: &'static str, params: usize| {
        m.insert(name, SugarOp { operator, params });
    };
    op("today", "today", 0);
    op("yesterday", "yesterday", 0);
    op("tomorrow", "tomorrow", 0);
    op("thisweek", "this-week", 0);
    op("lastweek", "last-week", 0);
    op("nextweek", "next-week", 0);
    op("thismonth", "this-month", 0);
    op("lastmonth", "last-month", 0);
    op("nextmonth", "next-month", 0);
    op("thisyear", "this-year", 0);
    op("lastyear", "last-year", 0);
    op("nextyear", "next-year", 0);
    op("lastsevendays", "last-seven-days", 0);
    op("nextsevendays", "next-seven-days", 0);
    op("lastxdays", "last-x-days", 1);
    op("nextxdays", "next-x-days", 1);
    op("lastxweeks", "last-x-weeks", 1);
    op("nextxweeks", "next-x-weeks", 1);
    op("lastxmonths", "last-x-months", 1);
    op("nextxmonths", "next-x-months", 1);
    op("lastxyears", "last-x-years", 1);
    op("nextxyears", "next-x-years", 1);
    op("olderthanxmonths", "olderthan-x-months", 1);
    op("equserid", "eq-userid", 0);
    op("nequserid", "ne-userid", 0);
    op("eqbusinessid", "eq-businessid", 0);
    op("nebusinessid", "ne-businessid", 0);
    op("thisfiscalyear", "this-fiscal-year", 0);
    op("lastfiscalyear", "last-fiscal-year", 0);
    op("nextfiscalyear", "next-fiscal-year", 0);
    m
});

/// Literal text for a condition value. Null never lowers natively.
fn condition_value(literal: &Literal) -> Option<String> {
    match literal_value(literal) {
        Value::Null => None,
        Value::Int(i) => Some(i.to_string()),
        Value::Decimal(d) => Some(d.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::String(s) => Some(s),
        _ => None,
    }
}

impl QueryContext<'_> {
    /// Lower a WHERE clause: as much as possible into a native root
    /// filter, the rest into a conjunctive Where extension.
    pub(crate) fn lower_where(&mut self, expr: &BoolExpr) -> Result<(), CompileError> {
        let mut filter = Filter::new(FilterType::Indeterminate);
        let mut residual: Vec<BoolExpr> = Vec::new();

        match self.lower_bool(expr, &mut filter, true, &mut residual) {
            Ok(()) => {}
            Err(LowerFailure::PostProcessing(signal)) => {
                debug!(reason = signal.reason, "WHERE clause requires post-processing");
                residual.push(expr.clone());
            }
            Err(LowerFailure::Fatal(e)) => return Err(e),
        }

        if !filter.is_empty() {
            self.fetch.entity.items.push(Item::Filter(filter));
        }

        if !residual.is_empty() {
            let mut parts = Vec::with_capacity(residual.len());
            for part in &residual {
                parts.push(self.lower_pred_expr(part, false)?);
            }
            let predicate =
                if parts.len() == 1 { parts.remove(0) } else { PredExpr::And(parts) };
            self.extensions.push(QueryExtension::Where(predicate));
        }
        Ok(())
    }

    /// Recursive native lowering. `allow_partial` is true only while
    /// every enclosing boolean operator from the WHERE root is AND; a
    /// failed child is then lifted into `residual` instead of failing
    /// the whole subtree.
    pub(crate) fn lower_bool(
        &mut self,
        expr: &BoolExpr,
        filter: &mut Filter,
        allow_partial: bool,
        residual: &mut Vec<BoolExpr>,
    ) -> LowerResult<()> {
        match expr {
            BoolExpr::And(items) => {
                let target = match filter.filter_type {
                    FilterType::Indeterminate => {
                        filter.filter_type = FilterType::And;
                        filter
                    }
                    FilterType::And => filter,
                    FilterType::Or => {
                        filter.items.push(FilterItem::Filter(Filter::new(FilterType::And)));
                        match filter.items.last_mut() {
                            Some(FilterItem::Filter(nested)) => nested,
                            _ => unreachable!("just pushed"),
                        }
                    }
                };
                // under OR, one failing conjunct fails the whole branch
                let partial_here = allow_partial && target.filter_type == FilterType::And;
                for item in items {
                    match self.lower_bool(item, target, partial_here, residual) {
                        Ok(()) => {}
                        Err(LowerFailure::PostProcessing(signal)) if partial_here => {
                            debug!(reason = signal.reason, "lifting conjunct to post-processing");
                            residual.push(item.clone());
                        }
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            BoolExpr::Or(items) => {
                // all-or-nothing: lower into a scratch filter first
                let mut scratch = Filter::new(FilterType::Or);
                for item in items {
                    self.lower_bool(item, &mut scratch, false, residual)?;
                }
                match filter.filter_type {
                    FilterType::Indeterminate => {
                        filter.filter_type = FilterType::Or;
                        filter.items.append(&mut scratch.items);
                    }
                    FilterType::Or => filter.items.append(&mut scratch.items),
                    FilterType::And => filter.items.push(FilterItem::Filter(scratch)),
                }
                Ok(())
            }
            BoolExpr::Paren(inner) => {
                let mut nested = Filter::new(FilterType::Indeterminate);
                self.lower_bool(inner, &mut nested, false, residual)?;
                if !nested.is_empty() {
                    filter.items.push(FilterItem::Filter(nested));
                }
                Ok(())
            }
            BoolExpr::Not(_) => Err(LowerFailure::post_processing("NOT has no native form")),
            BoolExpr::InSubquery { expr } => Err(LowerFailure::Fatal(
                CompileError::UnsupportedSubquery(format!("{expr:?}")),
            )),
            leaf => {
                let condition = self.lower_condition(leaf)?;
                filter.items.push(FilterItem::Condition(condition));
                Ok(())
            }
        }
    }

    fn lower_condition(&mut self, expr: &BoolExpr) -> LowerResult<Condition> {
        match expr {
            BoolExpr::Comparison { left, op, right } => {
                // normalize the column onto the left
                let (col, op, rhs) = match (left, right) {
                    (ScalarExpr::Column(_), ScalarExpr::Column(_)) => {
                        return Err(LowerFailure::post_processing(
                            "column to column comparison",
                        ));
                    }
                    (ScalarExpr::Column(c), rhs) => (c, *op, rhs),
                    (lhs, ScalarExpr::Column(c)) => (c, op.mirror(), lhs),
                    _ => {
                        return Err(LowerFailure::post_processing(
                            "no plain column in comparison",
                        ))
                    }
                };
                match rhs {
                    ScalarExpr::Literal(Literal::Null) => {
                        Err(LowerFailure::post_processing("comparison with NULL literal"))
                    }
                    ScalarExpr::Literal(lit) => {
                        let value = condition_value(lit).ok_or_else(|| {
                            LowerFailure::post_processing("unrepresentable condition value")
                        })?;
                        Ok(self.condition_for(col, op.fetch_operator(), Some(value), vec![])?)
                    }
                    ScalarExpr::Function(f) if op == ComparisonOp::Eq => {
                        self.sugar_condition(col, f)
                    }
                    _ => Err(LowerFailure::post_processing("comparison with an expression")),
                }
            }
            BoolExpr::IsNull { expr: ScalarExpr::Column(col), negated } => {
                let operator = if *negated { "not-null" } else { "null" };
                Ok(self.condition_for(col, operator, None, vec![])?)
            }
            BoolExpr::Like {
                expr: ScalarExpr::Column(col),
                pattern: ScalarExpr::Literal(Literal::String(pattern)),
                negated,
            } => {
                let operator = if *negated { "not-like" } else { "like" };
                Ok(self.condition_for(col, operator, Some(pattern.clone()), vec![])?)
            }
            BoolExpr::InList { expr: ScalarExpr::Column(col), list, negated } => {
                let mut values = Vec::with_capacity(list.len());
                for item in list {
                    match item {
                        ScalarExpr::Literal(lit) => match condition_value(lit) {
                            Some(v) => values.push(v),
                            None => {
                                return Err(LowerFailure::post_processing(
                                    "NULL in IN list",
                                ))
                            }
                        },
                        _ => {
                            return Err(LowerFailure::post_processing(
                                "non-literal in IN list",
                            ))
                        }
                    }
                }
                let operator = if *negated { "not-in" } else { "in" };
                Ok(self.condition_for(col, operator, None, values)?)
            }
            _ => Err(LowerFailure::post_processing("predicate has no native form")),
        }
    }

    /// `column = datefn(...)` and friends: the function names the
    /// FetchXML operator, with at most one literal parameter.
    fn sugar_condition(&mut self, col: &ColumnRef, f: &FunctionCall) -> LowerResult<Condition> {
        let Some(sugar) = FETCH_SUGAR.get(f.name.to_lowercase().as_str()) else {
            return Err(LowerFailure::post_processing("function is not a condition operator"));
        };
        if f.args.len() != sugar.params {
            return Err(LowerFailure::Fatal(CompileError::not_supported(
                format!("{} expects {} parameter(s)", f.name, sugar.params),
                &f.name,
            )));
        }
        let value = match f.args.first() {
            None => None,
            Some(FunctionArg::Expr(ScalarExpr::Literal(lit))) => condition_value(lit),
            Some(_) => {
                return Err(LowerFailure::Fatal(CompileError::not_supported(
                    "condition operator parameters must be literals",
                    &f.name,
                )))
            }
        };
        if sugar.params == 1 && value.is_none() {
            return Err(LowerFailure::Fatal(CompileError::not_supported(
                "condition operator parameters must be literals",
                &f.name,
            )));
        }
        Ok(self.condition_for(col, sugar.operator, value, vec![])?)
    }

    fn condition_for(
        &mut self,
        col: &ColumnRef,
        operator: &str,
        value: Option<String>,
        values: Vec<String>,
    ) -> LowerResult<Condition> {
        match self.bind_column(col, false)? {
            Bound::Column(binding) => {
                let table = self.tables.get(binding.table_index);
                Ok(Condition {
                    entity_name: (!table.is_root()).then(|| table.visible_name().to_string()),
                    attribute: binding.attribute,
                    operator: operator.to_string(),
                    value,
                    values,
                })
            }
            Bound::FetchAlias { .. } | Bound::Computed { .. } => {
                Err(LowerFailure::post_processing("condition on a computed column"))
            }
        }
    }

    /// The expression-path predicate, used by HAVING, CASE tests and
    /// the WHERE fallback.
    pub(crate) fn lower_pred_expr(
        &mut self,
        expr: &BoolExpr,
        shadow_visible: bool,
    ) -> Result<PredExpr, CompileError> {
        match expr {
            BoolExpr::And(items) => Ok(PredExpr::And(
                items
                    .iter()
                    .map(|e| self.lower_pred_expr(e, shadow_visible))
                    .collect::<Result<_, _>>()?,
            )),
            BoolExpr::Or(items) => Ok(PredExpr::Or(
                items
                    .iter()
                    .map(|e| self.lower_pred_expr(e, shadow_visible))
                    .collect::<Result<_, _>>()?,
            )),
            BoolExpr::Not(inner) => {
                Ok(PredExpr::Not(Box::new(self.lower_pred_expr(inner, shadow_visible)?)))
            }
            BoolExpr::Paren(inner) => self.lower_pred_expr(inner, shadow_visible),
            BoolExpr::Comparison { left, op, right } => Ok(PredExpr::Compare {
                op: *op,
                left: self.lower_scalar(left, shadow_visible)?,
                right: self.lower_scalar(right, shadow_visible)?,
            }),
            BoolExpr::IsNull { expr, negated } => Ok(PredExpr::IsNull {
                expr: self.lower_scalar(expr, shadow_visible)?,
                negated: *negated,
            }),
            BoolExpr::Like { expr, pattern, negated } => Ok(PredExpr::Like {
                expr: self.lower_scalar(expr, shadow_visible)?,
                pattern: self.lower_scalar(pattern, shadow_visible)?,
                negated: *negated,
            }),
            BoolExpr::InList { expr, list, negated } => Ok(PredExpr::InList {
                expr: self.lower_scalar(expr, shadow_visible)?,
                list: list
                    .iter()
                    .map(|e| self.lower_scalar(e, shadow_visible))
                    .collect::<Result<_, _>>()?,
                negated: *negated,
            }),
            BoolExpr::InSubquery { expr } => {
                Err(CompileError::UnsupportedSubquery(format!("{expr:?}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::test_support::{account_contact_metadata, context_for};
    use crate::parser::SqlCursor;

    fn where_ctx(sql: &str) -> QueryContextResult {
        let meta = account_contact_metadata();
        let options = crate::compiler::CompileOptions::default();
        let mut ctx = context_for(&meta, &options, "contact");
        let ast = BoolExpr::parse(&mut SqlCursor::new(sql, false)).expect("parse");
        ctx.lower_where(&ast).expect("lower");
        let filter = ctx.fetch.entity.items.iter().find_map(|i| match i {
            Item::Filter(f) => Some(f.clone()),
            _ => None,
        });
        QueryContextResult { filter, extensions: ctx.extensions.len() }
    }

    struct QueryContextResult {
        filter: Option<Filter>,
        extensions: usize,
    }

    #[test]
    fn simple_equality_becomes_a_condition() {
        let out = where_ctx("firstname = 'Mark'");
        let filter = out.filter.expect("native filter");
        assert_eq!(out.extensions, 0);
        match &filter.items[0] {
            FilterItem::Condition(c) => {
                assert_eq!(c.attribute, "firstname");
                assert_eq!(c.operator, "eq");
                assert_eq!(c.value.as_deref(), Some("Mark"));
            }
            other => panic!("expected condition, got {other:?}"),
        }
    }

    #[test]
    fn reversed_inequality_is_mirrored() {
        let out = where_ctx("3 < numberofemployees");
        let filter = out.filter.expect("native filter");
        match &filter.items[0] {
            FilterItem::Condition(c) => {
                assert_eq!(c.attribute, "numberofemployees");
                assert_eq!(c.operator, "gt");
                assert_eq!(c.value.as_deref(), Some("3"));
            }
            other => panic!("expected condition, got {other:?}"),
        }
    }

    #[test]
    fn date_sugar_functions_become_operators() {
        let out = where_ctx("createdon = lastxdays(3)");
        let filter = out.filter.expect("native filter");
        match &filter.items[0] {
            FilterItem::Condition(c) => {
                assert_eq!(c.operator, "last-x-days");
                assert_eq!(c.value.as_deref(), Some("3"));
            }
            other => panic!("expected condition, got {other:?}"),
        }
    }

    #[test]
    fn or_of_mixed_operators_nests_filters() {
        let out = where_ctx("firstname = 'A' AND (lastname = 'B' OR lastname = 'C')");
        let filter = out.filter.expect("native filter");
        assert_eq!(filter.filter_type, FilterType::And);
        assert_eq!(filter.items.len(), 2);
        match &filter.items[1] {
            FilterItem::Filter(nested) => {
                assert_eq!(nested.filter_type, FilterType::Or);
                assert_eq!(nested.items.len(), 2);
            }
            other => panic!("expected nested filter, got {other:?}"),
        }
    }

    #[test]
    fn column_comparison_falls_back_but_siblings_stay_native() {
        let out = where_ctx("statecode = 0 AND firstname = lastname");
        let filter = out.filter.expect("native filter");
        assert_eq!(filter.items.len(), 1);
        match &filter.items[0] {
            FilterItem::Condition(c) => assert_eq!(c.attribute, "statecode"),
            other => panic!("expected condition, got {other:?}"),
        }
        assert_eq!(out.extensions, 1);
    }

    #[test]
    fn fallback_inside_or_takes_the_whole_clause() {
        let out = where_ctx("statecode = 0 OR firstname = lastname");
        assert!(out.filter.is_none());
        assert_eq!(out.extensions, 1);
    }

    #[test]
    fn in_list_collects_values() {
        let out = where_ctx("statecode IN (0, 1)");
        let filter = out.filter.expect("native filter");
        match &filter.items[0] {
            FilterItem::Condition(c) => {
                assert_eq!(c.operator, "in");
                assert_eq!(c.values, vec!["0", "1"]);
            }
            other => panic!("expected condition, got {other:?}"),
        }
    }

    #[test]
    fn is_null_and_like_map_directly() {
        let out = where_ctx("firstname IS NOT NULL AND lastname LIKE 'Carr%'");
        let filter = out.filter.expect("native filter");
        assert_eq!(filter.items.len(), 2);
        match (&filter.items[0], &filter.items[1]) {
            (FilterItem::Condition(a), FilterItem::Condition(b)) => {
                assert_eq!(a.operator, "not-null");
                assert_eq!(b.operator, "like");
                assert_eq!(b.value.as_deref(), Some("Carr%"));
            }
            other => panic!("expected two conditions, got {other:?}"),
        }
    }

    #[test]
    fn in_subquery_is_fatal() {
        let meta = account_contact_metadata();
        let options = crate::compiler::CompileOptions::default();
        let mut ctx = context_for(&meta, &options, "contact");
        let ast = BoolExpr::parse(
            &mut SqlCursor::new("contactid IN (SELECT contactid FROM contact)", false),
        )
        .expect("parse");
        assert!(matches!(
            ctx.lower_where(&ast),
            Err(CompileError::UnsupportedSubquery(_))
        ));
    }
}

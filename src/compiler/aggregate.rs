use std::collections::HashSet;

use tracing::debug;

use crate::compiler::binder::{Bound, QueryContext};
use crate::compiler::error::{LowerFailure, LowerResult};
use crate::compiler::CompileError;
use crate::executor::{
    AggregateFunction, AggregateSpec, DatePart, Expr, Grouping, QueryExtension, SortKey,
    ValueType,
};
use crate::fetch::{FetchAttribute, FetchOrder, Item};
use crate::parser::ast::{
    BoolExpr, ColumnRef, FunctionArg, FunctionCall, OrderByElement, QuerySpecification,
    ScalarExpr, SelectElement,
};

/// A grouping key validated for lowering.
struct GroupingPlan {
    table_index: usize,
    attribute: String,
    date_part: Option<DatePart>,
    alias: String,
}

/// One unique aggregate call and where it lands.
struct AggregatePlan {
    call: FunctionCall,
    function: AggregateFunction,
    table_index: usize,
    attribute: Option<String>,
    alias: String,
}

impl QueryContext<'_> {
    /// GROUP BY / aggregate lowering. Returns the rewritten query
    /// specification for the later steps, or None when the query has
    /// no aggregation.
    pub(crate) fn lower_aggregates(
        &mut self,
        query: &QuerySpecification,
    ) -> Result<Option<QuerySpecification>, CompileError> {
        let has_aggregate = query
            .select_elements
            .iter()
            .any(|e| matches!(e, SelectElement::Expr { expr, .. } if expr.contains_aggregate()))
            || query.having.as_ref().is_some_and(bool_contains_aggregate)
            || query.order_by.iter().any(|o| o.expr.contains_aggregate());
        if query.group_by.is_empty() && !has_aggregate {
            return Ok(None);
        }

        if !self.post_processing_started() && !self.options.force_aggregate_expression {
            let snapshot = self.fetch.clone();
            match self.try_native_aggregate(query) {
                Ok(rewritten) => return Ok(Some(rewritten)),
                Err(LowerFailure::PostProcessing(signal)) => {
                    debug!(reason = signal.reason, "aggregate falls back to expression path");
                    self.fetch = snapshot;
                }
                Err(LowerFailure::Fatal(e)) => return Err(e),
            }
        }

        self.expression_aggregate(query).map(Some)
    }

    // ---- native path ----

    fn try_native_aggregate(
        &mut self,
        query: &QuerySpecification,
    ) -> LowerResult<QuerySpecification> {
        let mut used = HashSet::new();

        // groupings: plain columns or recognized DATEPART forms
        let mut groupings: Vec<GroupingPlan> = Vec::new();
        for expr in &query.group_by {
            let (col, date_part) = match expr {
                ScalarExpr::Column(col) => (col, None),
                ScalarExpr::Function(f) if f.name.eq_ignore_ascii_case("datepart") => {
                    let part = native_date_part(f)?;
                    let FunctionArg::Expr(ScalarExpr::Column(col)) = &f.args[1] else {
                        return Err(LowerFailure::post_processing(
                            "date grouping over an expression",
                        ));
                    };
                    (col, Some(part))
                }
                _ => return Err(LowerFailure::post_processing("grouping is not a column")),
            };
            let Bound::Column(binding) = self.bind_column(col, false)? else {
                return Err(LowerFailure::post_processing("grouping on a computed column"));
            };
            // same column grouped on two date parts stays two groupings
            if groupings.iter().any(|g| {
                g.table_index == binding.table_index
                    && g.attribute == binding.attribute
                    && g.date_part == date_part
            }) {
                continue;
            }
            let alias = self.grouping_alias(query, col, &binding, date_part, &mut used);
            groupings.push(GroupingPlan {
                table_index: binding.table_index,
                attribute: binding.attribute,
                date_part,
                alias,
            });
        }

        // aggregates: count|count-distinct|avg|min|max|sum over a column
        let mut aggregates: Vec<AggregatePlan> = Vec::new();
        for call in collect_aggregate_calls(query) {
            let lname = call.name.to_lowercase();
            let (table_index, attribute) = match call.args.as_slice() {
                [FunctionArg::Star] if lname == "count" => {
                    let primary = self.tables.root().metadata.primary_id_attribute.clone();
                    (0, primary)
                }
                [FunctionArg::Expr(ScalarExpr::Column(col))] => {
                    let Bound::Column(binding) = self.bind_column(col, false)? else {
                        return Err(LowerFailure::post_processing(
                            "aggregate over a computed column",
                        ));
                    };
                    (binding.table_index, binding.attribute)
                }
                _ => return Err(LowerFailure::post_processing("aggregate over an expression")),
            };

            let fetch_aggregate = match (lname.as_str(), call.distinct) {
                ("count", _) if matches!(call.args.as_slice(), [FunctionArg::Star]) => "count",
                ("count", _) => "countcolumn",
                ("sum", false) => "sum",
                ("avg", false) => "avg",
                ("min", false) => "min",
                ("max", false) => "max",
                // DISTINCT is native for counts only
                _ => return Err(LowerFailure::post_processing("DISTINCT aggregate")),
            };

            let alias =
                self.aggregate_alias(query, &call, table_index, &attribute, fetch_aggregate, &mut used);
            aggregates.push(AggregatePlan {
                function: aggregate_function(&lname, &call),
                call,
                table_index,
                attribute: Some(attribute),
                alias,
            });
        }

        // emit: everything validated, mutate the tree
        self.fetch.aggregate = Some(true);
        for g in &groupings {
            let attribute = FetchAttribute {
                name: g.attribute.clone(),
                alias: Some(g.alias.clone()),
                aggregate: None,
                distinct: None,
                date_grouping: g.date_part.and_then(|p| p.date_grouping().map(String::from)),
                group_by: Some(true),
            };
            self.container_for(g.table_index).items_mut().push(Item::Attribute(attribute));
        }
        for a in &aggregates {
            let fetch_aggregate = match a.function {
                AggregateFunction::Count => "count",
                AggregateFunction::CountColumn | AggregateFunction::CountColumnDistinct => {
                    "countcolumn"
                }
                AggregateFunction::Average => "avg",
                AggregateFunction::Sum => "sum",
                AggregateFunction::Min => "min",
                AggregateFunction::Max => "max",
            };
            let attribute = FetchAttribute {
                name: a.attribute.clone().unwrap_or_default(),
                alias: Some(a.alias.clone()),
                aggregate: Some(fetch_aggregate.to_string()),
                distinct: (a.function == AggregateFunction::CountColumnDistinct)
                    .then_some(true),
                date_grouping: None,
                group_by: None,
            };
            self.container_for(a.table_index).items_mut().push(Item::Attribute(attribute));
        }

        Ok(self.rewrite_query(query, &groupings, &aggregates))
    }

    // ---- expression path ----

    fn expression_aggregate(
        &mut self,
        query: &QuerySpecification,
    ) -> Result<QuerySpecification, CompileError> {
        // every column the rest of the query reads must be fetched
        let mut referenced: Vec<ColumnRef> = Vec::new();
        for element in &query.select_elements {
            if let SelectElement::Expr { expr, .. } = element {
                collect_columns(expr, &mut referenced);
            }
        }
        for expr in &query.group_by {
            collect_columns(expr, &mut referenced);
        }
        if let Some(having) = &query.having {
            collect_columns_bool(having, &mut referenced);
        }
        for order in &query.order_by {
            collect_columns(&order.expr, &mut referenced);
        }
        for col in &referenced {
            // adds the attribute as a side effect; binding failures
            // surface later with better context
            let _ = self.column_expr(col, false);
        }

        let mut used = HashSet::new();

        let mut groupings: Vec<GroupingPlan> = Vec::new();
        let mut grouping_ops: Vec<Grouping> = Vec::new();
        let mut sort_keys: Vec<SortKey> = Vec::new();
        let native_sorts_allowed = !self.post_processing_started();

        for (i, expr) in query.group_by.iter().enumerate() {
            let selector = self.lower_scalar(expr, false)?;
            // name groupings exactly as the native path would, so the
            // two plans expose identical output columns
            let (plan, native) = match expr {
                ScalarExpr::Column(col) => match self.bind_column(col, false)? {
                    Bound::Column(binding) => {
                        let alias = self.grouping_alias(query, col, &binding, None, &mut used);
                        (
                            Some(GroupingPlan {
                                table_index: binding.table_index,
                                attribute: binding.attribute,
                                date_part: None,
                                alias,
                            }),
                            true,
                        )
                    }
                    _ => (None, false),
                },
                ScalarExpr::Function(f) if f.name.eq_ignore_ascii_case("datepart") => {
                    match native_date_part_opt(f) {
                        Ok(part) => {
                            let FunctionArg::Expr(ScalarExpr::Column(col)) = &f.args[1] else {
                                return Err(CompileError::not_supported(
                                    "date grouping over an expression",
                                    &f.name,
                                ));
                            };
                            match self.bind_column(col, false)? {
                                Bound::Column(binding) => {
                                    let alias = self.grouping_alias(
                                        query,
                                        col,
                                        &binding,
                                        Some(part),
                                        &mut used,
                                    );
                                    // the date-part value, not the raw column,
                                    // clusters the groups
                                    (
                                        Some(GroupingPlan {
                                            table_index: binding.table_index,
                                            attribute: binding.attribute,
                                            date_part: Some(part),
                                            alias,
                                        }),
                                        false,
                                    )
                                }
                                _ => (None, false),
                            }
                        }
                        Err(()) => (None, false),
                    }
                }
                _ => (None, false),
            };

            let output = match &plan {
                Some(p) => p.alias.clone(),
                None => unique_name(format!("grp{}", i + 1), &mut used),
            };
            let ty = selector.result_type().unwrap_or(ValueType::String);
            self.generated.insert(output.clone(), ty);

            if native && native_sorts_allowed {
                if let Some(p) = &plan {
                    self.ensure_native_order(p.table_index, &p.attribute);
                }
                sort_keys.push(SortKey {
                    selector: selector.clone(),
                    descending: false,
                    native_prefix: true,
                });
            } else {
                sort_keys.push(SortKey {
                    selector: selector.clone(),
                    descending: false,
                    native_prefix: false,
                });
            }

            grouping_ops.push(Grouping { selector, output: output.clone() });
            if let Some(mut p) = plan {
                p.alias = output;
                groupings.push(p);
            } else {
                // synthetic marker so the rewrite can map the AST form
                groupings.push(GroupingPlan {
                    table_index: usize::MAX,
                    attribute: String::new(),
                    date_part: None,
                    alias: String::new(),
                });
            }
        }
        // AST-form groupings are rewritten by expression equality below
        let ast_groupings: Vec<(ScalarExpr, String)> = query
            .group_by
            .iter()
            .zip(grouping_ops.iter())
            .map(|(e, g)| (e.clone(), g.output.clone()))
            .collect();
        groupings.retain(|g| g.table_index != usize::MAX);

        let mut aggregate_ops: Vec<AggregateSpec> = Vec::new();
        let mut aggregates: Vec<AggregatePlan> = Vec::new();
        for call in collect_aggregate_calls(query) {
            let lname = call.name.to_lowercase();
            let function = aggregate_function(&lname, &call);
            let arg = match call.args.as_slice() {
                [FunctionArg::Star] => None,
                [FunctionArg::Expr(e)] => Some(self.lower_scalar(e, false)?),
                _ => {
                    return Err(CompileError::not_supported(
                        "aggregates take one argument",
                        &call.name,
                    ))
                }
            };

            // share the native path's alias scheme (plan parity)
            let fetch_aggregate = match function {
                AggregateFunction::Count => "count",
                AggregateFunction::CountColumn | AggregateFunction::CountColumnDistinct => {
                    "countcolumn"
                }
                AggregateFunction::Average => "avg",
                AggregateFunction::Sum => "sum",
                AggregateFunction::Min => "min",
                AggregateFunction::Max => "max",
            };
            let alias = match call.args.as_slice() {
                [FunctionArg::Star] => {
                    let primary = self.tables.root().metadata.primary_id_attribute.clone();
                    self.aggregate_alias(query, &call, 0, &primary, fetch_aggregate, &mut used)
                }
                [FunctionArg::Expr(ScalarExpr::Column(col))] => {
                    match self.bind_column(col, false) {
                        Ok(Bound::Column(b)) => self.aggregate_alias(
                            query,
                            &call,
                            b.table_index,
                            &b.attribute,
                            fetch_aggregate,
                            &mut used,
                        ),
                        _ => match self.select_alias_for_call(query, &call) {
                            Some(alias) => unique_name(alias, &mut used),
                            None => {
                                unique_name(format!("agg{}", aggregates.len() + 1), &mut used)
                            }
                        },
                    }
                }
                _ => match self.select_alias_for_call(query, &call) {
                    Some(alias) => unique_name(alias, &mut used),
                    None => unique_name(format!("agg{}", aggregates.len() + 1), &mut used),
                },
            };

            let ty = match function {
                AggregateFunction::Count
                | AggregateFunction::CountColumn
                | AggregateFunction::CountColumnDistinct => ValueType::Int,
                AggregateFunction::Average => ValueType::Decimal,
                _ => arg.as_ref().and_then(Expr::result_type).unwrap_or(ValueType::Int),
            };
            self.generated.insert(alias.clone(), ty);

            aggregate_ops.push(AggregateSpec {
                function,
                arg,
                output: alias.clone(),
                distinct: call.distinct,
            });
            aggregates.push(AggregatePlan {
                call,
                function,
                table_index: 0,
                attribute: None,
                alias,
            });
        }

        if sort_keys.iter().any(|k| !k.native_prefix) {
            self.extensions.push(QueryExtension::Sort(sort_keys));
        }
        self.extensions.push(QueryExtension::Aggregate {
            groupings: grouping_ops,
            aggregates: aggregate_ops,
        });

        let mut rewritten = self.rewrite_query(query, &groupings, &aggregates);
        // map non-column groupings by their AST form
        for element in &mut rewritten.select_elements {
            if let SelectElement::Expr { expr, .. } = element {
                *expr = rewrite_by_ast(expr.clone(), &ast_groupings);
            }
        }
        if let Some(having) = rewritten.having.take() {
            rewritten.having = Some(rewrite_bool_by_ast(having, &ast_groupings));
        }
        for order in &mut rewritten.order_by {
            order.expr = rewrite_by_ast(order.expr.clone(), &ast_groupings);
        }
        Ok(rewritten)
    }

    fn ensure_native_order(&mut self, table_index: usize, attribute: &str) {
        let mut container = self.container_for(table_index);
        let already = container.items().iter().any(|i| {
            matches!(i, Item::Order(o) if o.attribute.as_deref() == Some(attribute))
        });
        if !already {
            container.items_mut().push(Item::Order(FetchOrder {
                attribute: Some(attribute.to_string()),
                alias: None,
                descending: false,
            }));
        }
    }

    // ---- alias generation ----

    fn grouping_alias(
        &self,
        query: &QuerySpecification,
        col: &ColumnRef,
        binding: &crate::compiler::binder::ColumnBinding,
        date_part: Option<DatePart>,
        used: &mut HashSet<String>,
    ) -> String {
        if date_part.is_none() {
            for element in &query.select_elements {
                if let SelectElement::Expr { expr: ScalarExpr::Column(c), alias: Some(alias) } =
                    element
                {
                    if c == col {
                        return unique_name(alias.clone(), used);
                    }
                }
            }
        }
        let table = self.tables.get(binding.table_index);
        let mut base = if table.is_root() {
            binding.attribute.clone()
        } else {
            format!("{}_{}", table.visible_name(), binding.attribute)
        };
        if let Some(part) = date_part {
            base = format!("{base}_{}", part.date_grouping().unwrap_or("part").replace('-', ""));
        }
        unique_name(base, used)
    }

    fn aggregate_alias(
        &self,
        query: &QuerySpecification,
        call: &FunctionCall,
        table_index: usize,
        attribute: &str,
        fetch_aggregate: &str,
        used: &mut HashSet<String>,
    ) -> String {
        if let Some(alias) = self.select_alias_for_call(query, call) {
            return unique_name(alias, used);
        }
        let table = self.tables.get(table_index);
        let base = if table.is_root() {
            format!("{attribute}_{fetch_aggregate}")
        } else {
            format!("{}_{attribute}_{fetch_aggregate}", table.visible_name())
        };
        unique_name(base, used)
    }

    fn select_alias_for_call(
        &self,
        query: &QuerySpecification,
        call: &FunctionCall,
    ) -> Option<String> {
        for element in &query.select_elements {
            if let SelectElement::Expr { expr: ScalarExpr::Function(f), alias: Some(alias) } =
                element
            {
                if same_call(f, call) {
                    return Some(alias.clone());
                }
            }
        }
        None
    }

    // ---- rewrite pre-pass ----

    /// Replace aggregate calls and grouping columns with references to
    /// their generated names, so SELECT/HAVING/ORDER BY lower against
    /// the aggregated row shape.
    fn rewrite_query(
        &self,
        query: &QuerySpecification,
        groupings: &[GroupingPlan],
        aggregates: &[AggregatePlan],
    ) -> QuerySpecification {
        let mut rewritten = query.clone();
        for element in &mut rewritten.select_elements {
            if let SelectElement::Expr { expr, .. } = element {
                *expr = self.rewrite_scalar(expr.clone(), groupings, aggregates);
            }
        }
        if let Some(having) = rewritten.having.take() {
            rewritten.having = Some(self.rewrite_bool(having, groupings, aggregates));
        }
        rewritten.order_by = rewritten
            .order_by
            .into_iter()
            .map(|o| OrderByElement {
                expr: self.rewrite_scalar(o.expr, groupings, aggregates),
                descending: o.descending,
            })
            .collect();
        rewritten
    }

    fn rewrite_scalar(
        &self,
        expr: ScalarExpr,
        groupings: &[GroupingPlan],
        aggregates: &[AggregatePlan],
    ) -> ScalarExpr {
        // whole-subtree matches substitute by identity
        if let ScalarExpr::Function(f) = &expr {
            if let Some(a) = aggregates.iter().find(|a| same_call(&a.call, f)) {
                return ScalarExpr::Column(ColumnRef::single(a.alias.clone()));
            }
            if f.name.eq_ignore_ascii_case("datepart") {
                if let Ok(part) = native_date_part_opt(f) {
                    if let FunctionArg::Expr(ScalarExpr::Column(col)) = &f.args[1] {
                        if let Ok(Bound::Column(b)) = self.bind_column(col, false) {
                            if let Some(g) = groupings.iter().find(|g| {
                                g.table_index == b.table_index
                                    && g.attribute == b.attribute
                                    && g.date_part == Some(part)
                            }) {
                                return ScalarExpr::Column(ColumnRef::single(g.alias.clone()));
                            }
                        }
                    }
                }
            }
        }
        if let ScalarExpr::Column(col) = &expr {
            if let Ok(Bound::Column(b)) = self.bind_column(col, false) {
                if let Some(g) = groupings.iter().find(|g| {
                    g.table_index == b.table_index
                        && g.attribute == b.attribute
                        && g.date_part.is_none()
                }) {
                    return ScalarExpr::Column(ColumnRef::single(g.alias.clone()));
                }
            }
        }

        match expr {
            ScalarExpr::Unary { op, operand } => ScalarExpr::Unary {
                op,
                operand: Box::new(self.rewrite_scalar(*operand, groupings, aggregates)),
            },
            ScalarExpr::Binary { op, left, right } => ScalarExpr::Binary {
                op,
                left: Box::new(self.rewrite_scalar(*left, groupings, aggregates)),
                right: Box::new(self.rewrite_scalar(*right, groupings, aggregates)),
            },
            ScalarExpr::Function(f) => ScalarExpr::Function(FunctionCall {
                name: f.name,
                distinct: f.distinct,
                args: f
                    .args
                    .into_iter()
                    .map(|a| match a {
                        FunctionArg::Expr(e) => {
                            FunctionArg::Expr(self.rewrite_scalar(e, groupings, aggregates))
                        }
                        star => star,
                    })
                    .collect(),
            }),
            ScalarExpr::SearchedCase { branches, else_expr } => ScalarExpr::SearchedCase {
                branches: branches
                    .into_iter()
                    .map(|(t, r)| {
                        (
                            self.rewrite_bool(t, groupings, aggregates),
                            self.rewrite_scalar(r, groupings, aggregates),
                        )
                    })
                    .collect(),
                else_expr: else_expr
                    .map(|e| Box::new(self.rewrite_scalar(*e, groupings, aggregates))),
            },
            ScalarExpr::SimpleCase { operand, branches, else_expr } => ScalarExpr::SimpleCase {
                operand: Box::new(self.rewrite_scalar(*operand, groupings, aggregates)),
                branches: branches
                    .into_iter()
                    .map(|(t, r)| {
                        (
                            self.rewrite_scalar(t, groupings, aggregates),
                            self.rewrite_scalar(r, groupings, aggregates),
                        )
                    })
                    .collect(),
                else_expr: else_expr
                    .map(|e| Box::new(self.rewrite_scalar(*e, groupings, aggregates))),
            },
            other => other,
        }
    }

    fn rewrite_bool(
        &self,
        expr: BoolExpr,
        groupings: &[GroupingPlan],
        aggregates: &[AggregatePlan],
    ) -> BoolExpr {
        match expr {
            BoolExpr::And(items) => BoolExpr::And(
                items.into_iter().map(|e| self.rewrite_bool(e, groupings, aggregates)).collect(),
            ),
            BoolExpr::Or(items) => BoolExpr::Or(
                items.into_iter().map(|e| self.rewrite_bool(e, groupings, aggregates)).collect(),
            ),
            BoolExpr::Not(inner) => {
                BoolExpr::Not(Box::new(self.rewrite_bool(*inner, groupings, aggregates)))
            }
            BoolExpr::Paren(inner) => {
                BoolExpr::Paren(Box::new(self.rewrite_bool(*inner, groupings, aggregates)))
            }
            BoolExpr::Comparison { left, op, right } => BoolExpr::Comparison {
                left: self.rewrite_scalar(left, groupings, aggregates),
                op,
                right: self.rewrite_scalar(right, groupings, aggregates),
            },
            BoolExpr::IsNull { expr, negated } => BoolExpr::IsNull {
                expr: self.rewrite_scalar(expr, groupings, aggregates),
                negated,
            },
            BoolExpr::Like { expr, pattern, negated } => BoolExpr::Like {
                expr: self.rewrite_scalar(expr, groupings, aggregates),
                pattern: self.rewrite_scalar(pattern, groupings, aggregates),
                negated,
            },
            BoolExpr::InList { expr, list, negated } => BoolExpr::InList {
                expr: self.rewrite_scalar(expr, groupings, aggregates),
                list: list
                    .into_iter()
                    .map(|e| self.rewrite_scalar(e, groupings, aggregates))
                    .collect(),
                negated,
            },
            other => other,
        }
    }
}

fn aggregate_function(lname: &str, call: &FunctionCall) -> AggregateFunction {
    match lname {
        "count" if matches!(call.args.as_slice(), [FunctionArg::Star]) => {
            AggregateFunction::Count
        }
        "count" if call.distinct => AggregateFunction::CountColumnDistinct,
        "count" => AggregateFunction::CountColumn,
        "avg" => AggregateFunction::Average,
        "sum" => AggregateFunction::Sum,
        "min" => AggregateFunction::Min,
        _ => AggregateFunction::Max,
    }
}

fn native_date_part(f: &FunctionCall) -> LowerResult<DatePart> {
    native_date_part_opt(f)
        .map_err(|_| LowerFailure::post_processing("date part has no native grouping"))
}

fn native_date_part_opt(f: &FunctionCall) -> Result<DatePart, ()> {
    if f.args.len() != 2 {
        return Err(());
    }
    let FunctionArg::Expr(ScalarExpr::Column(ColumnRef { parts })) = &f.args[0] else {
        return Err(());
    };
    if parts.len() != 1 {
        return Err(());
    }
    let part = DatePart::parse(&parts[0]).ok_or(())?;
    if part.date_grouping().is_some() {
        Ok(part)
    } else {
        Err(())
    }
}

fn same_call(a: &FunctionCall, b: &FunctionCall) -> bool {
    a.name.eq_ignore_ascii_case(&b.name) && a.distinct == b.distinct && a.args == b.args
}

fn unique_name(base: String, used: &mut HashSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 1;
    while !used.insert(name.clone()) {
        name = format!("{base}_{n}");
        n += 1;
    }
    name
}

pub(crate) fn bool_contains_aggregate(expr: &BoolExpr) -> bool {
    expr.contains_aggregate()
}

/// Unique aggregate calls in SELECT, HAVING and ORDER BY, in first-seen
/// order. Dedup is by call shape, DISTINCT included.
fn collect_aggregate_calls(query: &QuerySpecification) -> Vec<FunctionCall> {
    let mut calls: Vec<FunctionCall> = Vec::new();
    let mut push = |f: &FunctionCall| {
        if !calls.iter().any(|c| same_call(c, f)) {
            calls.push(f.clone());
        }
    };
    for element in &query.select_elements {
        if let SelectElement::Expr { expr, .. } = element {
            collect_calls_scalar(expr, &mut push);
        }
    }
    if let Some(having) = &query.having {
        collect_calls_bool(having, &mut push);
    }
    for order in &query.order_by {
        collect_calls_scalar(&order.expr, &mut push);
    }
    calls
}

fn collect_calls_scalar(expr: &ScalarExpr, push: &mut impl FnMut(&FunctionCall)) {
    match expr {
        ScalarExpr::Function(f) => {
            if crate::parser::ast::is_aggregate_name(&f.name) {
                push(f);
            } else {
                for arg in &f.args {
                    if let FunctionArg::Expr(e) = arg {
                        collect_calls_scalar(e, push);
                    }
                }
            }
        }
        ScalarExpr::Unary { operand, .. } => collect_calls_scalar(operand, push),
        ScalarExpr::Binary { left, right, .. } => {
            collect_calls_scalar(left, push);
            collect_calls_scalar(right, push);
        }
        ScalarExpr::SearchedCase { branches, else_expr } => {
            for (t, r) in branches {
                collect_calls_bool(t, push);
                collect_calls_scalar(r, push);
            }
            if let Some(e) = else_expr {
                collect_calls_scalar(e, push);
            }
        }
        ScalarExpr::SimpleCase { operand, branches, else_expr } => {
            collect_calls_scalar(operand, push);
            for (t, r) in branches {
                collect_calls_scalar(t, push);
                collect_calls_scalar(r, push);
            }
            if let Some(e) = else_expr {
                collect_calls_scalar(e, push);
            }
        }
        ScalarExpr::Literal(_) | ScalarExpr::Column(_) => {}
    }
}

fn collect_calls_bool(expr: &BoolExpr, push: &mut impl FnMut(&FunctionCall)) {
    match expr {
        BoolExpr::And(items) | BoolExpr::Or(items) => {
            for item in items {
                collect_calls_bool(item, push);
            }
        }
        BoolExpr::Not(inner) | BoolExpr::Paren(inner) => collect_calls_bool(inner, push),
        BoolExpr::Comparison { left, right, .. } => {
            collect_calls_scalar(left, push);
            collect_calls_scalar(right, push);
        }
        BoolExpr::IsNull { expr, .. } => collect_calls_scalar(expr, push),
        BoolExpr::Like { expr, pattern, .. } => {
            collect_calls_scalar(expr, push);
            collect_calls_scalar(pattern, push);
        }
        BoolExpr::InList { expr, list, .. } => {
            collect_calls_scalar(expr, push);
            for item in list {
                collect_calls_scalar(item, push);
            }
        }
        BoolExpr::InSubquery { expr } => collect_calls_scalar(expr, push),
    }
}

fn collect_columns(expr: &ScalarExpr, out: &mut Vec<ColumnRef>) {
    match expr {
        ScalarExpr::Column(col) => out.push(col.clone()),
        ScalarExpr::Unary { operand, .. } => collect_columns(operand, out),
        ScalarExpr::Binary { left, right, .. } => {
            collect_columns(left, out);
            collect_columns(right, out);
        }
        ScalarExpr::Function(f) => {
            // date functions consume their first argument as a symbol
            let args: &[FunctionArg] = if matches!(
                f.name.to_lowercase().as_str(),
                "dateadd" | "datediff" | "datepart"
            ) {
                &f.args[1.min(f.args.len())..]
            } else {
                &f.args[..]
            };
            for arg in args {
                if let FunctionArg::Expr(e) = arg {
                    collect_columns(e, out);
                }
            }
        }
        ScalarExpr::SearchedCase { branches, else_expr } => {
            for (t, r) in branches {
                collect_columns_bool(t, out);
                collect_columns(r, out);
            }
            if let Some(e) = else_expr {
                collect_columns(e, out);
            }
        }
        ScalarExpr::SimpleCase { operand, branches, else_expr } => {
            collect_columns(operand, out);
            for (t, r) in branches {
                collect_columns(t, out);
                collect_columns(r, out);
            }
            if let Some(e) = else_expr {
                collect_columns(e, out);
            }
        }
        ScalarExpr::Literal(_) => {}
    }
}

fn collect_columns_bool(expr: &BoolExpr, out: &mut Vec<ColumnRef>) {
    match expr {
        BoolExpr::And(items) | BoolExpr::Or(items) => {
            for item in items {
                collect_columns_bool(item, out);
            }
        }
        BoolExpr::Not(inner) | BoolExpr::Paren(inner) => collect_columns_bool(inner, out),
        BoolExpr::Comparison { left, right, .. } => {
            collect_columns(left, out);
            collect_columns(right, out);
        }
        BoolExpr::IsNull { expr, .. } => collect_columns(expr, out),
        BoolExpr::Like { expr, pattern, .. } => {
            collect_columns(expr, out);
            collect_columns(pattern, out);
        }
        BoolExpr::InList { expr, list, .. } => {
            collect_columns(expr, out);
            for item in list {
                collect_columns(item, out);
            }
        }
        BoolExpr::InSubquery { expr } => collect_columns(expr, out),
    }
}

fn rewrite_by_ast(expr: ScalarExpr, map: &[(ScalarExpr, String)]) -> ScalarExpr {
    if let Some((_, name)) = map.iter().find(|(ast, _)| *ast == expr) {
        return ScalarExpr::Column(ColumnRef::single(name.clone()));
    }
    match expr {
        ScalarExpr::Unary { op, operand } => {
            ScalarExpr::Unary { op, operand: Box::new(rewrite_by_ast(*operand, map)) }
        }
        ScalarExpr::Binary { op, left, right } => ScalarExpr::Binary {
            op,
            left: Box::new(rewrite_by_ast(*left, map)),
            right: Box::new(rewrite_by_ast(*right, map)),
        },
        other => other,
    }
}

fn rewrite_bool_by_ast(expr: BoolExpr, map: &[(ScalarExpr, String)]) -> BoolExpr {
    match expr {
        BoolExpr::And(items) => {
            BoolExpr::And(items.into_iter().map(|e| rewrite_bool_by_ast(e, map)).collect())
        }
        BoolExpr::Or(items) => {
            BoolExpr::Or(items.into_iter().map(|e| rewrite_bool_by_ast(e, map)).collect())
        }
        BoolExpr::Not(inner) => BoolExpr::Not(Box::new(rewrite_bool_by_ast(*inner, map))),
        BoolExpr::Paren(inner) => BoolExpr::Paren(Box::new(rewrite_bool_by_ast(*inner, map))),
        BoolExpr::Comparison { left, op, right } => BoolExpr::Comparison {
            left: rewrite_by_ast(left, map),
            op,
            right: rewrite_by_ast(right, map),
        },
        other => other,
    }
}

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::compiler::binder::{Bound, QueryContext};
use crate::compiler::compiled::CompiledSelect;
use crate::compiler::error::LowerFailure;
use crate::compiler::tables::EntityTable;
use crate::compiler::{CompileError, CompileOptions};
use crate::executor::{Expr, QueryExtension, SortKey, ValueType};
use crate::fetch::{
    FetchAttribute, FetchOrder, Filter, FilterType, Item, LinkEntity, LinkType,
};
use crate::metadata::MetadataProvider;
use crate::parser::ast::{
    BoolExpr, ComparisonOp, JoinType, Literal, QuerySpecification, ScalarExpr, SelectElement,
    SelectStatement, Statement, TableReference,
};
use crate::parser::SqlCursor;

/// One SELECT-list output: its name, the row key it reads when it is a
/// plain read, and the (rewritten) AST for positional ORDER BY.
struct SelectInfo {
    output: String,
    key: Option<String>,
    ty: ValueType,
    ast: ScalarExpr,
}

pub(crate) fn compile_select(
    meta: &dyn MetadataProvider,
    options: &CompileOptions,
    statement: &SelectStatement,
    sql: &str,
) -> Result<CompiledSelect, CompileError> {
    let mut ctx = lower_from(meta, options, &statement.query.from)?;

    if let Some(where_clause) = &statement.query.where_clause {
        trace!("lowering WHERE");
        ctx.lower_where(where_clause)?;
    }

    trace!("lowering GROUP BY");
    let effective = match ctx.lower_aggregates(&statement.query)? {
        Some(rewritten) => rewritten,
        None => statement.query.clone(),
    };

    trace!("lowering SELECT list");
    let infos = lower_select_list(&mut ctx, &effective)?;

    if effective.unique_rows {
        if ctx.post_processing_started() {
            ctx.extensions.push(QueryExtension::Distinct);
        } else {
            ctx.fetch.distinct = Some(true);
        }
    }

    trace!("lowering ORDER BY");
    lower_order_by(&mut ctx, &effective, &infos)?;

    if let Some(having) = &effective.having {
        trace!("lowering HAVING");
        let predicate = ctx.lower_pred_expr(having, true)?;
        ctx.extensions.push(QueryExtension::Having(predicate));
    }

    if let Some(offset) = &effective.offset {
        if effective.top.is_some() {
            return Err(CompileError::not_supported(
                "TOP cannot be combined with OFFSET",
                "TOP",
            ));
        }
        match offset.fetch {
            Some(size)
                if !ctx.post_processing_started()
                    && size > 0
                    && offset.skip % size == 0 =>
            {
                ctx.fetch.count = Some(size as u32);
                ctx.fetch.page = Some((offset.skip / size + 1) as u32);
            }
            _ => ctx.extensions.push(QueryExtension::Offset {
                skip: offset.skip as usize,
                take: offset.fetch.map(|n| n as usize),
            }),
        }
    }

    if let Some(top) = &effective.top {
        if top.percent || top.with_ties {
            return Err(CompileError::not_supported(
                "TOP PERCENT / WITH TIES",
                "TOP",
            ));
        }
        if ctx.post_processing_started() {
            ctx.extensions.push(QueryExtension::Top(top.count as usize));
        } else {
            ctx.fetch.top = Some(top.count as u32);
        }
    }

    ctx.fetch.finalize();

    let all_pages = ctx.fetch.top.is_none() && ctx.fetch.count.is_none();
    let columns: Vec<String> = infos.into_iter().map(|i| i.output).collect();

    let aggregate_alternative = if ctx.fetch.is_aggregate() {
        debug!("building aggregate alternative plan");
        Some(Box::new(compile_aggregate_alternative(meta, options, sql)?))
    } else {
        None
    };

    Ok(CompiledSelect {
        sql: sql.to_string(),
        fetch: Some(ctx.fetch),
        columns,
        extensions: ctx.extensions,
        all_pages,
        aggregate_alternative,
    })
}

/// Re-parse the original SQL and compile it with the aggregate forced
/// through the expression path. Output column names are shared, so the
/// runtime can switch plans without consumers noticing.
fn compile_aggregate_alternative(
    meta: &dyn MetadataProvider,
    options: &CompileOptions,
    sql: &str,
) -> Result<CompiledSelect, CompileError> {
    let mut cursor = SqlCursor::new(sql, options.quoted_identifiers);
    let statement = Statement::parse(&mut cursor)?;
    let Statement::Select(select) = statement else {
        return Err(CompileError::not_supported("aggregate alternative source", sql));
    };
    let mut forced = options.clone();
    forced.force_aggregate_expression = true;
    compile_select(meta, &forced, &select, sql)
}

// ---- FROM ----

fn lower_from<'a>(
    meta: &'a dyn MetadataProvider,
    options: &'a CompileOptions,
    from: &TableReference,
) -> Result<QueryContext<'a>, CompileError> {
    match from {
        TableReference::Named { table, alias, hints } => {
            let mut ctx = QueryContext::new(meta, options, table)?;
            ctx.tables.tables[0].alias = alias.clone();
            apply_hints(&mut ctx, hints)?;
            Ok(ctx)
        }
        TableReference::Join { left, right, join_type, on } => {
            let mut ctx = lower_from(meta, options, left)?;
            let TableReference::Named { table, alias, hints } = right.as_ref() else {
                return Err(CompileError::not_supported(
                    "parenthesized join trees",
                    "JOIN",
                ));
            };
            apply_hints(&mut ctx, hints)?;
            lower_join(&mut ctx, table, alias.clone(), *join_type, on)?;
            Ok(ctx)
        }
    }
}

fn apply_hints(ctx: &mut QueryContext<'_>, hints: &[String]) -> Result<(), CompileError> {
    for hint in hints {
        if hint == "nolock" {
            ctx.fetch.no_lock = Some(true);
        } else {
            return Err(CompileError::not_supported("table hint", hint));
        }
    }
    Ok(())
}

fn lower_join(
    ctx: &mut QueryContext<'_>,
    entity_name: &str,
    alias: Option<String>,
    join_type: JoinType,
    on: &BoolExpr,
) -> Result<(), CompileError> {
    let metadata = ctx
        .meta
        .entity(&entity_name.to_lowercase())
        .ok_or_else(|| CompileError::UnknownTable(entity_name.to_string()))?
        .clone();

    // register the newcomer so both sides of the ON clause bind; its
    // node path is patched once the outer side is known
    let new_index = ctx.tables.add(EntityTable {
        entity_name: metadata.logical_name.clone(),
        alias,
        node: vec![],
        metadata,
    })?;

    // split the ON clause into the join key and residual conditions
    let mut conjuncts: Vec<&BoolExpr> = Vec::new();
    flatten_on(on, &mut conjuncts);

    let mut join_key: Option<(usize, String, usize, String)> = None;
    let mut residual: Vec<&BoolExpr> = Vec::new();
    for conjunct in &conjuncts {
        if let BoolExpr::Comparison {
            left: ScalarExpr::Column(lcol),
            op: ComparisonOp::Eq,
            right: ScalarExpr::Column(rcol),
        } = conjunct
        {
            let Bound::Column(lb) = ctx.bind_column(lcol, false)? else {
                return Err(CompileError::not_supported("join key", lcol));
            };
            let Bound::Column(rb) = ctx.bind_column(rcol, false)? else {
                return Err(CompileError::not_supported("join key", rcol));
            };
            if join_key.is_some() {
                return Err(CompileError::not_supported(
                    "only one join key comparison is allowed per ON clause",
                    format!("{lcol} = {rcol}"),
                ));
            }
            join_key = Some((lb.table_index, lb.attribute, rb.table_index, rb.attribute));
            continue;
        }
        if contains_column_comparison(conjunct) {
            return Err(CompileError::not_supported(
                "join key comparison cannot appear under OR",
                "ON",
            ));
        }
        residual.push(conjunct);
    }

    let Some((lt, la, rt, ra)) = join_key else {
        return Err(CompileError::not_supported("ON clause needs a join key", "ON"));
    };
    // from = outer-side attribute, to = newcomer attribute
    let (outer_index, from_attr, to_attr) = if lt == new_index && rt != new_index {
        (rt, ra, la)
    } else if rt == new_index && lt != new_index {
        (lt, la, ra)
    } else {
        return Err(CompileError::not_supported(
            "join key must relate the joined table to an earlier one",
            "ON",
        ));
    };

    let link = LinkEntity {
        name: ctx.tables.get(new_index).entity_name.clone(),
        alias: Some(ctx.tables.get(new_index).visible_name().to_string()),
        from: from_attr,
        to: to_attr,
        link_type: match join_type {
            JoinType::Inner => LinkType::Inner,
            JoinType::LeftOuter => LinkType::Outer,
        },
        items: Vec::new(),
    };

    // attach under the outer table and fix the newcomer's node path
    let mut node = ctx.tables.get(outer_index).node.clone();
    let mut outer = ctx.container_for(outer_index);
    node.push(outer.items().len());
    outer.items_mut().push(Item::Link(link));
    ctx.tables.tables[new_index].node = node;

    // residual conditions must lower natively or the join is invalid
    if !residual.is_empty() {
        let mut filter = Filter::new(FilterType::Indeterminate);
        let mut spill = Vec::new();
        for part in residual {
            match ctx.lower_bool(part, &mut filter, false, &mut spill) {
                Ok(()) => {}
                Err(LowerFailure::PostProcessing(_)) => {
                    return Err(CompileError::RewriteAsWhere(
                        ctx.tables.get(new_index).visible_name().to_string(),
                    ))
                }
                Err(LowerFailure::Fatal(e)) => return Err(e),
            }
        }
        if !filter.is_empty() {
            let node = ctx.tables.get(new_index).node.clone();
            crate::compiler::tables::items_at(&mut ctx.fetch, &node)
                .push(Item::Filter(filter));
        }
    }

    Ok(())
}

fn flatten_on<'e>(expr: &'e BoolExpr, out: &mut Vec<&'e BoolExpr>) {
    match expr {
        BoolExpr::And(items) => {
            for item in items {
                flatten_on(item, out);
            }
        }
        BoolExpr::Paren(inner) => flatten_on(inner, out),
        other => out.push(other),
    }
}

fn contains_column_comparison(expr: &BoolExpr) -> bool {
    match expr {
        BoolExpr::And(items) | BoolExpr::Or(items) => {
            items.iter().any(contains_column_comparison)
        }
        BoolExpr::Not(inner) | BoolExpr::Paren(inner) => contains_column_comparison(inner),
        BoolExpr::Comparison {
            left: ScalarExpr::Column(_),
            right: ScalarExpr::Column(_),
            ..
        } => true,
        _ => false,
    }
}

// ---- SELECT ----

fn lower_select_list(
    ctx: &mut QueryContext<'_>,
    query: &QuerySpecification,
) -> Result<Vec<SelectInfo>, CompileError> {
    let mut infos: Vec<SelectInfo> = Vec::new();
    let mut computed: Vec<(String, Expr)> = Vec::new();
    let mut expr_counter = 0usize;

    for element in &query.select_elements {
        match element {
            SelectElement::Wildcard => {
                for i in 0..ctx.tables.tables.len() {
                    expand_wildcard(ctx, i, &mut infos);
                }
            }
            SelectElement::TableWildcard(name) => {
                let index = ctx.tables.find(name)?;
                expand_wildcard(ctx, index, &mut infos);
            }
            SelectElement::Expr { expr: ScalarExpr::Column(col), alias } => {
                match ctx.bind_column(col, false)? {
                    Bound::Column(binding) => {
                        let table = ctx.tables.get(binding.table_index);
                        let key = table.row_key(&binding.attribute);
                        let node = table.node.clone();
                        // a repeated alias cannot become a second
                        // FetchXML alias; route it through the projection
                        let alias_taken = alias.as_ref().is_some_and(|a| {
                            let mut container =
                                crate::compiler::tables::container_at(&mut ctx.fetch, &node);
                            container
                                .items_mut()
                                .iter()
                                .any(|i| matches!(i, Item::Attribute(at)
                                    if at.alias.as_deref() == Some(a.as_str())))
                        });
                        match alias {
                            Some(alias) if !ctx.post_processing_started() && !alias_taken => {
                                // a native alias: rows come back keyed by it
                                crate::compiler::tables::container_at(&mut ctx.fetch, &node)
                                    .items_mut()
                                    .push(Item::Attribute(FetchAttribute {
                                        name: binding.attribute.clone(),
                                        alias: Some(alias.clone()),
                                        ..Default::default()
                                    }));
                                infos.push(SelectInfo {
                                    output: alias.clone(),
                                    key: Some(alias.clone()),
                                    ty: binding.attr_type.domain_type(),
                                    ast: ScalarExpr::Column(col.clone()),
                                });
                            }
                            Some(alias) => {
                                let expr = ctx.column_expr(col, false)?;
                                computed.push((alias.clone(), expr));
                                infos.push(SelectInfo {
                                    output: alias.clone(),
                                    key: Some(key),
                                    ty: binding.attr_type.domain_type(),
                                    ast: ScalarExpr::Column(col.clone()),
                                });
                            }
                            None => {
                                ctx.column_expr(col, false)?;
                                infos.push(SelectInfo {
                                    output: col.name().to_string(),
                                    key: Some(key),
                                    ty: binding.attr_type.domain_type(),
                                    ast: ScalarExpr::Column(col.clone()),
                                });
                            }
                        }
                    }
                    Bound::FetchAlias { alias: declared, ty, .. } => {
                        infos.push(SelectInfo {
                            output: alias.clone().unwrap_or_else(|| col.name().to_string()),
                            key: Some(declared),
                            ty,
                            ast: ScalarExpr::Column(col.clone()),
                        });
                    }
                    Bound::Computed { name, ty } => {
                        infos.push(SelectInfo {
                            output: alias.clone().unwrap_or_else(|| col.name().to_string()),
                            key: Some(name),
                            ty,
                            ast: ScalarExpr::Column(col.clone()),
                        });
                    }
                }
            }
            SelectElement::Expr { expr, alias } => {
                let lowered = ctx.lower_scalar(expr, false)?;
                let output = match alias {
                    Some(alias) => alias.clone(),
                    None => {
                        expr_counter += 1;
                        format!("Expr{expr_counter}")
                    }
                };
                let ty = lowered.result_type().unwrap_or(ValueType::String);
                ctx.shadow.insert(output.to_lowercase(), ty);
                computed.push((output.clone(), lowered));
                infos.push(SelectInfo { output, key: None, ty, ast: expr.clone() });
            }
        }
    }

    // a non-empty pipeline realizes the whole list as a projection; a
    // calculated column forces one even on a pure native query
    if ctx.post_processing_started() || !computed.is_empty() {
        let mut map: IndexMap<String, Expr> = IndexMap::new();
        for info in &infos {
            if let Some(key) = &info.key {
                map.insert(info.output.clone(), Expr::Column { key: key.clone(), ty: info.ty });
            }
        }
        for (name, expr) in computed {
            map.insert(name, expr);
        }
        ctx.extensions.push(QueryExtension::Projection(map));
    }

    Ok(infos)
}

fn expand_wildcard(ctx: &mut QueryContext<'_>, table_index: usize, infos: &mut Vec<SelectInfo>) {
    {
        let mut container = ctx.container_for(table_index);
        if !container.items().iter().any(|i| matches!(i, Item::AllAttributes)) {
            container.items_mut().push(Item::AllAttributes);
        }
    }
    let table = ctx.tables.get(table_index);
    let visible = table.visible_name().to_string();
    for attr in table.metadata.readable_attributes() {
        let key = table.row_key(&attr.logical_name);
        let ast = if table.is_root() {
            ScalarExpr::Column(crate::parser::ast::ColumnRef::single(attr.logical_name.as_str()))
        } else {
            ScalarExpr::Column(crate::parser::ast::ColumnRef {
                parts: vec![visible.clone(), attr.logical_name.clone()],
            })
        };
        infos.push(SelectInfo {
            output: key.clone(),
            key: Some(key),
            ty: attr.attribute_type.domain_type(),
            ast,
        });
    }
}

// ---- ORDER BY ----

fn lower_order_by(
    ctx: &mut QueryContext<'_>,
    query: &QuerySpecification,
    infos: &[SelectInfo],
) -> Result<(), CompileError> {
    if query.order_by.is_empty() {
        return Ok(());
    }

    let dfs = dfs_table_order(ctx);
    let mut keys: Vec<SortKey> = Vec::new();
    let mut in_memory = ctx.post_processing_started();

    for element in &query.order_by {
        // positional keys name SELECT columns by 1-based index
        let (ast, output_key) = match &element.expr {
            ScalarExpr::Literal(Literal::Int(n)) => {
                let index = (*n as usize)
                    .checked_sub(1)
                    .filter(|i| *i < infos.len())
                    .ok_or_else(|| {
                        CompileError::not_supported("ORDER BY position out of range", n)
                    })?;
                (&infos[index].ast, Some(infos[index].output.clone()))
            }
            other => (other, None),
        };

        if !in_memory {
            match try_native_sort(ctx, ast, element.descending, &dfs)? {
                Some(selector) => {
                    keys.push(SortKey {
                        selector,
                        descending: element.descending,
                        native_prefix: true,
                    });
                    continue;
                }
                None => {
                    debug!("ORDER BY key requires in-memory sort");
                    in_memory = true;
                }
            }
        }

        let selector = match (ast, &output_key) {
            // a positional key over a computed column reads its output
            (ScalarExpr::Column(_), _) | (_, None) => match ast {
                ScalarExpr::Column(col) => ctx.column_expr(col, true)?,
                other => ctx.lower_scalar(other, true)?,
            },
            (_, Some(output)) => Expr::Column {
                key: output.clone(),
                ty: ctx
                    .shadow
                    .get(&output.to_lowercase())
                    .copied()
                    .unwrap_or(ValueType::String),
            },
        };
        keys.push(SortKey { selector, descending: element.descending, native_prefix: false });
    }

    if keys.iter().any(|k| !k.native_prefix) {
        ctx.extensions.push(QueryExtension::Sort(keys));
    }
    Ok(())
}

/// Try to emit a native `<order>`; None means this key (and all later
/// ones) must sort in memory.
fn try_native_sort(
    ctx: &mut QueryContext<'_>,
    ast: &ScalarExpr,
    descending: bool,
    dfs: &[usize],
) -> Result<Option<Expr>, CompileError> {
    let ScalarExpr::Column(col) = ast else {
        return Ok(None); // compound expression
    };
    let aggregate = ctx.fetch.is_aggregate();
    match ctx.bind_column(col, true)? {
        Bound::Column(binding) => {
            if aggregate {
                // a plain column in an aggregate query has no native order
                return Ok(None);
            }
            if later_table_has_sort(ctx, binding.table_index, dfs) {
                return Ok(None);
            }
            let table = ctx.tables.get(binding.table_index);
            let key = table.row_key(&binding.attribute);
            let ty = binding.attr_type.domain_type();
            let mut container = ctx.container_for(binding.table_index);
            // an aliased attribute breaks paging unless a plain copy
            // of the attribute is also present
            let aliased = container.items().iter().any(|i| {
                matches!(i, Item::Attribute(a)
                    if a.name == binding.attribute
                        && a.alias.as_deref().is_some_and(|al| al != binding.attribute))
            });
            if aliased {
                container.ensure_attribute(&binding.attribute);
            }
            container.items_mut().push(Item::Order(FetchOrder {
                attribute: Some(binding.attribute.clone()),
                alias: None,
                descending,
            }));
            Ok(Some(Expr::Column { key, ty }))
        }
        Bound::FetchAlias { alias, attribute, table_index, ty } => {
            if later_table_has_sort(ctx, table_index, dfs) {
                return Ok(None);
            }
            let mut container = ctx.container_for(table_index);
            if aggregate {
                // aggregate queries sort by the attribute's alias
                container.items_mut().push(Item::Order(FetchOrder {
                    attribute: None,
                    alias: Some(alias.clone()),
                    descending,
                }));
            } else {
                // sort by the underlying attribute; paging needs a
                // plain copy next to the aliased one
                if alias != attribute {
                    container.ensure_attribute(&attribute);
                }
                container.items_mut().push(Item::Order(FetchOrder {
                    attribute: Some(attribute),
                    alias: None,
                    descending,
                }));
            }
            Ok(Some(Expr::Column { key: alias, ty }))
        }
        Bound::Computed { .. } => Ok(None), // calculated field
    }
}

fn later_table_has_sort(ctx: &QueryContext<'_>, table_index: usize, dfs: &[usize]) -> bool {
    let position = dfs.iter().position(|i| *i == table_index).unwrap_or(0);
    dfs.iter().skip(position + 1).any(|i| {
        let table = ctx.tables.get(*i);
        let mut items = &ctx.fetch.entity.items;
        for &index in &table.node {
            match &items[index] {
                Item::Link(link) => items = &link.items,
                _ => return false,
            }
        }
        items.iter().any(|item| matches!(item, Item::Order(_)))
    })
}

/// Table indices in depth-first order of the FetchXML tree.
fn dfs_table_order(ctx: &QueryContext<'_>) -> Vec<usize> {
    let mut order: Vec<(Vec<usize>, usize)> = ctx
        .tables
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.node.clone(), i))
        .collect();
    order.sort_by(|(a, _), (b, _)| a.cmp(b));
    order.into_iter().map(|(_, i)| i).collect()
}

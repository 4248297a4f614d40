use std::collections::HashSet;

use indexmap::IndexMap;

use crate::executor::{AggregateSpec, Expr, PredExpr, Row, Value};

pub type RowIter = Box<dyn Iterator<Item = Row>>;

/// One ORDER key of the in-memory Sort. Keys flagged `native_prefix`
/// were already applied by the native query; the operator only
/// re-orders rows inside runs that compare equal on them.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub selector: Expr,
    pub descending: bool,
    pub native_prefix: bool,
}

/// One grouping key of the in-memory Aggregate.
#[derive(Debug, Clone)]
pub struct Grouping {
    pub selector: Expr,
    pub output: String,
}

/// Post-processing applied to the rows the native query returns.
/// Append order is application order.
#[derive(Debug, Clone)]
pub enum QueryExtension {
    Where(PredExpr),
    Projection(IndexMap<String, Expr>),
    Sort(Vec<SortKey>),
    Distinct,
    Top(usize),
    Offset { skip: usize, take: Option<usize> },
    Having(PredExpr),
    Aggregate { groupings: Vec<Grouping>, aggregates: Vec<AggregateSpec> },
}

impl QueryExtension {
    pub fn apply(&self, rows: RowIter) -> RowIter {
        match self {
            QueryExtension::Where(pred) | QueryExtension::Having(pred) => {
                let pred = pred.clone();
                Box::new(rows.filter(move |r| pred.eval(r).is_true()))
            }
            QueryExtension::Projection(map) => {
                let map = map.clone();
                Box::new(rows.map(move |mut row| {
                    for (name, selector) in &map {
                        let v = selector.eval(&row);
                        row.insert(name.clone(), v);
                    }
                    row
                }))
            }
            QueryExtension::Sort(keys) => Box::new(sort_rows(rows, keys).into_iter()),
            QueryExtension::Distinct => {
                let mut seen = HashSet::new();
                Box::new(rows.filter(move |r| seen.insert(r.distinct_key())))
            }
            QueryExtension::Top(n) => Box::new(rows.take(*n)),
            QueryExtension::Offset { skip, take } => {
                let it = rows.skip(*skip);
                match take {
                    Some(n) => Box::new(it.take(*n)),
                    None => Box::new(it),
                }
            }
            QueryExtension::Aggregate { groupings, aggregates } => {
                Box::new(aggregate_rows(rows, groupings, aggregates).into_iter())
            }
        }
    }
}

/// Run a whole pipeline over a row source.
pub fn apply_extensions(extensions: &[QueryExtension], rows: RowIter) -> RowIter {
    extensions.iter().fold(rows, |it, ext| ext.apply(it))
}

fn sort_rows(rows: RowIter, keys: &[SortKey]) -> Vec<Row> {
    let rows: Vec<Row> = rows.collect();
    let native: Vec<&SortKey> = keys.iter().filter(|k| k.native_prefix).collect();
    let residual: Vec<&SortKey> = keys.iter().filter(|k| !k.native_prefix).collect();
    if residual.is_empty() {
        return rows;
    }

    let run_key = |row: &Row| -> String {
        native
            .iter()
            .map(|k| k.selector.eval(row).group_key())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    };

    let compare = |a: &Row, b: &Row| -> std::cmp::Ordering {
        for k in &residual {
            let av = k.selector.eval(a);
            let bv = k.selector.eval(b);
            let ord = if k.descending {
                bv.cmp_for_sort(&av)
            } else {
                av.cmp_for_sort(&bv)
            };
            if !ord.is_eq() {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    };

    // the native prefix already ordered whole runs; keep them in place
    // and stable-sort inside each run only
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    let mut run: Vec<Row> = Vec::new();
    let mut current: Option<String> = None;
    for row in rows {
        let key = run_key(&row);
        if current.as_ref() != Some(&key) {
            run.sort_by(compare);
            out.append(&mut run);
            current = Some(key);
        }
        run.push(row);
    }
    run.sort_by(compare);
    out.append(&mut run);
    out
}

/// Streaming aggregation over input pre-sorted by the grouping
/// selectors: a key change closes the running group.
fn aggregate_rows(
    rows: RowIter,
    groupings: &[Grouping],
    aggregates: &[AggregateSpec],
) -> Vec<Row> {
    let mut out = Vec::new();
    let mut current_key: Option<String> = None;
    let mut current_values: Vec<Value> = Vec::new();
    let mut accs: Vec<Box<dyn crate::executor::Accumulator>> = Vec::new();
    let mut saw_rows = false;

    let flush = |values: &[Value], accs: &[Box<dyn crate::executor::Accumulator>], out: &mut Vec<Row>| {
        let mut row = Row::new();
        for (g, v) in groupings.iter().zip(values) {
            row.insert(g.output.clone(), v.clone());
        }
        for (a, acc) in aggregates.iter().zip(accs) {
            row.insert(a.output.clone(), acc.finalize());
        }
        out.push(row);
    };

    for row in rows {
        saw_rows = true;
        let values: Vec<Value> = groupings.iter().map(|g| g.selector.eval(&row)).collect();
        let key = values.iter().map(Value::group_key).collect::<Vec<_>>().join("\u{1f}");

        if current_key.as_ref() != Some(&key) {
            if current_key.is_some() {
                flush(&current_values, &accs, &mut out);
            }
            current_key = Some(key);
            current_values = values;
            accs = aggregates.iter().map(|a| a.create_accumulator()).collect();
        }

        for (spec, acc) in aggregates.iter().zip(accs.iter_mut()) {
            // COUNT(*) has no argument and counts the row itself
            let v = match &spec.arg {
                Some(e) => e.eval(&row),
                None => Value::Bool(true),
            };
            acc.update(&v);
        }
    }

    if current_key.is_some() {
        flush(&current_values, &accs, &mut out);
    } else if saw_rows || groupings.is_empty() {
        // aggregate without GROUP BY over an empty input still yields one row
        let accs: Vec<Box<dyn crate::executor::Accumulator>> =
            aggregates.iter().map(|a| a.create_accumulator()).collect();
        flush(&[], &accs, &mut out);
    }
    out
}

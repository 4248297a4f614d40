use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::compiler::binder::QueryContext;
use crate::compiler::compiled::{
    CompiledDelete, CompiledInsert, CompiledInsertSource, CompiledSelect, CompiledUpdate,
    InsertCell, UpdateValue,
};
use crate::compiler::scalar::literal_value;
use crate::compiler::select::compile_select;
use crate::compiler::{CompileError, CompileOptions};
use crate::executor::Value;
use crate::fetch::ItemContainer;
use crate::metadata::{AttributeType, MetadataProvider};
use crate::parser::ast::{
    DeleteStatement, FunctionArg, InsertSource, InsertStatement, Literal, ScalarExpr,
    UpdateStatement,
};

pub(crate) fn compile_update(
    meta: &dyn MetadataProvider,
    options: &CompileOptions,
    statement: &UpdateStatement,
    sql: &str,
) -> Result<CompiledUpdate, CompileError> {
    let mut ctx = QueryContext::new(meta, options, &statement.target)?;

    if let Some(where_clause) = &statement.where_clause {
        ctx.lower_where(where_clause)?;
    }

    let mut updates = indexmap::IndexMap::new();
    for (column, expr) in &statement.set {
        let name = column.to_lowercase();
        let attr_type = ctx
            .tables
            .root()
            .metadata
            .attribute(&name)
            .map(|a| a.attribute_type)
            .ok_or_else(|| CompileError::UnknownAttribute(column.clone()))?;

        let value = match expr {
            ScalarExpr::Literal(lit) => {
                UpdateValue::Literal(convert_literal(lit, attr_type, column)?)
            }
            other => UpdateValue::Expr(ctx.lower_scalar(other, false)?),
        };
        updates.insert(name, value);
    }

    // the update targets rows by their primary key
    let id_column = ctx.tables.root().metadata.primary_id_attribute.clone();
    ctx.fetch.entity.ensure_attribute(&id_column);
    ctx.fetch.distinct = Some(true);
    ctx.fetch.finalize();

    Ok(CompiledUpdate {
        sql: sql.to_string(),
        entity_name: ctx.tables.root().entity_name.clone(),
        id_column,
        updates,
        fetch: ctx.fetch,
        extensions: ctx.extensions,
    })
}

pub(crate) fn compile_delete(
    meta: &dyn MetadataProvider,
    options: &CompileOptions,
    statement: &DeleteStatement,
    sql: &str,
) -> Result<CompiledDelete, CompileError> {
    let mut ctx = QueryContext::new(meta, options, &statement.target)?;

    if let Some(where_clause) = &statement.where_clause {
        ctx.lower_where(where_clause)?;
    }

    let root = ctx.tables.root().metadata.clone();
    let id_columns: Vec<String> = if root.logical_name == "listmember" {
        // list membership deletes go through the list + member pair
        vec!["listid".to_string(), "entityid".to_string()]
    } else if root.is_intersect {
        match root.many_to_many_relationships.as_slice() {
            [rel] => vec![
                rel.entity1_intersect_attribute.clone(),
                rel.entity2_intersect_attribute.clone(),
            ],
            _ => {
                return Err(CompileError::not_supported(
                    "intersect entity without a unique many-to-many relationship",
                    &root.logical_name,
                ))
            }
        }
    } else {
        vec![root.primary_id_attribute.clone()]
    };

    for column in &id_columns {
        ctx.fetch.entity.ensure_attribute(column);
    }
    ctx.fetch.distinct = Some(true);
    ctx.fetch.finalize();

    Ok(CompiledDelete {
        sql: sql.to_string(),
        entity_name: root.logical_name,
        id_columns,
        fetch: ctx.fetch,
        extensions: ctx.extensions,
    })
}

pub(crate) fn compile_insert(
    meta: &dyn MetadataProvider,
    options: &CompileOptions,
    statement: &InsertStatement,
    sql: &str,
) -> Result<CompiledInsert, CompileError> {
    let mut ctx = QueryContext::new(meta, options, &statement.target)?;

    let mut attr_types = Vec::with_capacity(statement.columns.len());
    for column in &statement.columns {
        let name = column.to_lowercase();
        let attr_type = ctx
            .tables
            .root()
            .metadata
            .attribute(&name)
            .map(|a| a.attribute_type)
            .ok_or_else(|| CompileError::UnknownAttribute(column.clone()))?;
        attr_types.push((name, attr_type));
    }

    let source = match &statement.source {
        InsertSource::Values(rows) => {
            let mut compiled_rows = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != statement.columns.len() {
                    return Err(CompileError::not_supported(
                        "VALUES row width does not match the column list",
                        sql,
                    ));
                }
                let mut cells = Vec::with_capacity(row.len());
                for (cell, (column, attr_type)) in row.iter().zip(&attr_types) {
                    cells.push(match cell {
                        ScalarExpr::Literal(lit) => {
                            InsertCell::Literal(convert_literal(lit, *attr_type, column)?)
                        }
                        other => {
                            if references_columns(other) {
                                return Err(CompileError::not_supported(
                                    "VALUES cells cannot reference columns",
                                    column,
                                ));
                            }
                            InsertCell::Expr(ctx.lower_scalar(other, false)?)
                        }
                    });
                }
                compiled_rows.push(cells);
            }
            CompiledInsertSource::Rows(compiled_rows)
        }
        InsertSource::Select(select) => {
            let plan: CompiledSelect = compile_select(meta, options, select, sql)?;
            if plan.columns.len() != statement.columns.len() {
                return Err(CompileError::not_supported(
                    "source column count does not match the target column list",
                    sql,
                ));
            }
            CompiledInsertSource::Select(Box::new(plan))
        }
    };

    Ok(CompiledInsert {
        sql: sql.to_string(),
        entity_name: ctx.tables.root().entity_name.clone(),
        columns: attr_types.into_iter().map(|(name, _)| name).collect(),
        source,
    })
}

fn references_columns(expr: &ScalarExpr) -> bool {
    match expr {
        ScalarExpr::Column(_) => true,
        ScalarExpr::Literal(_) => false,
        ScalarExpr::Unary { operand, .. } => references_columns(operand),
        ScalarExpr::Binary { left, right, .. } => {
            references_columns(left) || references_columns(right)
        }
        ScalarExpr::Function(f) => f.args.iter().any(|a| match a {
            FunctionArg::Expr(e) => references_columns(e),
            FunctionArg::Star => false,
        }),
        ScalarExpr::SearchedCase { branches, else_expr } => {
            branches.iter().any(|(_, r)| references_columns(r))
                || else_expr.as_ref().is_some_and(|e| references_columns(e))
        }
        ScalarExpr::SimpleCase { operand, branches, else_expr } => {
            references_columns(operand)
                || branches
                    .iter()
                    .any(|(t, r)| references_columns(t) || references_columns(r))
                || else_expr.as_ref().is_some_and(|e| references_columns(e))
        }
    }
}

/// Pre-convert a literal to the target attribute's domain type.
pub(crate) fn convert_literal(
    literal: &Literal,
    attr_type: AttributeType,
    column: &str,
) -> Result<Value, CompileError> {
    let value = literal_value(literal);
    if value.is_null() {
        return Ok(Value::Null);
    }
    let fail = || {
        CompileError::not_supported(
            format!("literal cannot convert to {attr_type:?}"),
            column,
        )
    };

    Ok(match attr_type {
        AttributeType::Integer
        | AttributeType::Picklist
        | AttributeType::State
        | AttributeType::Status => match &value {
            Value::Int(i) => Value::Int(*i),
            Value::Decimal(d) if d.fract().is_zero() => {
                Value::Int(ToPrimitive::to_i64(&d.trunc()).ok_or_else(fail)?)
            }
            Value::String(s) => Value::Int(s.trim().parse().map_err(|_| fail())?),
            _ => return Err(fail()),
        },
        AttributeType::Money | AttributeType::Decimal => match &value {
            Value::Int(i) => Value::Decimal(Decimal::from(*i)),
            Value::Decimal(d) => Value::Decimal(*d),
            Value::Float(f) => Value::Decimal(FromPrimitive::from_f64(*f).ok_or_else(fail)?),
            Value::String(s) => Value::Decimal(s.trim().parse().map_err(|_| fail())?),
            _ => return Err(fail()),
        },
        AttributeType::String | AttributeType::Memo | AttributeType::EntityName => match value {
            Value::String(s) => Value::String(s),
            Value::Int(i) => Value::String(i.to_string()),
            Value::Decimal(d) => Value::String(d.to_string()),
            Value::Float(f) => Value::String(f.to_string()),
            _ => return Err(fail()),
        },
        AttributeType::Lookup
        | AttributeType::Customer
        | AttributeType::Owner
        | AttributeType::UniqueIdentifier => match &value {
            Value::String(s) => Value::Guid(Uuid::parse_str(s.trim()).map_err(|_| fail())?),
            _ => return Err(fail()),
        },
        AttributeType::Boolean => match &value {
            Value::Int(0) => Value::Bool(false),
            Value::Int(1) => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => return Err(fail()),
        },
        AttributeType::DateTime => match &value {
            Value::String(s) => Value::DateTime(Value::parse_datetime(s).ok_or_else(fail)?),
            _ => return Err(fail()),
        },
        AttributeType::Double => match &value {
            Value::Int(i) => Value::Float(*i as f64),
            Value::Decimal(d) => Value::Float(ToPrimitive::to_f64(d).ok_or_else(fail)?),
            Value::Float(f) => Value::Float(*f),
            Value::String(s) => Value::Float(s.trim().parse().map_err(|_| fail())?),
            _ => return Err(fail()),
        },
    })
}

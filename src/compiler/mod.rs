pub mod error;
pub use error::CompileError;

pub mod options;
pub use options::CompileOptions;

pub mod compiled;
pub use compiled::*;

mod aggregate;
mod binder;
mod dml;
mod predicate;
mod scalar;
mod select;
mod tables;

#[cfg(test)]
mod _tests;

use tracing::debug;

use crate::metadata::MetadataProvider;
use crate::parser::ast::{ParsedStatement, Statement};

/// Compiles T-SQL batches into FetchXML plans with residual
/// post-processing pipelines. Stateless apart from the borrowed
/// metadata; safe to call from multiple threads.
pub struct QueryCompiler<'a> {
    meta: &'a dyn MetadataProvider,
    options: CompileOptions,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(meta: &'a dyn MetadataProvider) -> Self {
        QueryCompiler { meta, options: CompileOptions::default() }
    }

    pub fn with_options(meta: &'a dyn MetadataProvider, options: CompileOptions) -> Self {
        QueryCompiler { meta, options }
    }

    /// Compile a batch into one plan per statement.
    pub fn compile_batch(&self, sql: &str) -> Result<Vec<CompiledQuery>, CompileError> {
        let statements = Statement::parse_batch(sql, self.options.quoted_identifiers)?;
        statements.iter().map(|s| self.compile_statement(s)).collect()
    }

    /// Compile a batch expected to hold exactly one statement.
    pub fn compile(&self, sql: &str) -> Result<CompiledQuery, CompileError> {
        let mut plans = self.compile_batch(sql)?;
        match plans.len() {
            1 => Ok(plans.remove(0)),
            n => Err(CompileError::not_supported(
                format!("expected a single statement, found {n}"),
                sql,
            )),
        }
    }

    fn compile_statement(&self, parsed: &ParsedStatement) -> Result<CompiledQuery, CompileError> {
        let compiled = match &parsed.statement {
            Statement::Select(s) => {
                select::compile_select(self.meta, &self.options, s, &parsed.sql)
                    .map(CompiledQuery::Select)
            }
            Statement::Update(s) => {
                dml::compile_update(self.meta, &self.options, s, &parsed.sql)
                    .map(CompiledQuery::Update)
            }
            Statement::Delete(s) => {
                dml::compile_delete(self.meta, &self.options, s, &parsed.sql)
                    .map(CompiledQuery::Delete)
            }
            Statement::Insert(s) => {
                dml::compile_insert(self.meta, &self.options, s, &parsed.sql)
                    .map(CompiledQuery::Insert)
            }
        };

        // a SELECT the compiler cannot lower can still run against the
        // T-SQL endpoint when the caller allows it
        match compiled {
            Err(CompileError::NotSupported { reason, .. })
                if self.options.tsql_endpoint_available
                    && matches!(parsed.statement, Statement::Select(_)) =>
            {
                debug!(%reason, "carrying raw SQL for the T-SQL endpoint");
                Ok(CompiledQuery::Select(CompiledSelect {
                    sql: parsed.sql.clone(),
                    fetch: None,
                    columns: Vec::new(),
                    extensions: Vec::new(),
                    all_pages: true,
                    aggregate_alternative: None,
                }))
            }
            other => other,
        }
    }
}

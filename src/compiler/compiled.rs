use indexmap::IndexMap;

use crate::executor::{Expr, QueryExtension, Value};
use crate::fetch::Fetch;

/// A compiled SELECT: the largest native fragment plus the residual
/// post-processing pipeline. `fetch` is None only on the raw-SQL
/// fallback path.
#[derive(Debug, Clone)]
pub struct CompiledSelect {
    pub sql: String,
    pub fetch: Option<Fetch>,
    /// Output column names, in SELECT order.
    pub columns: Vec<String>,
    pub extensions: Vec<QueryExtension>,
    pub all_pages: bool,
    /// Expression-path twin of a native aggregate plan, run when the
    /// platform rejects the aggregate for its source row count.
    pub aggregate_alternative: Option<Box<CompiledSelect>>,
}

/// A SET value: a pre-converted literal or a per-row expression.
#[derive(Debug, Clone)]
pub enum UpdateValue {
    Literal(Value),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct CompiledUpdate {
    pub sql: String,
    pub entity_name: String,
    pub id_column: String,
    /// Target attribute name to the value producing its new content.
    pub updates: IndexMap<String, UpdateValue>,
    pub fetch: Fetch,
    /// Residual WHERE filtering applied before the rows are updated.
    pub extensions: Vec<QueryExtension>,
}

#[derive(Debug, Clone)]
pub struct CompiledDelete {
    pub sql: String,
    pub entity_name: String,
    /// One column for regular entities, the intersect pair for
    /// many-to-many rows.
    pub id_columns: Vec<String>,
    pub fetch: Fetch,
    /// Residual WHERE filtering applied before the rows are deleted.
    pub extensions: Vec<QueryExtension>,
}

#[derive(Debug, Clone)]
pub enum InsertCell {
    Literal(Value),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum CompiledInsertSource {
    Rows(Vec<Vec<InsertCell>>),
    /// A compiled source query; columns map positionally onto the
    /// insert's target attributes.
    Select(Box<CompiledSelect>),
}

#[derive(Debug, Clone)]
pub struct CompiledInsert {
    pub sql: String,
    pub entity_name: String,
    pub columns: Vec<String>,
    pub source: CompiledInsertSource,
}

#[derive(Debug, Clone)]
pub enum CompiledQuery {
    Select(CompiledSelect),
    Update(CompiledUpdate),
    Delete(CompiledDelete),
    Insert(CompiledInsert),
}

impl CompiledQuery {
    /// The original statement text, always available for the raw-SQL
    /// fallback endpoint.
    pub fn sql(&self) -> &str {
        match self {
            CompiledQuery::Select(q) => &q.sql,
            CompiledQuery::Update(q) => &q.sql,
            CompiledQuery::Delete(q) => &q.sql,
            CompiledQuery::Insert(q) => &q.sql,
        }
    }
}

/// Decides whether an execution error is the platform's aggregate
/// row-limit rejection, which triggers the alternative plan. The
/// runtime may supply its own implementation.
pub trait AggregateLimitClassifier {
    fn is_aggregate_limit(&self, message: &str) -> bool;
}

/// Default classifier: the platform signals the limit with a
/// distinctive fault name in the message text.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageSubstringClassifier;

impl AggregateLimitClassifier for MessageSubstringClassifier {
    fn is_aggregate_limit(&self, message: &str) -> bool {
        message.contains("AggregateQueryRecordLimit")
    }
}

/// Compiler configuration.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Honor `"quoted"` identifiers in the SQL text.
    pub quoted_identifiers: bool,
    /// When set, a query the compiler cannot lower is carried as raw
    /// SQL instead of failing, for execution against the T-SQL endpoint.
    pub tsql_endpoint_available: bool,
    /// Compile aggregates through the expression path even when a
    /// native form exists. Set when building the aggregate alternative.
    pub(crate) force_aggregate_expression: bool,
}

use async_trait::async_trait;
use crate::engine::dialect::Dialect;
use crate::metadata::record::EntityRecord;
use crate::utils::{
    error::ExecutionError,
    types::{QueryResult, Value},
};

/// Capabilities reported by an execution context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextCapabilities {
    /// Independent reads may be in flight at the same time
    pub supports_concurrent_reads: bool,
    pub supports_cancellation: bool,
    pub max_concurrent_queries: Option<u32>,
}

impl Default for ContextCapabilities {
    fn default() -> Self {
        Self {
            supports_concurrent_reads: false,
            supports_cancellation: false,
            max_concurrent_queries: Some(1),
        }
    }
}

/// Capability object the engine executes compiled statements through
///
/// Rows are fully materialized inside `execute`, so statements, cursors and
/// pooled connections are released before the call returns.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Run one statement with positional parameters and return all of its rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ExecutionError>;

    /// Run parameterless statements separated by semicolons, e.g. DDL
    async fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError>;

    /// Dialect statements must be compiled for
    fn dialect(&self) -> Dialect;

    /// Short name used in logs
    fn context_type(&self) -> &'static str;

    fn get_capabilities(&self) -> ContextCapabilities;

    fn supports_concurrent_reads(&self) -> bool {
        self.get_capabilities().supports_concurrent_reads
    }

    /// Whether `association` on `record` was materialized without a further query
    fn is_association_loaded(&self, record: &EntityRecord, association: &str) -> bool {
        record.is_loaded(association)
    }
}

use async_trait::async_trait;
use rusqlite::{
    types::{Type, Value as SqliteValue},
    Connection, ErrorCode, InterruptHandle,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use crate::connectors::context_trait::{ContextCapabilities, ExecutionContext};
use crate::engine::dialect::Dialect;
use crate::utils::{
    config::SqliteConfig,
    error::ExecutionError,
    types::{ColumnMetadata, QueryResult, Row, Value},
};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// SQLite execution context over a single shared connection
///
/// Statements run on the blocking pool; the connection mutex serializes them,
/// so the context does not report concurrent reads.
#[derive(Clone)]
pub struct SqliteContext {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteContext {
    /// Open a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            ExecutionError::ConnectionFailed(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, ExecutionError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ExecutionError::ConnectionFailed(e.to_string()))?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn from_config(config: &SqliteConfig) -> Result<Self, ExecutionError> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let conn = match &config.path {
            Some(path) => Connection::open(path)
                .map_err(|e| ExecutionError::ConnectionFailed(format!("{}: {}", path, e)))?,
            None => Connection::open_in_memory()
                .map_err(|e| ExecutionError::ConnectionFailed(e.to_string()))?,
        };
        Self::from_connection(conn, busy_timeout)
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, ExecutionError> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| ExecutionError::ConnectionFailed(e.to_string()))?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }

    /// Interrupt the statement currently running, if any
    pub fn cancel(&self) {
        self.interrupt.interrupt();
    }

    async fn with_connection<T, F>(&self, sql: &str, work: F) -> Result<T, ExecutionError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let statement = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ExecutionError::ConnectionFailed("sqlite connection lock poisoned".to_string()))?;
            work(&*conn).map_err(|e| map_error(&statement, e))
        })
        .await
        .map_err(|e| ExecutionError::Cancelled(format!("sqlite worker failed: {}", e)))?
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Integer(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Boolean(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Null => SqliteValue::Null,
    }
}

/// Blobs are accepted only when they hold UTF-8 text
fn from_sqlite(index: usize, value: SqliteValue) -> rusqlite::Result<Value> {
    Ok(match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Integer(i),
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(bytes) => Value::Text(String::from_utf8(bytes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Blob, Box::new(e))
        })?),
    })
}

fn map_error(sql: &str, error: rusqlite::Error) -> ExecutionError {
    if let rusqlite::Error::FromSqlConversionFailure(index, _, cause) = &error {
        return ExecutionError::Mapping(format!("column {}: {} (sql: {})", index, cause, sql));
    }
    match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            ExecutionError::Timeout(format!("{} (sql: {})", error, sql))
        }
        Some(ErrorCode::OperationInterrupted) => {
            ExecutionError::Cancelled(format!("{} (sql: {})", error, sql))
        }
        _ => ExecutionError::StatementFailed {
            sql: sql.to_string(),
            message: error.to_string(),
        },
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &[SqliteValue]) -> rusqlite::Result<QueryResult> {
    let start = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<ColumnMetadata> = stmt
        .column_names()
        .into_iter()
        .map(|name| ColumnMetadata {
            name: name.to_string(),
            data_type: None,
            nullable: true,
        })
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(from_sqlite(index, row.get::<_, SqliteValue>(index)?)?);
        }
        rows.push(Row::new(values));
    }

    Ok(QueryResult {
        columns,
        rows,
        affected_rows: Some(conn.changes() as u64),
        execution_time: start.elapsed(),
    })
}

#[async_trait]
impl ExecutionContext for SqliteContext {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ExecutionError> {
        let statement = sql.to_string();
        let params: Vec<SqliteValue> = params.iter().map(to_sqlite).collect();
        let result = self
            .with_connection(sql, move |conn| run_statement(conn, &statement, &params))
            .await?;
        debug!(rows = result.row_count(), elapsed = ?result.execution_time, "sqlite statement finished");
        Ok(result)
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        let batch = sql.to_string();
        self.with_connection(sql, move |conn| conn.execute_batch(&batch)).await
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn context_type(&self) -> &'static str {
        "sqlite"
    }

    fn get_capabilities(&self) -> ContextCapabilities {
        ContextCapabilities {
            supports_concurrent_reads: false,
            supports_cancellation: true,
            max_concurrent_queries: Some(1),
        }
    }
}

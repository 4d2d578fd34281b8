use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, PoolConfig, PoolError, Runtime};
use std::time::{Duration, Instant};
use tokio_postgres::{
    error::SqlState,
    types::{ToSql, Type},
    NoTls, Row as PgRow,
};
use tracing::{debug, info};
use crate::connectors::context_trait::{ContextCapabilities, ExecutionContext};
use crate::engine::dialect::Dialect;
use crate::utils::{
    config::PostgresConfig,
    error::ExecutionError,
    types::{ColumnMetadata, DataType, QueryResult, Row, Value},
};

type PgParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL execution context backed by a deadpool connection pool
///
/// Each statement checks a client out of the pool and returns it on drop,
/// so independent statements may run on separate connections at once.
pub struct PostgresContext {
    pool: Pool,
    max_connections: u32,
}

impl PostgresContext {
    /// Build the pool and check that one connection can be established
    pub async fn connect(config: &PostgresConfig) -> Result<Self, ExecutionError> {
        let mut pg_config = Config::new();
        pg_config.host = Some(config.host.clone());
        pg_config.port = Some(config.port);
        pg_config.user = Some(config.user.clone());
        pg_config.password = Some(config.password.clone());
        pg_config.dbname = Some(config.dbname.clone());
        pg_config.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        if let Some(timeout_ms) = config.statement_timeout_ms {
            pg_config.options = Some(format!("-c statement_timeout={}", timeout_ms));
        }
        pg_config.pool = Some(PoolConfig::new(config.max_connections as usize));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ExecutionError::ConnectionFailed(format!("Failed to create pool: {}", e)))?;

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let _client = tokio::time::timeout(timeout, pool.get())
            .await
            .map_err(|_| ExecutionError::Timeout("Connection timeout".to_string()))?
            .map_err(map_pool_error)?;

        info!(host = %config.host, dbname = %config.dbname, "postgres pool ready");
        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    async fn client(&self) -> Result<deadpool_postgres::Client, ExecutionError> {
        self.pool.get().await.map_err(map_pool_error)
    }
}

fn map_pool_error(error: PoolError) -> ExecutionError {
    match error {
        PoolError::Timeout(kind) => ExecutionError::Timeout(format!("pool checkout timed out ({:?})", kind)),
        other => ExecutionError::ConnectionFailed(format!("Failed to get connection from pool: {}", other)),
    }
}

fn map_error(sql: &str, error: tokio_postgres::Error) -> ExecutionError {
    match error.code() {
        Some(code) if *code == SqlState::QUERY_CANCELED => {
            let message = error
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| error.to_string());
            if message.contains("statement timeout") {
                ExecutionError::Timeout(format!("{} (sql: {})", message, sql))
            } else {
                ExecutionError::Cancelled(format!("{} (sql: {})", message, sql))
            }
        }
        _ => ExecutionError::StatementFailed {
            sql: sql.to_string(),
            message: error
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| error.to_string()),
        },
    }
}

/// Bind `value` as the Rust type the server expects for a parameter of type `ty`
fn to_param(value: &Value, ty: &Type) -> Result<PgParam, ExecutionError> {
    let mismatch = || ExecutionError::Mapping(format!("cannot bind {} as {}", value, ty));
    Ok(match value {
        Value::Null => null_param(ty),
        Value::Integer(i) if *ty == Type::INT2 => Box::new(i16::try_from(*i).map_err(|_| mismatch())?),
        Value::Integer(i) if *ty == Type::INT4 => Box::new(i32::try_from(*i).map_err(|_| mismatch())?),
        Value::Integer(i) if *ty == Type::FLOAT8 => Box::new(*i as f64),
        Value::Integer(i) if *ty == Type::TEXT || *ty == Type::VARCHAR => Box::new(i.to_string()),
        Value::Integer(i) => Box::new(*i),
        Value::Float(f) if *ty == Type::FLOAT4 => Box::new(*f as f32),
        Value::Float(f) => Box::new(*f),
        Value::Text(s) => Box::new(s.clone()),
        Value::Boolean(b) => Box::new(*b),
    })
}

fn null_param(ty: &Type) -> PgParam {
    if *ty == Type::INT8 {
        Box::new(None::<i64>)
    } else if *ty == Type::INT4 {
        Box::new(None::<i32>)
    } else if *ty == Type::INT2 {
        Box::new(None::<i16>)
    } else if *ty == Type::FLOAT8 {
        Box::new(None::<f64>)
    } else if *ty == Type::FLOAT4 {
        Box::new(None::<f32>)
    } else if *ty == Type::BOOL {
        Box::new(None::<bool>)
    } else {
        Box::new(None::<String>)
    }
}

fn data_type_of(ty: &Type) -> Option<DataType> {
    if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        Some(DataType::Integer)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        Some(DataType::Float)
    } else if *ty == Type::BOOL {
        Some(DataType::Boolean)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        Some(DataType::Text)
    } else {
        None
    }
}

fn convert_value(row: &PgRow, index: usize) -> Result<Value, ExecutionError> {
    let ty = row.columns()[index].type_();
    let failed = |e: tokio_postgres::Error| {
        ExecutionError::Mapping(format!("Failed to read column {} ({}): {}", index, ty, e))
    };

    let value = if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map_err(failed)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index).map_err(failed)?.map(i64::from).into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index).map_err(failed)?.map(i64::from).into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index).map_err(failed)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index).map_err(failed)?.map(f64::from).into()
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index).map_err(failed)?.into()
    } else {
        row.try_get::<_, Option<String>>(index).map_err(failed)?.into()
    };
    Ok(value)
}

#[async_trait]
impl ExecutionContext for PostgresContext {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ExecutionError> {
        let start = Instant::now();
        let client = self.client().await?;
        let statement = client.prepare_cached(sql).await.map_err(|e| map_error(sql, e))?;

        let bound = params
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| to_param(value, ty))
            .collect::<Result<Vec<PgParam>, _>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pg_rows = client.query(&statement, &refs).await.map_err(|e| map_error(sql, e))?;

        let columns = statement
            .columns()
            .iter()
            .map(|column| ColumnMetadata {
                name: column.name().to_string(),
                data_type: data_type_of(column.type_()),
                nullable: true,
            })
            .collect();

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let values = (0..pg_row.len())
                .map(|index| convert_value(pg_row, index))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(Row::new(values));
        }

        let execution_time = start.elapsed();
        debug!(rows = rows.len(), elapsed = ?execution_time, "postgres statement finished");
        Ok(QueryResult {
            columns,
            affected_rows: Some(rows.len() as u64),
            rows,
            execution_time,
        })
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        let client = self.client().await?;
        client.batch_execute(sql).await.map_err(|e| map_error(sql, e))
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn context_type(&self) -> &'static str {
        "postgres"
    }

    fn get_capabilities(&self) -> ContextCapabilities {
        ContextCapabilities {
            supports_concurrent_reads: self.max_connections > 1,
            supports_cancellation: false,
            max_concurrent_queries: Some(self.max_connections),
        }
    }
}

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use crate::connectors::context_trait::{ContextCapabilities, ExecutionContext};
use crate::engine::dialect::Dialect;
use crate::metadata::record::EntityRecord;
use crate::utils::{
    error::ExecutionError,
    types::{QueryResult, Value},
};

/// Context wrapper that keeps the text of every statement it forwards
///
/// Used to observe round trips, e.g. that a fetch join needs one statement
/// and a deferred load a second.
pub struct RecordingContext {
    inner: Arc<dyn ExecutionContext>,
    statements: Mutex<Vec<String>>,
}

impl RecordingContext {
    pub fn new(inner: Arc<dyn ExecutionContext>) -> Self {
        Self {
            inner,
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log().clone()
    }

    pub fn statement_count(&self) -> usize {
        self.log().len()
    }

    pub fn clear(&self) {
        self.log().clear();
    }

    fn record(&self, sql: &str) {
        self.log().push(sql.to_string());
    }

    // a panic elsewhere leaves the log itself intact
    fn log(&self) -> MutexGuard<'_, Vec<String>> {
        self.statements.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExecutionContext for RecordingContext {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, ExecutionError> {
        self.record(sql);
        self.inner.execute(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        self.record(sql);
        self.inner.execute_batch(sql).await
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn context_type(&self) -> &'static str {
        "recording"
    }

    fn get_capabilities(&self) -> ContextCapabilities {
        self.inner.get_capabilities()
    }

    fn is_association_loaded(&self, record: &EntityRecord, association: &str) -> bool {
        self.inner.is_association_loaded(record, association)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::SqliteContext;

    #[tokio::test]
    async fn test_statements_are_recorded_in_order() {
        let sqlite = Arc::new(SqliteContext::open_in_memory().unwrap());
        let recording = RecordingContext::new(sqlite);

        recording.execute_batch("CREATE TABLE t (x INTEGER)").await.unwrap();
        recording.execute("SELECT x FROM t", &[]).await.unwrap();

        assert_eq!(recording.statements(), vec!["CREATE TABLE t (x INTEGER)", "SELECT x FROM t"]);
        assert_eq!(recording.dialect(), Dialect::Sqlite);

        recording.clear();
        assert_eq!(recording.statement_count(), 0);
    }

    #[tokio::test]
    async fn test_recording_survives_poisoned_lock() {
        let sqlite = Arc::new(SqliteContext::open_in_memory().unwrap());
        let recording = Arc::new(RecordingContext::new(sqlite));
        recording.execute("SELECT 1", &[]).await.unwrap();

        let holder = recording.clone();
        let poisoned = std::thread::spawn(move || {
            let _guard = holder.statements.lock().unwrap();
            panic!("worker failed while holding the log");
        })
        .join();
        assert!(poisoned.is_err());
        assert!(recording.statements.is_poisoned());

        recording.execute("SELECT 2", &[]).await.unwrap();
        assert_eq!(recording.statements(), vec!["SELECT 1", "SELECT 2"]);
    }
}

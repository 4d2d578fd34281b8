use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::{
    connectors::ExecutionContext,
    engine::{
        query_builder::QueryFactory,
        query_compiler::{CompiledQuery, QueryCompiler},
        query_executor::{DefaultQueryExecutor, QueryExecutor},
        query_spec::QuerySpec,
        result_mapper::Tuple,
    },
    metadata::{record::EntityRecord, registry::MetadataRegistry},
    utils::{
        config::SessionConfig,
        error::{ExecutionError, MetadataError, RelqResult},
    },
};

struct SessionInner {
    context: Arc<dyn ExecutionContext>,
    registry: Arc<MetadataRegistry>,
    compiler: QueryCompiler,
    executor: Arc<dyn QueryExecutor>,
    config: SessionConfig,
    closed: AtomicBool,
}

/// Unit of work binding metadata, a compiler and an execution context
///
/// Cloning is cheap and yields a handle to the same session. Records
/// returned by a session are plain values and stay readable after it is
/// closed or dropped; only unloaded associations need the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session with default settings
    pub fn new(registry: Arc<MetadataRegistry>, context: Arc<dyn ExecutionContext>) -> Self {
        Self::with_config(registry, context, SessionConfig::default())
    }

    pub fn with_config(
        registry: Arc<MetadataRegistry>,
        context: Arc<dyn ExecutionContext>,
        config: SessionConfig,
    ) -> Self {
        let compiler = QueryCompiler::new(registry.clone(), context.dialect());
        let executor = Arc::new(DefaultQueryExecutor::new(
            context.clone(),
            compiler.clone(),
            config.clone(),
        ));
        Self::assemble(registry, context, config, compiler, executor)
    }

    /// Open a session with a custom executor
    pub fn with_executor(
        registry: Arc<MetadataRegistry>,
        context: Arc<dyn ExecutionContext>,
        config: SessionConfig,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let compiler = QueryCompiler::new(registry.clone(), context.dialect());
        Self::assemble(registry, context, config, compiler, executor)
    }

    fn assemble(
        registry: Arc<MetadataRegistry>,
        context: Arc<dyn ExecutionContext>,
        config: SessionConfig,
        compiler: QueryCompiler,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        info!(
            context = context.context_type(),
            dialect = %context.dialect(),
            "session opened"
        );
        Self {
            inner: Arc::new(SessionInner {
                context,
                registry,
                compiler,
                executor,
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Entry point of the query builder
    pub fn query(&self) -> QueryFactory {
        QueryFactory::new(self.clone())
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.inner.registry
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.inner.compiler
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.inner.context
    }

    pub fn compile(&self, spec: &QuerySpec) -> RelqResult<CompiledQuery> {
        Ok(self.inner.compiler.compile(spec)?)
    }

    fn ensure_open(&self) -> Result<(), ExecutionError> {
        if self.is_closed() {
            Err(ExecutionError::SessionClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) async fn fetch_rows(&self, spec: &QuerySpec) -> RelqResult<Vec<Tuple>> {
        self.ensure_open()?;
        self.inner.executor.fetch_rows(spec).await
    }

    pub(crate) async fn fetch_page(&self, spec: &QuerySpec) -> RelqResult<(Vec<Tuple>, i64)> {
        self.ensure_open()?;
        self.inner.executor.fetch_page(spec).await
    }

    pub(crate) async fn count(&self, spec: &QuerySpec) -> RelqResult<i64> {
        self.ensure_open()?;
        self.inner.executor.count(spec).await
    }

    /// Create the tables of every registered entity if they do not exist
    pub async fn create_schema(&self) -> RelqResult<()> {
        self.ensure_open()?;
        let statements = self
            .inner
            .registry
            .create_table_statements(self.inner.context.dialect());
        debug!(tables = statements.len(), "creating schema");
        self.inner.context.execute_batch(&statements.join(";\n")).await?;
        Ok(())
    }

    /// Insert a transient record and assign the generated key to it
    ///
    /// Dialects without `RETURNING` need the key to be set beforehand.
    pub async fn persist(&self, record: &mut EntityRecord) -> RelqResult<()> {
        self.ensure_open()?;
        let compiled = self.inner.compiler.compile_insert(record)?;
        if compiled.layout.items.is_empty() && record.id().is_null() {
            return Err(MetadataError::MissingIdentifier {
                entity: record.entity().to_string(),
            }
            .into());
        }

        let result = self.inner.context.execute(&compiled.sql, &compiled.params).await?;
        if let Some(id) = result.rows.first().and_then(|row| row.get(0)) {
            record.set_id(id.clone());
        }
        debug!(entity = %record.entity(), id = %record.id(), "persisted record");
        Ok(())
    }

    /// Resolve an unloaded association with a second query
    ///
    /// Already loaded associations are left as they are.
    pub async fn load_association(&self, record: &mut EntityRecord, association: &str) -> RelqResult<()> {
        if record.is_loaded(association) {
            return Ok(());
        }

        let refusal = if self.is_closed() {
            Some("session is closed")
        } else if !self.inner.config.allow_deferred_loading {
            Some("session forbids deferred loading")
        } else {
            None
        };
        if let Some(reason) = refusal {
            warn!(entity = %record.entity(), association, reason, "refusing deferred load");
            return Err(ExecutionError::DeferredLoadingForbidden {
                entity: record.entity().to_string(),
                association: association.to_string(),
                reason: reason.to_string(),
            }
            .into());
        }

        self.inner.executor.load_association(record, association).await
    }

    /// Whether `association` on `record` is materialized, as judged by the context
    pub fn is_association_loaded(&self, record: &EntityRecord, association: &str) -> bool {
        self.inner.context.is_association_loaded(record, association)
    }

    /// Refuse further statements; already returned records stay usable
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!(context = self.inner.context.context_type(), "session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.inner.context.context_type())
            .field("dialect", &self.inner.context.dialect())
            .field("closed", &self.is_closed())
            .finish()
    }
}

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};
use crate::{
    connectors::ExecutionContext,
    engine::{
        query_compiler::QueryCompiler,
        query_spec::{JoinClause, JoinKind, QuerySpec},
        result_mapper::{Cell, FromResultRow, ResultMapper, Tuple},
    },
    expr::{
        expression::Expr,
        order::{Direction, OrderSpecifier},
        path::EntityPath,
        projection::Projection,
    },
    metadata::{
        entity::{Cardinality, FetchStrategy},
        record::{AssociationHandle, EntityRecord, LoadedAssociation},
    },
    utils::{
        config::SessionConfig,
        error::{ExecutionError, RelqResult},
        types::Value,
    },
};

/// Executes query specs and returns decoded rows
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run the row query of `spec`
    async fn fetch_rows(&self, spec: &QuerySpec) -> RelqResult<Vec<Tuple>>;

    /// Run the row query and the COUNT variant; returns the page and the total
    async fn fetch_page(&self, spec: &QuerySpec) -> RelqResult<(Vec<Tuple>, i64)>;

    /// Run only the COUNT variant
    async fn count(&self, spec: &QuerySpec) -> RelqResult<i64>;

    /// Resolve an unloaded association of `record` with a second query
    async fn load_association(&self, record: &mut EntityRecord, association: &str) -> RelqResult<()>;
}

/// Default implementation of QueryExecutor
pub struct DefaultQueryExecutor {
    context: Arc<dyn ExecutionContext>,
    compiler: QueryCompiler,
    mapper: ResultMapper,
    config: SessionConfig,
}

const LOOKUP_ALIAS: &str = "lookup";
const OWNER_ALIAS: &str = "lookup_owner";

impl DefaultQueryExecutor {
    pub fn new(context: Arc<dyn ExecutionContext>, compiler: QueryCompiler, config: SessionConfig) -> Self {
        let mapper = ResultMapper::new(compiler.registry().clone());
        Self {
            context,
            compiler,
            mapper,
            config,
        }
    }

    /// Compile, execute and decode without resolving eager associations
    async fn fetch_raw(&self, spec: &QuerySpec) -> RelqResult<Vec<Tuple>> {
        let compiled = self.compiler.compile(spec)?;
        let result = self.context.execute(&compiled.sql, &compiled.params).await?;
        trace!(rows = result.row_count(), elapsed = ?result.execution_time, "fetched rows");

        let projections = Arc::new(spec.projections.clone());
        Ok(self.mapper.map_rows(&result, &compiled.layout, projections)?)
    }

    /// Query selecting `target` entities by key
    ///
    /// Without `via` the keys are the target's primary keys. With
    /// `via = (mapped_by, owner_entity)` the keys are owner ids reached through
    /// the target's to-one association `mapped_by`.
    fn lookup_spec(&self, target: &str, via: Option<(&str, &str)>, keys: Vec<Value>) -> QuerySpec {
        let lookup = EntityPath::new(target, LOOKUP_ALIAS);
        let mut spec = QuerySpec::with_projections(vec![Projection::from(&lookup)]);
        spec.roots.push(lookup.clone());

        let key_expr = match via {
            Some((mapped_by, owner_entity)) => {
                let owner = EntityPath::new(owner_entity, OWNER_ALIAS);
                spec.joins.push(JoinClause::association(
                    JoinKind::Inner,
                    lookup.association(mapped_by),
                    owner.clone(),
                ));
                owner.as_expr()
            }
            None => lookup.as_expr(),
        };

        spec.add_filter(Expr::InList {
            expr: Box::new(key_expr),
            list: keys.into_iter().map(Expr::Literal).collect(),
            negated: false,
        });
        spec.order_by.push(OrderSpecifier::new(lookup.as_expr(), Direction::Asc));
        spec
    }

    /// Load associations declared eager on projected entities with one batched query each
    async fn resolve_eager(&self, rows: &mut [Tuple]) -> RelqResult<()> {
        let registry = self.compiler.registry().clone();

        // (entity, association) -> keys still unloaded
        let mut pending: BTreeMap<(String, String), Vec<Value>> = BTreeMap::new();
        for record in rows.iter().flat_map(projected_records) {
            let Some(meta) = registry.get(record.entity()) else {
                continue;
            };
            for association in meta.associations.iter().filter(|a| a.fetch == FetchStrategy::Eager) {
                if let Some(AssociationHandle::Unloaded { key, .. }) = record.association(&association.name) {
                    let keys = pending
                        .entry((meta.name.clone(), association.name.clone()))
                        .or_default();
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }

        for ((entity, name), keys) in pending {
            let association = registry.association(&entity, &name)?.clone();
            debug!(entity = %entity, association = %name, keys = keys.len(), "resolving eager association");

            let via = association.mapped_by.as_deref().map(|m| (m, entity.as_str()));
            let spec = self.lookup_spec(&association.target, via, keys);
            let loaded: Vec<EntityRecord> = self
                .fetch_raw(&spec)
                .await?
                .into_iter()
                .filter_map(|tuple| match tuple.into_cells().into_iter().next() {
                    Some(Cell::Entity(record)) => record,
                    _ => None,
                })
                .collect();

            for tuple in rows.iter_mut() {
                for record in projected_records_mut(tuple) {
                    if record.entity() != entity {
                        continue;
                    }
                    let key = match record.association(&name) {
                        Some(AssociationHandle::Unloaded { key, .. }) => key.clone(),
                        _ => continue,
                    };
                    let handle = match association.cardinality {
                        Cardinality::ToOne => LoadedAssociation::One(
                            loaded.iter().find(|r| r.id() == &key).cloned().map(Box::new),
                        ),
                        Cardinality::ToMany => {
                            let mapped_by = association.mapped_by.clone().unwrap_or_default();
                            LoadedAssociation::Many(
                                loaded
                                    .iter()
                                    .filter(|r| r.association_key(&mapped_by) == key)
                                    .cloned()
                                    .collect(),
                            )
                        }
                    };
                    record.set_association(name.clone(), AssociationHandle::Loaded(handle));
                }
            }
        }

        Ok(())
    }
}

fn projected_records(tuple: &Tuple) -> impl Iterator<Item = &EntityRecord> {
    tuple.cells().iter().filter_map(|cell| match cell {
        Cell::Entity(Some(record)) => Some(record),
        _ => None,
    })
}

fn projected_records_mut(tuple: &mut Tuple) -> Vec<&mut EntityRecord> {
    tuple
        .cells_mut()
        .iter_mut()
        .filter_map(|cell| match cell {
            Cell::Entity(Some(record)) => Some(record),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl QueryExecutor for DefaultQueryExecutor {
    async fn fetch_rows(&self, spec: &QuerySpec) -> RelqResult<Vec<Tuple>> {
        let mut rows = self.fetch_raw(spec).await?;
        if self.config.resolve_eager_associations {
            self.resolve_eager(&mut rows).await?;
        }
        Ok(rows)
    }

    async fn fetch_page(&self, spec: &QuerySpec) -> RelqResult<(Vec<Tuple>, i64)> {
        if self.config.concurrent_count_query && self.context.supports_concurrent_reads() {
            trace!("running page and count queries concurrently");
            let (rows, total) = tokio::join!(self.fetch_rows(spec), self.count(spec));
            Ok((rows?, total?))
        } else {
            let rows = self.fetch_rows(spec).await?;
            let total = self.count(spec).await?;
            Ok((rows, total))
        }
    }

    async fn count(&self, spec: &QuerySpec) -> RelqResult<i64> {
        let compiled = self.compiler.compile_count(spec)?;
        let result = self.context.execute(&compiled.sql, &compiled.params).await?;

        let total = result
            .rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| ExecutionError::Mapping("count query returned no value".to_string()))?;
        trace!(total, "counted rows");
        Ok(total)
    }

    async fn load_association(&self, record: &mut EntityRecord, association: &str) -> RelqResult<()> {
        let meta = self
            .compiler
            .registry()
            .association(record.entity(), association)?
            .clone();

        let handle = match meta.cardinality {
            Cardinality::ToOne => {
                let key = record.association_key(association);
                if key.is_null() {
                    LoadedAssociation::One(None)
                } else {
                    let spec = self.lookup_spec(&meta.target, None, vec![key]);
                    let target = self
                        .fetch_rows(&spec)
                        .await?
                        .into_iter()
                        .next()
                        .map(EntityRecord::from_row)
                        .transpose()?;
                    LoadedAssociation::One(target.map(Box::new))
                }
            }
            Cardinality::ToMany => {
                let mapped_by = meta.mapped_by.clone().unwrap_or_default();
                let owner = record.entity().to_string();
                let spec = self.lookup_spec(
                    &meta.target,
                    Some((mapped_by.as_str(), owner.as_str())),
                    vec![record.id().clone()],
                );
                let targets = self
                    .fetch_rows(&spec)
                    .await?
                    .into_iter()
                    .map(EntityRecord::from_row)
                    .collect::<Result<Vec<_>, _>>()?;
                LoadedAssociation::Many(targets)
            }
        };

        debug!(entity = %record.entity(), association, "loaded association");
        record.set_association(association, AssociationHandle::Loaded(handle));
        Ok(())
    }
}

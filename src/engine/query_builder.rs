use std::marker::PhantomData;
use crate::{
    engine::{
        query_compiler::CompiledQuery,
        query_spec::{JoinClause, JoinKind, QuerySpec},
        result_mapper::{FromResultRow, Tuple},
        session::Session,
    },
    expr::{
        expression::{Expr, Expression, IntoExpression, LogicalOp},
        kinds::{Bool, SqlKind},
        order::OrderSpecifier,
        path::{AssociationPath, EntityPath},
        projection::{IntoProjections, Projection},
    },
    metadata::record::EntityRecord,
    utils::error::{BuilderError, RelqError, RelqResult},
};

/// Entities accepted by `from`: one path or a tuple of paths
pub trait IntoRoots {
    fn into_roots(self) -> Vec<EntityPath>;
}

impl<P: AsRef<EntityPath>> IntoRoots for &P {
    fn into_roots(self) -> Vec<EntityPath> {
        vec![self.as_ref().clone()]
    }
}

impl IntoRoots for Vec<EntityPath> {
    fn into_roots(self) -> Vec<EntityPath> {
        self
    }
}

impl<A: AsRef<EntityPath>, B: AsRef<EntityPath>> IntoRoots for (&A, &B) {
    fn into_roots(self) -> Vec<EntityPath> {
        vec![self.0.as_ref().clone(), self.1.as_ref().clone()]
    }
}

impl<A: AsRef<EntityPath>, B: AsRef<EntityPath>, C: AsRef<EntityPath>> IntoRoots for (&A, &B, &C) {
    fn into_roots(self) -> Vec<EntityPath> {
        vec![
            self.0.as_ref().clone(),
            self.1.as_ref().clone(),
            self.2.as_ref().clone(),
        ]
    }
}

/// Order keys accepted by `order_by`
pub trait IntoOrderSpecifiers {
    fn into_order_specifiers(self) -> Vec<OrderSpecifier>;
}

impl IntoOrderSpecifiers for OrderSpecifier {
    fn into_order_specifiers(self) -> Vec<OrderSpecifier> {
        vec![self]
    }
}

impl IntoOrderSpecifiers for Vec<OrderSpecifier> {
    fn into_order_specifiers(self) -> Vec<OrderSpecifier> {
        self
    }
}

impl<const N: usize> IntoOrderSpecifiers for [OrderSpecifier; N] {
    fn into_order_specifiers(self) -> Vec<OrderSpecifier> {
        self.into_iter().collect()
    }
}

/// Starting point of typed queries bound to a session
#[derive(Debug, Clone)]
pub struct QueryFactory {
    session: Session,
}

impl QueryFactory {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Query returning `projections`; the row type is chosen by the caller
    pub fn select<R: FromResultRow>(&self, projections: impl IntoProjections) -> Query<R> {
        Query::new(
            self.session.clone(),
            QuerySpec::with_projections(projections.into_projections()),
        )
    }

    /// Query returning whole entities of `root`, which is also the FROM root
    pub fn select_from(&self, root: &impl AsRef<EntityPath>) -> Query<EntityRecord> {
        let root = root.as_ref();
        let mut spec = QuerySpec::with_projections(vec![Projection::from(root)]);
        spec.roots.push(root.clone());
        Query::new(self.session.clone(), spec)
    }
}

/// Page of results with the total the unpaged query would return
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResults<R> {
    pub results: Vec<R>,
    pub total: i64,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl<R> QueryResults<R> {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Typed, immutable query under construction
///
/// Builder methods consume the query and return the extended one; clone to
/// branch. Terminal methods borrow it and may be called repeatedly.
pub struct Query<R> {
    spec: QuerySpec,
    session: Session,
    row: PhantomData<fn() -> R>,
}

impl<R> Clone for Query<R> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            session: self.session.clone(),
            row: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Query<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("spec", &self.spec).finish()
    }
}

impl<R: FromResultRow> Query<R> {
    fn new(session: Session, spec: QuerySpec) -> Self {
        Self {
            spec,
            session,
            row: PhantomData,
        }
    }

    /// Same query decoded into another row type
    pub fn into_rows<S: FromResultRow>(self) -> Query<S> {
        Query::new(self.session, self.spec)
    }

    pub fn from(mut self, roots: impl IntoRoots) -> Self {
        self.spec.roots.extend(roots.into_roots());
        self
    }

    fn push_join(mut self, kind: JoinKind, association: AssociationPath, target: &EntityPath) -> Self {
        self.spec
            .joins
            .push(JoinClause::association(kind, association, target.clone()));
        self
    }

    fn push_entity_join(mut self, kind: JoinKind, target: &EntityPath) -> Self {
        self.spec.joins.push(JoinClause::entity(kind, target.clone()));
        self
    }

    /// Inner join along `association`, binding the target to `target`'s alias
    pub fn join(self, association: AssociationPath, target: &impl AsRef<EntityPath>) -> Self {
        self.push_join(JoinKind::Inner, association, target.as_ref())
    }

    pub fn left_join(self, association: AssociationPath, target: &impl AsRef<EntityPath>) -> Self {
        self.push_join(JoinKind::Left, association, target.as_ref())
    }

    pub fn right_join(self, association: AssociationPath, target: &impl AsRef<EntityPath>) -> Self {
        self.push_join(JoinKind::Right, association, target.as_ref())
    }

    /// Join an unrelated entity; the following `on` supplies the whole condition
    pub fn join_entity(self, target: &impl AsRef<EntityPath>) -> Self {
        self.push_entity_join(JoinKind::Inner, target.as_ref())
    }

    pub fn left_join_entity(self, target: &impl AsRef<EntityPath>) -> Self {
        self.push_entity_join(JoinKind::Left, target.as_ref())
    }

    pub fn right_join_entity(self, target: &impl AsRef<EntityPath>) -> Self {
        self.push_entity_join(JoinKind::Right, target.as_ref())
    }

    /// Add a condition to the most recent join, evaluated during the join
    pub fn on(mut self, predicate: impl IntoExpression<Bool>) -> Result<Self, BuilderError> {
        let join = self
            .spec
            .joins
            .last_mut()
            .ok_or_else(|| BuilderError::NoJoinToModify("on".to_string()))?;
        let predicate = predicate.into_expression().into_expr();
        join.on = Some(match join.on.take() {
            Some(existing) => Expr::logical(LogicalOp::And, existing, predicate),
            None => predicate,
        });
        Ok(self)
    }

    /// Populate the most recent association join's target in the same round trip
    pub fn fetch_join(mut self) -> Result<Self, BuilderError> {
        let join = self
            .spec
            .joins
            .last_mut()
            .ok_or_else(|| BuilderError::NoJoinToModify("fetch_join".to_string()))?;
        if join.association.is_none() {
            return Err(BuilderError::FetchJoinWithoutAssociation(
                join.target.alias().to_string(),
            ));
        }
        join.fetch = true;
        Ok(self)
    }

    /// WHERE predicate; repeated calls are ANDed
    pub fn filter(mut self, predicate: impl IntoExpression<Bool>) -> Self {
        self.spec.add_filter(predicate.into_expression().into_expr());
        self
    }

    /// AND every predicate into WHERE
    pub fn filter_all<I>(mut self, predicates: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoExpression<Bool>,
    {
        for predicate in predicates {
            self.spec.add_filter(predicate.into_expression().into_expr());
        }
        self
    }

    pub fn group_by(mut self, keys: impl IntoProjections) -> Self {
        for key in keys.into_projections() {
            let expr = match key {
                Projection::Entity(path) => path.as_expr(),
                Projection::Expr(expr) => expr,
            };
            self.spec.group_by.push(expr);
        }
        self
    }

    pub fn having(mut self, predicate: impl IntoExpression<Bool>) -> Self {
        self.spec.add_having(predicate.into_expression().into_expr());
        self
    }

    pub fn order_by(mut self, order: impl IntoOrderSpecifiers) -> Self {
        self.spec.order_by.extend(order.into_order_specifiers());
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.spec.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.spec.distinct = true;
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// SQL and parameters of the row query
    pub fn compile(&self) -> RelqResult<CompiledQuery> {
        self.session.compile(&self.spec)
    }

    /// SQL and parameters of the COUNT query
    pub fn compile_count(&self) -> RelqResult<CompiledQuery> {
        Ok(self.session.compiler().compile_count(&self.spec)?)
    }

    fn decode(rows: Vec<Tuple>) -> RelqResult<Vec<R>> {
        rows.into_iter()
            .map(|row| R::from_row(row).map_err(RelqError::from))
            .collect()
    }

    /// All rows in query order
    pub async fn fetch(&self) -> RelqResult<Vec<R>> {
        Self::decode(self.session.fetch_rows(&self.spec).await?)
    }

    /// The only row, or `None`; more than one row is an error
    pub async fn fetch_one(&self) -> RelqResult<Option<R>> {
        let mut rows = self.session.fetch_rows(&self.spec).await?;
        if rows.len() > 1 {
            return Err(RelqError::TooManyResults { count: rows.len() });
        }
        rows.pop().map(R::from_row).transpose().map_err(RelqError::from)
    }

    /// First row under `LIMIT 1`; a smaller explicit limit is kept
    pub async fn fetch_first(&self) -> RelqResult<Option<R>> {
        let mut spec = self.spec.clone();
        spec.limit = Some(spec.limit.map_or(1, |limit| limit.min(1)));
        let rows = self.session.fetch_rows(&spec).await?;
        rows.into_iter()
            .next()
            .map(R::from_row)
            .transpose()
            .map_err(RelqError::from)
    }

    /// Requested page plus the total of the unpaged query
    pub async fn fetch_results(&self) -> RelqResult<QueryResults<R>> {
        let (rows, total) = self.session.fetch_page(&self.spec).await?;
        Ok(QueryResults {
            results: Self::decode(rows)?,
            total,
            limit: self.spec.limit,
            offset: self.spec.offset,
        })
    }

    /// Number of rows the query matches, ignoring paging
    pub async fn fetch_count(&self) -> RelqResult<i64> {
        self.session.count(&self.spec).await
    }
}

/// Nested query used in WHERE and SELECT, selecting one expression of kind `T`
///
/// Give it paths with their own aliases to range over a second copy of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery<T: SqlKind> {
    spec: QuerySpec,
    kind: PhantomData<T>,
}

impl<T: SqlKind> SubQuery<T> {
    pub fn select(projection: impl IntoExpression<T>) -> Self {
        let projection = Projection::Expr(projection.into_expression().into_expr());
        Self {
            spec: QuerySpec::with_projections(vec![projection]),
            kind: PhantomData,
        }
    }

    /// Wrap an existing spec; it must select exactly one expression
    pub fn from_spec(spec: QuerySpec) -> Result<Self, BuilderError> {
        match spec.projections.as_slice() {
            [Projection::Expr(_)] => Ok(Self {
                spec,
                kind: PhantomData,
            }),
            other => Err(BuilderError::SubqueryProjection(other.len())),
        }
    }

    pub fn from(mut self, roots: impl IntoRoots) -> Self {
        self.spec.roots.extend(roots.into_roots());
        self
    }

    pub fn join(mut self, association: AssociationPath, target: &impl AsRef<EntityPath>) -> Self {
        self.spec.joins.push(JoinClause::association(
            JoinKind::Inner,
            association,
            target.as_ref().clone(),
        ));
        self
    }

    pub fn filter(mut self, predicate: impl IntoExpression<Bool>) -> Self {
        self.spec.add_filter(predicate.into_expression().into_expr());
        self
    }

    pub fn group_by(mut self, keys: impl IntoProjections) -> Self {
        for key in keys.into_projections() {
            if let Projection::Expr(expr) = key {
                self.spec.group_by.push(expr);
            }
        }
        self
    }

    pub fn into_spec(self) -> QuerySpec {
        self.spec
    }
}

impl<T: SqlKind> IntoExpression<T> for SubQuery<T> {
    fn into_expression(self) -> Expression<T> {
        Expression::from_expr(Expr::Subquery(Box::new(self.spec)))
    }
}

impl<T: SqlKind> From<SubQuery<T>> for Projection {
    fn from(subquery: SubQuery<T>) -> Self {
        Projection::Expr(Expr::Subquery(Box::new(subquery.spec)))
    }
}

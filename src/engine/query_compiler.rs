use std::sync::Arc;
use sqlparser::parser::Parser;
use tracing::debug;
use crate::engine::dialect::Dialect;
use crate::engine::query_spec::{JoinClause, QuerySpec};
use crate::expr::expression::{AggregateFunc, BinaryOp, Expr, LogicalOp, UnaryOp, LIKE_ESCAPE};
use crate::expr::order::{Direction, NullHandling, OrderSpecifier};
use crate::expr::path::{AssociationPath, EntityPath};
use crate::expr::projection::Projection;
use crate::metadata::entity::{Cardinality, EntityMeta};
use crate::metadata::record::EntityRecord;
use crate::metadata::registry::MetadataRegistry;
use crate::utils::error::CompileError;
use crate::utils::types::{DataType, Value};

/// How one projection occupies the columns of a result row
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutItem {
    /// One column decoded into a `Value`
    Scalar { label: String },
    /// `width` columns decoded into an entity: key, fields, foreign keys
    Entity { alias: String, entity: String, width: usize },
}

impl LayoutItem {
    pub fn width(&self) -> usize {
        match self {
            LayoutItem::Scalar { .. } => 1,
            LayoutItem::Entity { width, .. } => *width,
        }
    }
}

/// Columns of a fetch-joined entity appended after the projections
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLayout {
    pub source_alias: String,
    pub association: String,
    pub alias: String,
    pub entity: String,
    pub to_many: bool,
    pub width: usize,
}

/// Column layout of compiled result rows
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowLayout {
    pub items: Vec<LayoutItem>,
    pub fetches: Vec<FetchLayout>,
}

impl RowLayout {
    pub fn scalar(label: impl Into<String>) -> Self {
        Self {
            items: vec![LayoutItem::Scalar { label: label.into() }],
            fetches: Vec::new(),
        }
    }

    /// Total number of columns in a row
    pub fn width(&self) -> usize {
        self.items.iter().map(LayoutItem::width).sum::<usize>()
            + self.fetches.iter().map(|f| f.width).sum::<usize>()
    }
}

/// Statement text, its positional parameters and the row layout to decode with
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub layout: RowLayout,
    pub dialect: Dialect,
}

impl CompiledQuery {
    /// Parse the statement with `sqlparser` for the target dialect
    pub fn verify(&self) -> Result<(), CompileError> {
        let dialect = self.dialect.parser_dialect();
        Parser::parse_sql(dialect.as_ref(), &self.sql)
            .map(|_| ())
            .map_err(|e| CompileError::InvalidSyntax(e.to_string()))
    }
}

/// Renders query specs into SQL for one dialect
///
/// Compilation is a pure function of the `QuerySpec`, the registry and the dialect:
/// the same inputs always produce byte-identical SQL and parameters.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    registry: Arc<MetadataRegistry>,
    dialect: Dialect,
}

impl QueryCompiler {
    pub fn new(registry: Arc<MetadataRegistry>, dialect: Dialect) -> Self {
        Self { registry, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Compile the row query
    pub fn compile(&self, spec: &QuerySpec) -> Result<CompiledQuery, CompileError> {
        let mut renderer = Renderer::new(self);
        let (sql, layout) = renderer.render_select(spec, None, SelectMode::Rows)?;
        Ok(self.finish(sql, renderer.params, layout))
    }

    /// Compile the COUNT variant used by `fetch_count` and `fetch_results`
    ///
    /// FROM, joins, WHERE, GROUP BY and HAVING are kept; ORDER BY, LIMIT,
    /// OFFSET and fetch flags are dropped. Grouped or distinct queries count
    /// their rows through a derived table.
    pub fn compile_count(&self, spec: &QuerySpec) -> Result<CompiledQuery, CompileError> {
        let mut renderer = Renderer::new(self);
        let sql = renderer.render_count(spec)?;
        Ok(self.finish(sql, renderer.params, RowLayout::scalar("count")))
    }

    /// `INSERT` for a transient record, returning the generated key where supported
    pub fn compile_insert(&self, record: &EntityRecord) -> Result<CompiledQuery, CompileError> {
        let meta = self
            .registry
            .get(record.entity())
            .ok_or_else(|| CompileError::UnknownEntity(record.entity().to_string()))?;
        let pk = meta
            .primary_key()
            .ok_or_else(|| CompileError::UnknownEntity(record.entity().to_string()))?;

        let mut renderer = Renderer::new(self);
        let mut columns = Vec::new();
        let mut values = Vec::new();

        if !record.id().is_null() {
            columns.push(pk.column.clone());
            values.push(renderer.bind(record.id()));
        }
        for field in meta.scalar_fields() {
            columns.push(field.column.clone());
            values.push(renderer.bind(record.get(&field.name).unwrap_or(&Value::Null)));
        }
        for association in meta.to_one_associations() {
            if let Some(join_column) = &association.join_column {
                columns.push(join_column.clone());
                values.push(renderer.bind(&record.association_key(&association.name)));
            }
        }

        let mut sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", meta.table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                meta.table,
                columns.join(", "),
                values.join(", ")
            )
        };

        let layout = if self.dialect.supports_returning() {
            sql.push_str(&format!(" RETURNING {}", pk.column));
            RowLayout::scalar(pk.name.clone())
        } else {
            RowLayout::default()
        };

        Ok(self.finish(sql, renderer.params, layout))
    }

    fn finish(&self, sql: String, params: Vec<Value>, layout: RowLayout) -> CompiledQuery {
        debug!(dialect = %self.dialect, params = params.len(), sql = %sql, "compiled statement");
        CompiledQuery {
            sql,
            params,
            layout,
            dialect: self.dialect,
        }
    }
}

/// Columns selected for an entity, in decoding order
pub fn entity_columns(meta: &EntityMeta, alias: &str) -> Vec<String> {
    let mut columns = Vec::with_capacity(meta.column_count());
    if let Some(pk) = meta.primary_key() {
        columns.push(format!("{}.{}", alias, pk.column));
    }
    for field in meta.scalar_fields() {
        columns.push(format!("{}.{}", alias, field.column));
    }
    for association in meta.to_one_associations() {
        if let Some(join_column) = &association.join_column {
            columns.push(format!("{}.{}", alias, join_column));
        }
    }
    columns
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectMode {
    Rows,
    Subquery,
}

type Declared = Vec<(String, Arc<EntityMeta>)>;

/// Aliases visible to an expression; subqueries see their enclosing query
#[derive(Clone, Copy)]
struct Scope<'a> {
    entries: &'a [(String, Arc<EntityMeta>)],
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, alias: &str) -> Option<&'a Arc<EntityMeta>> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name == alias)
            .map(|(_, meta)| meta)
            .or_else(|| self.parent.and_then(|parent| parent.lookup(alias)))
    }

    fn prefix(&self, visible: usize) -> Scope<'a> {
        Scope {
            entries: &self.entries[..visible],
            parent: self.parent,
        }
    }
}

struct Renderer<'c> {
    compiler: &'c QueryCompiler,
    params: Vec<Value>,
}

impl<'c> Renderer<'c> {
    fn new(compiler: &'c QueryCompiler) -> Self {
        Self {
            compiler,
            params: Vec::new(),
        }
    }

    fn dialect(&self) -> Dialect {
        self.compiler.dialect
    }

    fn registry(&self) -> &'c MetadataRegistry {
        &self.compiler.registry
    }

    /// Bind a literal; nulls are inlined
    fn bind(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value.clone());
        self.dialect().placeholder(self.params.len(), value.data_type())
    }

    fn render_select(
        &mut self,
        spec: &QuerySpec,
        parent: Option<&Scope<'_>>,
        mode: SelectMode,
    ) -> Result<(String, RowLayout), CompileError> {
        check_paging(spec)?;
        if mode == SelectMode::Subquery && spec.projections.len() != 1 {
            return Err(CompileError::SubqueryProjection(spec.projections.len()));
        }
        let declared = self.declare(spec)?;
        let scope = Scope {
            entries: &declared,
            parent,
        };
        check_grouping(spec)?;

        let (select_list, layout) =
            self.render_projections(spec, &scope, mode == SelectMode::Rows)?;
        let from = self.render_from(spec, &scope)?;

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if spec.distinct { "DISTINCT " } else { "" },
            select_list.join(", "),
            from
        );
        self.render_conditions(spec, &scope, &mut sql)?;
        self.render_order_by(&spec.order_by, &scope, &mut sql)?;
        self.render_paging(spec, &mut sql);

        Ok((sql, layout))
    }

    fn render_count(&mut self, spec: &QuerySpec) -> Result<String, CompileError> {
        check_paging(spec)?;
        let declared = self.declare(spec)?;
        let scope = Scope {
            entries: &declared,
            parent: None,
        };
        check_grouping(spec)?;

        if !spec.group_by.is_empty() || spec.distinct || spec.having.is_some() {
            let inner_list = if spec.distinct {
                self.render_projections(spec, &scope, false)?.0.join(", ")
            } else {
                let mut scratch = Renderer::new(self.compiler);
                scratch.render_projections(spec, &scope, false)?;
                "1".to_string()
            };
            let from = self.render_from(spec, &scope)?;
            let mut inner = format!(
                "SELECT {}{} FROM {}",
                if spec.distinct { "DISTINCT " } else { "" },
                inner_list,
                from
            );
            self.render_conditions(spec, &scope, &mut inner)?;
            return Ok(format!("SELECT COUNT(*) FROM ({}) counted", inner));
        }

        let mut scratch = Renderer::new(self.compiler);
        scratch.render_projections(spec, &scope, false)?;

        let count = match (spec.projections.as_slice(), has_to_many_fetch(spec, self.registry())) {
            ([Projection::Entity(path)], true) => {
                let meta = self.lookup(&scope, path.alias())?;
                let pk = primary_key_column(meta)?;
                format!("COUNT(DISTINCT {}.{})", path.alias(), pk)
            }
            _ => "COUNT(*)".to_string(),
        };

        let from = self.render_from(spec, &scope)?;
        let mut sql = format!("SELECT {} FROM {}", count, from);
        self.render_conditions(spec, &scope, &mut sql)?;
        Ok(sql)
    }

    /// Resolve roots and join targets, checking aliases and association edges
    fn declare(&self, spec: &QuerySpec) -> Result<Declared, CompileError> {
        if spec.roots.is_empty() {
            return Err(CompileError::MissingFrom);
        }
        if spec.projections.is_empty() {
            return Err(CompileError::MissingProjection);
        }

        let mut declared: Declared = Vec::new();
        for root in &spec.roots {
            self.push_alias(&mut declared, root)?;
        }

        for join in &spec.joins {
            match &join.association {
                Some(association) => self.check_association_join(&declared, association, join)?,
                None if join.on.is_none() => {
                    return Err(CompileError::MissingJoinCondition(join.target.alias().to_string()))
                }
                None => {}
            }
            self.push_alias(&mut declared, &join.target)?;
        }

        Ok(declared)
    }

    fn push_alias(&self, declared: &mut Declared, path: &EntityPath) -> Result<(), CompileError> {
        let meta = self
            .registry()
            .get(path.entity())
            .ok_or_else(|| CompileError::UnknownEntity(path.entity().to_string()))?;
        if declared.iter().any(|(alias, _)| alias == path.alias()) {
            return Err(CompileError::DuplicateAlias(path.alias().to_string()));
        }
        declared.push((path.alias().to_string(), meta.clone()));
        Ok(())
    }

    fn check_association_join(
        &self,
        declared: &Declared,
        association: &AssociationPath,
        join: &JoinClause,
    ) -> Result<(), CompileError> {
        let (_, source) = declared
            .iter()
            .find(|(alias, _)| *alias == association.source_alias)
            .ok_or_else(|| CompileError::UnknownAlias(association.source_alias.clone()))?;
        let meta = source
            .association(&association.name)
            .ok_or_else(|| CompileError::UnknownAssociation {
                entity: source.name.clone(),
                association: association.name.clone(),
            })?;
        if meta.target != join.target.entity() {
            return Err(CompileError::JoinTargetMismatch {
                alias: join.target.alias().to_string(),
                declared: join.target.entity().to_string(),
                association: association.describe(),
                target: meta.target.clone(),
            });
        }
        Ok(())
    }

    fn lookup<'s>(&self, scope: &Scope<'s>, alias: &str) -> Result<&'s Arc<EntityMeta>, CompileError> {
        scope
            .lookup(alias)
            .ok_or_else(|| CompileError::UnknownAlias(alias.to_string()))
    }

    fn render_projections(
        &mut self,
        spec: &QuerySpec,
        scope: &Scope<'_>,
        include_fetches: bool,
    ) -> Result<(Vec<String>, RowLayout), CompileError> {
        let mut columns = Vec::new();
        let mut layout = RowLayout::default();

        for projection in &spec.projections {
            match projection {
                Projection::Entity(path) => {
                    let meta = self.lookup(scope, path.alias())?;
                    let entity_cols = entity_columns(meta, path.alias());
                    layout.items.push(LayoutItem::Entity {
                        alias: path.alias().to_string(),
                        entity: meta.name.clone(),
                        width: entity_cols.len(),
                    });
                    columns.extend(entity_cols);
                }
                Projection::Expr(expr) => {
                    columns.push(self.render_expr(expr, scope)?);
                    layout.items.push(LayoutItem::Scalar {
                        label: expr.label(),
                    });
                }
            }
        }

        if include_fetches {
            for join in spec.fetch_joins() {
                let Some(association) = &join.association else {
                    continue;
                };
                let meta = self.lookup(scope, join.target.alias())?;
                let source = self.lookup(scope, &association.source_alias)?;
                let to_many = source
                    .association(&association.name)
                    .map(|a| a.cardinality == Cardinality::ToMany)
                    .unwrap_or(false);
                let entity_cols = entity_columns(meta, join.target.alias());
                layout.fetches.push(FetchLayout {
                    source_alias: association.source_alias.clone(),
                    association: association.name.clone(),
                    alias: join.target.alias().to_string(),
                    entity: meta.name.clone(),
                    to_many,
                    width: entity_cols.len(),
                });
                columns.extend(entity_cols);
            }
        }

        Ok((columns, layout))
    }

    fn render_from(&mut self, spec: &QuerySpec, scope: &Scope<'_>) -> Result<String, CompileError> {
        let mut sql = String::new();

        for (index, root) in spec.roots.iter().enumerate() {
            let meta = self.lookup(scope, root.alias())?;
            if index > 0 {
                // Cartesian product, narrowed only by WHERE
                sql.push_str(" CROSS JOIN ");
            }
            sql.push_str(&format!("{} {}", meta.table, root.alias()));
        }

        for (index, join) in spec.joins.iter().enumerate() {
            let visible = scope.prefix(spec.roots.len() + index + 1);
            let target = self.lookup(&visible, join.target.alias())?;

            let mut conditions = Vec::new();
            if let Some(association) = &join.association {
                conditions.push(self.association_condition(&visible, association, join)?);
            }
            if let Some(on) = &join.on {
                let rendered = self.render_expr(on, &visible)?;
                conditions.push(if conditions.is_empty() {
                    rendered
                } else {
                    group_predicate(on, rendered)
                });
            }

            sql.push_str(&format!(
                " {} {} {} ON {}",
                join.kind.keyword(),
                target.table,
                join.target.alias(),
                conditions.join(" AND ")
            ));
        }

        Ok(sql)
    }

    /// Natural key equality of an association edge
    fn association_condition(
        &self,
        scope: &Scope<'_>,
        association: &AssociationPath,
        join: &JoinClause,
    ) -> Result<String, CompileError> {
        let source = self.lookup(scope, &association.source_alias)?;
        let target = self.lookup(scope, join.target.alias())?;
        let unknown = || CompileError::UnknownAssociation {
            entity: source.name.clone(),
            association: association.name.clone(),
        };
        let meta = source.association(&association.name).ok_or_else(unknown)?;

        match meta.cardinality {
            Cardinality::ToOne => {
                let join_column = meta.join_column.as_ref().ok_or_else(unknown)?;
                Ok(format!(
                    "{}.{} = {}.{}",
                    association.source_alias,
                    join_column,
                    join.target.alias(),
                    primary_key_column(target)?
                ))
            }
            Cardinality::ToMany => {
                let inverse = meta
                    .mapped_by
                    .as_ref()
                    .and_then(|mapped_by| target.association(mapped_by))
                    .and_then(|inverse| inverse.join_column.as_ref())
                    .ok_or_else(unknown)?;
                Ok(format!(
                    "{}.{} = {}.{}",
                    join.target.alias(),
                    inverse,
                    association.source_alias,
                    primary_key_column(source)?
                ))
            }
        }
    }

    /// WHERE, GROUP BY and HAVING
    fn render_conditions(
        &mut self,
        spec: &QuerySpec,
        scope: &Scope<'_>,
        sql: &mut String,
    ) -> Result<(), CompileError> {
        if let Some(filter) = &spec.filter {
            let rendered = self.render_expr(filter, scope)?;
            sql.push_str(&format!(" WHERE {}", rendered));
        }

        if !spec.group_by.is_empty() {
            let mut keys = Vec::with_capacity(spec.group_by.len());
            for expr in &spec.group_by {
                keys.push(self.render_expr(expr, scope)?);
            }
            sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
        }

        if let Some(having) = &spec.having {
            let rendered = self.render_expr(having, scope)?;
            sql.push_str(&format!(" HAVING {}", rendered));
        }

        Ok(())
    }

    fn render_order_by(
        &mut self,
        order_by: &[OrderSpecifier],
        scope: &Scope<'_>,
        sql: &mut String,
    ) -> Result<(), CompileError> {
        if order_by.is_empty() {
            return Ok(());
        }

        let mut items = Vec::new();
        for order in order_by {
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };

            if self.dialect().supports_nulls_ordering() {
                let key = self.render_expr(&order.expr, scope)?;
                let nulls = match order.nulls {
                    NullHandling::Default => "",
                    NullHandling::NullsFirst => " NULLS FIRST",
                    NullHandling::NullsLast => " NULLS LAST",
                };
                items.push(format!("{} {}{}", key, direction, nulls));
            } else {
                // `x IS NULL` sorts 0 before 1, so ASC puts nulls last
                match order.nulls {
                    NullHandling::Default => {}
                    NullHandling::NullsFirst => {
                        let key = self.render_expr(&order.expr, scope)?;
                        items.push(format!("{} IS NULL DESC", key));
                    }
                    NullHandling::NullsLast => {
                        let key = self.render_expr(&order.expr, scope)?;
                        items.push(format!("{} IS NULL ASC", key));
                    }
                }
                let key = self.render_expr(&order.expr, scope)?;
                items.push(format!("{} {}", key, direction));
            }
        }

        sql.push_str(&format!(" ORDER BY {}", items.join(", ")));
        Ok(())
    }

    fn render_paging(&self, spec: &QuerySpec, sql: &mut String) {
        match (spec.limit, spec.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => match self.dialect().unbounded_limit() {
                Some(unbounded) => sql.push_str(&format!(" LIMIT {} OFFSET {}", unbounded, offset)),
                None => sql.push_str(&format!(" OFFSET {}", offset)),
            },
            (None, None) => {}
        }
    }

    fn render_subquery(&mut self, spec: &QuerySpec, scope: &Scope<'_>) -> Result<String, CompileError> {
        let (sql, _) = self.render_select(spec, Some(scope), SelectMode::Subquery)?;
        Ok(format!("({})", sql))
    }

    fn render_expr(&mut self, expr: &Expr, scope: &Scope<'_>) -> Result<String, CompileError> {
        match expr {
            Expr::Column { alias, field, data_type } => {
                let meta = self.lookup(scope, alias)?;
                let declared = meta.field(field).ok_or_else(|| CompileError::UnknownField {
                    entity: meta.name.clone(),
                    field: field.clone(),
                })?;
                if declared.data_type != *data_type {
                    return Err(CompileError::TypeMismatch {
                        left: format!("{}.{} ({})", alias, field, declared.data_type),
                        right: data_type.to_string(),
                    });
                }
                Ok(format!("{}.{}", alias, declared.column))
            }
            Expr::Entity { alias, .. } => {
                let meta = self.lookup(scope, alias)?;
                Ok(format!("{}.{}", alias, primary_key_column(meta)?))
            }
            Expr::Literal(value) => Ok(self.bind(value)),
            Expr::Binary { op, left, right } => self.render_binary(*op, left, right, scope),
            Expr::Unary { op, operand } => {
                let inner = self.render_expr(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => format!("NOT ({})", inner),
                    UnaryOp::IsNull => format!("{} IS NULL", inner),
                    UnaryOp::IsNotNull => format!("{} IS NOT NULL", inner),
                })
            }
            Expr::Logical { op, operands } => {
                let joiner = match op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                };
                let mut parts = Vec::with_capacity(operands.len());
                for operand in operands {
                    let rendered = self.render_expr(operand, scope)?;
                    parts.push(group_predicate(operand, rendered));
                }
                Ok(parts.join(joiner))
            }
            Expr::InList { expr, list, negated } => {
                let target = self.render_expr(expr, scope)?;
                if list.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    check_comparable(expr, item)?;
                    items.push(self.render_expr(item, scope)?);
                }
                Ok(format!(
                    "{} {} ({})",
                    target,
                    if *negated { "NOT IN" } else { "IN" },
                    items.join(", ")
                ))
            }
            Expr::InSubquery { expr, subquery, negated } => {
                let target = self.render_expr(expr, scope)?;
                if let (Some(left), Some(right)) = (expr.data_type(), subquery.single_projection_type()) {
                    if !left.is_comparable_with(&right) {
                        return Err(CompileError::TypeMismatch {
                            left: format!("{} ({})", expr.describe(), left),
                            right: format!("(subquery) ({})", right),
                        });
                    }
                }
                let sub = self.render_subquery(subquery, scope)?;
                Ok(format!("{} {} {}", target, if *negated { "NOT IN" } else { "IN" }, sub))
            }
            Expr::Between { expr, low, high } => {
                check_comparable(expr, low)?;
                check_comparable(expr, high)?;
                let target = self.render_expr(expr, scope)?;
                let low = self.render_expr(low, scope)?;
                let high = self.render_expr(high, scope)?;
                Ok(format!("{} BETWEEN {} AND {}", target, low, high))
            }
            Expr::Aggregate { func, arg, distinct } => {
                let inner = self.render_expr(arg, scope)?;
                let call = format!(
                    "{}({}{})",
                    func.sql_name(),
                    if *distinct { "DISTINCT " } else { "" },
                    inner
                );
                Ok(match (self.dialect(), func, arg.data_type()) {
                    (Dialect::Postgres, AggregateFunc::Avg, _) => {
                        format!("CAST({} AS DOUBLE PRECISION)", call)
                    }
                    (Dialect::Postgres, AggregateFunc::Sum, Some(DataType::Integer)) => {
                        format!("CAST({} AS BIGINT)", call)
                    }
                    _ => call,
                })
            }
            Expr::Cast { expr, to } => {
                let inner = self.render_expr(expr, scope)?;
                Ok(format!("CAST({} AS {})", inner, self.dialect().cast_type(*to)))
            }
            Expr::Case { operand, branches, otherwise } => {
                let mut sql = String::from("CASE");
                if let Some(operand) = operand {
                    sql.push(' ');
                    sql.push_str(&self.render_expr(operand, scope)?);
                }
                for (when, then) in branches {
                    let when = self.render_expr(when, scope)?;
                    let then = self.render_expr(then, scope)?;
                    sql.push_str(&format!(" WHEN {} THEN {}", when, then));
                }
                if let Some(otherwise) = otherwise {
                    let otherwise = self.render_expr(otherwise, scope)?;
                    sql.push_str(&format!(" ELSE {}", otherwise));
                }
                sql.push_str(" END");
                Ok(sql)
            }
            Expr::Subquery(spec) => self.render_subquery(spec, scope),
        }
    }

    fn render_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Scope<'_>,
    ) -> Result<String, CompileError> {
        if op.is_comparison() {
            check_comparable(left, right)?;
        }

        let l = self.render_expr(left, scope)?;
        let r = self.render_expr(right, scope)?;
        let l = parenthesize(left, l);
        let r = parenthesize(right, r);

        Ok(match op {
            BinaryOp::LikeEscaped => format!("{} LIKE {} ESCAPE '{}'", l, r, LIKE_ESCAPE),
            BinaryOp::Concat if self.dialect() == Dialect::MySql => format!("CONCAT({}, {})", l, r),
            _ if op.is_arithmetic() || op == BinaryOp::Concat => {
                format!("({} {} {})", l, op.symbol(), r)
            }
            _ => format!("{} {} {}", l, op.symbol(), r),
        })
    }
}

/// Wrap a nested AND/OR inside another connective
fn group_predicate(expr: &Expr, rendered: String) -> String {
    match expr {
        Expr::Logical { .. } => format!("({})", rendered),
        _ => rendered,
    }
}

/// Wrap predicates used as operands of another operator
fn parenthesize(expr: &Expr, rendered: String) -> String {
    match expr {
        Expr::Logical { .. } => format!("({})", rendered),
        Expr::Binary { op, .. } if op.is_comparison() => format!("({})", rendered),
        _ => rendered,
    }
}

fn primary_key_column(meta: &EntityMeta) -> Result<&str, CompileError> {
    meta.primary_key()
        .map(|pk| pk.column.as_str())
        .ok_or_else(|| CompileError::UnknownEntity(meta.name.clone()))
}

fn check_comparable(left: &Expr, right: &Expr) -> Result<(), CompileError> {
    if let (Some(l), Some(r)) = (left.data_type(), right.data_type()) {
        if !l.is_comparable_with(&r) {
            return Err(CompileError::TypeMismatch {
                left: format!("{} ({})", left.describe(), l),
                right: format!("{} ({})", right.describe(), r),
            });
        }
    }
    Ok(())
}

fn check_paging(spec: &QuerySpec) -> Result<(), CompileError> {
    if let Some(limit) = spec.limit {
        if limit < 0 {
            return Err(CompileError::NegativeLimit(limit));
        }
    }
    if let Some(offset) = spec.offset {
        if offset < 0 {
            return Err(CompileError::NegativeOffset(offset));
        }
    }
    Ok(())
}

/// First column reference in `expr` that is neither grouped nor under an aggregate
fn find_ungrouped<'e>(expr: &'e Expr, group_by: &[Expr]) -> Option<&'e Expr> {
    if expr.is_aggregate() || group_by.contains(expr) {
        return None;
    }
    match expr {
        Expr::Column { .. } | Expr::Entity { .. } => Some(expr),
        _ => expr
            .children()
            .into_iter()
            .find_map(|child| find_ungrouped(child, group_by)),
    }
}

fn check_grouping(spec: &QuerySpec) -> Result<(), CompileError> {
    if spec.group_by.is_empty() {
        if spec.has_aggregate_projection() {
            for projection in &spec.projections {
                let ungrouped = match projection {
                    Projection::Entity(_) => true,
                    Projection::Expr(expr) => find_ungrouped(expr, &[]).is_some(),
                };
                if ungrouped {
                    return Err(CompileError::MissingGroupBy);
                }
            }
        }
    } else {
        for projection in &spec.projections {
            let ungrouped = match projection {
                Projection::Entity(path) => !spec.group_by.contains(&path.as_expr()),
                Projection::Expr(expr) => find_ungrouped(expr, &spec.group_by).is_some(),
            };
            if ungrouped {
                return Err(CompileError::UngroupedProjection(projection.label()));
            }
        }
    }

    if let Some(having) = &spec.having {
        if let Some(offending) = find_ungrouped(having, &spec.group_by) {
            return Err(CompileError::InvalidHaving(offending.describe()));
        }
    }

    Ok(())
}

fn has_to_many_fetch(spec: &QuerySpec, registry: &MetadataRegistry) -> bool {
    spec.joins.iter().any(|join| {
        join.fetch
            && join.association.as_ref().map_or(false, |association| {
                spec.declared_paths()
                    .find(|path| path.alias() == association.source_alias)
                    .and_then(|path| registry.association(path.entity(), &association.name).ok())
                    .map_or(false, |meta| meta.cardinality == Cardinality::ToMany)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::query_spec::JoinKind;
    use crate::expr::kinds::{Int, Text};
    use crate::metadata::entity::{AssociationMeta, FieldMeta};

    fn registry() -> Arc<MetadataRegistry> {
        let mut registry = MetadataRegistry::new();
        registry
            .register(
                EntityMeta::new("Member", "member")
                    .with_id_column("id", "member_id")
                    .with_field(FieldMeta::new("username", DataType::Text))
                    .with_field(FieldMeta::new("age", DataType::Integer).not_null())
                    .with_association(AssociationMeta::to_one("team", "Team", "team_id")),
            )
            .unwrap();
        registry
            .register(
                EntityMeta::new("Team", "team")
                    .with_id_column("id", "team_id")
                    .with_field(FieldMeta::new("name", DataType::Text))
                    .with_association(AssociationMeta::to_many("members", "Member", "team")),
            )
            .unwrap();
        registry.freeze().unwrap()
    }

    fn compiler(dialect: Dialect) -> QueryCompiler {
        QueryCompiler::new(registry(), dialect)
    }

    fn member() -> EntityPath {
        EntityPath::new("Member", "member")
    }

    fn team() -> EntityPath {
        EntityPath::new("Team", "team")
    }

    fn select_members() -> QuerySpec {
        let mut spec = QuerySpec::with_projections(vec![Projection::from(&member())]);
        spec.roots.push(member());
        spec
    }

    #[test]
    fn test_compile_entity_select() {
        let mut spec = select_members();
        spec.add_filter(member().column::<Text>("username").eq("member1").into_expr());

        let compiled = compiler(Dialect::Sqlite).compile(&spec).unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT member.member_id, member.username, member.age, member.team_id FROM member member WHERE member.username = ?1"
        );
        assert_eq!(compiled.params, vec![Value::Text("member1".to_string())]);
        assert_eq!(compiled.layout.width(), 4);
        assert!(compiled.verify().is_ok());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut spec = select_members();
        spec.add_filter(member().column::<Int>("age").between(10, 30).into_expr());
        spec.order_by.push(member().column::<Int>("age").desc());

        let compiler = compiler(Dialect::Postgres);
        let first = compiler.compile(&spec).unwrap();
        let second = compiler.compile(&spec).unwrap();

        assert_eq!(first, second);
        assert!(first.sql.contains("member.age BETWEEN $1::bigint AND $2::bigint"));
    }

    #[test]
    fn test_association_join_with_on() {
        let mut spec = QuerySpec::with_projections(vec![
            Projection::from(&member()),
            Projection::from(&team()),
        ]);
        spec.roots.push(member());
        let mut join = JoinClause::association(JoinKind::Left, member().association("team"), team());
        join.on = Some(team().column::<Text>("name").eq("teamA").into_expr());
        spec.joins.push(join);

        let compiled = compiler(Dialect::Sqlite).compile(&spec).unwrap();

        assert!(compiled.sql.contains(
            "LEFT OUTER JOIN team team ON member.team_id = team.team_id AND team.name = ?1"
        ));
    }

    #[test]
    fn test_to_many_join_condition() {
        let mut spec = QuerySpec::with_projections(vec![Projection::from(&team())]);
        spec.roots.push(team());
        spec.joins.push(JoinClause::association(JoinKind::Inner, team().association("members"), member()));

        let compiled = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(compiled.sql.contains("INNER JOIN member member ON member.team_id = team.team_id"));
    }

    #[test]
    fn test_cross_join_for_multiple_roots() {
        let mut spec = QuerySpec::with_projections(vec![Projection::from(&member())]);
        spec.roots.push(member());
        spec.roots.push(team());
        spec.add_filter(
            member()
                .column::<Text>("username")
                .eq(team().column::<Text>("name"))
                .into_expr(),
        );

        let compiled = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(compiled.sql.contains("FROM member member CROSS JOIN team team WHERE member.username = team.name"));
    }

    #[test]
    fn test_on_cannot_see_later_alias() {
        let other = EntityPath::new("Team", "other");
        let mut spec = QuerySpec::with_projections(vec![Projection::from(&member())]);
        spec.roots.push(member());
        let mut join = JoinClause::entity(JoinKind::Left, team());
        join.on = Some(team().column::<Text>("name").eq(other.column::<Text>("name")).into_expr());
        spec.joins.push(join);
        let mut second = JoinClause::entity(JoinKind::Left, other.clone());
        second.on = Some(other.column::<Text>("name").eq("x").into_expr());
        spec.joins.push(second);

        match compiler(Dialect::Sqlite).compile(&spec) {
            Err(CompileError::UnknownAlias(alias)) => assert_eq!(alias, "other"),
            other => panic!("Expected UnknownAlias, got {:?}", other),
        }
    }

    #[test]
    fn test_entity_join_requires_on() {
        let mut spec = select_members();
        spec.joins.push(JoinClause::entity(JoinKind::Left, team()));

        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::MissingJoinCondition(_))
        ));
    }

    #[test]
    fn test_join_target_mismatch() {
        let mut spec = select_members();
        spec.joins.push(JoinClause::association(
            JoinKind::Inner,
            member().association("team"),
            EntityPath::new("Member", "m2"),
        ));

        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::JoinTargetMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_alias_in_projection() {
        let mut spec = QuerySpec::with_projections(vec![Projection::from(team().column::<Text>("name"))]);
        spec.roots.push(member());

        match compiler(Dialect::Sqlite).compile(&spec) {
            Err(CompileError::UnknownAlias(alias)) => assert_eq!(alias, "team"),
            _ => panic!("Expected UnknownAlias error"),
        }
    }

    #[test]
    fn test_duplicate_alias() {
        let mut spec = select_members();
        spec.roots.push(member());

        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::DuplicateAlias(_))
        ));
    }

    #[test]
    fn test_unknown_field_and_type_mismatch() {
        let mut spec = QuerySpec::with_projections(vec![Projection::from(member().column::<Text>("nickname"))]);
        spec.roots.push(member());
        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::UnknownField { .. })
        ));

        let mut spec = select_members();
        spec.add_filter(member().column::<Text>("age").eq("10").into_expr());
        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_negative_paging() {
        let mut spec = select_members();
        spec.limit = Some(-1);
        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::NegativeLimit(-1))
        ));

        let mut spec = select_members();
        spec.offset = Some(-5);
        assert!(matches!(
            compiler(Dialect::Sqlite).compile_count(&spec),
            Err(CompileError::NegativeOffset(-5))
        ));
    }

    #[test]
    fn test_missing_from_and_projection() {
        let spec = QuerySpec::with_projections(vec![Projection::from(&member())]);
        assert!(matches!(compiler(Dialect::Sqlite).compile(&spec), Err(CompileError::MissingFrom)));

        let mut spec = QuerySpec::new();
        spec.roots.push(member());
        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::MissingProjection)
        ));
    }

    #[test]
    fn test_grouping_rules() {
        let name = team().column::<Text>("name");
        let age = member().column::<Int>("age");

        let mut spec = QuerySpec::with_projections(vec![Projection::from(&name), Projection::from(age.avg())]);
        spec.roots.push(member());
        spec.joins.push(JoinClause::association(JoinKind::Inner, member().association("team"), team()));
        assert!(matches!(compiler(Dialect::Sqlite).compile(&spec), Err(CompileError::MissingGroupBy)));

        spec.group_by.push(name.expr().clone());
        let compiled = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(compiled.sql.ends_with("GROUP BY team.name"));

        spec.add_having(age.gt(10).into_expr());
        match compiler(Dialect::Sqlite).compile(&spec) {
            Err(CompileError::InvalidHaving(expr)) => assert_eq!(expr, "member.age"),
            _ => panic!("Expected InvalidHaving error"),
        }

        spec.having = Some(age.avg().gt(10).into_expr());
        assert!(compiler(Dialect::Sqlite).compile(&spec).is_ok());

        spec.projections.push(Projection::from(member().column::<Text>("username")));
        match compiler(Dialect::Sqlite).compile(&spec) {
            Err(CompileError::UngroupedProjection(label)) => assert_eq!(label, "username"),
            _ => panic!("Expected UngroupedProjection error"),
        }
    }

    #[test]
    fn test_nulls_ordering_per_dialect() {
        let mut spec = select_members();
        spec.order_by.push(member().column::<Int>("age").desc());
        spec.order_by.push(member().column::<Text>("username").asc().nulls_last());

        let sqlite = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(sqlite.sql.ends_with("ORDER BY member.age DESC, member.username ASC NULLS LAST"));

        let mysql = compiler(Dialect::MySql).compile(&spec).unwrap();
        assert!(mysql.sql.ends_with(
            "ORDER BY member.age DESC, member.username IS NULL ASC, member.username ASC"
        ));
    }

    #[test]
    fn test_paging_rendering() {
        let mut spec = select_members();
        spec.offset = Some(1);

        let sqlite = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(sqlite.sql.ends_with("LIMIT -1 OFFSET 1"));

        let postgres = compiler(Dialect::Postgres).compile(&spec).unwrap();
        assert!(postgres.sql.ends_with(" OFFSET 1"));
        assert!(!postgres.sql.contains("LIMIT"));

        spec.limit = Some(2);
        let sqlite = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(sqlite.sql.ends_with("LIMIT 2 OFFSET 1"));
    }

    #[test]
    fn test_count_drops_order_and_paging() {
        let mut spec = select_members();
        spec.add_filter(member().column::<Int>("age").goe(20).into_expr());
        spec.order_by.push(member().column::<Text>("username").desc());
        spec.offset = Some(1);
        spec.limit = Some(2);

        let compiled = compiler(Dialect::Sqlite).compile_count(&spec).unwrap();
        assert_eq!(compiled.sql, "SELECT COUNT(*) FROM member member WHERE member.age >= ?1");
        assert_eq!(compiled.params, vec![Value::Integer(20)]);
    }

    #[test]
    fn test_count_with_group_by_counts_groups() {
        let name = team().column::<Text>("name");
        let mut spec = QuerySpec::with_projections(vec![
            Projection::from(&name),
            Projection::from(member().column::<Int>("age").avg()),
        ]);
        spec.roots.push(member());
        spec.joins.push(JoinClause::association(JoinKind::Inner, member().association("team"), team()));
        spec.group_by.push(name.into_expr());

        let compiled = compiler(Dialect::Sqlite).compile_count(&spec).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(*) FROM (SELECT 1 FROM member member INNER JOIN team team ON member.team_id = team.team_id GROUP BY team.name) counted"
        );
    }

    #[test]
    fn test_count_with_to_many_fetch_counts_roots() {
        let mut spec = QuerySpec::with_projections(vec![Projection::from(&team())]);
        spec.roots.push(team());
        let mut join = JoinClause::association(JoinKind::Left, team().association("members"), member());
        join.fetch = true;
        spec.joins.push(join);

        let compiled = compiler(Dialect::Sqlite).compile_count(&spec).unwrap();
        assert!(compiled.sql.starts_with("SELECT COUNT(DISTINCT team.team_id) FROM team team LEFT OUTER JOIN"));

        let rows = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert_eq!(rows.layout.fetches.len(), 1);
        assert!(rows.layout.fetches[0].to_many);
        assert_eq!(rows.layout.width(), 6);
    }

    #[test]
    fn test_subquery_rendering() {
        let sub = EntityPath::new("Member", "member_sub");
        let mut inner = QuerySpec::with_projections(vec![Projection::from(sub.column::<Int>("age").avg())]);
        inner.roots.push(sub.clone());

        let mut spec = select_members();
        spec.add_filter(
            Expr::binary(
                BinaryOp::Goe,
                member().column::<Int>("age").into_expr(),
                Expr::Subquery(Box::new(inner.clone())),
            ),
        );

        let compiled = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert!(compiled
            .sql
            .ends_with("WHERE member.age >= (SELECT AVG(member_sub.age) FROM member member_sub)"));

        inner.projections.push(Projection::from(&sub));
        let mut spec = select_members();
        spec.add_filter(Expr::Subquery(Box::new(inner)));
        assert!(matches!(
            compiler(Dialect::Sqlite).compile(&spec),
            Err(CompileError::SubqueryProjection(2))
        ));
    }

    #[test]
    fn test_like_escape_and_concat() {
        let username = member().column::<Text>("username");
        let mut spec = QuerySpec::with_projections(vec![Projection::from(
            username.concat("_").concat(member().column::<Int>("age").string_value()),
        )]);
        spec.roots.push(member());
        spec.add_filter(username.starts_with("member").into_expr());

        let sqlite = compiler(Dialect::Sqlite).compile(&spec).unwrap();
        assert_eq!(
            sqlite.sql,
            "SELECT ((member.username || ?1) || CAST(member.age AS TEXT)) FROM member member WHERE member.username LIKE ?2 ESCAPE '!'"
        );

        let mysql = compiler(Dialect::MySql).compile(&spec).unwrap();
        assert!(mysql.sql.starts_with("SELECT CONCAT(CONCAT(member.username, ?), CAST(member.age AS CHAR))"));
    }

    #[test]
    fn test_postgres_aggregate_casts() {
        let age = member().column::<Int>("age");
        let mut spec = QuerySpec::with_projections(vec![
            Projection::from(member().count()),
            Projection::from(age.sum()),
            Projection::from(age.avg()),
        ]);
        spec.roots.push(member());

        let compiled = compiler(Dialect::Postgres).compile(&spec).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT COUNT(member.member_id), CAST(SUM(member.age) AS BIGINT), CAST(AVG(member.age) AS DOUBLE PRECISION) FROM member member"
        );
        assert!(compiled.verify().is_ok());
    }

    #[test]
    fn test_compile_insert() {
        let record = EntityRecord::new("Member")
            .with_value("username", "member1")
            .with_value("age", 10);

        let compiled = compiler(Dialect::Sqlite).compile_insert(&record).unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO member (username, age, team_id) VALUES (?1, ?2, NULL) RETURNING member_id"
        );
        assert_eq!(compiled.params.len(), 2);
    }
}

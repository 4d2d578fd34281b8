use crate::expr::expression::{Expr, LogicalOp};
use crate::expr::order::OrderSpecifier;
use crate::expr::path::{AssociationPath, EntityPath};
use crate::expr::projection::Projection;
use crate::utils::types::DataType;

/// Join flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT OUTER JOIN",
            JoinKind::Right => "RIGHT OUTER JOIN",
        }
    }
}

/// Edge from a declared alias to a newly declared target alias
///
/// With an association path the join condition is the association's key
/// equality, ANDed with `on` when present. Without one (an entity join) the
/// `on` predicate is the whole condition.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub association: Option<AssociationPath>,
    pub target: EntityPath,
    pub on: Option<Expr>,
    pub fetch: bool,
}

impl JoinClause {
    pub fn association(kind: JoinKind, association: AssociationPath, target: EntityPath) -> Self {
        Self {
            kind,
            association: Some(association),
            target,
            on: None,
            fetch: false,
        }
    }

    pub fn entity(kind: JoinKind, target: EntityPath) -> Self {
        Self {
            kind,
            association: None,
            target,
            on: None,
            fetch: false,
        }
    }
}

/// Everything a query says, independent of how it is rendered
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub projections: Vec<Projection>,
    pub roots: Vec<EntityPath>,
    pub joins: Vec<JoinClause>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderSpecifier>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub distinct: bool,
}

fn conjoin(current: Option<Expr>, next: Expr) -> Option<Expr> {
    Some(match current {
        Some(existing) => Expr::logical(LogicalOp::And, existing, next),
        None => next,
    })
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projections(projections: Vec<Projection>) -> Self {
        Self {
            projections,
            ..Self::default()
        }
    }

    /// AND `predicate` into WHERE
    pub fn add_filter(&mut self, predicate: Expr) {
        self.filter = conjoin(self.filter.take(), predicate);
    }

    /// AND `predicate` into HAVING
    pub fn add_having(&mut self, predicate: Expr) {
        self.having = conjoin(self.having.take(), predicate);
    }

    /// Result type of a single scalar projection, as used by subqueries
    pub fn single_projection_type(&self) -> Option<DataType> {
        match self.projections.as_slice() {
            [Projection::Expr(expr)] => expr.data_type(),
            _ => None,
        }
    }

    /// Roots then join targets, in declaration order
    pub fn declared_paths(&self) -> impl Iterator<Item = &EntityPath> {
        self.roots
            .iter()
            .chain(self.joins.iter().map(|join| &join.target))
    }

    pub fn fetch_joins(&self) -> impl Iterator<Item = &JoinClause> {
        self.joins.iter().filter(|join| join.fetch)
    }

    pub fn has_fetch_joins(&self) -> bool {
        self.joins.iter().any(|join| join.fetch)
    }

    pub fn has_aggregate_projection(&self) -> bool {
        self.projections.iter().any(|projection| match projection {
            Projection::Expr(expr) => expr.contains_aggregate(),
            Projection::Entity(_) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::kinds::{Int, Text};

    #[test]
    fn test_filters_accumulate_conjunctively() {
        let member = EntityPath::new("Member", "member");
        let username = member.column::<Text>("username");
        let age = member.column::<Int>("age");

        let mut accumulated = QuerySpec::new();
        accumulated.add_filter(username.eq("member1").into_expr());
        accumulated.add_filter(age.eq(10).into_expr());

        let mut chained = QuerySpec::new();
        chained.add_filter(username.eq("member1").and(age.eq(10)).into_expr());

        assert_eq!(accumulated.filter, chained.filter);
    }

    #[test]
    fn test_declared_paths_order() {
        let member = EntityPath::new("Member", "member");
        let team = EntityPath::new("Team", "team");

        let mut spec = QuerySpec::new();
        spec.roots.push(member.clone());
        spec.joins.push(JoinClause::association(JoinKind::Left, member.association("team"), team.clone()));

        let aliases: Vec<&str> = spec.declared_paths().map(EntityPath::alias).collect();
        assert_eq!(aliases, vec!["member", "team"]);
        assert!(!spec.has_fetch_joins());
    }

    #[test]
    fn test_aggregate_detection() {
        let member = EntityPath::new("Member", "member");
        let spec = QuerySpec::with_projections(vec![
            Projection::from(member.column::<Text>("username")),
            Projection::from(member.column::<Int>("age").avg()),
        ]);

        assert!(spec.has_aggregate_projection());
        assert_eq!(spec.single_projection_type(), None);
    }
}

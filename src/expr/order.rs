use crate::expr::expression::Expr;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Placement of NULL sort keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullHandling {
    /// Whatever the backing store does
    Default,
    NullsFirst,
    NullsLast,
}

/// One ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpecifier {
    pub expr: Expr,
    pub direction: Direction,
    pub nulls: NullHandling,
}

impl OrderSpecifier {
    pub fn new(expr: Expr, direction: Direction) -> Self {
        Self {
            expr,
            direction,
            nulls: NullHandling::Default,
        }
    }

    /// Nulls sort before every non-null key, independent of direction
    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullHandling::NullsFirst;
        self
    }

    /// Nulls sort after every non-null key, independent of direction
    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullHandling::NullsLast;
        self
    }
}

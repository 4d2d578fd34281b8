use std::marker::PhantomData;
use crate::expr::expression::{Expr, Expression, IntoExpression, Predicate};
use crate::expr::kinds::SqlKind;

/// Accumulated CASE branches
#[derive(Debug, Clone, Default)]
struct Branches {
    operand: Option<Expr>,
    branches: Vec<(Expr, Expr)>,
}

impl Branches {
    fn finish<R: SqlKind>(self, otherwise: Option<Expr>) -> Expression<R> {
        Expression::from_expr(Expr::Case {
            operand: self.operand.map(Box::new),
            branches: self.branches,
            otherwise: otherwise.map(Box::new),
        })
    }
}

/// Searched CASE: `CASE WHEN <predicate> THEN ... END`
///
/// ```ignore
/// let label = CaseBuilder::new()
///     .when(member.age().between(0, 20)).then("0~20")
///     .when(member.age().between(21, 30)).then("21~30")
///     .otherwise("other");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CaseBuilder;

impl CaseBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn when(self, condition: Predicate) -> CaseWhen {
        CaseWhen {
            state: Branches::default(),
            condition: condition.into_expr(),
        }
    }
}

/// First WHEN of a searched CASE; the result type is fixed by its THEN
#[derive(Debug, Clone)]
pub struct CaseWhen {
    state: Branches,
    condition: Expr,
}

impl CaseWhen {
    pub fn then<R: SqlKind>(mut self, value: impl IntoExpression<R>) -> CaseThen<R> {
        self.state
            .branches
            .push((self.condition, value.into_expression().into_expr()));
        CaseThen {
            state: self.state,
            kind: PhantomData,
        }
    }
}

/// Searched CASE with at least one complete branch
#[derive(Debug, Clone)]
pub struct CaseThen<R: SqlKind> {
    state: Branches,
    kind: PhantomData<R>,
}

impl<R: SqlKind> CaseThen<R> {
    pub fn when(self, condition: Predicate) -> CaseWhenTyped<R> {
        CaseWhenTyped {
            state: self.state,
            condition: condition.into_expr(),
            kind: PhantomData,
        }
    }

    pub fn otherwise(self, value: impl IntoExpression<R>) -> Expression<R> {
        self.state.finish(Some(value.into_expression().into_expr()))
    }

    /// Close without a fallback; unmatched rows yield NULL
    pub fn end(self) -> Expression<R> {
        self.state.finish(None)
    }
}

#[derive(Debug, Clone)]
pub struct CaseWhenTyped<R: SqlKind> {
    state: Branches,
    condition: Expr,
    kind: PhantomData<R>,
}

impl<R: SqlKind> CaseWhenTyped<R> {
    pub fn then(mut self, value: impl IntoExpression<R>) -> CaseThen<R> {
        self.state
            .branches
            .push((self.condition, value.into_expression().into_expr()));
        CaseThen {
            state: self.state,
            kind: PhantomData,
        }
    }
}

/// Simple CASE over an operand of kind `T`, started by [`Expression::when`]
#[derive(Debug, Clone)]
pub struct SimpleCase<T: SqlKind> {
    state: Branches,
    value: Expr,
    kind: PhantomData<T>,
}

impl<T: SqlKind> SimpleCase<T> {
    pub(crate) fn new(operand: Expr, value: Expr) -> Self {
        Self {
            state: Branches {
                operand: Some(operand),
                branches: Vec::new(),
            },
            value,
            kind: PhantomData,
        }
    }

    pub fn then<R: SqlKind>(mut self, result: impl IntoExpression<R>) -> SimpleCaseThen<T, R> {
        self.state
            .branches
            .push((self.value, result.into_expression().into_expr()));
        SimpleCaseThen {
            state: self.state,
            kinds: PhantomData,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimpleCaseThen<T: SqlKind, R: SqlKind> {
    state: Branches,
    kinds: PhantomData<(T, R)>,
}

impl<T: SqlKind, R: SqlKind> SimpleCaseThen<T, R> {
    pub fn when(self, value: impl IntoExpression<T>) -> SimpleCaseWhen<T, R> {
        SimpleCaseWhen {
            state: self.state,
            value: value.into_expression().into_expr(),
            kinds: PhantomData,
        }
    }

    pub fn otherwise(self, result: impl IntoExpression<R>) -> Expression<R> {
        self.state.finish(Some(result.into_expression().into_expr()))
    }

    pub fn end(self) -> Expression<R> {
        self.state.finish(None)
    }
}

#[derive(Debug, Clone)]
pub struct SimpleCaseWhen<T: SqlKind, R: SqlKind> {
    state: Branches,
    value: Expr,
    kinds: PhantomData<(T, R)>,
}

impl<T: SqlKind, R: SqlKind> SimpleCaseWhen<T, R> {
    pub fn then(mut self, result: impl IntoExpression<R>) -> SimpleCaseThen<T, R> {
        self.state
            .branches
            .push((self.value, result.into_expression().into_expr()));
        SimpleCaseThen {
            state: self.state,
            kinds: PhantomData,
        }
    }
}

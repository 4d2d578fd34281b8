use std::marker::PhantomData;
use crate::engine::query_spec::QuerySpec;
use crate::expr::case_builder::SimpleCase;
use crate::expr::kinds::{Bool, Float, Int, Numeric, SqlKind, Text};
use crate::expr::order::{Direction, OrderSpecifier};
use crate::utils::types::{DataType, Value};

/// Escape character used for patterns built by `starts_with`, `ends_with` and `contains`
pub const LIKE_ESCAPE: char = '!';

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Goe,
    Lt,
    Loe,
    Like,
    LikeEscaped,
    Concat,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// Whether both operands must have comparable types
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Goe | BinaryOp::Lt | BinaryOp::Loe
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        )
    }

    /// SQL operator token; `Concat` is dialect specific and rendered separately
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Goe => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Loe => "<=",
            BinaryOp::Like | BinaryOp::LikeEscaped => "LIKE",
            BinaryOp::Concat => "||",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    IsNull,
    IsNotNull,
}

/// N-ary logical connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFunc {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Min => "MIN",
        }
    }
}

/// Untyped expression node shared by every typed [`Expression`]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Scalar field of the entity bound to `alias`
    Column { alias: String, field: String, data_type: DataType },
    /// The entity bound to `alias` as a whole; renders as its primary key inside functions
    Entity { alias: String, entity: String },
    /// Bound parameter, or `NULL` when the value is null
    Literal(Value),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Logical { op: LogicalOp, operands: Vec<Expr> },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    InSubquery { expr: Box<Expr>, subquery: Box<QuerySpec>, negated: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr> },
    Aggregate { func: AggregateFunc, arg: Box<Expr>, distinct: bool },
    Cast { expr: Box<Expr>, to: DataType },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Subquery(Box<QuerySpec>),
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn aggregate(func: AggregateFunc, arg: Expr, distinct: bool) -> Self {
        Expr::Aggregate {
            func,
            arg: Box::new(arg),
            distinct,
        }
    }

    /// Combine two predicates with `op`, flattening nested nodes of the same connective
    pub fn logical(op: LogicalOp, left: Expr, right: Expr) -> Self {
        let mut operands = Vec::new();
        for side in [left, right] {
            match side {
                Expr::Logical { op: inner, operands: nested } if inner == op => {
                    operands.extend(nested)
                }
                other => operands.push(other),
            }
        }
        Expr::Logical { op, operands }
    }

    /// Conjunction of all predicates, `None` when there are none
    pub fn conjunction(predicates: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        predicates
            .into_iter()
            .reduce(|acc, next| Expr::logical(LogicalOp::And, acc, next))
    }

    /// Static result type; `None` for untyped nulls and whole entities
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Expr::Column { data_type, .. } => Some(*data_type),
            Expr::Entity { .. } => None,
            Expr::Literal(value) => value.data_type(),
            Expr::Binary { op, left, right } => {
                if op.is_arithmetic() {
                    match (left.data_type(), right.data_type()) {
                        (Some(DataType::Float), _) | (_, Some(DataType::Float)) => Some(DataType::Float),
                        (l, r) => l.or(r),
                    }
                } else if *op == BinaryOp::Concat {
                    Some(DataType::Text)
                } else {
                    Some(DataType::Boolean)
                }
            }
            Expr::Unary { .. }
            | Expr::Logical { .. }
            | Expr::InList { .. }
            | Expr::InSubquery { .. }
            | Expr::Between { .. } => Some(DataType::Boolean),
            Expr::Aggregate { func, arg, .. } => match func {
                AggregateFunc::Count => Some(DataType::Integer),
                AggregateFunc::Avg => Some(DataType::Float),
                _ => arg.data_type(),
            },
            Expr::Cast { to, .. } => Some(*to),
            Expr::Case { branches, otherwise, .. } => branches
                .iter()
                .find_map(|(_, result)| result.data_type())
                .or_else(|| otherwise.as_ref().and_then(|e| e.data_type())),
            Expr::Subquery(spec) => spec.single_projection_type(),
        }
    }

    /// Direct children, not descending into subqueries
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. } | Expr::Entity { .. } | Expr::Literal(_) | Expr::Subquery(_) => {
                Vec::new()
            }
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Unary { operand, .. } => vec![operand],
            Expr::Logical { operands, .. } => operands.iter().collect(),
            Expr::InList { expr, list, .. } => {
                let mut children: Vec<&Expr> = vec![expr];
                children.extend(list.iter());
                children
            }
            Expr::InSubquery { expr, .. } => vec![expr],
            Expr::Between { expr, low, high } => vec![expr, low, high],
            Expr::Aggregate { arg, .. } => vec![arg],
            Expr::Cast { expr, .. } => vec![expr],
            Expr::Case { operand, branches, otherwise } => {
                let mut children: Vec<&Expr> = Vec::new();
                if let Some(operand) = operand {
                    children.push(operand);
                }
                for (when, then) in branches {
                    children.push(when);
                    children.push(then);
                }
                if let Some(otherwise) = otherwise {
                    children.push(otherwise);
                }
                children
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
    }

    /// Whether an aggregate appears anywhere outside nested subqueries
    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().into_iter().any(Expr::contains_aggregate)
    }

    /// Whether the expression reads a column of the current query level
    pub fn references_columns(&self) -> bool {
        match self {
            Expr::Column { .. } | Expr::Entity { .. } => true,
            _ => self.children().into_iter().any(Expr::references_columns),
        }
    }

    /// Short human readable form used for labels and error messages
    pub fn describe(&self) -> String {
        match self {
            Expr::Column { alias, field, .. } => format!("{}.{}", alias, field),
            Expr::Entity { alias, .. } => alias.clone(),
            Expr::Literal(Value::Text(s)) => format!("'{}'", s),
            Expr::Literal(value) => value.to_string(),
            Expr::Binary { op, left, right } => {
                format!("{} {} {}", left.describe(), op.symbol(), right.describe())
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => format!("not {}", operand.describe()),
                UnaryOp::IsNull => format!("{} is null", operand.describe()),
                UnaryOp::IsNotNull => format!("{} is not null", operand.describe()),
            },
            Expr::Logical { op, operands } => {
                let joiner = match op {
                    LogicalOp::And => " and ",
                    LogicalOp::Or => " or ",
                };
                let parts: Vec<String> = operands.iter().map(Expr::describe).collect();
                format!("({})", parts.join(joiner))
            }
            Expr::InList { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(Expr::describe).collect();
                let keyword = if *negated { "not in" } else { "in" };
                format!("{} {} ({})", expr.describe(), keyword, items.join(", "))
            }
            Expr::InSubquery { expr, negated, .. } => {
                let keyword = if *negated { "not in" } else { "in" };
                format!("{} {} (subquery)", expr.describe(), keyword)
            }
            Expr::Between { expr, low, high } => format!(
                "{} between {} and {}",
                expr.describe(),
                low.describe(),
                high.describe()
            ),
            Expr::Aggregate { func, arg, distinct } => format!(
                "{}({}{})",
                func.sql_name().to_lowercase(),
                if *distinct { "distinct " } else { "" },
                arg.describe()
            ),
            Expr::Cast { expr, to } => format!("cast({} as {})", expr.describe(), to),
            Expr::Case { .. } => "case".to_string(),
            Expr::Subquery(_) => "(subquery)".to_string(),
        }
    }

    /// Column label used to address tuple cells by name
    pub fn label(&self) -> String {
        match self {
            Expr::Column { field, .. } => field.clone(),
            Expr::Aggregate { func, arg, distinct } => format!(
                "{}({}{})",
                func.sql_name().to_lowercase(),
                if *distinct { "distinct " } else { "" },
                arg.label()
            ),
            other => other.describe(),
        }
    }
}

/// Expression with a static result type `T`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression<T: SqlKind> {
    expr: Expr,
    kind: PhantomData<T>,
}

/// Conversion of literals, paths and subqueries into typed expressions
pub trait IntoExpression<T: SqlKind> {
    fn into_expression(self) -> Expression<T>;
}

impl<T: SqlKind> IntoExpression<T> for Expression<T> {
    fn into_expression(self) -> Expression<T> {
        self
    }
}

impl<T: SqlKind> IntoExpression<T> for &Expression<T> {
    fn into_expression(self) -> Expression<T> {
        self.clone()
    }
}

impl IntoExpression<Int> for i64 {
    fn into_expression(self) -> Expression<Int> {
        Expression::literal(Value::Integer(self))
    }
}

impl IntoExpression<Float> for f64 {
    fn into_expression(self) -> Expression<Float> {
        Expression::literal(Value::Float(self))
    }
}

impl IntoExpression<Text> for &str {
    fn into_expression(self) -> Expression<Text> {
        Expression::literal(Value::Text(self.to_string()))
    }
}

impl IntoExpression<Text> for String {
    fn into_expression(self) -> Expression<Text> {
        Expression::literal(Value::Text(self))
    }
}

impl IntoExpression<Bool> for bool {
    fn into_expression(self) -> Expression<Bool> {
        Expression::literal(Value::Boolean(self))
    }
}

/// Boolean expression used in WHERE, ON and HAVING
pub type Predicate = Expression<Bool>;

impl<T: SqlKind> Expression<T> {
    pub(crate) fn from_expr(expr: Expr) -> Self {
        Self {
            expr,
            kind: PhantomData,
        }
    }

    pub(crate) fn literal(value: Value) -> Self {
        Self::from_expr(Expr::Literal(value))
    }

    /// Untyped node behind this expression
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    fn compare(&self, op: BinaryOp, other: Expr) -> Predicate {
        Expression::from_expr(Expr::binary(op, self.expr.clone(), other))
    }

    pub fn eq(&self, other: impl IntoExpression<T>) -> Predicate {
        self.compare(BinaryOp::Eq, other.into_expression().expr)
    }

    pub fn ne(&self, other: impl IntoExpression<T>) -> Predicate {
        self.compare(BinaryOp::Ne, other.into_expression().expr)
    }

    pub fn in_list<I>(&self, values: I) -> Predicate
    where
        I: IntoIterator,
        I::Item: IntoExpression<T>,
    {
        Expression::from_expr(Expr::InList {
            expr: Box::new(self.expr.clone()),
            list: values.into_iter().map(|v| v.into_expression().expr).collect(),
            negated: false,
        })
    }

    pub fn not_in<I>(&self, values: I) -> Predicate
    where
        I: IntoIterator,
        I::Item: IntoExpression<T>,
    {
        Expression::from_expr(Expr::InList {
            expr: Box::new(self.expr.clone()),
            list: values.into_iter().map(|v| v.into_expression().expr).collect(),
            negated: true,
        })
    }

    pub fn in_subquery(&self, subquery: crate::engine::query_builder::SubQuery<T>) -> Predicate {
        Expression::from_expr(Expr::InSubquery {
            expr: Box::new(self.expr.clone()),
            subquery: Box::new(subquery.into_spec()),
            negated: false,
        })
    }

    pub fn is_null(&self) -> Predicate {
        Expression::from_expr(Expr::unary(UnaryOp::IsNull, self.expr.clone()))
    }

    pub fn is_not_null(&self) -> Predicate {
        Expression::from_expr(Expr::unary(UnaryOp::IsNotNull, self.expr.clone()))
    }

    pub fn count(&self) -> Expression<Int> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Count, self.expr.clone(), false))
    }

    pub fn count_distinct(&self) -> Expression<Int> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Count, self.expr.clone(), true))
    }

    pub fn max(&self) -> Expression<T> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Max, self.expr.clone(), false))
    }

    pub fn min(&self) -> Expression<T> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Min, self.expr.clone(), false))
    }

    /// Explicit conversion to text; the only way to mix a non-text value into string operations
    pub fn string_value(&self) -> Expression<Text> {
        Expression::from_expr(Expr::Cast {
            expr: Box::new(self.expr.clone()),
            to: DataType::Text,
        })
    }

    pub fn asc(&self) -> OrderSpecifier {
        OrderSpecifier::new(self.expr.clone(), Direction::Asc)
    }

    pub fn desc(&self) -> OrderSpecifier {
        OrderSpecifier::new(self.expr.clone(), Direction::Desc)
    }

    /// Start a simple CASE over this expression
    pub fn when(&self, value: impl IntoExpression<T>) -> SimpleCase<T> {
        SimpleCase::new(self.expr.clone(), value.into_expression().into_expr())
    }
}

impl<T: Numeric> Expression<T> {
    fn arithmetic(&self, op: BinaryOp, other: Expr) -> Expression<T> {
        Expression::from_expr(Expr::binary(op, self.expr.clone(), other))
    }

    pub fn gt<U: Numeric>(&self, other: impl IntoExpression<U>) -> Predicate {
        self.compare(BinaryOp::Gt, other.into_expression().expr)
    }

    pub fn goe<U: Numeric>(&self, other: impl IntoExpression<U>) -> Predicate {
        self.compare(BinaryOp::Goe, other.into_expression().expr)
    }

    pub fn lt<U: Numeric>(&self, other: impl IntoExpression<U>) -> Predicate {
        self.compare(BinaryOp::Lt, other.into_expression().expr)
    }

    pub fn loe<U: Numeric>(&self, other: impl IntoExpression<U>) -> Predicate {
        self.compare(BinaryOp::Loe, other.into_expression().expr)
    }

    /// Inclusive range check
    pub fn between<U: Numeric>(
        &self,
        low: impl IntoExpression<U>,
        high: impl IntoExpression<U>,
    ) -> Predicate {
        Expression::from_expr(Expr::Between {
            expr: Box::new(self.expr.clone()),
            low: Box::new(low.into_expression().expr),
            high: Box::new(high.into_expression().expr),
        })
    }

    pub fn sum(&self) -> Expression<T> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Sum, self.expr.clone(), false))
    }

    pub fn avg(&self) -> Expression<Float> {
        Expression::from_expr(Expr::aggregate(AggregateFunc::Avg, self.expr.clone(), false))
    }

    pub fn add(&self, other: impl IntoExpression<T>) -> Expression<T> {
        self.arithmetic(BinaryOp::Add, other.into_expression().expr)
    }

    pub fn subtract(&self, other: impl IntoExpression<T>) -> Expression<T> {
        self.arithmetic(BinaryOp::Subtract, other.into_expression().expr)
    }

    pub fn multiply(&self, other: impl IntoExpression<T>) -> Expression<T> {
        self.arithmetic(BinaryOp::Multiply, other.into_expression().expr)
    }

    pub fn divide(&self, other: impl IntoExpression<T>) -> Expression<T> {
        self.arithmetic(BinaryOp::Divide, other.into_expression().expr)
    }
}

impl Expression<Text> {
    fn like_escaped(&self, pattern: String) -> Predicate {
        self.compare(BinaryOp::LikeEscaped, Expr::Literal(Value::Text(pattern)))
    }

    pub fn starts_with(&self, prefix: &str) -> Predicate {
        self.like_escaped(format!("{}%", escape_like(prefix)))
    }

    pub fn ends_with(&self, suffix: &str) -> Predicate {
        self.like_escaped(format!("%{}", escape_like(suffix)))
    }

    pub fn contains(&self, needle: &str) -> Predicate {
        self.like_escaped(format!("%{}%", escape_like(needle)))
    }

    /// Raw LIKE with a caller supplied pattern; `%` and `_` keep their wildcard meaning
    pub fn like(&self, pattern: impl IntoExpression<Text>) -> Predicate {
        self.compare(BinaryOp::Like, pattern.into_expression().expr)
    }

    pub fn concat(&self, other: impl IntoExpression<Text>) -> Expression<Text> {
        Expression::from_expr(Expr::binary(
            BinaryOp::Concat,
            self.expr.clone(),
            other.into_expression().expr,
        ))
    }
}

impl Expression<Bool> {
    pub fn and(&self, other: impl IntoExpression<Bool>) -> Predicate {
        Expression::from_expr(Expr::logical(
            LogicalOp::And,
            self.expr.clone(),
            other.into_expression().expr,
        ))
    }

    pub fn or(&self, other: impl IntoExpression<Bool>) -> Predicate {
        Expression::from_expr(Expr::logical(
            LogicalOp::Or,
            self.expr.clone(),
            other.into_expression().expr,
        ))
    }

    pub fn not(&self) -> Predicate {
        Expression::from_expr(Expr::unary(UnaryOp::Not, self.expr.clone()))
    }
}

/// Factory for expressions that are not rooted in a path
pub struct Expressions;

impl Expressions {
    /// Constant projected or compared as a bound parameter
    pub fn constant<T: SqlKind>(value: impl IntoExpression<T>) -> Expression<T> {
        value.into_expression()
    }

    /// Typed SQL NULL
    pub fn null<T: SqlKind>() -> Expression<T> {
        Expression::literal(Value::Null)
    }
}

/// Escape LIKE wildcards with [`LIKE_ESCAPE`]
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == LIKE_ESCAPE || ch == '%' || ch == '_' {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age() -> Expression<Int> {
        Expression::from_expr(Expr::Column {
            alias: "m".to_string(),
            field: "age".to_string(),
            data_type: DataType::Integer,
        })
    }

    fn username() -> Expression<Text> {
        Expression::from_expr(Expr::Column {
            alias: "m".to_string(),
            field: "username".to_string(),
            data_type: DataType::Text,
        })
    }

    #[test]
    fn test_combinators_do_not_mutate_receiver() {
        let age = age();
        let before = age.clone();
        let _ = age.eq(10);
        let _ = age.sum();
        assert_eq!(age, before);
    }

    #[test]
    fn test_and_flattens_conjunctions() {
        let predicate = username().eq("member1").and(age().eq(10)).and(age().lt(50));

        match predicate.expr() {
            Expr::Logical { op: LogicalOp::And, operands } => assert_eq!(operands.len(), 3),
            other => panic!("Expected flattened AND, got {:?}", other),
        }
    }

    #[test]
    fn test_conjunction_matches_chained_and() {
        let chained = username().eq("member1").and(age().eq(10));
        let collected = Expr::conjunction(vec![
            username().eq("member1").into_expr(),
            age().eq(10).into_expr(),
        ]);

        assert_eq!(collected.as_ref(), Some(chained.expr()));
        assert!(Expr::conjunction(Vec::new()).is_none());
    }

    #[test]
    fn test_or_does_not_flatten_into_and() {
        let predicate = age().eq(10).or(age().eq(20)).and(username().is_not_null());

        match predicate.expr() {
            Expr::Logical { op: LogicalOp::And, operands } => {
                assert_eq!(operands.len(), 2);
                assert!(matches!(operands[0], Expr::Logical { op: LogicalOp::Or, .. }));
            }
            other => panic!("Expected AND over OR, got {:?}", other),
        }
    }

    #[test]
    fn test_result_types() {
        assert_eq!(age().avg().expr().data_type(), Some(DataType::Float));
        assert_eq!(age().sum().expr().data_type(), Some(DataType::Integer));
        assert_eq!(age().count().expr().data_type(), Some(DataType::Integer));
        assert_eq!(age().string_value().expr().data_type(), Some(DataType::Text));
        assert_eq!(username().concat("_").expr().data_type(), Some(DataType::Text));
        assert_eq!(age().between(0, 20).expr().data_type(), Some(DataType::Boolean));
    }

    #[test]
    fn test_starts_with_escapes_wildcards() {
        let predicate = username().starts_with("50%_off");

        match predicate.expr() {
            Expr::Binary { op: BinaryOp::LikeEscaped, right, .. } => {
                assert_eq!(**right, Expr::Literal(Value::Text("50!%!_off%".to_string())));
            }
            other => panic!("Expected escaped LIKE, got {:?}", other),
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(username().expr().label(), "username");
        assert_eq!(age().avg().expr().label(), "avg(age)");
        assert_eq!(age().count_distinct().expr().label(), "count(distinct age)");
    }

    #[test]
    fn test_in_list_collects_literals() {
        let predicate = age().in_list([10, 20]);

        match predicate.expr() {
            Expr::InList { list, negated, .. } => {
                assert!(!negated);
                assert_eq!(list, &vec![Expr::Literal(Value::Integer(10)), Expr::Literal(Value::Integer(20))]);
            }
            other => panic!("Expected IN list, got {:?}", other),
        }
    }
}
